// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! `backup add|remove` (sync, wraps `RefStore`'s own backup bookkeeping)
//! plus the async `sync`/`restore` entry point (spec §4.10).

use clap::Parser;
use clap::Subcommand;

use dolt_core::remote_sync;
use dolt_core::remote_sync::Remote;

use crate::ProcedureContext;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::commands::remote::RemoteConnector;
use crate::parse_args;

#[derive(Subcommand)]
enum BackupCommand {
    Add { name: String, url: String, #[arg(long)] force: bool },
    Remove { name: String },
}

#[derive(Parser)]
struct BackupArgs {
    #[command(subcommand)]
    command: BackupCommand,
}

pub fn backup(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: BackupArgs = parse_args("backup", argv)?;
    match args.command {
        BackupCommand::Add { name, url, force } => {
            remote_sync::backup_add(ctx.session.refs(), &name, &url, force)?;
            Ok(ResultRows::ok())
        }
        BackupCommand::Remove { name } => {
            remote_sync::backup_remove(ctx.session.refs(), &name)?;
            Ok(ResultRows::ok())
        }
    }
}

/// `backup sync <name>`: force-pushes every local branch to the named
/// backup remote.
pub async fn sync(ctx: &mut ProcedureContext<'_>, connector: &dyn RemoteConnector, remote: &Remote) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let db = connector.connect(remote)?;
    let outcome = remote_sync::backup_sync(ctx.session.refs(), ctx.session.graph(), ctx.store, db.as_ref()).await?;
    Ok(ResultRows::Text(format!("pushed {}, rejected {}", outcome.pushed.len(), outcome.rejected.len())))
}

/// `backup restore <name>`: re-clones the database from a backup remote.
/// `target_exists`/`force` are supplied by the caller, since whether a
/// database of the restored name already exists is a SQL-layer concern.
pub async fn restore(
    ctx: &mut ProcedureContext<'_>,
    connector: &dyn RemoteConnector,
    remote: &Remote,
    target_exists: bool,
    force: bool,
) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let db = connector.connect(remote)?;
    let branch = remote_sync::backup_restore(db.as_ref(), ctx.session.refs(), ctx.session.graph(), ctx.store, ctx.branches, target_exists, force).await?;
    Ok(ResultRows::Text(branch))
}
