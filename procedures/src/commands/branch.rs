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

//! `branch`, `checkout`, and `tag`: branch lifecycle and working-set
//! switching, built directly on `branch_engine` (spec §4.8).

use clap::Parser;

use dolt_core::branch_engine;
use dolt_core::table::TableName;

use crate::ProcedureContext;
use crate::ProcedureError;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct BranchArgs {
    name: Option<String>,
    start_point: Option<String>,
    #[arg(short = 'd', long)]
    delete: bool,
    #[arg(short = 'D')]
    force_delete: bool,
    #[arg(short = 'm', long)]
    rename: bool,
    #[arg(short = 'c', long)]
    copy: bool,
    #[arg(short = 'f', long)]
    force: bool,
}

pub fn branch(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: BranchArgs = parse_args("branch", argv)?;
    let Some(name) = &args.name else {
        return Err(ProcedureError::InvalidArgs("branch requires a name".to_string()));
    };

    if args.delete || args.force_delete {
        ctx.branches.delete_branch(ctx.session.refs(), name, args.force_delete || args.force, &ctx.session.branch)?;
        return Ok(ResultRows::ok());
    }

    if args.rename {
        let new_name = args.start_point.as_ref().ok_or_else(|| ProcedureError::InvalidArgs("branch -m requires a new name".to_string()))?;
        ctx.branches.rename_branch(ctx.session.refs(), name, new_name, args.force)?;
        return Ok(ResultRows::ok());
    }

    if args.copy {
        let new_name = args.start_point.as_ref().ok_or_else(|| ProcedureError::InvalidArgs("branch -c requires a new name".to_string()))?;
        ctx.branches.copy_branch(ctx.session.refs(), name, new_name, args.force)?;
        return Ok(ResultRows::ok());
    }

    let head = ctx.session.refs().resolve_branch(&ctx.session.branch)?;
    let start_spec = args.start_point.as_deref().unwrap_or("HEAD");
    ctx.branches.create_branch(ctx.session.refs(), ctx.session.graph(), name, start_spec, head, args.force)?;
    Ok(ResultRows::ok())
}

#[derive(Parser)]
struct CheckoutArgs {
    target: String,
    #[arg(short = 'b')]
    new_branch: bool,
    #[arg(long)]
    force: bool,
    #[arg(last = true)]
    tables: Vec<String>,
}

pub fn checkout(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: CheckoutArgs = parse_args("checkout", argv)?;

    if !args.tables.is_empty() {
        let tables: Vec<TableName> = args.tables.iter().cloned().map(TableName::unqualified).collect();
        let new_working = branch_engine::checkout_tables_from_commit(ctx.session, ctx.store, &args.target, &tables)?;
        ctx.session.set_working_root(new_working)?;
        return Ok(ResultRows::Checkout { status: 0, message: format!("Updated {} table(s)", tables.len()) });
    }

    let outcome = if args.new_branch {
        branch_engine::checkout_new_branch(ctx.session, ctx.store, ctx.branches, &args.target, "HEAD", args.force)?
    } else if let Some((remote, remote_branch)) = args.target.split_once('/') {
        if ctx.session.refs().has_branch(&args.target) {
            branch_engine::checkout_branch(ctx.session, ctx.store, &args.target, args.force)?
        } else {
            branch_engine::checkout_remote_branch(ctx.session, ctx.store, ctx.branches, remote, remote_branch, args.force)?
        }
    } else {
        branch_engine::checkout_branch(ctx.session, ctx.store, &args.target, args.force)?
    };
    Ok(ResultRows::Checkout { status: outcome.status, message: outcome.message })
}

#[derive(Parser)]
struct TagArgs {
    name: Option<String>,
    target: Option<String>,
    #[arg(short = 'd', long)]
    delete: bool,
    #[arg(short = 'f', long)]
    force: bool,
}

pub fn tag(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: TagArgs = parse_args("tag", argv)?;
    let Some(name) = &args.name else {
        return Err(ProcedureError::InvalidArgs("tag requires a name".to_string()));
    };

    if args.delete {
        ctx.session.refs().delete_tag(name)?;
        return Ok(ResultRows::ok());
    }

    let head = ctx.session.refs().resolve_branch(&ctx.session.branch)?;
    let target_id = match &args.target {
        Some(spec) => ctx.session.graph().resolve(spec, head, ctx.session.refs())?,
        None => head,
    };
    ctx.session.refs().create_tag(name, target_id, args.force)?;
    Ok(ResultRows::ok())
}
