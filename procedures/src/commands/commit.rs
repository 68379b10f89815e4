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

//! `commit`: stages (when asked), builds a `PendingCommit`, and hands it to
//! the commit engine for optional signing and the atomic advance (spec §4.9).

use clap::Parser;
use dolt_core::commit_engine;
use dolt_core::session::PendingCommitProps;

use crate::ProcedureContext;
use crate::ProcedureError;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct CommitArgs {
    #[arg(short = 'm', long)]
    message: Option<String>,
    #[arg(long)]
    amend: bool,
    #[arg(long)]
    allow_empty: bool,
    #[arg(long)]
    skip_empty: bool,
    #[arg(short = 'a', short_alias = 'A', long = "all")]
    all: bool,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    force: bool,
    #[arg(short = 'S', long = "gpg-sign")]
    gpg_sign: bool,
}

/// Parses `"Name <email>"`, the only author format this crate accepts.
fn parse_author(raw: &str) -> Option<(String, String)> {
    let open = raw.find('<')?;
    let close = raw.find('>')?;
    if close < open {
        return None;
    }
    let name = raw[..open].trim().to_string();
    let email = raw[open + 1..close].trim().to_string();
    Some((name, email))
}

pub fn commit(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: CommitArgs = parse_args("commit", argv)?;

    let roots = ctx.session.get_roots()?;
    let staged = if args.all {
        let working = dolt_core::table::load_root(ctx.store, roots.working).unwrap_or_else(|| dolt_core::table::RootValue::empty(1));
        let staged_root = dolt_core::table::load_root(ctx.store, roots.staged).unwrap_or_else(|| dolt_core::table::RootValue::empty(1));
        let promoted = commit_engine::stage_modified_and_deleted(&working, &staged_root);
        let hash = dolt_core::table::store_root(ctx.store, &promoted);
        ctx.session.set_roots(dolt_core::session::Roots { head: roots.head, staged: hash, working: roots.working })?;
        hash
    } else {
        roots.staged
    };

    let (author_name, author_email) = match &args.author {
        Some(raw) => parse_author(raw).ok_or_else(|| ProcedureError::InvalidArgs(format!("malformed --author {raw:?}, expected \"Name <email>\"")))?,
        None => (ctx.session.user_name.clone(), ctx.session.user_email.clone()),
    };

    let props = PendingCommitProps {
        message: args.message.unwrap_or_default(),
        author_name,
        author_email,
        committer: None,
        amend: args.amend,
        allow_empty: args.allow_empty,
        skip_empty: args.skip_empty,
    };

    let roots = dolt_core::session::Roots { head: roots.head, staged, working: roots.working };
    let Some(pending) = ctx.session.new_pending_commit(roots, props)? else {
        return Ok(ResultRows::failed());
    };

    let signer = if args.gpg_sign {
        Some(ctx.signer.ok_or(ProcedureError::InvalidArgs("--gpg-sign requested but no signing key is configured".to_string()))?)
    } else {
        None
    };

    let database = ctx.session.database.clone();
    let commit_id = commit_engine::sign_and_commit(ctx.session, pending, &database, signer)?;
    Ok(ResultRows::Hash(commit_id.hex()))
}
