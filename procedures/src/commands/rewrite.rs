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

//! `revert` and `cherry_pick` (dispatched via [`crate::dispatch`]), plus
//! `rebase`'s three steps (start/continue/abort), which the dispatcher
//! routes to directly since they need a caller-held `RebaseState` that
//! does not fit `ProcedureContext` (spec §4.11, §9 design note).

use clap::Parser;

use dolt_core::branch_engine;
use dolt_core::commit::CommitId;
use dolt_core::rewrite;
pub use dolt_core::rewrite::RebasePlanRow;
pub use dolt_core::rewrite::RebaseState;

use crate::ProcedureContext;
use crate::ProcedureError;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct RevertArgs {
    commits: Vec<String>,
}

pub fn revert(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: RevertArgs = parse_args("revert", argv)?;
    if args.commits.is_empty() {
        return Err(ProcedureError::InvalidArgs("revert requires at least one commit".to_string()));
    }
    let head = ctx.session.refs().resolve_branch(&ctx.session.branch)?;
    let ids: Vec<CommitId> = args
        .commits
        .iter()
        .map(|spec| ctx.session.graph().resolve(spec, head, ctx.session.refs()))
        .collect::<Result<_, _>>()?;
    let commit_id = rewrite::revert(ctx.session, ctx.store, &ids)?;
    Ok(ResultRows::Hash(commit_id.hex()))
}

#[derive(Parser)]
struct CherryPickArgs {
    commit: String,
}

pub fn cherry_pick(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: CherryPickArgs = parse_args("cherry_pick", argv)?;
    let head = ctx.session.refs().resolve_branch(&ctx.session.branch)?;
    let source = ctx.session.graph().resolve(&args.commit, head, ctx.session.refs())?;
    let commit_id = rewrite::cherry_pick(ctx.session, ctx.store, source)?;
    Ok(ResultRows::Hash(commit_id.hex()))
}

#[derive(Parser)]
struct RebaseStartArgs {
    upstream: String,
}

/// `dolt_rebase <upstream>`: the caller owns the returned `(RebaseState,
/// plan)` pair across subsequent `--continue`/`--abort` calls.
pub fn start(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<(RebaseState, Vec<RebasePlanRow>)> {
    ctx.check_write_permission()?;
    let args: RebaseStartArgs = parse_args("rebase", argv)?;
    let branch = ctx.session.branch.clone();
    Ok(rewrite::start_rebase(ctx.session.refs(), ctx.session.graph(), &branch, &args.upstream)?)
}

/// `dolt_rebase --continue`: replays the (possibly caller-edited) plan, then
/// checks the session out onto the rewritten original branch.
pub fn continue_rebase(ctx: &mut ProcedureContext, state: &RebaseState, plan: &[RebasePlanRow]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let new_head = rewrite::continue_rebase(ctx.store, ctx.session.refs(), ctx.session.graph(), state, plan)?;
    if ctx.session.branch != state.original_branch {
        branch_engine::checkout_branch(ctx.session, ctx.store, &state.original_branch, true)?;
    }
    Ok(ResultRows::Hash(new_head.hex()))
}

/// `dolt_rebase --abort`: drops the aux branch; the original branch's head
/// was never touched.
pub fn abort_rebase(ctx: &mut ProcedureContext, state: &RebaseState) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    rewrite::abort_rebase(ctx.session.refs(), state)?;
    Ok(ResultRows::ok())
}
