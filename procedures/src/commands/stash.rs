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

//! `stash`: sets aside a working set's uncommitted changes on the ref
//! store's stash stack (spec §4.9).

use clap::Parser;
use clap::Subcommand;

use dolt_core::ref_store::ReplicationStatus;
use dolt_core::ref_store::WorkingSetMeta;

use crate::ProcedureContext;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Subcommand)]
enum StashCommand {
    Push,
    Pop { index: Option<usize> },
    Drop { index: Option<usize> },
    Clear,
    List,
}

#[derive(Parser)]
struct StashArgs {
    #[command(subcommand)]
    command: Option<StashCommand>,
}

pub fn stash(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: StashArgs = parse_args("stash", argv)?;
    let branch = ctx.session.branch.clone();
    let refs = ctx.session.refs();

    match args.command.unwrap_or(StashCommand::Push) {
        StashCommand::Push => {
            let ws = refs.get_working_set(&branch)?;
            if !ws.has_unstaged_changes() && ws.working_root == ws.staged_root {
                return Ok(ResultRows::Text("No local changes to save".to_string()));
            }
            let index = refs.push_stash(ws.clone());
            let head_id = refs.resolve_branch(&branch)?;
            let head_root = ctx.session.graph().resolve_root(head_id)?;
            let expected = ws.hash_of();
            let clean = ws.with_working_root(head_root).with_staged_root(head_root).clear_merge();
            refs.update_working_set(&branch, clean, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
            Ok(ResultRows::Text(format!("Saved working directory state: stash@{{{index}}}")))
        }
        StashCommand::Pop { index } => {
            let index = index.unwrap_or(0);
            let stashed = refs.pop_stash(index)?;
            let ws = refs.get_working_set(&branch)?;
            let expected = ws.hash_of();
            let restored = ws.with_working_root(stashed.working_root).with_staged_root(stashed.staged_root);
            refs.update_working_set(&branch, restored, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
            Ok(ResultRows::Text(format!("Dropped stash@{{{index}}}")))
        }
        StashCommand::Drop { index } => {
            let index = index.unwrap_or(0);
            refs.pop_stash(index)?;
            Ok(ResultRows::Text(format!("Dropped stash@{{{index}}}")))
        }
        StashCommand::Clear => {
            refs.clear_stashes();
            Ok(ResultRows::ok())
        }
        StashCommand::List => {
            let stashes = refs.list_stashes();
            if stashes.is_empty() {
                return Ok(ResultRows::Text(String::new()));
            }
            let lines: Vec<String> = stashes.iter().enumerate().map(|(i, ws)| format!("stash@{{{i}}}: {}", ws.working_set_ref.0)).collect();
            Ok(ResultRows::Text(lines.join("\n")))
        }
    }
}

