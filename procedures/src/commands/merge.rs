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

//! `merge`, `conflicts_resolve`, and `verify_constraints`: three-way merge
//! dispatch plus its conflict/violation followups (spec §4.7).

use clap::Parser;

use dolt_core::commit::Commit;
use dolt_core::commit::CommitMeta;
use dolt_core::commit::Signature;
use dolt_core::commit::Timestamp;
use dolt_core::merge_engine;
use dolt_core::merge_engine::ConflictSide;
use dolt_core::merge_engine::MergeError;
use dolt_core::merge_engine::MergeOptions;
use dolt_core::merge_engine::MergeOutcome;
use dolt_core::ref_store::ReplicationStatus;
use dolt_core::ref_store::WorkingSetMeta;
use dolt_core::table;
use dolt_core::table::RootValue;
use dolt_core::table::TableName;

use crate::ProcedureContext;
use crate::ProcedureError;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct MergeArgs {
    spec: Option<String>,
    #[arg(long)]
    abort: bool,
    #[arg(long)]
    no_ff: bool,
    #[arg(long)]
    no_commit: bool,
    #[arg(long)]
    squash: bool,
    #[arg(short = 'm', long)]
    message: Option<String>,
    #[arg(long)]
    force: bool,
}

pub fn merge(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: MergeArgs = parse_args("merge", argv)?;
    let refs = ctx.session.refs();
    let graph = ctx.session.graph();
    let branch = ctx.session.branch.clone();
    let ws = refs.get_working_set(&branch)?;

    if args.abort {
        if !ws.merge_active() {
            return Err(ProcedureError::InvalidArgs("no merge is in progress".to_string()));
        }
        let expected = ws.hash_of();
        let aborted = ws.abort_merge();
        refs.update_working_set(&branch, aborted, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
        return Ok(ResultRows::ok());
    }

    if ws.merge_active() {
        return Err(MergeError::MergeActive.into());
    }
    if !args.force && ws.has_unstaged_changes() {
        return Err(MergeError::UncommittedChanges.into());
    }

    let Some(spec) = &args.spec else {
        return Err(ProcedureError::InvalidArgs("merge requires a branch or commit spec".to_string()));
    };

    let ours_commit = refs.resolve_branch(&branch)?;
    let theirs_commit = graph.resolve(spec, ours_commit, refs)?;
    let ancestor_commit = graph.get_ancestor(ours_commit, theirs_commit)?;
    let ours_root = graph.resolve_root(ours_commit)?;
    let theirs_root = graph.resolve_root(theirs_commit)?;
    let ancestor_root = graph.resolve_root(ancestor_commit)?;
    let ours = table::load_root(ctx.store, ours_root).unwrap_or_else(|| RootValue::empty(1));
    let theirs = table::load_root(ctx.store, theirs_root).unwrap_or_else(|| RootValue::empty(1));
    let ancestor = table::load_root(ctx.store, ancestor_root).unwrap_or_else(|| RootValue::empty(1));

    let opts = MergeOptions { no_ff: args.no_ff || args.squash, is_cherry_pick: false };
    let outcome = merge_engine::merge_roots(ctx.store, &ours, &theirs, &ancestor, ours_commit, theirs_commit, graph, opts);

    match outcome {
        Err(MergeError::UpToDate) => Err(MergeError::UpToDate.into()),
        Err(e) => Err(e.into()),
        Ok(MergeOutcome::FastForward(target)) => {
            refs.fast_forward(graph, &branch, target)?;
            let target_root = graph.resolve_root(target)?;
            let ws = refs.get_working_set(&branch)?;
            let expected = ws.hash_of();
            let updated = ws.with_working_root(target_root).with_staged_root(target_root);
            refs.update_working_set(&branch, updated, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
            Ok(ResultRows::MergeOutcome { hash: target.hex(), fast_forward: true, conflicts: false })
        }
        Ok(MergeOutcome::Merged { root, stats }) => {
            let merged_hash = table::store_root(ctx.store, &root);
            let ws = refs.get_working_set(&branch)?;
            let expected = ws.hash_of();

            if stats.has_conflicts() {
                let with_state = ws
                    .start_merge(theirs_root, spec.clone())
                    .with_working_root(merged_hash)
                    .with_staged_root(merged_hash)
                    .with_unmergeable_tables(stats.unmergeable_tables())
                    .with_merged_tables(stats.tables_modified.clone());
                refs.update_working_set(&branch, with_state, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
                return Ok(ResultRows::MergeOutcome { hash: String::new(), fast_forward: false, conflicts: true });
            }

            if args.no_commit || args.squash {
                let updated = ws.with_working_root(merged_hash).with_staged_root(merged_hash);
                refs.update_working_set(&branch, updated, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
                return Ok(ResultRows::MergeOutcome { hash: String::new(), fast_forward: false, conflicts: false });
            }

            let parents = vec![ours_commit, theirs_commit];
            let timestamp = Timestamp::now();
            let author = Signature {
                name: ctx.session.user_name.clone(),
                email: ctx.session.user_email.clone(),
                timestamp,
            };
            let message = args.message.unwrap_or_else(|| format!("Merge {spec} into {branch}"));
            let commit = Commit {
                root: merged_hash,
                parents,
                meta: CommitMeta { message, author, committer: None, signature: None },
                is_ghost: false,
            };
            let commit_id = graph.put_commit(commit);
            refs.set_head(graph, &branch, commit_id, ours_commit, false)?;
            let updated = ws.with_working_root(merged_hash).with_staged_root(merged_hash).clear_merge();
            refs.update_working_set(&branch, updated, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
            Ok(ResultRows::MergeOutcome { hash: commit_id.hex(), fast_forward: false, conflicts: false })
        }
    }
}

#[derive(Parser)]
struct ConflictsResolveArgs {
    table: String,
    side: String,
}

pub fn conflicts_resolve(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: ConflictsResolveArgs = parse_args("conflicts_resolve", argv)?;
    let side = match args.side.as_str() {
        "ours" => ConflictSide::Ours,
        "theirs" => ConflictSide::Theirs,
        other => return Err(ProcedureError::InvalidArgs(format!("side must be 'ours' or 'theirs', got {other:?}"))),
    };

    let branch = ctx.session.branch.clone();
    let refs = ctx.session.refs();
    let ws = refs.get_working_set(&branch)?;
    let Some(state) = &ws.merge_state else {
        return Err(ProcedureError::InvalidArgs("no merge is in progress".to_string()));
    };

    let table_name = TableName::unqualified(args.table.clone());
    let ours = table::load_root(ctx.store, ws.working_root).unwrap_or_else(|| RootValue::empty(1));
    let theirs_commit = ctx.session.graph().resolve(&state.from_spec, refs.resolve_branch(&branch)?, refs)?;
    let theirs_root = ctx.session.graph().resolve_root(theirs_commit)?;
    let theirs = table::load_root(ctx.store, theirs_root).unwrap_or_else(|| RootValue::empty(1));

    let resolved = merge_engine::resolve_table_conflicts(&ours, &theirs, &table_name, side, &[])?;
    let resolved_hash = table::store_root(ctx.store, &resolved);

    let remaining: Vec<TableName> = state.unmergeable_tables.iter().filter(|t| **t != table_name).cloned().collect();
    let expected = ws.hash_of();
    let updated = ws
        .with_working_root(resolved_hash)
        .with_staged_root(resolved_hash)
        .with_unmergeable_tables(remaining);
    refs.update_working_set(&branch, updated, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
    Ok(ResultRows::ok())
}

pub fn verify_constraints(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    let _: Vec<String> = argv.to_vec();
    let roots = ctx.session.get_roots()?;
    let working = table::load_root(ctx.store, roots.working).unwrap_or_else(|| RootValue::empty(1));

    let mut violations = 0u64;
    for schema in working.get_all_schemas().values() {
        for parent in &schema.foreign_key_parents {
            if working.get_table(parent).0.is_none() {
                violations += 1;
            }
        }
    }
    Ok(ResultRows::Violations(violations))
}
