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

//! `remote add|remove|list` plus the async `fetch`/`pull`/`push`/`clone`
//! entry point the dispatcher routes to separately (spec §4.10).
//!
//! `dolt-core`'s `RefStore` only tracks remote-tracking branch pointers, not
//! named remote definitions (`{name, url, params}`); that registry has no
//! home in the core crate, so it lives here instead.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use parking_lot::RwLock;

use dolt_core::commit::Commit;
use dolt_core::commit::CommitMeta;
use dolt_core::commit::Signature;
use dolt_core::commit::Timestamp;
use dolt_core::merge_engine;
use dolt_core::merge_engine::MergeError;
use dolt_core::merge_engine::MergeOptions;
use dolt_core::merge_engine::MergeOutcome;
use dolt_core::ref_store::ReplicationStatus;
use dolt_core::ref_store::WorkingSetMeta;
use dolt_core::remote_sync;
use dolt_core::remote_sync::CloneOptions;
use dolt_core::remote_sync::PushOptions;
use dolt_core::remote_sync::Remote;
use dolt_core::remote_sync::RemoteDb;
use dolt_core::remote_sync::RemoteSyncError;
use dolt_core::table;
use dolt_core::table::RootValue;

use crate::ProcedureContext;
use crate::ProcedureError;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

/// Resolves a named remote to a live transport connection. Real backends
/// (HTTP, SSH) implement this; tests use an in-memory stand-in over
/// `LocalRemoteDb`.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, remote: &Remote) -> ProcedureResult<Arc<dyn RemoteDb>>;
}

#[derive(Debug, Default)]
pub struct RemoteRegistry {
    remotes: RwLock<HashMap<String, Remote>>,
}

impl RemoteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, url: &str, force: bool) -> ProcedureResult<()> {
        let mut remotes = self.remotes.write();
        if remotes.contains_key(name) && !force {
            return Err(ProcedureError::InvalidArgs(format!("remote {name:?} already exists")));
        }
        remotes.insert(name.to_string(), Remote { name: name.to_string(), url: url.to_string(), params: HashMap::new() });
        Ok(())
    }

    pub fn remove(&self, name: &str) -> ProcedureResult<()> {
        self.remotes
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ProcedureError::InvalidArgs(format!("remote {name:?} not found")))
    }

    pub fn get(&self, name: &str) -> ProcedureResult<Remote> {
        self.remotes.read().get(name).cloned().ok_or_else(|| ProcedureError::InvalidArgs(format!("remote {name:?} not found")))
    }

    pub fn list(&self) -> Vec<Remote> {
        self.remotes.read().values().cloned().collect()
    }
}

#[derive(Subcommand)]
enum RemoteCommand {
    Add {
        name: String,
        url: String,
        #[arg(long)]
        force: bool,
    },
    Remove {
        name: String,
    },
    List,
}

#[derive(Parser)]
struct RemoteArgs {
    #[command(subcommand)]
    command: Option<RemoteCommand>,
}

pub fn remote(_ctx: &mut ProcedureContext, registry: &RemoteRegistry, argv: &[String]) -> ProcedureResult<ResultRows> {
    let args: RemoteArgs = parse_args("remote", argv)?;
    match args.command.unwrap_or(RemoteCommand::List) {
        RemoteCommand::Add { name, url, force } => {
            registry.add(&name, &url, force)?;
            Ok(ResultRows::ok())
        }
        RemoteCommand::Remove { name } => {
            registry.remove(&name)?;
            Ok(ResultRows::ok())
        }
        RemoteCommand::List => {
            let lines: Vec<String> = registry.list().into_iter().map(|r| format!("{}\t{}", r.name, r.url)).collect();
            Ok(ResultRows::Text(lines.join("\n")))
        }
    }
}

#[derive(Parser)]
struct FetchArgs {
    remote: Option<String>,
    refspecs: Vec<String>,
    #[arg(long)]
    prune: bool,
    #[arg(long)]
    force: bool,
}

#[derive(Parser)]
struct PullArgs {
    remote: Option<String>,
    branch: Option<String>,
}

#[derive(Parser)]
struct PushArgs {
    remote: Option<String>,
    branch: Option<String>,
    #[arg(short = 'u', long)]
    set_upstream: bool,
    #[arg(short = 'f', long)]
    force: bool,
}

#[derive(Parser)]
struct CloneArgs {
    remote_name: String,
    branch: Option<String>,
    #[arg(long)]
    depth: Option<u32>,
}

/// Dispatches `fetch`/`pull`/`push`/`clone`, each of which needs a live
/// `RemoteDb` connection the synchronous [`crate::dispatch`] preamble has no
/// room for (spec §9 design note).
pub async fn dispatch_remote_async(
    ctx: &mut ProcedureContext<'_>,
    registry: &RemoteRegistry,
    connector: &dyn RemoteConnector,
    name: &str,
    argv: &[String],
) -> ProcedureResult<ResultRows> {
    match name {
        "fetch" => fetch(ctx, registry, connector, argv).await,
        "pull" => pull(ctx, registry, connector, argv).await,
        "push" => push(ctx, registry, connector, argv).await,
        "clone" => clone(ctx, registry, connector, argv).await,
        other => Err(ProcedureError::UnknownProcedure(other.to_string())),
    }
}

async fn fetch(ctx: &mut ProcedureContext<'_>, registry: &RemoteRegistry, connector: &dyn RemoteConnector, argv: &[String]) -> ProcedureResult<ResultRows> {
    let args: FetchArgs = parse_args("fetch", argv)?;
    let remote_name = args.remote.unwrap_or_else(|| "origin".to_string());
    let remote = registry.get(&remote_name)?;
    let db = connector.connect(&remote)?;
    let outcome = remote_sync::fetch(ctx.session.refs(), ctx.session.graph(), ctx.store, &remote_name, db.as_ref(), &args.refspecs, args.prune, args.force).await?;
    Ok(ResultRows::Text(format!("updated {} ref(s), pruned {}", outcome.updated.len(), outcome.pruned.len())))
}

/// Fetches from the remote, then merges the fetched head into the current
/// branch exactly the way [`crate::commands::merge::merge`] merges a local
/// spec: a clean merge is auto-committed with the upstream head as a second
/// parent, and a conflicted merge persists `merge_state` on the working set
/// so `conflicts_resolve`/`merge --abort` can see it afterward.
async fn pull(ctx: &mut ProcedureContext<'_>, registry: &RemoteRegistry, connector: &dyn RemoteConnector, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: PullArgs = parse_args("pull", argv)?;

    let (remote_name, remote_branch) = match (args.remote, args.branch) {
        (Some(r), Some(b)) => (r, b),
        _ => {
            let upstream = ctx.branches.upstream_of(&ctx.session.branch).ok_or(RemoteSyncError::NoUpstream)?;
            (upstream.remote, upstream.branch)
        }
    };
    let remote = registry.get(&remote_name)?;
    let db = connector.connect(&remote)?;
    remote_sync::fetch(ctx.session.refs(), ctx.session.graph(), ctx.store, &remote_name, db.as_ref(), std::slice::from_ref(&remote_branch), false, false).await?;

    let refs = ctx.session.refs();
    let graph = ctx.session.graph();
    let branch = ctx.session.branch.clone();
    let ws = refs.get_working_set(&branch)?;
    if ws.merge_active() {
        return Err(MergeError::MergeActive.into());
    }

    let ours_commit = refs.resolve_branch(&branch)?;
    let theirs_commit = refs.resolve_remote(&remote_name, &remote_branch)?;
    if ours_commit == theirs_commit {
        return Err(MergeError::UpToDate.into());
    }
    let ancestor_commit = graph.get_ancestor(ours_commit, theirs_commit)?;
    let ours_root = table::load_root(ctx.store, graph.resolve_root(ours_commit)?).unwrap_or_else(|| RootValue::empty(1));
    let theirs_root = graph.resolve_root(theirs_commit)?;
    let theirs = table::load_root(ctx.store, theirs_root).unwrap_or_else(|| RootValue::empty(1));
    let ancestor = table::load_root(ctx.store, graph.resolve_root(ancestor_commit)?).unwrap_or_else(|| RootValue::empty(1));

    let outcome = merge_engine::merge_roots(ctx.store, &ours_root, &theirs, &ancestor, ours_commit, theirs_commit, graph, MergeOptions::default());

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
            let expected = ws.hash_of();

            if stats.has_conflicts() {
                let from_spec = format!("{remote_name}/{remote_branch}");
                let with_state = ws
                    .start_merge(theirs_root, from_spec)
                    .with_working_root(merged_hash)
                    .with_staged_root(merged_hash)
                    .with_unmergeable_tables(stats.unmergeable_tables())
                    .with_merged_tables(stats.tables_modified.clone());
                refs.update_working_set(&branch, with_state, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
                return Ok(ResultRows::MergeOutcome { hash: String::new(), fast_forward: false, conflicts: true });
            }

            let parents = vec![ours_commit, theirs_commit];
            let timestamp = Timestamp::now();
            let author = Signature { name: ctx.session.user_name.clone(), email: ctx.session.user_email.clone(), timestamp };
            let message = format!("Merge {remote_name}/{remote_branch} into {branch}");
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

async fn push(ctx: &mut ProcedureContext<'_>, registry: &RemoteRegistry, connector: &dyn RemoteConnector, argv: &[String]) -> ProcedureResult<ResultRows> {
    let args: PushArgs = parse_args("push", argv)?;
    let remote_name = args.remote.unwrap_or_else(|| "origin".to_string());
    let remote = registry.get(&remote_name)?;
    let db = connector.connect(&remote)?;
    let branch = args.branch.unwrap_or_else(|| ctx.session.branch.clone());
    let head = ctx.session.refs().resolve_branch(&branch)?;
    let outcome = remote_sync::push(
        ctx.session.graph(),
        ctx.store,
        ctx.branches,
        &remote_name,
        db.as_ref(),
        &branch,
        head,
        PushOptions { set_upstream: args.set_upstream, force: args.force },
    )
    .await?;
    Ok(ResultRows::Text(format!("pushed {}, rejected {}", outcome.pushed.len(), outcome.rejected.len())))
}

async fn clone(ctx: &mut ProcedureContext<'_>, registry: &RemoteRegistry, connector: &dyn RemoteConnector, argv: &[String]) -> ProcedureResult<ResultRows> {
    let args: CloneArgs = parse_args("clone", argv)?;
    let remote = registry.get(&args.remote_name)?;
    let db = connector.connect(&remote)?;
    let chosen = remote_sync::clone(
        db.as_ref(),
        ctx.session.refs(),
        ctx.session.graph(),
        ctx.store,
        ctx.branches,
        args.branch.as_deref(),
        &args.remote_name,
        CloneOptions { depth: args.depth },
    )
    .await?;
    Ok(ResultRows::Text(chosen))
}
