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

//! Remote Sync Engine (C10): fetch/pull/push/clone/backup against an
//! abstract remote database that shares this crate's own ref-store and
//! commit-graph shape (spec §4.10). The transport itself — how bytes
//! actually cross the wire — is left to whatever implements [`RemoteDb`];
//! this module only orchestrates the closure of objects that must move.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use crate::branch_engine::BranchEngine;
use crate::commit::Commit;
use crate::commit::CommitId;
use crate::commit_graph::CommitGraph;
use crate::commit_graph::CommitGraphError;
use crate::content_store::ContentStore;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::Hash;
use crate::merge_engine::MergeError;
use crate::merge_engine::MergeOptions;
use crate::merge_engine::MergeOutcome;
use crate::merge_engine::merge_roots;
use crate::ref_store::BackupInfo;
use crate::ref_store::RefStore;
use crate::ref_store::RefStoreError;
use crate::session::Session;
use crate::session::SessionError;
use crate::table;
use crate::table::RootValue;

#[derive(Debug, Error)]
#[error("remote operation failed: {0}")]
pub struct RemoteDbError(pub String);

pub type RemoteDbResult<T> = Result<T, RemoteDbError>;

#[derive(Debug, Error)]
pub enum RemoteSyncError {
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Remote(#[from] RemoteDbError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("current branch has no configured upstream")]
    NoUpstream,
    #[error("restore target already exists; pass force to overwrite")]
    TargetExists,
}

impl ErrorKind for RemoteSyncError {
    fn kind(&self) -> Kind {
        match self {
            Self::RefStore(e) => e.kind(),
            Self::CommitGraph(e) => e.kind(),
            Self::Merge(e) => e.kind(),
            Self::Remote(_) => Kind::RemoteNotFound,
            Self::Session(e) => e.kind(),
            Self::NoUpstream => Kind::InvalidArgs,
            Self::TargetExists => Kind::BackupAlreadyExists,
        }
    }
}

pub type RemoteSyncResult<T> = Result<T, RemoteSyncError>;

/// `Remote = {name, url, params}` (spec §4.10).
#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub url: String,
    pub params: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRefOutcome {
    Accepted,
    Rejected { reason: String },
}

/// An abstract remote database: `RemoteDb = open(format, remote) -> DB'`,
/// sharing this crate's own `C2`/`C3` shape (spec §4.10). Real backends
/// (HTTP, SSH) implement this trait; [`LocalRemoteDb`] below is the
/// in-process implementation used by tests and `dolt-core-testutils`.
#[async_trait]
pub trait RemoteDb: Send + Sync {
    async fn list_branch_heads(&self) -> RemoteDbResult<Vec<(String, CommitId)>>;
    async fn commit(&self, id: CommitId) -> RemoteDbResult<Commit>;
    async fn pull_objects(&self, hashes: &[Hash]) -> RemoteDbResult<Vec<(Hash, Vec<u8>)>>;
    async fn push_objects(&self, objects: Vec<(Hash, Vec<u8>)>) -> RemoteDbResult<()>;
    async fn push_commit(&self, id: CommitId, commit: Commit) -> RemoteDbResult<()>;
    async fn push_ref(&self, branch: &str, expected: Option<CommitId>, new: CommitId, force: bool) -> RemoteDbResult<PushRefOutcome>;
}

/// Every hash a `RootValue` transitively addresses: itself plus each
/// table's schema/row-index/artifacts/secondary-index hashes. Row-set and
/// schema bytes are leaves (spec §4.13), so one level of table expansion is
/// the whole closure.
pub(crate) fn object_closure(store: &dyn ContentStore, root_hash: Hash) -> Vec<Hash> {
    let mut hashes = vec![root_hash];
    if let Some(root) = table::load_root(store, root_hash) {
        for table in root.tables().values() {
            hashes.push(table.schema_hash);
            hashes.push(table.row_index);
            hashes.push(table.artifacts);
            hashes.extend(table.secondary_indexes.values().copied());
        }
    }
    hashes
}

fn object_closure_bytes(store: &dyn ContentStore, root_hash: Hash) -> Vec<(Hash, Vec<u8>)> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for hash in object_closure(store, root_hash) {
        if seen.insert(hash) {
            if let Ok(bytes) = store.get(hash) {
                out.push((hash, bytes));
            }
        }
    }
    out
}

/// Pulls `root_hash`'s object closure into `local_store`, skipping hashes
/// already present.
async fn pull_object_closure(local_store: &dyn ContentStore, remote: &dyn RemoteDb, root_hash: Hash) -> RemoteSyncResult<()> {
    if local_store.contains(root_hash) {
        return Ok(());
    }
    let fetched = remote.pull_objects(&[root_hash]).await?;
    let mut nested = Vec::new();
    for (hash, bytes) in &fetched {
        if let Ok(root) = serde_json::from_slice::<RootValue>(bytes) {
            for table in root.tables().values() {
                nested.push(table.schema_hash);
                nested.push(table.row_index);
                nested.push(table.artifacts);
                nested.extend(table.secondary_indexes.values().copied());
            }
        }
        local_store.put(bytes);
    }
    let missing: Vec<Hash> = nested.into_iter().filter(|h| !local_store.contains(*h)).collect();
    if !missing.is_empty() {
        for (_, bytes) in remote.pull_objects(&missing).await? {
            local_store.put(&bytes);
        }
    }
    Ok(())
}

/// Walks `head`'s ancestry on the remote, registering every commit this
/// graph doesn't already have and pulling each newly-seen commit's root
/// closure.
async fn pull_commit_graph(local_graph: &CommitGraph, local_store: &dyn ContentStore, remote: &dyn RemoteDb, head: CommitId) -> RemoteSyncResult<()> {
    let mut todo = vec![head];
    let mut seen = HashSet::new();
    while let Some(id) = todo.pop() {
        if local_graph.contains(id) || !seen.insert(id) {
            continue;
        }
        let commit = remote.commit(id).await?;
        todo.extend(commit.parents.iter().copied());
        pull_object_closure(local_store, remote, commit.root).await?;
        local_graph.put_commit(commit);
    }
    Ok(())
}

/// Like [`pull_commit_graph`] but stops at `depth` commits from `head`,
/// registering the remaining parents as ghosts (spec §4.10 `Clone(depth)`).
async fn pull_commit_graph_shallow(local_graph: &CommitGraph, local_store: &dyn ContentStore, remote: &dyn RemoteDb, head: CommitId, depth: u32) -> RemoteSyncResult<()> {
    let mut frontier = vec![(head, 0u32)];
    let mut seen = HashSet::new();
    while let Some((id, level)) = frontier.pop() {
        if local_graph.contains(id) || !seen.insert(id) {
            continue;
        }
        let commit = remote.commit(id).await?;
        pull_object_closure(local_store, remote, commit.root).await?;
        let parents = commit.parents.clone();
        local_graph.put_commit(commit);
        if level + 1 >= depth {
            for parent in parents {
                if !local_graph.contains(parent) {
                    local_graph.put_ghost(parent, vec![]);
                }
            }
        } else {
            frontier.extend(parents.into_iter().map(|p| (p, level + 1)));
        }
    }
    Ok(())
}

fn local_commit_closure(local_graph: &CommitGraph, head: CommitId, stop_at: Option<CommitId>) -> Vec<(CommitId, Commit)> {
    let mut todo = vec![head];
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    while let Some(id) = todo.pop() {
        if Some(id) == stop_at || !seen.insert(id) {
            continue;
        }
        if let Ok(commit) = local_graph.get_commit(id) {
            todo.extend(commit.parents.iter().copied());
            out.push((id, commit));
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub updated: Vec<(String, CommitId)>,
    pub pruned: Vec<String>,
}

/// Fetches `refspecs` (every remote branch if empty) into remote-tracking
/// refs, updating them only when the result is a fast-forward or `force`.
/// `prune` removes local remote-tracking refs absent upstream (spec §4.10).
#[instrument(skip(local_refs, local_graph, local_store, remote))]
pub async fn fetch(
    local_refs: &RefStore,
    local_graph: &CommitGraph,
    local_store: &dyn ContentStore,
    remote_name: &str,
    remote: &dyn RemoteDb,
    refspecs: &[String],
    prune: bool,
    force: bool,
) -> RemoteSyncResult<FetchOutcome> {
    let remote_branches = remote.list_branch_heads().await?;
    let wanted: Vec<&(String, CommitId)> = if refspecs.is_empty() {
        remote_branches.iter().collect()
    } else {
        remote_branches.iter().filter(|(name, _)| refspecs.contains(name)).collect()
    };

    let mut updated = Vec::new();
    for (branch, remote_head) in wanted {
        pull_commit_graph(local_graph, local_store, remote, *remote_head).await?;
        match local_refs.resolve_remote(remote_name, branch) {
            Ok(current) if current == *remote_head => {}
            Ok(current) => {
                if force || local_graph.can_fast_forward(current, *remote_head)? {
                    local_refs.set_remote_tracking(remote_name, branch, *remote_head);
                    updated.push((branch.clone(), *remote_head));
                }
            }
            Err(_) => {
                local_refs.set_remote_tracking(remote_name, branch, *remote_head);
                updated.push((branch.clone(), *remote_head));
            }
        }
    }

    let mut pruned = Vec::new();
    if prune {
        for ((r, branch), _) in local_refs.list_remote_refs() {
            if r == remote_name && !remote_branches.iter().any(|(b, _)| *b == branch) {
                local_refs.remove_remote_tracking(remote_name, &branch);
                pruned.push(branch);
            }
        }
    }

    Ok(FetchOutcome { updated, pruned })
}

/// Fetches the session branch's upstream, then merges it in via the merge
/// engine (spec §4.10). Errors `NoUpstream` when no remote/branch is given
/// and none is configured.
#[instrument(skip(session, store, branches, remote))]
pub async fn pull(
    session: &Session,
    store: &dyn ContentStore,
    branches: &BranchEngine,
    remote_name: Option<&str>,
    remote_branch: Option<&str>,
    remote: &dyn RemoteDb,
) -> RemoteSyncResult<MergeOutcome> {
    let (remote_name, remote_branch) = match (remote_name, remote_branch) {
        (Some(r), Some(b)) => (r.to_string(), b.to_string()),
        _ => {
            let upstream = branches.upstream_of(&session.branch).ok_or(RemoteSyncError::NoUpstream)?;
            (upstream.remote, upstream.branch)
        }
    };

    fetch(session.refs(), session.graph(), store, &remote_name, remote, std::slice::from_ref(&remote_branch), false, false).await?;

    let upstream_head = session.refs().resolve_remote(&remote_name, &remote_branch)?;
    let ours_commit = session.refs().resolve_branch(&session.branch)?;
    if ours_commit == upstream_head {
        return Err(MergeError::UpToDate.into());
    }
    let ancestor_commit = session.graph().get_ancestor(ours_commit, upstream_head)?;

    let roots = session.get_roots()?;
    let ours_root = table::load_root(store, roots.head).unwrap_or_else(|| RootValue::empty(1));
    let theirs_root = table::load_root(store, session.graph().resolve_root(upstream_head)?).unwrap_or_else(|| RootValue::empty(1));
    let ancestor_root = table::load_root(store, session.graph().resolve_root(ancestor_commit)?).unwrap_or_else(|| RootValue::empty(1));

    Ok(merge_roots(store, &ours_root, &theirs_root, &ancestor_root, ours_commit, upstream_head, session.graph(), MergeOptions::default())?)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    pub set_upstream: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
    pub pushed: Vec<String>,
    pub rejected: Vec<(String, String)>,
}

/// Pushes `branch`'s commits (back to the remote's current head for that
/// branch, or its full history if the remote has none) plus their object
/// closures, then updates the remote ref (spec §4.10).
#[instrument(skip(local_graph, local_store, branches, remote))]
pub async fn push(
    local_graph: &CommitGraph,
    local_store: &dyn ContentStore,
    branches: &BranchEngine,
    remote_name: &str,
    remote: &dyn RemoteDb,
    branch: &str,
    head: CommitId,
    opts: PushOptions,
) -> RemoteSyncResult<PushOutcome> {
    let remote_heads = remote.list_branch_heads().await?;
    let expected = remote_heads.iter().find(|(b, _)| b == branch).map(|(_, c)| *c);

    for (id, commit) in local_commit_closure(local_graph, head, expected) {
        remote.push_objects(object_closure_bytes(local_store, commit.root)).await?;
        remote.push_commit(id, commit).await?;
    }

    match remote.push_ref(branch, expected, head, opts.force).await? {
        PushRefOutcome::Accepted => {
            if opts.set_upstream {
                branches.set_upstream(branch, remote_name, branch);
            }
            Ok(PushOutcome { pushed: vec![branch.to_string()], rejected: vec![] })
        }
        PushRefOutcome::Rejected { reason } => Ok(PushOutcome {
            pushed: vec![],
            rejected: vec![(branch.to_string(), reason)],
        }),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CloneOptions {
    pub depth: Option<u32>,
}

/// Initializes `local_refs`/`local_graph`/`local_store` from every branch on
/// `remote`, honoring `opts.depth` for a shallow clone, and returns which
/// branch should be checked out (spec §4.10).
#[instrument(skip(remote, local_refs, local_graph, local_store, branches))]
pub async fn clone(
    remote: &dyn RemoteDb,
    local_refs: &RefStore,
    local_graph: &CommitGraph,
    local_store: &dyn ContentStore,
    branches: &BranchEngine,
    branch: Option<&str>,
    remote_name: &str,
    opts: CloneOptions,
) -> RemoteSyncResult<String> {
    let remote_branches = remote.list_branch_heads().await?;
    let chosen_branch = branch
        .map(|b| b.to_string())
        .or_else(|| remote_branches.first().map(|(b, _)| b.clone()))
        .ok_or(RemoteSyncError::NoUpstream)?;

    for (name, head) in &remote_branches {
        match opts.depth {
            Some(depth) => pull_commit_graph_shallow(local_graph, local_store, remote, *head, depth).await?,
            None => pull_commit_graph(local_graph, local_store, remote, *head).await?,
        }
        let root = local_graph.resolve_root(*head)?;
        local_refs.create_branch(name, *head, root, true)?;
        local_refs.set_remote_tracking(remote_name, name, *head);
    }
    branches.set_upstream(&chosen_branch, remote_name, &chosen_branch);
    Ok(chosen_branch)
}

pub fn backup_add(refs: &RefStore, name: &str, url: &str, force: bool) -> RemoteSyncResult<()> {
    Ok(refs.add_backup(BackupInfo { name: name.to_string(), url: url.to_string() }, force)?)
}

pub fn backup_remove(refs: &RefStore, name: &str) -> RemoteSyncResult<()> {
    Ok(refs.remove_backup(name)?)
}

/// Force-pushes every local branch to a backup remote (spec §4.10); unlike
/// an ordinary push a backup is never collaboratively shared, so
/// non-fast-forward updates are always forced.
pub async fn backup_sync(local_refs: &RefStore, local_graph: &CommitGraph, local_store: &dyn ContentStore, remote: &dyn RemoteDb) -> RemoteSyncResult<PushOutcome> {
    let mut pushed = Vec::new();
    let mut rejected = Vec::new();
    for (branch, head) in local_refs.list_branches() {
        let remote_heads = remote.list_branch_heads().await?;
        let expected = remote_heads.iter().find(|(b, _)| *b == branch).map(|(_, c)| *c);
        for (id, commit) in local_commit_closure(local_graph, head, expected) {
            remote.push_objects(object_closure_bytes(local_store, commit.root)).await?;
            remote.push_commit(id, commit).await?;
        }
        match remote.push_ref(&branch, expected, head, true).await? {
            PushRefOutcome::Accepted => pushed.push(branch),
            PushRefOutcome::Rejected { reason } => rejected.push((branch, reason)),
        }
    }
    Ok(PushOutcome { pushed, rejected })
}

/// Restores a full database from a backup remote by cloning it fresh.
/// `target_exists` is supplied by the caller, since whether a database of
/// that name already exists is a SQL-layer concern (spec §4.10).
pub async fn backup_restore(
    remote: &dyn RemoteDb,
    local_refs: &RefStore,
    local_graph: &CommitGraph,
    local_store: &dyn ContentStore,
    branches: &BranchEngine,
    target_exists: bool,
    force: bool,
) -> RemoteSyncResult<String> {
    if target_exists && !force {
        return Err(RemoteSyncError::TargetExists);
    }
    clone(remote, local_refs, local_graph, local_store, branches, None, "backup", CloneOptions::default()).await
}

/// In-process [`RemoteDb`]: another `RefStore`/`CommitGraph`/`ContentStore`
/// triple, used by tests and `dolt-core-testutils` in place of a real
/// network remote.
#[derive(Debug)]
pub struct LocalRemoteDb {
    refs: Arc<RefStore>,
    graph: Arc<CommitGraph>,
    store: Arc<dyn ContentStore>,
}

impl LocalRemoteDb {
    pub fn new(refs: Arc<RefStore>, graph: Arc<CommitGraph>, store: Arc<dyn ContentStore>) -> Self {
        Self { refs, graph, store }
    }
}

#[async_trait]
impl RemoteDb for LocalRemoteDb {
    async fn list_branch_heads(&self) -> RemoteDbResult<Vec<(String, CommitId)>> {
        Ok(self.refs.list_branches())
    }

    async fn commit(&self, id: CommitId) -> RemoteDbResult<Commit> {
        self.graph.get_commit(id).map_err(|e| RemoteDbError(e.to_string()))
    }

    async fn pull_objects(&self, hashes: &[Hash]) -> RemoteDbResult<Vec<(Hash, Vec<u8>)>> {
        Ok(hashes.iter().filter_map(|&h| self.store.get(h).ok().map(|bytes| (h, bytes))).collect())
    }

    async fn push_objects(&self, objects: Vec<(Hash, Vec<u8>)>) -> RemoteDbResult<()> {
        for (_, bytes) in objects {
            self.store.put(&bytes);
        }
        Ok(())
    }

    async fn push_commit(&self, id: CommitId, commit: Commit) -> RemoteDbResult<()> {
        let actual = self.graph.put_commit(commit);
        if actual != id {
            return Err(RemoteDbError("pushed commit content does not match its claimed id".to_string()));
        }
        Ok(())
    }

    async fn push_ref(&self, branch: &str, expected: Option<CommitId>, new: CommitId, force: bool) -> RemoteDbResult<PushRefOutcome> {
        let current = self.refs.resolve_branch(branch).ok();
        if current != expected && !force {
            return Ok(PushRefOutcome::Rejected {
                reason: "remote ref moved; fetch first".to_string(),
            });
        }
        match current {
            Some(from) => {
                if self.refs.set_head(&self.graph, branch, new, from, force).is_err() {
                    return Ok(PushRefOutcome::Rejected {
                        reason: "non-fast-forward update rejected".to_string(),
                    });
                }
            }
            None => {
                let root = self.graph.resolve_root(new).map_err(|e| RemoteDbError(e.to_string()))?;
                if self.refs.create_branch(branch, new, root, force).is_err() {
                    return Ok(PushRefOutcome::Rejected {
                        reason: "branch already exists on remote".to_string(),
                    });
                }
            }
        }
        Ok(PushRefOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitMeta;
    use crate::commit::Signature;
    use crate::commit::Timestamp;
    use crate::content_store::MemoryContentStore;
    use crate::table::TableName;

    fn commit_at(root: Hash, parents: Vec<CommitId>) -> Commit {
        Commit {
            root,
            parents,
            meta: CommitMeta {
                message: "m".to_string(),
                author: Signature {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
            is_ghost: false,
        }
    }

    fn remote_fixture() -> (Arc<RefStore>, Arc<CommitGraph>, Arc<MemoryContentStore>, LocalRemoteDb, CommitId) {
        let refs = Arc::new(RefStore::new());
        let graph = Arc::new(CommitGraph::new());
        let store: Arc<MemoryContentStore> = Arc::new(MemoryContentStore::new());
        let root = RootValue::empty(1);
        let root_hash = table::store_root(store.as_ref(), &root);
        let c0 = graph.put_commit(commit_at(root_hash, vec![]));
        refs.create_branch("main", c0, root_hash, false).unwrap();
        let dyn_store: Arc<dyn ContentStore> = store.clone();
        let remote = LocalRemoteDb::new(refs.clone(), graph.clone(), dyn_store);
        (refs, graph, store, remote, c0)
    }

    #[tokio::test]
    async fn fetch_creates_remote_tracking_ref_for_new_branch() {
        let (_remote_refs, _remote_graph, _remote_store, remote, c0) = remote_fixture();
        let local_refs = RefStore::new();
        let local_graph = CommitGraph::new();
        let local_store = MemoryContentStore::new();
        let outcome = fetch(&local_refs, &local_graph, &local_store, "origin", &remote, &[], false, false).await.unwrap();
        assert_eq!(outcome.updated, vec![("main".to_string(), c0)]);
        assert_eq!(local_refs.resolve_remote("origin", "main").unwrap(), c0);
        assert!(local_graph.contains(c0));
    }

    #[tokio::test]
    async fn push_rejects_when_remote_has_moved() {
        let (remote_refs, remote_graph, remote_store, remote, c0) = remote_fixture();
        let branches = BranchEngine::new();
        let local_store = MemoryContentStore::new();
        let local_graph = CommitGraph::new();
        let other_root = table::store_root(&local_store, &RootValue::empty(2));
        let unrelated = local_graph.put_commit(commit_at(other_root, vec![]));
        let outcome = push(&local_graph, &local_store, &branches, "origin", &remote, "main", unrelated, PushOptions::default())
            .await
            .unwrap();
        assert!(outcome.pushed.is_empty());
        assert_eq!(outcome.rejected.len(), 1);
        let _ = (remote_refs, remote_graph, remote_store, c0);
    }

    #[tokio::test]
    async fn push_new_branch_sets_upstream() {
        let (remote_refs, remote_graph, remote_store, remote, c0) = remote_fixture();
        let branches = BranchEngine::new();
        let local_store = MemoryContentStore::new();
        let local_graph = CommitGraph::new();
        let t = TableName::unqualified("t");
        let root = RootValue::empty(1).put_table(
            t,
            crate::table::Table {
                schema_hash: Hash::of(b"s"),
                row_index: Hash::of(b"r"),
                secondary_indexes: Default::default(),
                artifacts: Hash::of(b"a"),
                autoinc: None,
            },
        );
        let root_hash = table::store_root(&local_store, &root);
        let child = local_graph.put_commit(commit_at(root_hash, vec![c0]));
        remote_graph.put_commit(commit_at(
            remote_graph.resolve_root(c0).unwrap(),
            vec![],
        ));
        let outcome = push(&local_graph, &local_store, &branches, "origin", &remote, "feature", child, PushOptions { set_upstream: true, force: false })
            .await
            .unwrap();
        assert_eq!(outcome.pushed, vec!["feature".to_string()]);
        assert_eq!(branches.upstream_of("feature").unwrap().remote, "origin");
        assert!(remote_refs.has_branch("feature"));
        let _ = remote_store;
    }

    #[tokio::test]
    async fn pull_fast_forwards_when_possible() {
        let (remote_refs, remote_graph, remote_store, remote, c0) = remote_fixture();
        let root1 = table::store_root(remote_store.as_ref(), &RootValue::empty(1).put_table(
            TableName::unqualified("t"),
            crate::table::Table {
                schema_hash: Hash::of(b"s"),
                row_index: Hash::of(b"r"),
                secondary_indexes: Default::default(),
                artifacts: Hash::of(b"a"),
                autoinc: None,
            },
        ));
        let c1 = remote_graph.put_commit(commit_at(root1, vec![c0]));
        remote_refs.set_head(&remote_graph, "main", c1, c0, false).unwrap();

        let local_refs = Arc::new(RefStore::new());
        let local_graph = Arc::new(CommitGraph::new());
        let local_store = MemoryContentStore::new();
        let root0 = table::store_root(&local_store, &RootValue::empty(1));
        let local_c0 = local_graph.put_commit(commit_at(root0, vec![]));
        assert_eq!(local_c0, c0);
        local_refs.create_branch("main", c0, root0, false).unwrap();
        let branches = BranchEngine::new();
        let session = Session::new("db", "main", local_refs, local_graph);

        let outcome = pull(&session, &local_store, &branches, Some("origin"), Some("main"), &remote).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::FastForward(id) if id == c1));
    }

    #[tokio::test]
    async fn clone_shallow_ghosts_parents_beyond_depth() {
        let (remote_refs, remote_graph, remote_store, remote, c0) = remote_fixture();
        let root1 = table::store_root(remote_store.as_ref(), &RootValue::empty(2));
        let c1 = remote_graph.put_commit(commit_at(root1, vec![c0]));
        remote_refs.set_head(&remote_graph, "main", c1, c0, false).unwrap();

        let local_refs = RefStore::new();
        let local_graph = CommitGraph::new();
        let local_store = MemoryContentStore::new();
        let branches = BranchEngine::new();
        let chosen = clone(&remote, &local_refs, &local_graph, &local_store, &branches, None, "origin", CloneOptions { depth: Some(1) })
            .await
            .unwrap();
        assert_eq!(chosen, "main");
        assert!(local_graph.contains(c1));
        assert!(local_graph.contains(c0));
        assert!(local_graph.get_commit(c0).unwrap().is_ghost);
    }
}
