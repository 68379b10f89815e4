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

//! GC Coordinator (C12): online garbage collection of the content store
//! against live sessions, via one of two safepoint disciplines (spec §4.12,
//! §5). The session registry and cluster-role source are explicit
//! dependencies injected at construction, never ambient singletons (spec §9
//! design note).

use std::collections::HashSet;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::instrument;

use crate::commit::CommitId;
use crate::commit_graph::CommitGraph;
use crate::commit_graph::CommitGraphError;
use crate::content_store::ContentStore;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::Hash;
use crate::ref_store::RefStore;
use crate::remote_sync;

pub type SessionId = u64;

#[derive(Debug, Error)]
pub enum GcError {
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
    #[error("cluster role or replication epoch changed during garbage collection")]
    ClusterRoleChanged,
    #[error("garbage collection was cancelled")]
    Cancelled,
}

impl ErrorKind for GcError {
    fn kind(&self) -> Kind {
        match self {
            Self::CommitGraph(e) => e.kind(),
            Self::ClusterRoleChanged => Kind::ClusterRoleChanged,
            // No dedicated kind exists for a caller-cancelled safepoint wait;
            // it is always the caller's own request being withdrawn, so it
            // is routed to the same bucket as other caller-side misuse.
            Self::Cancelled => Kind::InvalidArgs,
        }
    }
}

pub type GcResult<T> = Result<T, GcError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterRole {
    Primary,
    Standby,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterEpoch {
    pub role: ClusterRole,
    pub epoch: u64,
}

/// Global, read-only cluster-role state observed (not mutated) by GC.
/// `None` means replication is disabled and no epoch check applies.
pub trait ClusterRoleSource: Send + Sync {
    fn current(&self) -> Option<ClusterEpoch>;
}

/// Purges whatever in-memory caches sit in front of the content store or
/// commit graph. This crate keeps no caches of its own; real deployments
/// inject one that does.
pub trait CachePurge: Send + Sync {
    fn purge(&self);
}

/// The process-wide set of live sessions (spec §5): both safepoint
/// disciplines need to enumerate, visit, and in one case kill them.
pub trait SessionRegistry: Send + Sync {
    /// Every live session except `caller`.
    fn live_sessions(&self, caller: SessionId) -> Vec<SessionId>;
    /// `Some(roots)` once `session` has reached a quiescent point and had
    /// its reachable roots recorded; `None` if it hasn't yet (poll again).
    fn visit_gc_roots(&self, session: SessionId) -> Option<Vec<Hash>>;
    /// Terminates `session`'s connection (kill-connections discipline only).
    fn kill(&self, session: SessionId);
    /// Total live connection count, including the caller's own.
    fn connection_count(&self) -> usize;
    fn invalidate_transaction(&self, session: SessionId);
    /// Marks `session` so its next query returns `ServerPerformedGC`.
    fn mark_server_performed_gc(&self, session: SessionId);
}

/// Identifies the calling session for a single GC invocation.
#[derive(Debug, Clone)]
pub struct GcKeeper {
    pub caller: SessionId,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    /// Keep every object any commit ever registered could reach, including
    /// commits no ref reaches anymore; the safe default.
    Default,
    /// Like `Default`, but also drops objects reachable only from commits
    /// that no branch, tag, or remote-tracking ref reaches anymore.
    Full,
    /// Bookkeeping only: computes what a real collection would report
    /// without removing anything from the content store.
    Shallow,
}

#[derive(Debug, Clone, Copy)]
pub struct GcOptions {
    pub mode: GcMode,
    /// Physical archive compression is a storage-engine concern this crate
    /// does not implement; the level is accepted and reported back so a
    /// caller's own archiver can honor it.
    pub archive_compression_level: Option<u8>,
}

impl Default for GcOptions {
    fn default() -> Self {
        Self {
            mode: GcMode::Default,
            archive_compression_level: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    pub mode: GcMode,
    pub kept: usize,
    pub removed: usize,
    pub archive_compression_level: Option<u8>,
}

/// Performs the actual collection over the content store (spec §4.12's GC
/// modes), after a safepoint discipline has established that `keeper_roots`
/// (every live session's reachable roots) is complete and stable.
#[instrument(skip(store, graph, refs, keeper_roots))]
pub fn collect(store: &dyn ContentStore, graph: &CommitGraph, refs: &RefStore, keeper_roots: &[Hash], opts: GcOptions) -> GcResult<GcReport> {
    if opts.mode == GcMode::Shallow {
        return Ok(GcReport {
            mode: opts.mode,
            kept: store.all_hashes().len(),
            removed: 0,
            archive_compression_level: opts.archive_compression_level,
        });
    }

    let mut keep: HashSet<Hash> = HashSet::new();
    for &root in keeper_roots {
        keep.extend(remote_sync::object_closure(store, root));
    }

    let commit_ids: Vec<CommitId> = match opts.mode {
        GcMode::Full => {
            let ref_heads: Vec<CommitId> = refs
                .list_branches()
                .into_iter()
                .map(|(_, id)| id)
                .chain(refs.list_tags().into_iter().map(|(_, id)| id))
                .chain(refs.list_remote_refs().into_iter().map(|(_, id)| id))
                .collect();
            graph.topological_iter(&ref_heads, &[])?
        }
        GcMode::Default => graph.all_ids(),
        GcMode::Shallow => unreachable!("handled above"),
    };
    for id in commit_ids {
        if let Ok(root) = graph.resolve_root(id) {
            keep.extend(remote_sync::object_closure(store, root));
        }
    }

    let mut removed = 0;
    for hash in store.all_hashes() {
        if !keep.contains(&hash) {
            store.remove(hash);
            removed += 1;
        }
    }

    Ok(GcReport {
        mode: opts.mode,
        kept: keep.len(),
        removed,
        archive_compression_level: opts.archive_compression_level,
    })
}

/// State threaded from `begin_gc` through to `establish_post_finalize`.
#[derive(Debug, Clone)]
pub struct GcRun {
    keeper: GcKeeper,
    captured_epoch: Option<ClusterEpoch>,
}

/// Kill every other connection, then finalize (spec §4.12): the simpler,
/// fully synchronous discipline. `EstablishPreFinalize` is a no-op; all the
/// work happens in `EstablishPostFinalize`.
pub struct KillConnectionsSafepoint<'a> {
    registry: &'a dyn SessionRegistry,
    cluster: &'a dyn ClusterRoleSource,
    caches: &'a dyn CachePurge,
}

impl<'a> KillConnectionsSafepoint<'a> {
    pub fn new(registry: &'a dyn SessionRegistry, cluster: &'a dyn ClusterRoleSource, caches: &'a dyn CachePurge) -> Self {
        Self { registry, cluster, caches }
    }

    #[instrument(skip(self))]
    pub fn begin_gc(&self, keeper: GcKeeper) -> GcRun {
        info!(caller = keeper.caller, discipline = "kill_connections", "BeginGC");
        self.caches.purge();
        GcRun {
            captured_epoch: self.cluster.current(),
            keeper,
        }
    }

    pub fn establish_pre_finalize(&self, _run: &GcRun) -> GcResult<()> {
        Ok(())
    }

    /// Verifies the epoch, kills every other connection, polls (1ms
    /// backoff, doubling, capped at 10s) until they are gone, then
    /// invalidates and marks the caller's own session.
    #[instrument(skip(self, run))]
    pub fn establish_post_finalize(&self, run: &GcRun) -> GcResult<()> {
        check_epoch_unchanged(self.cluster, run.captured_epoch)?;

        for id in self.registry.live_sessions(run.keeper.caller) {
            self.registry.kill(id);
        }

        let mut backoff = Duration::from_millis(1);
        let cap = Duration::from_secs(10);
        while self.registry.connection_count() > 1 {
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(cap);
        }

        self.registry.invalidate_transaction(run.keeper.caller);
        self.registry.mark_server_performed_gc(run.keeper.caller);
        info!(caller = run.keeper.caller, "EstablishPostFinalize");
        Ok(())
    }
}

/// Waits for every other session to reach quiescence rather than killing
/// them (spec §4.12): the cancellable discipline. `EstablishPreFinalize` is
/// the only `async fn` in this module, per the async-surface decision in
/// `DESIGN.md`.
pub struct SessionAwareSafepoint<'a> {
    registry: &'a dyn SessionRegistry,
    cluster: &'a dyn ClusterRoleSource,
    caches: &'a dyn CachePurge,
}

#[derive(Debug, Clone)]
pub struct SessionAwareRun {
    keeper: GcKeeper,
    captured_epoch: Option<ClusterEpoch>,
    caller_roots: Vec<Hash>,
}

impl<'a> SessionAwareSafepoint<'a> {
    pub fn new(registry: &'a dyn SessionRegistry, cluster: &'a dyn ClusterRoleSource, caches: &'a dyn CachePurge) -> Self {
        Self { registry, cluster, caches }
    }

    #[instrument(skip(self, keeper))]
    pub fn begin_gc(&self, keeper: GcKeeper) -> SessionAwareRun {
        info!(caller = keeper.caller, discipline = "session_aware", "BeginGC");
        self.caches.purge();
        let caller_roots = self.registry.visit_gc_roots(keeper.caller).unwrap_or_default();
        SessionAwareRun {
            captured_epoch: self.cluster.current(),
            caller_roots,
            keeper,
        }
    }

    /// Polls every other live session until each has been visited at a
    /// quiescent point, unioning their reachable roots with the caller's.
    /// Cancellable via `cancel`; returns `GcError::Cancelled` if cancelled
    /// before every session has been visited.
    #[instrument(skip(self, run, cancel))]
    pub async fn establish_pre_finalize(&self, run: &SessionAwareRun, cancel: &CancellationToken) -> GcResult<Vec<Hash>> {
        let mut all_roots = run.caller_roots.clone();
        let mut pending: Vec<SessionId> = self.registry.live_sessions(run.keeper.caller);

        while !pending.is_empty() {
            if cancel.is_cancelled() {
                return Err(GcError::Cancelled);
            }
            let mut still_pending = Vec::new();
            for id in pending {
                match self.registry.visit_gc_roots(id) {
                    Some(roots) => all_roots.extend(roots),
                    None => still_pending.push(id),
                }
            }
            pending = still_pending;
            if pending.is_empty() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(GcError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(10)) => {}
            }
        }

        Ok(all_roots)
    }

    pub fn establish_post_finalize(&self, run: &SessionAwareRun) -> GcResult<()> {
        check_epoch_unchanged(self.cluster, run.captured_epoch)
    }

    /// Cancels an in-flight `establish_pre_finalize` wait without altering
    /// any session's state.
    pub fn cancel_safepoint(&self, cancel: &CancellationToken) {
        cancel.cancel();
    }
}

fn check_epoch_unchanged(cluster: &dyn ClusterRoleSource, captured: Option<ClusterEpoch>) -> GcResult<()> {
    if cluster.current() != captured {
        return Err(GcError::ClusterRoleChanged);
    }
    if let Some(epoch) = captured {
        if epoch.role != ClusterRole::Primary {
            return Err(GcError::ClusterRoleChanged);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Commit;
    use crate::commit::CommitMeta;
    use crate::commit::Signature;
    use crate::commit::Timestamp;
    use crate::content_store::MemoryContentStore;
    use crate::table::RootValue;
    use crate::table::Table;
    use crate::table::TableName;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    fn commit_at(graph: &CommitGraph, parents: Vec<CommitId>, root: Hash) -> CommitId {
        graph.put_commit(Commit {
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
        })
    }

    struct AlwaysPrimary;
    impl ClusterRoleSource for AlwaysPrimary {
        fn current(&self) -> Option<ClusterEpoch> {
            Some(ClusterEpoch { role: ClusterRole::Primary, epoch: 1 })
        }
    }

    struct NoOpCache;
    impl CachePurge for NoOpCache {
        fn purge(&self) {}
    }

    #[derive(Default)]
    struct FakeRegistry {
        /// Sessions considered connected, independent of whether they have
        /// been visited yet.
        live: Mutex<Vec<SessionId>>,
        roots: Mutex<HashMap<SessionId, Vec<Hash>>>,
        killed: Mutex<Vec<SessionId>>,
        connections: Mutex<usize>,
        gc_marked: Mutex<Vec<SessionId>>,
    }

    impl SessionRegistry for FakeRegistry {
        fn live_sessions(&self, caller: SessionId) -> Vec<SessionId> {
            self.live.lock().iter().copied().filter(|id| *id != caller).collect()
        }
        fn visit_gc_roots(&self, session: SessionId) -> Option<Vec<Hash>> {
            self.roots.lock().get(&session).cloned()
        }
        fn kill(&self, session: SessionId) {
            self.killed.lock().push(session);
            let mut c = self.connections.lock();
            *c = c.saturating_sub(1);
        }
        fn connection_count(&self) -> usize {
            *self.connections.lock()
        }
        fn invalidate_transaction(&self, _session: SessionId) {}
        fn mark_server_performed_gc(&self, session: SessionId) {
            self.gc_marked.lock().push(session);
        }
    }

    fn table_with_schema(seed: u8) -> Table {
        Table {
            schema_hash: Hash::of(&[seed]),
            row_index: Hash::of(&[seed, 1]),
            secondary_indexes: BTreeMap::new(),
            artifacts: Hash::of(&[seed, 2]),
            autoinc: None,
        }
    }

    #[test]
    fn default_mode_keeps_dangling_history() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let refs = RefStore::new();
        let t = TableName::unqualified("t");

        let root0 = RootValue::empty(1);
        let root0_hash = crate::table::store_root(&store, &root0);
        let c0 = commit_at(&graph, vec![], root0_hash);
        refs.create_branch("main", c0, root0_hash, false).unwrap();

        // Dangling commit: registered in the graph but reachable from no ref.
        let root1 = root0.put_table(t.clone(), table_with_schema(1));
        let root1_hash = crate::table::store_root(&store, &root1);
        let _dangling = commit_at(&graph, vec![c0], root1_hash);

        let report = collect(&store, &graph, &refs, &[], GcOptions { mode: GcMode::Default, archive_compression_level: None }).unwrap();
        assert_eq!(report.removed, 0);
        assert!(store.contains(root1_hash));
    }

    #[test]
    fn full_mode_drops_objects_only_reachable_from_dangling_commits() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let refs = RefStore::new();
        let t = TableName::unqualified("t");

        let root0 = RootValue::empty(1);
        let root0_hash = crate::table::store_root(&store, &root0);
        let c0 = commit_at(&graph, vec![], root0_hash);
        refs.create_branch("main", c0, root0_hash, false).unwrap();

        let root1 = root0.put_table(t.clone(), table_with_schema(1));
        let root1_hash = crate::table::store_root(&store, &root1);
        let _dangling = commit_at(&graph, vec![c0], root1_hash);

        let report = collect(&store, &graph, &refs, &[], GcOptions { mode: GcMode::Full, archive_compression_level: None }).unwrap();
        assert!(report.removed > 0);
        assert!(!store.contains(root1_hash));
        assert!(store.contains(root0_hash));
    }

    #[test]
    fn shallow_mode_never_removes_anything() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let refs = RefStore::new();
        let root0 = RootValue::empty(1);
        let root0_hash = crate::table::store_root(&store, &root0);
        commit_at(&graph, vec![], root0_hash);

        let report = collect(&store, &graph, &refs, &[], GcOptions { mode: GcMode::Shallow, archive_compression_level: None }).unwrap();
        assert_eq!(report.removed, 0);
        assert!(store.contains(root0_hash));
    }

    #[test]
    fn kill_connections_rejects_epoch_change() {
        struct FlippingCluster(Mutex<u64>);
        impl ClusterRoleSource for FlippingCluster {
            fn current(&self) -> Option<ClusterEpoch> {
                let mut e = self.0.lock();
                *e += 1;
                Some(ClusterEpoch { role: ClusterRole::Primary, epoch: *e })
            }
        }
        let cluster = FlippingCluster(Mutex::new(0));
        let registry = FakeRegistry::default();
        let caches = NoOpCache;
        let safepoint = KillConnectionsSafepoint::new(&registry, &cluster, &caches);
        let run = safepoint.begin_gc(GcKeeper { caller: 1, database: "db".to_string() });
        let err = safepoint.establish_post_finalize(&run).unwrap_err();
        assert!(matches!(err, GcError::ClusterRoleChanged));
    }

    #[test]
    fn kill_connections_kills_every_other_session_and_marks_caller() {
        let cluster = AlwaysPrimary;
        let registry = FakeRegistry::default();
        *registry.live.lock() = vec![1, 2, 3];
        *registry.connections.lock() = 3;
        let caches = NoOpCache;

        let safepoint = KillConnectionsSafepoint::new(&registry, &cluster, &caches);
        let run = safepoint.begin_gc(GcKeeper { caller: 1, database: "db".to_string() });
        safepoint.establish_pre_finalize(&run).unwrap();
        safepoint.establish_post_finalize(&run).unwrap();

        assert_eq!(registry.killed.lock().len(), 2);
        assert!(!registry.killed.lock().contains(&1));
        assert_eq!(registry.gc_marked.lock().as_slice(), &[1]);
    }

    #[tokio::test]
    async fn session_aware_collects_every_sessions_roots() {
        let cluster = AlwaysPrimary;
        let registry = FakeRegistry::default();
        *registry.live.lock() = vec![2];
        registry.roots.lock().insert(1, vec![Hash::of(b"caller-root")]);
        registry.roots.lock().insert(2, vec![Hash::of(b"other-root")]);
        let caches = NoOpCache;

        let safepoint = SessionAwareSafepoint::new(&registry, &cluster, &caches);
        let run = safepoint.begin_gc(GcKeeper { caller: 1, database: "db".to_string() });
        let cancel = CancellationToken::new();
        let roots = safepoint.establish_pre_finalize(&run, &cancel).await.unwrap();

        assert!(roots.contains(&Hash::of(b"caller-root")));
        assert!(roots.contains(&Hash::of(b"other-root")));
        safepoint.establish_post_finalize(&run).unwrap();
    }

    #[tokio::test]
    async fn session_aware_wait_is_cancellable() {
        let cluster = AlwaysPrimary;
        let registry = FakeRegistry::default();
        // Session 2 is live but never reaches quiescence, so the wait would
        // otherwise block forever.
        *registry.live.lock() = vec![2];
        registry.roots.lock().insert(1, vec![]);
        let caches = NoOpCache;

        let safepoint = SessionAwareSafepoint::new(&registry, &cluster, &caches);
        let run = safepoint.begin_gc(GcKeeper { caller: 1, database: "db".to_string() });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = safepoint.establish_pre_finalize(&run, &cancel).await.unwrap_err();
        assert!(matches!(err, GcError::Cancelled));
    }
}
