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

//! Branch/Checkout Engine (C8): branch lifecycle operations plus the
//! session branch-switch algorithm with working-changes carry-forward.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::instrument;

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
use crate::ref_store::RefStore;
use crate::ref_store::RefStoreError;
use crate::ref_store::ReplicationStatus;
use crate::ref_store::WorkingSetMeta;
use crate::session::Session;
use crate::session::SessionError;
use crate::table;
use crate::table::RootValue;
use crate::table::TableName;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("checking out {0:?} would leave HEAD detached; create a branch with -b first")]
    DetachedHeadRefused(String),
    #[error("both the current and target branch have uncommitted changes to the same tables")]
    WorkingSetsOnBothBranches,
    #[error("{0:?} matches both a table and a remote-tracking branch; qualify with a trailing '/' to disambiguate")]
    AmbiguousRef(String),
}

impl ErrorKind for CheckoutError {
    fn kind(&self) -> Kind {
        match self {
            Self::RefStore(e) => e.kind(),
            Self::CommitGraph(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Merge(e) => e.kind(),
            Self::DetachedHeadRefused(_) => Kind::DetachedHeadRefused,
            Self::WorkingSetsOnBothBranches => Kind::WorkingSetsOnBothBranches,
            Self::AmbiguousRef(_) => Kind::InvalidArgs,
        }
    }
}

pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub remote: String,
    pub branch: String,
}

/// Owns the ancillary per-branch metadata `RefStore` has no field for
/// (upstream tracking), plus wrappers over the ref-store branch lifecycle
/// operations that also need to keep that metadata consistent.
#[derive(Debug, Default)]
pub struct BranchEngine {
    upstreams: RwLock<HashMap<String, Upstream>>,
}

impl BranchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, refs, graph))]
    pub fn create_branch(
        &self,
        refs: &RefStore,
        graph: &CommitGraph,
        name: &str,
        start_spec: &str,
        head: CommitId,
        force: bool,
    ) -> CheckoutResult<()> {
        let start = graph.resolve(start_spec, head, refs)?;
        let root = graph.resolve_root(start)?;
        refs.create_branch(name, start, root, force)?;
        Ok(())
    }

    pub fn copy_branch(&self, refs: &RefStore, src: &str, dst: &str, force: bool) -> CheckoutResult<()> {
        refs.copy_branch(src, dst, force)?;
        if let Some(upstream) = self.upstreams.read().get(src).cloned() {
            self.upstreams.write().insert(dst.to_string(), upstream);
        }
        Ok(())
    }

    pub fn rename_branch(&self, refs: &RefStore, old: &str, new: &str, force: bool) -> CheckoutResult<()> {
        refs.rename_branch(old, new, force)?;
        if let Some(upstream) = self.upstreams.write().remove(old) {
            self.upstreams.write().insert(new.to_string(), upstream);
        }
        Ok(())
    }

    pub fn delete_branch(&self, refs: &RefStore, name: &str, force: bool, current_branch: &str) -> CheckoutResult<()> {
        refs.delete_branch(name, force, current_branch)?;
        self.upstreams.write().remove(name);
        Ok(())
    }

    pub fn set_upstream(&self, branch: &str, remote: &str, upstream_branch: &str) {
        self.upstreams.write().insert(
            branch.to_string(),
            Upstream {
                remote: remote.to_string(),
                branch: upstream_branch.to_string(),
            },
        );
    }

    pub fn upstream_of(&self, branch: &str) -> Option<Upstream> {
        self.upstreams.read().get(branch).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub status: i32,
    pub message: String,
}

/// Refuses a checkout whose target would match both a local table and a
/// remote-tracking branch while no local branch of that name exists
/// (spec §4.8 ambiguity rule). Called by the dispatcher before resolving
/// `target` as a branch name.
pub fn check_checkout_ambiguity(refs: &RefStore, target: &str, table_names: &[TableName]) -> CheckoutResult<()> {
    if refs.has_branch(target) {
        return Ok(());
    }
    let is_table = table_names.iter().any(|t| t.name.eq_ignore_ascii_case(target));
    let matches_remote = refs.list_remote_refs().into_iter().any(|((_, branch), _)| branch == target);
    if is_table && matches_remote {
        return Err(CheckoutError::AmbiguousRef(target.to_string()));
    }
    Ok(())
}

/// Switches the session's active branch to `target`, carrying forward any
/// uncommitted changes (spec §4.8). Refuses tags and bare commit hashes
/// (detached HEAD).
#[instrument(skip(session, store))]
pub fn checkout_branch(session: &mut Session, store: &dyn ContentStore, target: &str, force: bool) -> CheckoutResult<CheckoutOutcome> {
    let refs = session.refs();
    if !refs.has_branch(target) {
        if refs.has_tag(target) || Hash::try_from_hex(target).is_some() {
            return Err(CheckoutError::DetachedHeadRefused(target.to_string()));
        }
        return Err(RefStoreError::BranchNotFound(target.to_string()).into());
    }

    let current_branch = session.branch.clone();
    if current_branch == target {
        return Ok(CheckoutOutcome {
            status: 0,
            message: format!("Already on '{target}'"),
        });
    }

    if refs.get_working_set(target).is_err() {
        let target_head_id = refs.resolve_branch(target)?;
        let target_head_root = session.graph().resolve_root(target_head_id)?;
        refs.repair_missing_working_set(target, target_head_root)?;
    }

    let session_head_id = refs.resolve_branch(&current_branch)?;
    let session_head_root = session.graph().resolve_root(session_head_id)?;
    let current_ws = refs.get_working_set(&current_branch)?;
    let target_ws = refs.get_working_set(target)?;
    let target_head_id = refs.resolve_branch(target)?;
    let target_head_root = session.graph().resolve_root(target_head_id)?;

    let has_uncommitted = current_ws.has_uncommitted_changes(session_head_root);
    if has_uncommitted && target_head_root != session_head_root {
        let working_val = table::load_root(store, current_ws.working_root).unwrap_or_else(|| RootValue::empty(1));
        let staged_val = table::load_root(store, current_ws.staged_root).unwrap_or_else(|| RootValue::empty(1));
        let session_head_val = table::load_root(store, session_head_root).unwrap_or_else(|| RootValue::empty(1));
        let target_head_val = table::load_root(store, target_head_root).unwrap_or_else(|| RootValue::empty(1));

        if !force && checkout_would_stomp(&working_val, &session_head_val, &target_head_val) {
            return Err(CheckoutError::WorkingSetsOnBothBranches);
        }

        let new_working = carry_forward(store, &session_head_val, &working_val, &target_head_val, session.graph())?;
        let new_staged = carry_forward(store, &session_head_val, &staged_val, &target_head_val, session.graph())?;
        let new_working_hash = table::store_root(store, &new_working);
        let new_staged_hash = table::store_root(store, &new_staged);
        let expected = target_ws.hash_of();
        let new_target_ws = target_ws.with_working_root(new_working_hash).with_staged_root(new_staged_hash);
        refs.update_working_set(target, new_target_ws, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
    } else if !has_uncommitted {
        let expected = current_ws.hash_of();
        let reset_ws = current_ws
            .with_working_root(session_head_root)
            .with_staged_root(session_head_root)
            .clear_merge();
        refs.update_working_set(&current_branch, reset_ws, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
    }

    session.switch_working_set(target, true)?;
    Ok(CheckoutOutcome {
        status: 0,
        message: format!("Switched to branch '{target}'"),
    })
}

pub fn checkout_new_branch(
    session: &mut Session,
    store: &dyn ContentStore,
    branches: &BranchEngine,
    name: &str,
    start_spec: &str,
    force: bool,
) -> CheckoutResult<CheckoutOutcome> {
    let head = session.refs().resolve_branch(&session.branch)?;
    branches.create_branch(session.refs(), session.graph(), name, start_spec, head, force)?;
    checkout_branch(session, store, name, force)
}

pub fn checkout_remote_branch(
    session: &mut Session,
    store: &dyn ContentStore,
    branches: &BranchEngine,
    remote: &str,
    remote_branch: &str,
    force: bool,
) -> CheckoutResult<CheckoutOutcome> {
    let refs = session.refs();
    let commit = refs.resolve_remote(remote, remote_branch)?;
    let root = session.graph().resolve_root(commit)?;
    refs.create_branch(remote_branch, commit, root, force)?;
    branches.set_upstream(remote_branch, remote, remote_branch);
    checkout_branch(session, store, remote_branch, force)
}

/// Restores `tables` in the working root to their content at HEAD
/// (`checkout -- <tables>`, spec §4.8).
pub fn checkout_tables_from_head(session: &Session, store: &dyn ContentStore, tables: &[TableName]) -> CheckoutResult<Hash> {
    let roots = session.get_roots()?;
    checkout_tables_from_root(store, roots.working, roots.head, tables)
}

/// Restores `tables` in the working root to their content at an arbitrary
/// resolved commit.
pub fn checkout_tables_from_commit(session: &Session, store: &dyn ContentStore, spec: &str, tables: &[TableName]) -> CheckoutResult<Hash> {
    let roots = session.get_roots()?;
    let head_id = session.refs().resolve_branch(&session.branch)?;
    let commit_id = session.graph().resolve(spec, head_id, session.refs())?;
    let source_root = session.graph().resolve_root(commit_id)?;
    checkout_tables_from_root(store, roots.working, source_root, tables)
}

fn checkout_tables_from_root(store: &dyn ContentStore, working_hash: Hash, source_hash: Hash, tables: &[TableName]) -> CheckoutResult<Hash> {
    let working = table::load_root(store, working_hash).unwrap_or_else(|| RootValue::empty(1));
    let source = table::load_root(store, source_hash).unwrap_or_else(|| RootValue::empty(1));
    let mut result = working;
    for name in tables {
        result = match source.get_table(name).0 {
            Some(t) => result.put_table(name.clone(), t.clone()),
            None => result.remove_tables(std::slice::from_ref(name), true, true).unwrap_or(result),
        };
    }
    Ok(table::store_root(store, &result))
}

/// True iff switching branches would silently discard a foreign edit: some
/// table differs between `working` and `session_head`, and the target
/// branch's head does not hold that same (pre-divergence) content
/// (spec §4.8 step 4).
fn checkout_would_stomp(working: &RootValue, session_head: &RootValue, target_head: &RootValue) -> bool {
    for name in working.union_table_names(session_head) {
        let w = working.get_table(&name).0;
        let h = session_head.get_table(&name).0;
        if w != h {
            let th = target_head.get_table(&name).0;
            if th != h {
                return true;
            }
        }
    }
    false
}

/// Applies the diff between `old_head` and `ours` onto `target_head`
/// (spec §4.8 step 5), reusing the merge engine's per-table three-way logic
/// with `old_head` as ancestor and fast-forward detection disabled.
fn carry_forward(store: &dyn ContentStore, old_head: &RootValue, ours: &RootValue, target_head: &RootValue, graph: &CommitGraph) -> CheckoutResult<RootValue> {
    let ours_commit = CommitId::new(ours.hash_of());
    let theirs_commit = CommitId::new(target_head.hash_of());
    match merge_roots(store, ours, target_head, old_head, ours_commit, theirs_commit, graph, MergeOptions { no_ff: true, is_cherry_pick: false }) {
        Ok(MergeOutcome::Merged { root, .. }) => Ok(root),
        Ok(MergeOutcome::FastForward(_)) => unreachable!("carry_forward always sets no_ff"),
        Err(MergeError::UpToDate) => Ok(ours.clone()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Commit;
    use crate::commit::CommitMeta;
    use crate::commit::Signature;
    use crate::commit::Timestamp;
    use crate::content_store::MemoryContentStore;
    use crate::table::Table;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn signed_commit(root: Hash, parents: Vec<CommitId>) -> Commit {
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

    fn sample_table(seed: u8) -> Table {
        Table {
            schema_hash: Hash::of(&[seed]),
            row_index: Hash::of(&[seed, 1]),
            secondary_indexes: BTreeMap::new(),
            artifacts: Hash::of(&[seed, 2]),
            autoinc: None,
        }
    }

    fn setup() -> (Arc<RefStore>, Arc<CommitGraph>, Arc<MemoryContentStore>, Session) {
        let refs = Arc::new(RefStore::new());
        let graph = Arc::new(CommitGraph::new());
        let store = Arc::new(MemoryContentStore::new());
        let root = RootValue::empty(1);
        let root_hash = table::store_root(store.as_ref(), &root);
        let c0 = graph.put_commit(signed_commit(root_hash, vec![]));
        refs.create_branch("main", c0, root_hash, false).unwrap();
        let session = Session::new("db", "main", refs.clone(), graph.clone());
        (refs, graph, store, session)
    }

    #[test]
    fn clean_checkout_switches_branch_without_carry_forward() {
        let (refs, graph, store, mut session) = setup();
        let root = RootValue::empty(1);
        let root_hash = table::store_root(store.as_ref(), &root);
        let c1 = graph.put_commit(signed_commit(root_hash, vec![]));
        refs.create_branch("dev", c1, root_hash, false).unwrap();
        let outcome = checkout_branch(&mut session, store.as_ref(), "dev", false).unwrap();
        assert_eq!(outcome.status, 0);
        assert_eq!(session.branch, "dev");
    }

    #[test]
    fn checking_out_a_tag_is_refused_as_detached_head() {
        let (refs, graph, store, mut session) = setup();
        let head = refs.resolve_branch("main").unwrap();
        refs.create_tag("v1", head, false).unwrap();
        let _ = graph;
        let err = checkout_branch(&mut session, store.as_ref(), "v1", false).unwrap_err();
        assert!(matches!(err, CheckoutError::DetachedHeadRefused(_)));
    }

    #[test]
    fn uncommitted_foreign_only_edit_carries_forward_without_stomping() {
        let (refs, graph, store, mut session) = setup();
        let t = TableName::unqualified("t");
        let edited = RootValue::empty(1).put_table(t.clone(), sample_table(1));
        let edited_hash = table::store_root(store.as_ref(), &edited);
        session.set_working_root(edited_hash).unwrap();

        let dev_root = RootValue::empty(2);
        let dev_root_hash = table::store_root(store.as_ref(), &dev_root);
        let c1 = graph.put_commit(signed_commit(dev_root_hash, vec![]));
        refs.create_branch("dev", c1, dev_root_hash, false).unwrap();

        let outcome = checkout_branch(&mut session, store.as_ref(), "dev", false).unwrap();
        assert_eq!(outcome.status, 0);
        let new_roots = session.get_roots().unwrap();
        let new_working = table::load_root(store.as_ref(), new_roots.working).unwrap();
        assert!(new_working.get_table(&t).0.is_some());
    }

    #[test]
    fn conflicting_foreign_edits_refuse_without_force() {
        let (refs, graph, store, mut session) = setup();
        let t = TableName::unqualified("t");
        let edited = RootValue::empty(1).put_table(t.clone(), sample_table(1));
        let edited_hash = table::store_root(store.as_ref(), &edited);
        session.set_working_root(edited_hash).unwrap();

        let dev_root = RootValue::empty(1).put_table(t, sample_table(2));
        let dev_root_hash = table::store_root(store.as_ref(), &dev_root);
        let c1 = graph.put_commit(signed_commit(dev_root_hash, vec![]));
        refs.create_branch("dev", c1, dev_root_hash, false).unwrap();

        let err = checkout_branch(&mut session, store.as_ref(), "dev", false).unwrap_err();
        assert!(matches!(err, CheckoutError::WorkingSetsOnBothBranches));
    }

    #[test]
    fn ambiguous_target_is_refused() {
        let (refs, _graph, _store, _session) = setup();
        refs.set_remote_tracking("origin", "feature", CommitId::new(Hash::of(b"x")));
        let tables = vec![TableName::unqualified("feature")];
        let err = check_checkout_ambiguity(&refs, "feature", &tables).unwrap_err();
        assert!(matches!(err, CheckoutError::AmbiguousRef(_)));
    }
}
