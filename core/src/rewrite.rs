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

//! Rewrite Engine (C11): cherry-pick, interactive rebase, and revert, all
//! built as repeated applications of [`crate::merge_engine::merge_roots`]
//! rather than a second three-way-diff implementation.

use thiserror::Error;
use tracing::instrument;

use crate::commit::Commit;
use crate::commit::CommitId;
use crate::commit::CommitMeta;
use crate::commit::Signature;
use crate::commit::Timestamp;
use crate::commit_graph::CommitGraph;
use crate::commit_graph::CommitGraphError;
use crate::content_store::ContentStore;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::merge_engine::cherry_pick_ancestor;
use crate::merge_engine::merge_roots;
use crate::merge_engine::MergeError;
use crate::merge_engine::MergeOptions;
use crate::merge_engine::MergeOutcome;
use crate::ref_store::RefStore;
use crate::ref_store::RefStoreError;
use crate::ref_store::ReplicationStatus;
use crate::ref_store::WorkingSetMeta;
use crate::session::Roots;
use crate::session::Session;
use crate::session::SessionError;
use crate::table;
use crate::table::RootValue;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
    #[error("the working set has uncommitted changes")]
    UncommittedChanges,
    #[error("unresolved conflicts or constraint violations; resolve before continuing")]
    UnresolvedConflicts,
    #[error("commit {0} has no parent to revert against")]
    RevertRequiresAParent(CommitId),
}

impl ErrorKind for RewriteError {
    fn kind(&self) -> Kind {
        match self {
            Self::Session(e) => e.kind(),
            Self::CommitGraph(e) => e.kind(),
            Self::Merge(e) => e.kind(),
            Self::RefStore(e) => e.kind(),
            Self::UncommittedChanges => Kind::UncommittedChanges,
            Self::UnresolvedConflicts => Kind::UnresolvedConflictsOrViolations,
            Self::RevertRequiresAParent(_) => Kind::InvalidArgs,
        }
    }
}

pub type RewriteResult<T> = Result<T, RewriteError>;

fn load_or_empty(store: &dyn ContentStore, hash: crate::hash::Hash) -> RootValue {
    table::load_root(store, hash).unwrap_or_else(|| RootValue::empty(1))
}

fn require_clean(roots: &Roots) -> RewriteResult<()> {
    if roots.staged != roots.head || roots.working != roots.head {
        return Err(RewriteError::UncommittedChanges);
    }
    Ok(())
}

/// Cherry-picks a single commit onto the session's current head (spec
/// §4.11): requires a clean working set, merges with `IsCherryPick=true`,
/// and on a clean merge auto-stages and commits with the source's message.
#[instrument(skip(session, store))]
pub fn cherry_pick(session: &Session, store: &dyn ContentStore, source: CommitId) -> RewriteResult<CommitId> {
    let roots = session.get_roots()?;
    require_clean(&roots)?;

    let ours_commit = session.refs().resolve_branch(&session.branch)?;
    let ancestor_commit = cherry_pick_ancestor(session.graph(), source)?;

    let ours_root = load_or_empty(store, roots.head);
    let theirs_root = load_or_empty(store, session.graph().resolve_root(source)?);
    let ancestor_root = load_or_empty(store, session.graph().resolve_root(ancestor_commit)?);

    let outcome = merge_roots(
        store,
        &ours_root,
        &theirs_root,
        &ancestor_root,
        ours_commit,
        source,
        session.graph(),
        MergeOptions { no_ff: true, is_cherry_pick: true },
    )?;
    let MergeOutcome::Merged { root, stats } = outcome else {
        unreachable!("no_ff is always set, merge_roots never returns FastForward");
    };
    if stats.has_conflicts() {
        let root_hash = table::store_root(store, &root);
        session.set_roots(Roots { head: roots.head, staged: root_hash, working: root_hash })?;
        return Err(RewriteError::UnresolvedConflicts);
    }

    let root_hash = table::store_root(store, &root);
    session.set_roots(Roots { head: roots.head, staged: root_hash, working: root_hash })?;

    let source_commit = session.graph().get_commit(source)?;
    let pending = crate::session::PendingCommit {
        parents: vec![ours_commit],
        root: root_hash,
        meta: CommitMeta {
            message: source_commit.meta.message,
            author: source_commit.meta.author,
            committer: Some(Signature {
                name: session.user_name.clone(),
                email: session.user_email.clone(),
                timestamp: Timestamp::now(),
            }),
            signature: None,
        },
    };
    Ok(session.dolt_commit(pending)?)
}

/// Reverts `commits` in order via sequential inverted three-way merges
/// (ancestor = the commit being reverted, theirs = its parent), composing a
/// single commit whose message lists each reverted commit (spec §4.11).
#[instrument(skip(session, store, commits))]
pub fn revert(session: &Session, store: &dyn ContentStore, commits: &[CommitId]) -> RewriteResult<CommitId> {
    let roots = session.get_roots()?;
    require_clean(&roots)?;

    let ours_commit = session.refs().resolve_branch(&session.branch)?;
    let mut current_root = load_or_empty(store, roots.head);
    let mut messages = Vec::with_capacity(commits.len());

    for &commit_id in commits {
        let commit = session.graph().get_commit(commit_id)?;
        let parent_id = *commit.parents.first().ok_or(RewriteError::RevertRequiresAParent(commit_id))?;
        let commit_root = load_or_empty(store, session.graph().resolve_root(commit_id)?);
        let parent_root = load_or_empty(store, session.graph().resolve_root(parent_id)?);

        let pseudo_ours = CommitId::new(current_root.hash_of());
        let pseudo_theirs = CommitId::new(parent_root.hash_of());
        let outcome = merge_roots(
            store,
            &current_root,
            &parent_root,
            &commit_root,
            pseudo_ours,
            pseudo_theirs,
            session.graph(),
            MergeOptions { no_ff: true, is_cherry_pick: false },
        )?;
        let MergeOutcome::Merged { root, stats } = outcome else {
            unreachable!("no_ff is always set, merge_roots never returns FastForward");
        };
        if stats.has_conflicts() {
            let root_hash = table::store_root(store, &root);
            session.set_roots(Roots { head: roots.head, staged: root_hash, working: root_hash })?;
            return Err(RewriteError::UnresolvedConflicts);
        }
        current_root = root;
        messages.push(format!("Revert \"{}\"\n\nThis reverts commit {}.", commit.meta.message, commit_id));
    }

    let root_hash = table::store_root(store, &current_root);
    session.set_roots(Roots { head: roots.head, staged: root_hash, working: root_hash })?;

    let pending = crate::session::PendingCommit {
        parents: vec![ours_commit],
        root: root_hash,
        meta: CommitMeta {
            message: messages.join("\n\n"),
            author: Signature {
                name: session.user_name.clone(),
                email: session.user_email.clone(),
                timestamp: Timestamp::now(),
            },
            committer: None,
            signature: None,
        },
    };
    Ok(session.dolt_commit(pending)?)
}

/// One row of the `dolt_rebase` plan table the caller materializes as a SQL
/// system table (spec §4.11); persistence of the table itself is outside
/// this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseAction {
    Pick,
    Skip,
    Squash,
}

#[derive(Debug, Clone)]
pub struct RebasePlanRow {
    pub order: u32,
    pub action: RebaseAction,
    pub commit_hash: CommitId,
    pub commit_message: String,
}

/// Tracks an in-progress interactive rebase: the branch being rebased and
/// where it is being replayed onto. Callers persist this however their own
/// session state is modeled (spec §4.11 calls it out as living "in the
/// current working set"); this crate hands back an opaque value rather than
/// prescribing where it is stored.
#[derive(Debug, Clone)]
pub struct RebaseState {
    pub original_branch: String,
    pub upstream: CommitId,
    pub aux_branch: String,
}

/// `dolt_rebase <upstream>` (spec §4.11 step 1): creates `dolt_rebase_<token>`
/// at the upstream commit and returns the initial plan, every row defaulted
/// to `Pick` in oldest-first order, ready for a caller to edit before
/// calling [`continue_rebase`].
#[instrument(skip(refs, graph))]
pub fn start_rebase(refs: &RefStore, graph: &CommitGraph, original_branch: &str, upstream_spec: &str) -> RewriteResult<(RebaseState, Vec<RebasePlanRow>)> {
    let head = refs.resolve_branch(original_branch)?;
    let upstream = graph.resolve(upstream_spec, head, refs)?;
    let upstream_root = graph.resolve_root(upstream)?;

    let token = rand::random::<u64>();
    let aux_branch = format!("dolt_rebase_{token:016x}");
    refs.create_branch(&aux_branch, upstream, upstream_root, false)?;

    let rows = graph
        .topological_iter(&[head], &[upstream])?
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, id)| {
            let commit = graph.get_commit(id).expect("commit from topological_iter must resolve");
            RebasePlanRow {
                order: i as u32,
                action: RebaseAction::Pick,
                commit_hash: id,
                commit_message: commit.meta.message,
            }
        })
        .collect();

    Ok((
        RebaseState {
            original_branch: original_branch.to_string(),
            upstream,
            aux_branch,
        },
        rows,
    ))
}

/// Replays `commit` onto `current` on `branch`, advancing the aux branch's
/// head via CAS. Used for both `Pick` and the pick half of `Squash`.
fn replay_commit(
    store: &dyn ContentStore,
    graph: &CommitGraph,
    refs: &RefStore,
    branch: &str,
    current: CommitId,
    source: CommitId,
    message_override: Option<String>,
) -> RewriteResult<CommitId> {
    let ancestor_commit = cherry_pick_ancestor(graph, source)?;
    let ancestor_root = load_or_empty(store, graph.resolve_root(ancestor_commit)?);
    let ours_root = load_or_empty(store, graph.resolve_root(current)?);
    let theirs_root = load_or_empty(store, graph.resolve_root(source)?);

    let outcome = merge_roots(store, &ours_root, &theirs_root, &ancestor_root, current, source, graph, MergeOptions { no_ff: true, is_cherry_pick: true })?;
    let MergeOutcome::Merged { root, stats } = outcome else {
        unreachable!("no_ff is always set, merge_roots never returns FastForward");
    };
    if stats.has_conflicts() {
        return Err(RewriteError::UnresolvedConflicts);
    }

    let root_hash = table::store_root(store, &root);
    let source_commit = graph.get_commit(source)?;
    let new_commit = Commit {
        root: root_hash,
        parents: vec![current],
        meta: CommitMeta {
            message: message_override.unwrap_or(source_commit.meta.message),
            author: source_commit.meta.author,
            committer: None,
            signature: None,
        },
        is_ghost: false,
    };
    let new_id = graph.put_commit(new_commit);
    refs.set_head(graph, branch, new_id, current, false)?;
    Ok(new_id)
}

/// Folds `source`'s changes into `current` in place, replacing it rather
/// than stacking a new commit on top (the `Squash` action).
fn squash_commit(store: &dyn ContentStore, graph: &CommitGraph, refs: &RefStore, branch: &str, current: CommitId, source: CommitId) -> RewriteResult<CommitId> {
    let ancestor_commit = cherry_pick_ancestor(graph, source)?;
    let ancestor_root = load_or_empty(store, graph.resolve_root(ancestor_commit)?);
    let current_root = load_or_empty(store, graph.resolve_root(current)?);
    let source_root = load_or_empty(store, graph.resolve_root(source)?);

    let outcome = merge_roots(store, &current_root, &source_root, &ancestor_root, current, source, graph, MergeOptions { no_ff: true, is_cherry_pick: true })?;
    let MergeOutcome::Merged { root, stats } = outcome else {
        unreachable!("no_ff is always set, merge_roots never returns FastForward");
    };
    if stats.has_conflicts() {
        return Err(RewriteError::UnresolvedConflicts);
    }

    let root_hash = table::store_root(store, &root);
    let prev_commit = graph.get_commit(current)?;
    let source_commit = graph.get_commit(source)?;
    let new_commit = Commit {
        root: root_hash,
        parents: prev_commit.parents.clone(),
        meta: CommitMeta {
            message: format!("{}\n\n{}", prev_commit.meta.message, source_commit.meta.message),
            author: prev_commit.meta.author,
            committer: None,
            signature: None,
        },
        is_ghost: false,
    };
    let new_id = graph.put_commit(new_commit);
    // The squashed commit's parent is unchanged from `current`'s, so this is
    // never a fast-forward from `current` itself; force the CAS.
    refs.set_head(graph, branch, new_id, current, true)?;
    Ok(new_id)
}

/// `dolt_rebase --continue` (spec §4.11 step 2): applies `plan` (sorted by
/// `order`) onto the aux branch, then force-copies it onto the original
/// branch name and drops the aux branch. Does not itself check the caller's
/// session out onto the rewritten branch; callers that need that call
/// `branch_engine::checkout_branch` afterward.
#[instrument(skip(store, refs, graph, state, plan))]
pub fn continue_rebase(store: &dyn ContentStore, refs: &RefStore, graph: &CommitGraph, state: &RebaseState, plan: &[RebasePlanRow]) -> RewriteResult<CommitId> {
    let mut sorted = plan.to_vec();
    sorted.sort_by_key(|row| row.order);

    let mut current = refs.resolve_branch(&state.aux_branch)?;
    for row in &sorted {
        match row.action {
            RebaseAction::Skip => continue,
            RebaseAction::Pick => {
                current = replay_commit(store, graph, refs, &state.aux_branch, current, row.commit_hash, None)?;
            }
            RebaseAction::Squash => {
                current = squash_commit(store, graph, refs, &state.aux_branch, current, row.commit_hash)?;
            }
        }
    }

    refs.copy_branch(&state.aux_branch, &state.original_branch, true)?;
    let final_root = graph.resolve_root(current)?;
    let ws = refs.get_working_set(&state.original_branch)?;
    let expected = ws.hash_of();
    let fixed_ws = ws.with_working_root(final_root).with_staged_root(final_root);
    refs.update_working_set(&state.original_branch, fixed_ws, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
    refs.delete_branch(&state.aux_branch, true, "")?;

    Ok(current)
}

/// `dolt_rebase --abort` (spec §4.11 step 3): the original branch's head was
/// never touched (all rewriting happened on the aux branch), so aborting is
/// just dropping the aux branch; the caller discards its own `RebaseState`.
#[instrument(skip(refs, state))]
pub fn abort_rebase(refs: &RefStore, state: &RebaseState) -> RewriteResult<()> {
    refs.delete_branch(&state.aux_branch, true, "")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::Signature as Sig;
    use crate::commit::Timestamp as Ts;
    use crate::content_store::MemoryContentStore;
    use crate::hash::Hash;
    use crate::table::Table;
    use crate::table::TableName;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn author(name: &str) -> Sig {
        Sig {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            timestamp: Ts { millis_since_epoch: 0, tz_offset_minutes: 0 },
        }
    }

    fn table_with_schema(schema_seed: u8) -> Table {
        Table {
            schema_hash: Hash::of(&[schema_seed]),
            row_index: Hash::of(&[schema_seed, 1]),
            secondary_indexes: BTreeMap::new(),
            artifacts: Hash::of(&[schema_seed, 2]),
            autoinc: None,
        }
    }

    fn commit_onto(graph: &CommitGraph, parent: Option<CommitId>, root: Hash, message: &str) -> CommitId {
        graph.put_commit(Commit {
            root,
            parents: parent.into_iter().collect(),
            meta: CommitMeta { message: message.to_string(), author: author("a"), committer: None, signature: None },
            is_ghost: false,
        })
    }

    fn fixture() -> (Arc<RefStore>, Arc<CommitGraph>, Arc<MemoryContentStore>) {
        (Arc::new(RefStore::new()), Arc::new(CommitGraph::new()), Arc::new(MemoryContentStore::new()))
    }

    #[test]
    fn cherry_pick_auto_commits_a_clean_change() {
        let (refs, graph, store) = fixture();
        let t = TableName::unqualified("t");

        let base_root = RootValue::empty(1);
        let base_hash = table::store_root(store.as_ref(), &base_root);
        let c0 = commit_onto(&graph, None, base_hash, "init");
        refs.create_branch("main", c0, base_hash, false).unwrap();
        refs.create_branch("feature", c0, base_hash, false).unwrap();

        let feature_root = base_root.clone().put_table(t.clone(), table_with_schema(1));
        let feature_hash = table::store_root(store.as_ref(), &feature_root);
        let c1 = commit_onto(&graph, Some(c0), feature_hash, "add t");
        refs.set_head(&graph, "feature", c1, c0, false).unwrap();

        let session = Session::new("db", "main", Arc::clone(&refs), Arc::clone(&graph));
        let new_head = cherry_pick(&session, store.as_ref(), c1).unwrap();

        let roots = session.get_roots().unwrap();
        assert_eq!(roots.head, feature_hash);
        assert_eq!(roots.staged, roots.head);
        let picked = graph.get_commit(new_head).unwrap();
        assert_eq!(picked.meta.message, "add t");
        assert_eq!(picked.parents, vec![c0]);
    }

    #[test]
    fn cherry_pick_refuses_dirty_working_set() {
        let (refs, graph, store) = fixture();
        let base_root = RootValue::empty(1);
        let base_hash = table::store_root(store.as_ref(), &base_root);
        let c0 = commit_onto(&graph, None, base_hash, "init");
        refs.create_branch("main", c0, base_hash, false).unwrap();
        let dirty_hash = Hash::of(b"dirty");
        let session = Session::new("db", "main", Arc::clone(&refs), Arc::clone(&graph));
        session.set_roots(Roots { head: base_hash, staged: dirty_hash, working: dirty_hash }).unwrap();

        let c1 = commit_onto(&graph, Some(c0), base_hash, "irrelevant");
        let err = cherry_pick(&session, store.as_ref(), c1).unwrap_err();
        assert!(matches!(err, RewriteError::UncommittedChanges));
    }

    #[test]
    fn revert_composes_a_message_listing_each_commit() {
        let (refs, graph, store) = fixture();
        let t = TableName::unqualified("t");

        let base_root = RootValue::empty(1);
        let base_hash = table::store_root(store.as_ref(), &base_root);
        let c0 = commit_onto(&graph, None, base_hash, "init");

        let added_root = base_root.clone().put_table(t.clone(), table_with_schema(1));
        let added_hash = table::store_root(store.as_ref(), &added_root);
        let c1 = commit_onto(&graph, Some(c0), added_hash, "add t");

        refs.create_branch("main", c1, added_hash, false).unwrap();
        let session = Session::new("db", "main", Arc::clone(&refs), Arc::clone(&graph));

        let new_head = revert(&session, store.as_ref(), &[c1]).unwrap();
        let commit = graph.get_commit(new_head).unwrap();
        assert!(commit.meta.message.contains("Revert"));
        assert!(commit.meta.message.contains(&c1.to_string()));
        let reverted_root = table::load_root(store.as_ref(), session.graph().resolve_root(new_head).unwrap()).unwrap();
        assert!(reverted_root.get_table(&t).0.is_none());
    }

    #[test]
    fn rebase_pick_and_skip_land_only_the_picked_commits() {
        let (refs, graph, store) = fixture();
        let t1 = TableName::unqualified("t1");
        let t2 = TableName::unqualified("t2");

        let base_root = RootValue::empty(1);
        let base_hash = table::store_root(store.as_ref(), &base_root);
        let c0 = commit_onto(&graph, None, base_hash, "init");
        refs.create_branch("main", c0, base_hash, false).unwrap();

        let t1_root = base_root.clone().put_table(t1.clone(), table_with_schema(1));
        let t1_hash = table::store_root(store.as_ref(), &t1_root);
        let c_upstream = commit_onto(&graph, Some(c0), t1_hash, "upstream adds t1");
        refs.set_head(&graph, "main", c_upstream, c0, false).unwrap();

        refs.create_branch("topic", c0, base_hash, false).unwrap();
        let t2_root = base_root.put_table(t2.clone(), table_with_schema(2));
        let t2_hash = table::store_root(store.as_ref(), &t2_root);
        let c_topic1 = commit_onto(&graph, Some(c0), t2_hash, "topic adds t2");
        refs.set_head(&graph, "topic", c_topic1, c0, false).unwrap();
        let skip_hash = Hash::of(b"skip-me");
        let c_topic2 = commit_onto(&graph, Some(c_topic1), skip_hash, "topic noise");
        refs.set_head(&graph, "topic", c_topic2, c_topic1, true).unwrap();

        let (state, mut plan) = start_rebase(&refs, &graph, "topic", "main").unwrap();
        assert_eq!(plan.len(), 2);
        for row in &mut plan {
            if row.commit_hash == c_topic2 {
                row.action = RebaseAction::Skip;
            }
        }

        let new_head = continue_rebase(store.as_ref(), &refs, &graph, &state, &plan).unwrap();
        assert!(!refs.has_branch(&state.aux_branch));
        assert_eq!(refs.resolve_branch("topic").unwrap(), new_head);
        let final_root = table::load_root(store.as_ref(), graph.resolve_root(new_head).unwrap()).unwrap();
        assert!(final_root.get_table(&t1).0.is_some());
        assert!(final_root.get_table(&t2).0.is_some());
        assert!(graph.is_ancestor(c_upstream, new_head).unwrap());
    }

    #[test]
    fn rebase_abort_drops_aux_branch_and_leaves_original_untouched() {
        let (refs, graph, store) = fixture();
        let base_root = RootValue::empty(1);
        let base_hash = table::store_root(store.as_ref(), &base_root);
        let c0 = commit_onto(&graph, None, base_hash, "init");
        refs.create_branch("main", c0, base_hash, false).unwrap();
        refs.create_branch("topic", c0, base_hash, false).unwrap();
        let c_topic = commit_onto(&graph, Some(c0), Hash::of(b"topic"), "topic change");
        refs.set_head(&graph, "topic", c_topic, c0, false).unwrap();

        let (state, _plan) = start_rebase(&refs, &graph, "topic", "main").unwrap();
        assert!(refs.has_branch(&state.aux_branch));
        abort_rebase(&refs, &state).unwrap();
        assert!(!refs.has_branch(&state.aux_branch));
        assert_eq!(refs.resolve_branch("topic").unwrap(), c_topic);
    }
}
