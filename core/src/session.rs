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

//! Session (C5): the per-connection handle binding a database name to a
//! WorkingSet and an active transaction (spec §3, §4.5).

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::commit::Commit;
use crate::commit::CommitId;
use crate::commit::CommitMeta;
use crate::commit::Signature;
use crate::commit::Timestamp;
use crate::commit_graph::CommitGraph;
use crate::commit_graph::CommitGraphError;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::Hash;
use crate::ref_store::RefStore;
use crate::ref_store::RefStoreError;
use crate::ref_store::ReplicationStatus;
use crate::ref_store::WorkingSetMeta;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
    #[error("nothing to commit")]
    NothingToCommit,
}

impl ErrorKind for SessionError {
    fn kind(&self) -> Kind {
        match self {
            Self::RefStore(e) => e.kind(),
            Self::CommitGraph(e) => e.kind(),
            Self::NothingToCommit => Kind::NothingToCommit,
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

/// The three roots every procedure reads and writes as a unit (spec §3).
/// Conceptually each field addresses a `RootValue`; resolving the value
/// itself is left to whichever engine needs it, via the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roots {
    pub head: Hash,
    pub staged: Hash,
    pub working: Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
}

/// Tracks the outer SQL transaction's lifecycle across the mid-procedure
/// commit-and-restart several operations require (spec §9 design note).
#[derive(Debug, Clone, Copy)]
pub struct TxnHandle {
    pub state: TxnState,
    pub generation: u64,
}

impl TxnHandle {
    pub fn new() -> Self {
        Self {
            state: TxnState::Active,
            generation: 0,
        }
    }
}

impl Default for TxnHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs to [`Session::new_pending_commit`] (spec §4.9). Signing is a
/// separate step performed by the commit engine once a `PendingCommit`
/// exists; this struct carries only what the session itself needs.
#[derive(Debug, Clone)]
pub struct PendingCommitProps {
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub committer: Option<(String, String)>,
    pub amend: bool,
    pub allow_empty: bool,
    pub skip_empty: bool,
}

#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub parents: Vec<CommitId>,
    pub root: Hash,
    pub meta: CommitMeta,
}

/// A per-connection handle binding a database name to a `WorkingSet` and an
/// active transaction. One `Session` per client connection per database.
///
/// Holds no local cache of roots: every read goes through the `RefStore`,
/// which remains the single source of truth for working-set state. This
/// sidesteps the cyclic session/working-set reference the original design
/// has (spec §9): the session only ever holds a branch name plus handles to
/// the shared `RefStore`/`CommitGraph`.
#[derive(Debug)]
pub struct Session {
    pub database: String,
    pub branch: String,
    pub user_name: String,
    pub user_email: String,
    txn: TxnHandle,
    refs: Arc<RefStore>,
    graph: Arc<CommitGraph>,
}

impl Session {
    pub fn new(
        database: impl Into<String>,
        branch: impl Into<String>,
        refs: Arc<RefStore>,
        graph: Arc<CommitGraph>,
    ) -> Self {
        Self {
            database: database.into(),
            branch: branch.into(),
            user_name: String::new(),
            user_email: String::new(),
            txn: TxnHandle::new(),
            refs,
            graph,
        }
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    pub fn txn(&self) -> TxnHandle {
        self.txn
    }

    #[instrument(skip(self))]
    pub fn get_roots(&self) -> SessionResult<Roots> {
        let ws = self.refs.get_working_set(&self.branch)?;
        let head_id = self.refs.resolve_branch(&self.branch)?;
        let head = self.graph.resolve_root(head_id)?;
        Ok(Roots {
            head,
            staged: ws.staged_root,
            working: ws.working_root,
        })
    }

    /// Updates the working set's staged & working roots atomically via the
    /// ref store's CAS.
    #[instrument(skip(self))]
    pub fn set_roots(&self, roots: Roots) -> SessionResult<()> {
        let ws = self.refs.get_working_set(&self.branch)?;
        let expected = ws.hash_of();
        let new_ws = ws.with_staged_root(roots.staged).with_working_root(roots.working);
        self.refs
            .update_working_set(&self.branch, new_ws, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_working_root(&self, root: Hash) -> SessionResult<()> {
        let ws = self.refs.get_working_set(&self.branch)?;
        let expected = ws.hash_of();
        let new_ws = ws.with_working_root(root);
        self.refs
            .update_working_set(&self.branch, new_ws, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
        Ok(())
    }

    /// Atomically changes the session's active branch (spec §4.5): resolves
    /// the target branch's working set (optionally synthesizing it via the
    /// ref store's repair path), then points the session at it. The session
    /// holds no local roots to flush — they always live in the ref store —
    /// so step (1) of the spec's three-step description is a no-op here.
    #[instrument(skip(self))]
    pub fn switch_working_set(&mut self, new_branch: &str, repair_if_missing: bool) -> SessionResult<()> {
        match self.refs.get_working_set(new_branch) {
            Ok(_) => {}
            Err(RefStoreError::WorkingSetNotFound(_)) if repair_if_missing => {
                let head_id = self.refs.resolve_branch(new_branch)?;
                let head_root = self.graph.resolve_root(head_id)?;
                self.refs.repair_missing_working_set(new_branch, head_root)?;
            }
            Err(e) => return Err(e.into()),
        }
        self.branch = new_branch.to_string();
        Ok(())
    }

    /// Returns `None` iff `props.skip_empty` and nothing is staged; else a
    /// commit object ready for `dolt_commit` (spec §4.9).
    #[instrument(skip(self, roots, props))]
    pub fn new_pending_commit(&self, roots: Roots, props: PendingCommitProps) -> SessionResult<Option<PendingCommit>> {
        if roots.staged == roots.head && !props.allow_empty {
            if props.skip_empty {
                return Ok(None);
            }
            return Err(SessionError::NothingToCommit);
        }
        let head_id = self.refs.resolve_branch(&self.branch)?;
        let parents = if props.amend {
            self.graph.get_commit(head_id)?.parents
        } else {
            vec![head_id]
        };
        let timestamp = Timestamp::now();
        let author = Signature {
            name: props.author_name,
            email: props.author_email,
            timestamp,
        };
        let committer = props.committer.map(|(name, email)| Signature { name, email, timestamp });
        let meta = CommitMeta {
            message: props.message,
            author,
            committer,
            signature: None,
        };
        Ok(Some(PendingCommit {
            parents,
            root: roots.staged,
            meta,
        }))
    }

    /// Atomically (a) writes the commit object, (b) fast-forwards the branch
    /// head, (c) sets the working set's staged root to the new head while
    /// keeping working untouched (spec §4.5, §4.9).
    #[instrument(skip(self, pending))]
    pub fn dolt_commit(&self, pending: PendingCommit) -> SessionResult<CommitId> {
        let root = pending.root;
        let commit = Commit {
            root,
            parents: pending.parents,
            meta: pending.meta,
            is_ghost: false,
        };
        let commit_id = self.graph.put_commit(commit);
        self.refs.fast_forward(&self.graph, &self.branch, commit_id)?;
        let ws = self.refs.get_working_set(&self.branch)?;
        let expected = ws.hash_of();
        let new_ws = ws.with_staged_root(root).clear_merge();
        self.refs
            .update_working_set(&self.branch, new_ws, expected, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)?;
        Ok(commit_id)
    }

    pub fn start_transaction(&mut self) {
        self.txn = TxnHandle::new();
    }

    pub fn commit_transaction(&mut self) {
        self.txn.state = TxnState::Committed;
    }

    /// Commits the current transaction and immediately opens a new one at
    /// the next generation, so refs created earlier in the same procedure
    /// become visible to its remaining steps (spec §9 design note).
    #[instrument(skip(self))]
    pub fn commit_and_restart(&mut self) {
        self.txn.generation += 1;
        self.txn.state = TxnState::Active;
    }

    /// Yields every hash this session considers reachable: current working,
    /// staged, head, plus any in-flight merge's pre-merge root. Called by
    /// the GC coordinator at a safepoint (spec §4.5, §4.12).
    pub fn visit_gc_roots(&self) -> SessionResult<Vec<Hash>> {
        let ws = self.refs.get_working_set(&self.branch)?;
        let head_id = self.refs.resolve_branch(&self.branch)?;
        let head = self.graph.resolve_root(head_id)?;
        let mut roots = vec![ws.working_root, ws.staged_root, head];
        if let Some(state) = &ws.merge_state {
            roots.push(state.pre_merge_working_root);
        }
        Ok(roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitMeta as Meta;
    use crate::commit::Signature as Sig;

    fn new_session(branch: &str, root: Hash) -> Session {
        let refs = Arc::new(RefStore::new());
        let graph = Arc::new(CommitGraph::new());
        let initial = graph.put_commit(Commit {
            root,
            parents: vec![],
            meta: Meta {
                message: "init".to_string(),
                author: Sig {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
            is_ghost: false,
        });
        refs.create_branch(branch, initial, root, false).unwrap();
        Session::new("db", branch, refs, graph)
    }

    fn props(msg: &str) -> PendingCommitProps {
        PendingCommitProps {
            message: msg.to_string(),
            author_name: "a".to_string(),
            author_email: "a@example.com".to_string(),
            committer: None,
            amend: false,
            allow_empty: false,
            skip_empty: false,
        }
    }

    #[test]
    fn skip_empty_returns_none_when_nothing_staged() {
        let root = Hash::of(b"root");
        let session = new_session("main", root);
        let roots = session.get_roots().unwrap();
        let mut p = props("noop");
        p.skip_empty = true;
        assert!(session.new_pending_commit(roots, p).unwrap().is_none());
    }

    #[test]
    fn nothing_staged_without_skip_empty_errors() {
        let root = Hash::of(b"root");
        let session = new_session("main", root);
        let roots = session.get_roots().unwrap();
        let err = session.new_pending_commit(roots, props("noop")).unwrap_err();
        assert!(matches!(err, SessionError::NothingToCommit));
    }

    #[test]
    fn dolt_commit_advances_head_and_keeps_staged_equal_to_new_head() {
        let root = Hash::of(b"root");
        let session = new_session("main", root);
        session.set_roots(Roots { head: root, staged: Hash::of(b"staged"), working: Hash::of(b"staged") }).unwrap();
        let roots = session.get_roots().unwrap();
        let pending = session.new_pending_commit(roots, props("change")).unwrap().unwrap();
        let commit_id = session.dolt_commit(pending).unwrap();
        let new_roots = session.get_roots().unwrap();
        assert_eq!(new_roots.head, Hash::of(b"staged"));
        assert_eq!(new_roots.staged, new_roots.head);
        assert_eq!(session.graph().resolve_root(commit_id).unwrap(), Hash::of(b"staged"));
    }

    #[test]
    fn switch_working_set_repairs_missing_target() {
        let refs = Arc::new(RefStore::new());
        let graph = Arc::new(CommitGraph::new());
        let root = Hash::of(b"root");
        let c0 = graph.put_commit(Commit {
            root,
            parents: vec![],
            meta: Meta {
                message: "init".to_string(),
                author: Sig {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
            is_ghost: false,
        });
        refs.create_branch("main", c0, root, false).unwrap();
        // Simulate a legacy branch with no working set.
        refs.delete_branch("main", true, "").unwrap();
        refs.create_branch("main", c0, root, false).unwrap();
        let mut session = Session::new("db", "main", refs, graph);
        session.switch_working_set("main", true).unwrap();
        assert_eq!(session.branch, "main");
    }
}
