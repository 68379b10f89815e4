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

//! RefStore (C3): named pointers (branches, tags, remote-tracking refs,
//! working-set refs, stashes, backups), and the compare-and-swap operations
//! that are the sole atomicity point for mutating them (spec §4.3, §5).

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::commit::CommitId;
use crate::commit_graph::CommitGraph;
use crate::commit_graph::RefLookup;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::Hash;
use crate::working_set::WorkingSet;

/// A named, mutable pointer. Resolves to a commit hash, except for
/// `WorkingSet`, which resolves to a `WorkingSet` value (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ref {
    Branch(String),
    Tag(String),
    Remote(String, String),
    WorkingSet(String),
    Stash(usize),
}

#[derive(Debug, Error)]
pub enum RefStoreError {
    #[error("branch {0:?} not found")]
    BranchNotFound(String),
    #[error("branch {0:?} already exists")]
    BranchAlreadyExists(String),
    #[error("branch name {0:?} is invalid")]
    InvalidBranchName(String),
    #[error("branch name must not be empty")]
    EmptyBranchName,
    #[error("working set for branch {0:?} not found")]
    WorkingSetNotFound(String),
    #[error("tag {0:?} not found")]
    TagNotFound(String),
    #[error("remote {0:?} not found")]
    RemoteNotFound(String),
    #[error("ref {target} changed concurrently: expected {expected:?}, found {actual:?}")]
    CasMismatch {
        target: String,
        expected: Option<Hash>,
        actual: Option<Hash>,
    },
    #[error("advancing branch {0:?} would not be a fast-forward")]
    NotFastForward(String),
    #[error("backup {0:?} already exists")]
    BackupAlreadyExists(String),
}

impl ErrorKind for RefStoreError {
    fn kind(&self) -> Kind {
        match self {
            Self::BranchNotFound(_) => Kind::BranchNotFound,
            Self::BranchAlreadyExists(_) => Kind::BranchAlreadyExists,
            Self::InvalidBranchName(_) => Kind::InvalidBranchName,
            Self::EmptyBranchName => Kind::EmptyBranchName,
            Self::WorkingSetNotFound(_) => Kind::WorkingSetNotFound,
            Self::TagNotFound(_) => Kind::InvalidRefSpec,
            Self::RemoteNotFound(_) => Kind::RemoteNotFound,
            Self::CasMismatch { .. } => Kind::MergeNeeded,
            Self::NotFastForward(_) => Kind::MergeNeeded,
            Self::BackupAlreadyExists(_) => Kind::BackupAlreadyExists,
        }
    }
}

pub type RefStoreResult<T> = Result<T, RefStoreError>;

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationStatus {
    NotReplicated,
    Replicated,
}

/// Metadata recorded alongside a working-set CAS (author/time of the
/// mutating procedure); opaque beyond what callers choose to stash in it.
#[derive(Debug, Clone, Default)]
pub struct WorkingSetMeta {
    pub description: String,
}

#[derive(Debug, Default)]
struct RefTables {
    branches: HashMap<String, CommitId>,
    tags: HashMap<String, CommitId>,
    remotes: HashMap<(String, String), CommitId>,
    working_sets: HashMap<String, WorkingSet>,
    stashes: Vec<WorkingSet>,
    backups: HashMap<String, BackupInfo>,
}

/// The in-process ref store. All ref mutation is serialized per-field behind
/// a single `RwLock`; the working-set CAS (`update_working_set`) is the
/// atomicity point every higher-level procedure relies on.
#[derive(Debug, Default)]
pub struct RefStore {
    tables: RwLock<RefTables>,
}

pub fn is_valid_branch_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.contains("..")
        && !name.contains(char::is_whitespace)
        && !name.ends_with('/')
        && !name.ends_with(".lock")
}

impl RefStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.tables.read().branches.contains_key(name)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tables.read().tags.contains_key(name)
    }

    pub fn resolve_branch(&self, name: &str) -> RefStoreResult<CommitId> {
        self.tables
            .read()
            .branches
            .get(name)
            .copied()
            .ok_or_else(|| RefStoreError::BranchNotFound(name.to_string()))
    }

    pub fn resolve_tag(&self, name: &str) -> RefStoreResult<CommitId> {
        self.tables
            .read()
            .tags
            .get(name)
            .copied()
            .ok_or_else(|| RefStoreError::TagNotFound(name.to_string()))
    }

    pub fn resolve_remote(&self, remote: &str, branch: &str) -> RefStoreResult<CommitId> {
        self.tables
            .read()
            .remotes
            .get(&(remote.to_string(), branch.to_string()))
            .copied()
            .ok_or_else(|| RefStoreError::RemoteNotFound(remote.to_string()))
    }

    /// Creates a branch pointing at `start`, and the working set that must
    /// be created with it (spec invariant 4).
    #[instrument(skip(self))]
    pub fn create_branch(&self, name: &str, start: CommitId, start_root: Hash, force: bool) -> RefStoreResult<()> {
        if name.is_empty() {
            return Err(RefStoreError::EmptyBranchName);
        }
        if !is_valid_branch_name(name) {
            return Err(RefStoreError::InvalidBranchName(name.to_string()));
        }
        let mut tables = self.tables.write();
        if tables.branches.contains_key(name) && !force {
            return Err(RefStoreError::BranchAlreadyExists(name.to_string()));
        }
        tables.branches.insert(name.to_string(), start);
        tables
            .working_sets
            .insert(name.to_string(), WorkingSet::new(name, start_root));
        Ok(())
    }

    /// CAS: advances `branch`'s head to `commit`. Must either be a
    /// fast-forward from the current head or `force` (spec invariant 5).
    #[instrument(skip(self, graph))]
    pub fn set_head(
        &self,
        graph: &CommitGraph,
        branch: &str,
        commit: CommitId,
        expected_prev: CommitId,
        force: bool,
    ) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        let current = *tables
            .branches
            .get(branch)
            .ok_or_else(|| RefStoreError::BranchNotFound(branch.to_string()))?;
        if current != expected_prev {
            debug!(branch, ?current, ?expected_prev, "branch head CAS mismatch");
            return Err(RefStoreError::CasMismatch {
                target: branch.to_string(),
                expected: None,
                actual: None,
            });
        }
        if !force
            && !graph
                .can_fast_forward(current, commit)
                .map_err(|_| RefStoreError::NotFastForward(branch.to_string()))?
        {
            warn!(branch, "refusing non-fast-forward head update without force");
            return Err(RefStoreError::NotFastForward(branch.to_string()));
        }
        tables.branches.insert(branch.to_string(), commit);
        Ok(())
    }

    /// Convenience wrapper used by the commit engine: fast-forwards without
    /// requiring the caller to prove the previous head first.
    pub fn fast_forward(&self, graph: &CommitGraph, branch: &str, commit: CommitId) -> RefStoreResult<()> {
        let current = self.resolve_branch(branch)?;
        self.set_head(graph, branch, commit, current, false)
    }

    pub fn get_working_set(&self, branch: &str) -> RefStoreResult<WorkingSet> {
        self.tables
            .read()
            .working_sets
            .get(branch)
            .cloned()
            .ok_or_else(|| RefStoreError::WorkingSetNotFound(branch.to_string()))
    }

    /// CAS on a branch's working set: the sole atomicity point for staging,
    /// committing, merging, and checkout (spec §4.3).
    #[instrument(skip(self, new_ws, _meta))]
    pub fn update_working_set(
        &self,
        branch: &str,
        new_ws: WorkingSet,
        expected_hash: Hash,
        _meta: WorkingSetMeta,
        _replication_status: ReplicationStatus,
    ) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        let current = tables
            .working_sets
            .get(branch)
            .ok_or_else(|| RefStoreError::WorkingSetNotFound(branch.to_string()))?;
        let current_hash = current.hash_of();
        if current_hash != expected_hash {
            debug!(branch, ?current_hash, ?expected_hash, "working set CAS mismatch");
            return Err(RefStoreError::CasMismatch {
                target: branch.to_string(),
                expected: Some(expected_hash),
                actual: Some(current_hash),
            });
        }
        tables.working_sets.insert(branch.to_string(), new_ws);
        Ok(())
    }

    /// Repair case (spec §4.3): synthesizes a working set for a branch that
    /// has one missing, pointed at the branch head with clean staged/working.
    pub fn repair_missing_working_set(&self, branch: &str, head_root: Hash) -> RefStoreResult<WorkingSet> {
        let mut tables = self.tables.write();
        if !tables.branches.contains_key(branch) {
            return Err(RefStoreError::BranchNotFound(branch.to_string()));
        }
        let ws = WorkingSet::new(branch, head_root);
        tables.working_sets.insert(branch.to_string(), ws.clone());
        Ok(ws)
    }

    #[instrument(skip(self))]
    pub fn delete_branch(&self, name: &str, force: bool, current_branch: &str) -> RefStoreResult<()> {
        if name == current_branch && !force {
            return Err(RefStoreError::InvalidBranchName(format!(
                "cannot delete the currently checked out branch {name:?} without force"
            )));
        }
        let mut tables = self.tables.write();
        if tables.branches.remove(name).is_none() {
            return Err(RefStoreError::BranchNotFound(name.to_string()));
        }
        tables.working_sets.remove(name);
        Ok(())
    }

    pub fn rename_branch(&self, old: &str, new: &str, force: bool) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        if !force && tables.branches.contains_key(new) {
            return Err(RefStoreError::BranchAlreadyExists(new.to_string()));
        }
        let head = tables
            .branches
            .remove(old)
            .ok_or_else(|| RefStoreError::BranchNotFound(old.to_string()))?;
        let ws = tables.working_sets.remove(old);
        tables.branches.insert(new.to_string(), head);
        if let Some(mut ws) = ws {
            ws.working_set_ref = crate::working_set::WorkingSetRef(new.to_string());
            tables.working_sets.insert(new.to_string(), ws);
        }
        Ok(())
    }

    pub fn copy_branch(&self, src: &str, dst: &str, force: bool) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        if !force && tables.branches.contains_key(dst) {
            return Err(RefStoreError::BranchAlreadyExists(dst.to_string()));
        }
        let head = *tables
            .branches
            .get(src)
            .ok_or_else(|| RefStoreError::BranchNotFound(src.to_string()))?;
        let ws = tables.working_sets.get(src).cloned();
        tables.branches.insert(dst.to_string(), head);
        if let Some(mut ws) = ws {
            ws.working_set_ref = crate::working_set::WorkingSetRef(dst.to_string());
            tables.working_sets.insert(dst.to_string(), ws);
        }
        Ok(())
    }

    pub fn create_tag(&self, name: &str, target: CommitId, force: bool) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        if tables.tags.contains_key(name) && !force {
            return Err(RefStoreError::CasMismatch {
                target: name.to_string(),
                expected: None,
                actual: None,
            });
        }
        tables.tags.insert(name.to_string(), target);
        Ok(())
    }

    pub fn delete_tag(&self, name: &str) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        tables
            .tags
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RefStoreError::TagNotFound(name.to_string()))
    }

    pub fn set_remote_tracking(&self, remote: &str, branch: &str, commit: CommitId) {
        self.tables
            .write()
            .remotes
            .insert((remote.to_string(), branch.to_string()), commit);
    }

    pub fn remove_remote_tracking(&self, remote: &str, branch: &str) {
        self.tables.write().remotes.remove(&(remote.to_string(), branch.to_string()));
    }

    pub fn push_stash(&self, ws: WorkingSet) -> usize {
        let mut tables = self.tables.write();
        tables.stashes.push(ws);
        tables.stashes.len() - 1
    }

    pub fn pop_stash(&self, index: usize) -> RefStoreResult<WorkingSet> {
        let mut tables = self.tables.write();
        if index >= tables.stashes.len() {
            return Err(RefStoreError::WorkingSetNotFound(format!("stash@{{{index}}}")));
        }
        Ok(tables.stashes.remove(index))
    }

    pub fn peek_stash(&self, index: usize) -> RefStoreResult<WorkingSet> {
        self.tables
            .read()
            .stashes
            .get(index)
            .cloned()
            .ok_or_else(|| RefStoreError::WorkingSetNotFound(format!("stash@{{{index}}}")))
    }

    pub fn clear_stashes(&self) {
        self.tables.write().stashes.clear();
    }

    pub fn list_stashes(&self) -> Vec<WorkingSet> {
        self.tables.read().stashes.clone()
    }

    pub fn add_backup(&self, info: BackupInfo, force: bool) -> RefStoreResult<()> {
        let mut tables = self.tables.write();
        if tables.backups.contains_key(&info.name) && !force {
            return Err(RefStoreError::BackupAlreadyExists(info.name));
        }
        tables.backups.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn remove_backup(&self, name: &str) -> RefStoreResult<()> {
        self.tables
            .write()
            .backups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RefStoreError::RemoteNotFound(name.to_string()))
    }

    pub fn list_branches(&self) -> Vec<(String, CommitId)> {
        let tables = self.tables.read();
        let mut out: Vec<_> = tables.branches.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn list_tags(&self) -> Vec<(String, CommitId)> {
        let tables = self.tables.read();
        let mut out: Vec<_> = tables.tags.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn list_remote_refs(&self) -> Vec<((String, String), CommitId)> {
        let tables = self.tables.read();
        let mut out: Vec<_> = tables.remotes.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn list_backups(&self) -> Vec<BackupInfo> {
        let tables = self.tables.read();
        let mut out: Vec<_> = tables.backups.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl RefLookup for RefStore {
    fn lookup_branch(&self, name: &str) -> Option<CommitId> {
        self.resolve_branch(name).ok()
    }

    fn lookup_tag(&self, name: &str) -> Option<CommitId> {
        self.resolve_tag(name).ok()
    }

    fn lookup_remote_tracking(&self, name: &str) -> Option<CommitId> {
        let (remote, branch) = name.split_once('/')?;
        self.resolve_remote(remote, branch).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_branch_also_creates_working_set() {
        let refs = RefStore::new();
        let head = CommitId::new(Hash::of(b"c0"));
        refs.create_branch("main", head, Hash::of(b"root"), false).unwrap();
        assert!(refs.has_branch("main"));
        assert!(refs.get_working_set("main").is_ok());
    }

    #[test]
    fn branch_already_exists_without_force() {
        let refs = RefStore::new();
        let head = CommitId::new(Hash::of(b"c0"));
        refs.create_branch("main", head, Hash::of(b"root"), false).unwrap();
        assert!(matches!(
            refs.create_branch("main", head, Hash::of(b"root"), false),
            Err(RefStoreError::BranchAlreadyExists(_))
        ));
        assert!(refs.create_branch("main", head, Hash::of(b"root"), true).is_ok());
    }

    #[test]
    fn working_set_cas_rejects_stale_expected_hash() {
        let refs = RefStore::new();
        let head = CommitId::new(Hash::of(b"c0"));
        refs.create_branch("main", head, Hash::of(b"root"), false).unwrap();
        let ws = refs.get_working_set("main").unwrap();
        let stale_hash = Hash::of(b"stale");
        let new_ws = ws.with_working_root(Hash::of(b"edited"));
        let err = refs
            .update_working_set("main", new_ws, stale_hash, WorkingSetMeta::default(), ReplicationStatus::NotReplicated)
            .unwrap_err();
        assert!(matches!(err, RefStoreError::CasMismatch { .. }));
    }

    #[test]
    fn set_head_rejects_non_fast_forward_without_force() {
        let refs = RefStore::new();
        let graph = CommitGraph::new();
        let root = Hash::of(b"root");
        let c0 = refs_commit(&graph, root, vec![]);
        refs.create_branch("main", c0, root, false).unwrap();
        let sibling = refs_commit(&graph, Hash::of(b"other"), vec![]);
        assert!(matches!(
            refs.set_head(&graph, "main", sibling, c0, false),
            Err(RefStoreError::NotFastForward(_))
        ));
        assert!(refs.set_head(&graph, "main", sibling, c0, true).is_ok());
    }

    fn refs_commit(graph: &CommitGraph, root: Hash, parents: Vec<CommitId>) -> CommitId {
        graph.put_commit(crate::commit::Commit {
            root,
            parents,
            meta: crate::commit::CommitMeta {
                message: "m".to_string(),
                author: crate::commit::Signature {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: crate::commit::Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
            is_ghost: false,
        })
    }
}
