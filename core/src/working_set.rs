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

//! WorkingSet (C4): the per-branch triple of (working, staged, optional
//! merge) roots, as a pure value type with builder methods.

use crate::hash::ContentHash;
use crate::hash::Hash;
use crate::table::TableName;

/// State recorded while a merge is in progress (spec §3). Present iff a
/// merge was started and has neither been committed nor aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeState {
    pub pre_merge_working_root: Hash,
    pub from_commit: Hash,
    pub from_spec: String,
    pub unmergeable_tables: Vec<TableName>,
    pub merged_tables: Vec<TableName>,
}

impl ContentHash for MergeState {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.pre_merge_working_root.update_hash(buf);
        self.from_commit.update_hash(buf);
        self.from_spec.update_hash(buf);
        self.unmergeable_tables.update_hash(buf);
        self.merged_tables.update_hash(buf);
    }
}

/// Identifies the branch a working set belongs to (derived 1-to-1 from a
/// `Branch` ref, per spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkingSetRef(pub String);

/// The per-branch triple of (working, staged, optional merge) roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    pub working_set_ref: WorkingSetRef,
    pub working_root: Hash,
    pub staged_root: Hash,
    pub merge_state: Option<MergeState>,
}

impl WorkingSet {
    pub fn new(branch_name: impl Into<String>, root: Hash) -> Self {
        Self {
            working_set_ref: WorkingSetRef(branch_name.into()),
            working_root: root,
            staged_root: root,
            merge_state: None,
        }
    }

    pub fn with_working_root(&self, root: Hash) -> Self {
        Self {
            working_root: root,
            ..self.clone()
        }
    }

    pub fn with_staged_root(&self, root: Hash) -> Self {
        Self {
            staged_root: root,
            ..self.clone()
        }
    }

    pub fn with_unmergeable_tables(&self, tables: Vec<TableName>) -> Self {
        let mut next = self.clone();
        if let Some(state) = &mut next.merge_state {
            state.unmergeable_tables = tables;
        }
        next
    }

    pub fn with_merged_tables(&self, tables: Vec<TableName>) -> Self {
        let mut next = self.clone();
        if let Some(state) = &mut next.merge_state {
            state.merged_tables = tables;
        }
        next
    }

    pub fn start_merge(&self, from_commit: Hash, from_spec: impl Into<String>) -> Self {
        Self {
            merge_state: Some(MergeState {
                pre_merge_working_root: self.working_root,
                from_commit,
                from_spec: from_spec.into(),
                unmergeable_tables: Vec::new(),
                merged_tables: Vec::new(),
            }),
            ..self.clone()
        }
    }

    /// Restores `working` to its pre-merge value, sets `staged := working`,
    /// and clears the merge state (spec §4.7 abort transition).
    pub fn abort_merge(&self) -> Self {
        let Some(state) = &self.merge_state else {
            return self.clone();
        };
        let working_root = state.pre_merge_working_root;
        Self {
            working_root,
            staged_root: working_root,
            merge_state: None,
            ..self.clone()
        }
    }

    pub fn clear_merge(&self) -> Self {
        Self {
            merge_state: None,
            ..self.clone()
        }
    }

    pub fn merge_active(&self) -> bool {
        self.merge_state.is_some()
    }

    pub fn has_uncommitted_changes(&self, head_root: Hash) -> bool {
        self.working_root != head_root || self.staged_root != head_root
    }

    pub fn has_unstaged_changes(&self) -> bool {
        self.working_root != self.staged_root
    }

    pub fn hash_of(&self) -> Hash {
        self.content_hash()
    }
}

impl ContentHash for WorkingSet {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.working_set_ref.0.update_hash(buf);
        self.working_root.update_hash(buf);
        self.staged_root.update_hash(buf);
        match &self.merge_state {
            None => buf.push(0),
            Some(state) => {
                buf.push(1);
                state.update_hash(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_working_set_has_no_unstaged_or_uncommitted_changes() {
        let root = Hash::of(b"root");
        let ws = WorkingSet::new("main", root);
        assert!(!ws.has_unstaged_changes());
        assert!(!ws.has_uncommitted_changes(root));
    }

    #[test]
    fn abort_merge_restores_pre_merge_working_root() {
        let root = Hash::of(b"root");
        let ws = WorkingSet::new("main", root);
        let merging = ws.start_merge(Hash::of(b"theirs"), "theirs".to_string());
        let edited = merging.with_working_root(Hash::of(b"edited"));
        assert!(edited.merge_active());
        let aborted = edited.abort_merge();
        assert!(!aborted.merge_active());
        assert_eq!(aborted.working_root, root);
        assert_eq!(aborted.staged_root, root);
    }

    #[test]
    fn at_most_one_merge_state_at_a_time() {
        let ws = WorkingSet::new("main", Hash::of(b"root"));
        let merging = ws.start_merge(Hash::of(b"theirs"), "theirs".to_string());
        // Starting a second merge simply replaces the state (callers are
        // expected to check `merge_active()` first and refuse with
        // `MergeActive`, per the merge engine).
        let merging_again = merging.start_merge(Hash::of(b"other"), "other".to_string());
        assert_eq!(merging_again.merge_state.unwrap().from_spec, "other");
    }
}
