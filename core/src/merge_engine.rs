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

//! Merge Engine (C7): three-way root merge, fast-forward detection, and the
//! cherry-pick/revert ancestor derivations the rewrite engine builds on.

use thiserror::Error;
use tracing::instrument;

use crate::commit::CommitId;
use crate::commit_graph::CommitGraph;
use crate::commit_graph::CommitGraphError;
use crate::content_store::ContentStore;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::Hash;
use crate::prolly;
use crate::table::RootValue;
use crate::table::Table;
use crate::table::TableName;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("branches are already up to date")]
    UpToDate,
    #[error("a merge is already in progress")]
    MergeActive,
    #[error("the working set has uncommitted changes")]
    UncommittedChanges,
    #[error("table {0} has a schema conflict and must be resolved manually")]
    SchemaConflictPresent(TableName),
    #[error("cherry-pick source must have exactly one parent")]
    CherryPickRequiresSingleParent,
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
}

impl ErrorKind for MergeError {
    fn kind(&self) -> Kind {
        match self {
            Self::UpToDate => Kind::UpToDate,
            Self::MergeActive => Kind::MergeActive,
            Self::UncommittedChanges => Kind::UncommittedChanges,
            Self::SchemaConflictPresent(_) => Kind::UnresolvedConflictsOrViolations,
            Self::CherryPickRequiresSingleParent => Kind::InvalidArgs,
            Self::CommitGraph(e) => e.kind(),
        }
    }
}

pub type MergeResult<T> = Result<T, MergeError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    pub no_ff: bool,
    pub is_cherry_pick: bool,
}

/// A per-table data conflict: the keys that changed differently on both
/// sides relative to the ancestor (spec §4.7 step 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConflict {
    pub table: TableName,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    pub tables_modified: Vec<TableName>,
    pub schema_conflicts: Vec<TableName>,
    pub data_conflicts: Vec<DataConflict>,
    pub constraint_violations: Vec<TableName>,
}

impl MergeStats {
    pub fn has_conflicts(&self) -> bool {
        !self.schema_conflicts.is_empty() || !self.data_conflicts.is_empty() || !self.constraint_violations.is_empty()
    }

    /// Tables left unmergeable: present in `schema_conflicts` or
    /// `data_conflicts`, feeding `WorkingSet::with_unmergeable_tables`.
    pub fn unmergeable_tables(&self) -> Vec<TableName> {
        let mut out: Vec<TableName> = self.schema_conflicts.clone();
        for c in &self.data_conflicts {
            if !out.contains(&c.table) {
                out.push(c.table.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub enum MergeOutcome {
    FastForward(CommitId),
    Merged { root: RootValue, stats: MergeStats },
}

/// Three-way merges `ours` and `theirs` against their common `ancestor`
/// (spec §4.7). Signals `UpToDate` when the two commits are identical, and
/// `FastForward` (an outcome, not an error) when `ours_commit` is a strict
/// ancestor of `theirs_commit` and `opts.no_ff` is false.
#[instrument(skip(store, ours, theirs, ancestor, graph))]
pub fn merge_roots(
    store: &dyn ContentStore,
    ours: &RootValue,
    theirs: &RootValue,
    ancestor: &RootValue,
    ours_commit: CommitId,
    theirs_commit: CommitId,
    graph: &CommitGraph,
    opts: MergeOptions,
) -> MergeResult<MergeOutcome> {
    if ours_commit == theirs_commit {
        return Err(MergeError::UpToDate);
    }
    if !opts.no_ff && graph.can_fast_forward(ours_commit, theirs_commit)? {
        return Ok(MergeOutcome::FastForward(theirs_commit));
    }

    let mut merged = ours.clone();
    let mut stats = MergeStats::default();

    for name in ours.union_table_names(theirs) {
        let a = ancestor.get_table(&name).0.cloned();
        let o = ours.get_table(&name).0.cloned();
        let t = theirs.get_table(&name).0.cloned();
        match (a, o, t) {
            (_, None, None) => {}
            (None, Some(o_table), None) => {
                merged = merged.put_table(name, o_table);
            }
            (None, None, Some(t_table)) => {
                merged = merged.put_table(name.clone(), t_table);
                stats.tables_modified.push(name);
            }
            (Some(a_table), Some(o_table), None) => {
                if o_table == a_table {
                    merged = merged.remove_tables(&[name.clone()], true, true).expect("force removal cannot fail");
                    stats.tables_modified.push(name);
                }
                // else: deleted on theirs, edited on ours — keep our edit.
            }
            (Some(a_table), None, Some(t_table)) => {
                if t_table != a_table {
                    merged = merged.put_table(name.clone(), t_table);
                    stats.tables_modified.push(name);
                }
                // else: deleted on ours, unchanged on theirs — stays removed.
            }
            (a_opt, Some(o_table), Some(t_table)) => {
                let schema_hash = if o_table.schema_hash == t_table.schema_hash {
                    Some(o_table.schema_hash)
                } else {
                    match &a_opt {
                        Some(a_table) if a_table.schema_hash == o_table.schema_hash => Some(t_table.schema_hash),
                        Some(a_table) if a_table.schema_hash == t_table.schema_hash => Some(o_table.schema_hash),
                        _ => None,
                    }
                };
                let Some(schema_hash) = schema_hash else {
                    stats.schema_conflicts.push(name);
                    continue;
                };

                let ancestor_rows = a_opt.as_ref().map(|t| prolly::load_row_set(store, t.row_index)).unwrap_or_default();
                let ours_rows = prolly::load_row_set(store, o_table.row_index);
                let theirs_rows = prolly::load_row_set(store, t_table.row_index);
                let (merged_rows, conflicts) = prolly::merge_row_sets(&ancestor_rows, &ours_rows, &theirs_rows);
                if !conflicts.is_empty() {
                    stats.data_conflicts.push(DataConflict {
                        table: name.clone(),
                        keys: conflicts.into_iter().map(|(k, _)| k).collect(),
                    });
                }
                let row_index = prolly::store_row_set(store, &merged_rows);
                let autoinc = match (o_table.autoinc, t_table.autoinc) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (Some(a), None) => Some(a),
                    (None, Some(b)) => Some(b),
                    (None, None) => None,
                };
                let new_table = Table {
                    schema_hash,
                    row_index,
                    secondary_indexes: o_table.secondary_indexes.clone(),
                    artifacts: o_table.artifacts,
                    autoinc,
                };
                if new_table != o_table {
                    stats.tables_modified.push(name.clone());
                }
                merged = merged.put_table(name, new_table);
            }
        }
    }

    for (name, schema) in merged.get_all_schemas() {
        for parent in &schema.foreign_key_parents {
            if merged.get_table(parent).0.is_none() && !stats.constraint_violations.contains(name) {
                stats.constraint_violations.push(name.clone());
            }
        }
    }

    Ok(MergeOutcome::Merged { root: merged, stats })
}

/// `ancestor = parent(theirs)` for a cherry-pick; forbidden when `theirs`
/// has zero or more than one parent (spec §4.7).
pub fn cherry_pick_ancestor(graph: &CommitGraph, theirs: CommitId) -> MergeResult<CommitId> {
    let commit = graph.get_commit(theirs)?;
    match commit.parents.as_slice() {
        [parent] => Ok(*parent),
        _ => Err(MergeError::CherryPickRequiresSingleParent),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    Ours,
    Theirs,
}

/// Whole-table conflict resolution for `conflicts_resolve`: the original
/// spec leaves per-key resolution to a richer artifact model that is out of
/// scope here (row and index content stay opaque, §4.13), so a table with
/// any outstanding conflict is resolved in its entirety to one side.
/// Schema conflicts are refused outright per the spec's open-question
/// decision: realign schemas manually, then retry.
pub fn resolve_table_conflicts(
    ours: &RootValue,
    theirs: &RootValue,
    table: &TableName,
    side: ConflictSide,
    schema_conflicts: &[TableName],
) -> MergeResult<RootValue> {
    if schema_conflicts.contains(table) {
        return Err(MergeError::SchemaConflictPresent(table.clone()));
    }
    let resolved = match side {
        ConflictSide::Ours => ours.get_table(table).0.cloned(),
        ConflictSide::Theirs => theirs.get_table(table).0.cloned(),
    };
    Ok(match resolved {
        Some(t) => ours.put_table(table.clone(), t),
        None => ours.remove_tables(std::slice::from_ref(table), true, true).unwrap_or_else(|_| ours.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::MemoryContentStore;
    use crate::prolly::RowSet;
    use crate::prolly::RowValue;
    use crate::table::Schema;
    use std::collections::BTreeMap;

    fn table_with_rows(store: &dyn ContentStore, schema_hash: Hash, rows: &RowSet) -> Table {
        Table {
            schema_hash,
            row_index: prolly::store_row_set(store, rows),
            secondary_indexes: BTreeMap::new(),
            artifacts: Hash::of(b"none"),
            autoinc: None,
        }
    }

    fn rows_with(entries: &[(&str, i64)]) -> RowSet {
        entries.iter().map(|(k, v)| (k.to_string(), RowValue(serde_json::json!(v)))).collect()
    }

    #[test]
    fn non_conflicting_edits_on_both_sides_merge_cleanly() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let schema_hash = Hash::of(b"schema");
        let t = TableName::unqualified("t");
        let ancestor_table = table_with_rows(&store, schema_hash, &rows_with(&[("1", 1)]));
        let ancestor = RootValue::empty(1).put_table(t.clone(), ancestor_table);
        let ours = ancestor.put_table(t.clone(), table_with_rows(&store, schema_hash, &rows_with(&[("1", 1), ("2", 2)])));
        let theirs = ancestor.put_table(t.clone(), table_with_rows(&store, schema_hash, &rows_with(&[("1", 1), ("3", 3)])));
        let c0 = CommitId::new(Hash::of(b"c0"));
        let c1 = CommitId::new(Hash::of(b"c1"));
        let outcome = merge_roots(&store, &ours, &theirs, &ancestor, c0, c1, &graph, MergeOptions::default()).unwrap();
        match outcome {
            MergeOutcome::Merged { root, stats } => {
                assert!(!stats.has_conflicts());
                let merged_rows = prolly::load_row_set(&store, root.get_table(&t).0.unwrap().row_index);
                assert_eq!(merged_rows.len(), 3);
            }
            MergeOutcome::FastForward(_) => panic!("expected a real merge"),
        }
    }

    #[test]
    fn conflicting_edits_are_reported_and_resolvable() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let schema_hash = Hash::of(b"schema");
        let t = TableName::unqualified("t");
        let ancestor_table = table_with_rows(&store, schema_hash, &rows_with(&[("1", 1)]));
        let ancestor = RootValue::empty(1).put_table(t.clone(), ancestor_table);
        let ours = ancestor.put_table(t.clone(), table_with_rows(&store, schema_hash, &rows_with(&[("1", 2)])));
        let theirs = ancestor.put_table(t.clone(), table_with_rows(&store, schema_hash, &rows_with(&[("1", 3)])));
        let c0 = CommitId::new(Hash::of(b"c0"));
        let c1 = CommitId::new(Hash::of(b"c1"));
        let outcome = merge_roots(&store, &ours, &theirs, &ancestor, c0, c1, &graph, MergeOptions::default()).unwrap();
        let MergeOutcome::Merged { root: merged_root, stats } = outcome else {
            panic!("expected a real merge");
        };
        assert!(stats.has_conflicts());
        assert_eq!(stats.unmergeable_tables(), vec![t.clone()]);
        let resolved = resolve_table_conflicts(&ours, &theirs, &t, ConflictSide::Theirs, &stats.schema_conflicts).unwrap();
        let _ = merged_root;
        assert_eq!(resolved.get_table(&t).0.unwrap().row_index, theirs.get_table(&t).0.unwrap().row_index);
    }

    #[test]
    fn identical_commits_are_up_to_date() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let root = RootValue::empty(1);
        let c0 = CommitId::new(Hash::of(b"c0"));
        let err = merge_roots(&store, &root, &root, &root, c0, c0, &graph, MergeOptions::default()).unwrap_err();
        assert!(matches!(err, MergeError::UpToDate));
    }

    #[test]
    fn cherry_pick_rejects_merge_commits() {
        let graph = CommitGraph::new();
        let p1 = CommitId::new(Hash::of(b"p1"));
        let p2 = CommitId::new(Hash::of(b"p2"));
        let merge_commit = graph.put_commit(crate::commit::Commit {
            root: Hash::of(b"root"),
            parents: vec![p1, p2],
            meta: crate::commit::CommitMeta {
                message: "merge".to_string(),
                author: crate::commit::Signature {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: crate::commit::Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
            is_ghost: false,
        });
        assert!(matches!(
            cherry_pick_ancestor(&graph, merge_commit),
            Err(MergeError::CherryPickRequiresSingleParent)
        ));
    }

    #[test]
    fn foreign_key_violation_recorded_when_parent_table_missing() {
        let store = MemoryContentStore::new();
        let graph = CommitGraph::new();
        let schema_hash = Hash::of(b"schema");
        let parent = TableName::unqualified("parent");
        let child = TableName::unqualified("child");
        let ancestor = RootValue::empty(1)
            .put_table(parent.clone(), table_with_rows(&store, schema_hash, &RowSet::new()))
            .put_table(child.clone(), table_with_rows(&store, schema_hash, &RowSet::new()))
            .put_schema(
                child.clone(),
                Schema {
                    hash: schema_hash,
                    foreign_key_parents: vec![parent.clone()],
                },
            );
        let ours = ancestor.clone();
        let theirs = ancestor.remove_tables(&[parent], true, true).unwrap();
        let c0 = CommitId::new(Hash::of(b"c0"));
        let c1 = CommitId::new(Hash::of(b"c1"));
        let outcome = merge_roots(&store, &ours, &theirs, &ancestor, c0, c1, &graph, MergeOptions::default()).unwrap();
        let MergeOutcome::Merged { stats, .. } = outcome else {
            panic!("expected a real merge");
        };
        assert_eq!(stats.constraint_violations, vec![child]);
    }
}
