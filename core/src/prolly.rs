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

//! A minimal stand-in for the prolly-tree ordered-map that backs row and
//! index storage in the real engine (an explicit Non-goal: see spec §1).
//!
//! This module gives the merge engine something concrete to diff: a row
//! set is just a `BTreeMap<RowKey, RowValue>`, content-addressed through the
//! `ContentStore`. None of this is meant to be a realistic index
//! implementation — only enough surface for `merge_engine`'s three-way
//! per-key diff (spec §4.7) to be real, testable code rather than a stub.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::content_store::ContentStore;
use crate::hash::Hash;

pub type RowKey = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowValue(pub serde_json::Value);

pub type RowSet = BTreeMap<RowKey, RowValue>;

pub fn store_row_set(store: &dyn ContentStore, rows: &RowSet) -> Hash {
    let bytes = serde_json::to_vec(rows).expect("row set is always serializable");
    store.put(&bytes)
}

pub fn load_row_set(store: &dyn ContentStore, hash: Hash) -> RowSet {
    if let Ok(bytes) = store.get(hash) {
        serde_json::from_slice(&bytes).unwrap_or_default()
    } else {
        RowSet::new()
    }
}

/// A single key's three-way classification.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyDiff {
    /// Changed identically on both sides, or only on one side: the merge
    /// result is unambiguous.
    Resolved(Option<RowValue>),
    /// Changed differently on both sides relative to the ancestor: a data
    /// conflict artifact must be recorded on this key.
    Conflict {
        ancestor: Option<RowValue>,
        ours: Option<RowValue>,
        theirs: Option<RowValue>,
    },
}

/// Three-way merges two row sets against their common ancestor, returning
/// the merged row set plus the keys that could not be resolved
/// automatically (spec §4.7 step 3).
pub fn merge_row_sets(ancestor: &RowSet, ours: &RowSet, theirs: &RowSet) -> (RowSet, Vec<(RowKey, KeyDiff)>) {
    let mut merged = RowSet::new();
    let mut conflicts = Vec::new();
    let all_keys: std::collections::BTreeSet<&RowKey> =
        ancestor.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    for key in all_keys {
        let a = ancestor.get(key);
        let o = ours.get(key);
        let t = theirs.get(key);
        match (a == o, a == t, o == t) {
            (true, true, true) => {
                if let Some(v) = o {
                    merged.insert(key.clone(), v.clone());
                }
            }
            (true, _, _) => {
                // Unchanged on our side: take theirs.
                if let Some(v) = t {
                    merged.insert(key.clone(), v.clone());
                }
            }
            (_, true, _) => {
                // Unchanged on their side: take ours.
                if let Some(v) = o {
                    merged.insert(key.clone(), v.clone());
                }
            }
            (_, _, true) => {
                // Both sides changed identically.
                if let Some(v) = o {
                    merged.insert(key.clone(), v.clone());
                }
            }
            _ => {
                conflicts.push((
                    key.clone(),
                    KeyDiff::Conflict {
                        ancestor: a.cloned(),
                        ours: o.cloned(),
                        theirs: t.cloned(),
                    },
                ));
                // Conservatively keep our version in the working value so the
                // table remains queryable while the conflict is outstanding.
                if let Some(v) = o {
                    merged.insert(key.clone(), v.clone());
                }
            }
        }
    }
    (merged, conflicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::MemoryContentStore;

    fn row(v: i64) -> RowValue {
        RowValue(serde_json::json!(v))
    }

    #[test]
    fn row_set_round_trips_through_store() {
        let store = MemoryContentStore::new();
        let mut rows = RowSet::new();
        rows.insert("1".to_string(), row(42));
        let hash = store_row_set(&store, &rows);
        assert_eq!(load_row_set(&store, hash), rows);
    }

    #[test]
    fn unchanged_side_takes_the_other_sides_edit() {
        let mut ancestor = RowSet::new();
        ancestor.insert("1".to_string(), row(1));
        let ours = ancestor.clone();
        let mut theirs = ancestor.clone();
        theirs.insert("1".to_string(), row(2));
        let (merged, conflicts) = merge_row_sets(&ancestor, &ours, &theirs);
        assert!(conflicts.is_empty());
        assert_eq!(merged.get("1"), Some(&row(2)));
    }

    #[test]
    fn both_sides_changing_differently_is_a_conflict() {
        let mut ancestor = RowSet::new();
        ancestor.insert("1".to_string(), row(1));
        let mut ours = ancestor.clone();
        ours.insert("1".to_string(), row(2));
        let mut theirs = ancestor.clone();
        theirs.insert("1".to_string(), row(3));
        let (_, conflicts) = merge_row_sets(&ancestor, &ours, &theirs);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].0, "1");
    }

    #[test]
    fn both_sides_changing_identically_is_resolved() {
        let mut ancestor = RowSet::new();
        ancestor.insert("1".to_string(), row(1));
        let mut ours = ancestor.clone();
        ours.insert("1".to_string(), row(9));
        let theirs = ours.clone();
        let (merged, conflicts) = merge_row_sets(&ancestor, &ours, &theirs);
        assert!(conflicts.is_empty());
        assert_eq!(merged.get("1"), Some(&row(9)));
    }
}
