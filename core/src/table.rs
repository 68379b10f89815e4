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

//! RootValue & TableStore (C1): an immutable, content-addressed snapshot of
//! every table at one version.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::content_store::ContentStore;
use crate::hash::ContentHash;
use crate::hash::Hash;

pub const DEFAULT_SCHEMA: &str = "";

/// `(schema, name)`; equality and hashing are case-insensitive on both parts,
/// while the original casing is preserved for display.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_SCHEMA, name)
    }

    fn fold_key(&self) -> (String, String) {
        (self.schema.to_ascii_lowercase(), self.name.to_ascii_lowercase())
    }
}

impl PartialEq for TableName {
    fn eq(&self, other: &Self) -> bool {
        self.fold_key() == other.fold_key()
    }
}

impl Eq for TableName {}

impl std::hash::Hash for TableName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fold_key().hash(state);
    }
}

impl PartialOrd for TableName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TableName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fold_key().cmp(&other.fold_key())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.schema.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.schema, self.name)
        }
    }
}

impl ContentHash for TableName {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.schema.to_ascii_lowercase().update_hash(buf);
        self.name.to_ascii_lowercase().update_hash(buf);
    }
}

/// An immutable table value. Mutating a table yields a new `Table` with a
/// new content hash; nothing here is ever mutated in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub schema_hash: Hash,
    pub row_index: Hash,
    pub secondary_indexes: BTreeMap<String, Hash>,
    pub artifacts: Hash,
    pub autoinc: Option<u64>,
}

impl ContentHash for Table {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.schema_hash.update_hash(buf);
        self.row_index.update_hash(buf);
        buf.extend_from_slice(&(self.secondary_indexes.len() as u64).to_le_bytes());
        for (name, hash) in &self.secondary_indexes {
            name.update_hash(buf);
            hash.update_hash(buf);
        }
        self.artifacts.update_hash(buf);
        match self.autoinc {
            None => buf.push(0),
            Some(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TableStoreError {
    #[error("table {0} not found")]
    TableNotFound(TableName),
    #[error(
        "cannot remove table {table}: table {dependent} has a foreign key referencing it; pass \
         skip_fk_check to override"
    )]
    ForeignKeyReferenced { table: TableName, dependent: TableName },
}

/// A minimal schema description, opaque beyond its content hash. The full
/// schema representation lives in the (out of scope) SQL layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub hash: Hash,
    /// Names of tables this schema's foreign keys reference, used only by
    /// `RootValue::remove_tables`'s FK check; not a full constraint model.
    pub foreign_key_parents: Vec<TableName>,
}

/// An immutable snapshot of all tables at one version, plus a feature
/// version tag. Two roots are equal iff their hashes are equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootValue {
    feature_version: u32,
    tables: IndexMap<TableName, Table>,
    schemas: IndexMap<TableName, Schema>,
}

impl RootValue {
    pub fn empty(feature_version: u32) -> Self {
        Self {
            feature_version,
            tables: IndexMap::new(),
            schemas: IndexMap::new(),
        }
    }

    pub fn feature_version(&self) -> u32 {
        self.feature_version
    }

    pub fn get_table(&self, name: &TableName) -> (Option<&Table>, bool) {
        match self.tables.get(name) {
            Some(table) => (Some(table), true),
            None => (None, false),
        }
    }

    pub fn put_table(&self, name: TableName, table: Table) -> Self {
        let mut tables = self.tables.clone();
        tables.insert(name, table);
        Self {
            feature_version: self.feature_version,
            tables,
            schemas: self.schemas.clone(),
        }
    }

    pub fn put_schema(&self, name: TableName, schema: Schema) -> Self {
        let mut schemas = self.schemas.clone();
        schemas.insert(name, schema);
        Self {
            feature_version: self.feature_version,
            tables: self.tables.clone(),
            schemas,
        }
    }

    /// Removes `names`, failing if any remaining table's schema declares a
    /// foreign key into one of them, unless `force` or `skip_fk_check`.
    pub fn remove_tables(
        &self,
        names: &[TableName],
        force: bool,
        skip_fk_check: bool,
    ) -> Result<Self, TableStoreError> {
        if !force && !skip_fk_check {
            for (dependent, schema) in &self.schemas {
                if names.contains(dependent) {
                    continue;
                }
                for parent in &schema.foreign_key_parents {
                    if names.contains(parent) {
                        return Err(TableStoreError::ForeignKeyReferenced {
                            table: parent.clone(),
                            dependent: dependent.clone(),
                        });
                    }
                }
            }
        }
        let mut tables = self.tables.clone();
        let mut schemas = self.schemas.clone();
        for name in names {
            tables.shift_remove(name);
            schemas.shift_remove(name);
        }
        Ok(Self {
            feature_version: self.feature_version,
            tables,
            schemas,
        })
    }

    pub fn list_table_names(&self, schema: Option<&str>) -> Vec<TableName> {
        self.tables
            .keys()
            .filter(|t| schema.is_none_or(|s| t.schema.eq_ignore_ascii_case(s)))
            .cloned()
            .collect()
    }

    pub fn union_table_names(&self, other: &RootValue) -> Vec<TableName> {
        let mut names: Vec<TableName> = self.tables.keys().cloned().collect();
        for name in other.tables.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    pub fn get_all_schemas(&self) -> &IndexMap<TableName, Schema> {
        &self.schemas
    }

    pub fn hash_of(&self) -> Hash {
        self.content_hash()
    }

    pub fn tables(&self) -> &IndexMap<TableName, Table> {
        &self.tables
    }
}

impl ContentHash for RootValue {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.feature_version.to_le_bytes());
        let mut entries: Vec<_> = self.tables.iter().collect();
        entries.sort_by(|(a, _), (b, _)| a.fold_key().cmp(&b.fold_key()));
        buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for (name, table) in entries {
            name.update_hash(buf);
            table.update_hash(buf);
        }
    }
}

/// Serializes `root` and writes it to `store`, returning its content
/// address. The address is independent of `root.hash_of()`, which is the
/// canonical identity hash defined by [`ContentHash`]; this is merely the
/// key under which the bytes happen to live in the content store.
pub fn store_root(store: &dyn ContentStore, root: &RootValue) -> Hash {
    let bytes = serde_json::to_vec(root).expect("root value is always serializable");
    store.put(&bytes)
}

pub fn load_root(store: &dyn ContentStore, hash: Hash) -> Option<RootValue> {
    let bytes = store.get(hash).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table(seed: u8) -> Table {
        Table {
            schema_hash: Hash::of(&[seed]),
            row_index: Hash::of(&[seed, 1]),
            secondary_indexes: BTreeMap::new(),
            artifacts: Hash::of(&[seed, 2]),
            autoinc: None,
        }
    }

    #[test]
    fn table_name_equality_is_case_insensitive() {
        assert_eq!(TableName::unqualified("Users"), TableName::unqualified("users"));
        assert_ne!(TableName::unqualified("Users"), TableName::unqualified("orders"));
    }

    #[test]
    fn put_table_is_pure_and_changes_hash() {
        let root = RootValue::empty(1);
        let t = TableName::unqualified("t");
        let root2 = root.put_table(t.clone(), sample_table(1));
        assert_ne!(root.hash_of(), root2.hash_of());
        assert!(root.get_table(&t).0.is_none());
        assert!(root2.get_table(&t).0.is_some());
    }

    #[test]
    fn remove_tables_blocks_on_foreign_key() {
        let parent = TableName::unqualified("parent");
        let child = TableName::unqualified("child");
        let root = RootValue::empty(1)
            .put_table(parent.clone(), sample_table(1))
            .put_table(child.clone(), sample_table(2))
            .put_schema(
                child.clone(),
                Schema {
                    hash: Hash::of(b"child-schema"),
                    foreign_key_parents: vec![parent.clone()],
                },
            );
        let err = root.remove_tables(&[parent.clone()], false, false).unwrap_err();
        assert!(matches!(err, TableStoreError::ForeignKeyReferenced { .. }));
        assert!(root.remove_tables(&[parent], false, true).is_ok());
    }

    #[test]
    fn equal_roots_have_equal_hashes() {
        let t = TableName::unqualified("t");
        let a = RootValue::empty(1).put_table(t.clone(), sample_table(7));
        let b = RootValue::empty(1).put_table(t, sample_table(7));
        assert_eq!(a.hash_of(), b.hash_of());
    }

    #[test]
    fn root_round_trips_through_store() {
        use crate::content_store::MemoryContentStore;

        let store = MemoryContentStore::new();
        let root = RootValue::empty(1).put_table(TableName::unqualified("t"), sample_table(1));
        let hash = store_root(&store, &root);
        let loaded = load_root(&store, hash).unwrap();
        assert_eq!(loaded.hash_of(), root.hash_of());
    }
}
