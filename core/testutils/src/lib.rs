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

//! Test fixtures for `dolt-core`: an in-memory store + commit graph + ref
//! store bundle, a small commit-builder DSL, and session helpers, mirroring
//! the shape real callers assemble from the four components by hand.

use std::collections::BTreeMap;
use std::sync::Arc;

use dolt_core::commit::Commit;
use dolt_core::commit::CommitId;
use dolt_core::commit::CommitMeta;
use dolt_core::commit::Signature;
use dolt_core::commit::Timestamp;
use dolt_core::commit_graph::CommitGraph;
use dolt_core::content_store::ContentStore;
use dolt_core::content_store::MemoryContentStore;
use dolt_core::hash::Hash;
use dolt_core::ref_store::RefStore;
use dolt_core::session::Session;
use dolt_core::table::RootValue;
use dolt_core::table::Table;
use dolt_core::table::TableName;

/// The four pieces every engine function needs, bundled for a test.
pub struct TestRepo {
    pub store: Arc<MemoryContentStore>,
    pub graph: Arc<CommitGraph>,
    pub refs: Arc<RefStore>,
    pub root_commit: CommitId,
}

impl TestRepo {
    /// An empty database with one branch, `main`, pointed at an empty
    /// initial commit.
    pub fn init() -> Self {
        Self::init_with_branch("main")
    }

    pub fn init_with_branch(branch: &str) -> Self {
        let store = Arc::new(MemoryContentStore::new());
        let graph = Arc::new(CommitGraph::new());
        let refs = Arc::new(RefStore::new());

        let root = RootValue::empty(1);
        let root_hash = dolt_core::table::store_root(store.as_ref(), &root);
        let root_commit = graph.put_commit(Commit {
            root: root_hash,
            parents: vec![],
            meta: CommitMeta {
                message: "initial commit".to_string(),
                author: test_signature("Test User"),
                committer: None,
                signature: None,
            },
            is_ghost: false,
        });
        refs.create_branch(branch, root_commit, root_hash, false)
            .expect("fresh branch always creates");

        Self { store, graph, refs, root_commit }
    }

    pub fn session(&self, branch: &str) -> Session {
        let mut session = Session::new("test_db", branch, Arc::clone(&self.refs), Arc::clone(&self.graph));
        session.user_name = "Test User".to_string();
        session.user_email = "test.user@example.com".to_string();
        session
    }

    /// Stores `root` and returns its hash, for callers assembling a table
    /// change by hand before committing it.
    pub fn store_root(&self, root: &RootValue) -> Hash {
        dolt_core::table::store_root(self.store.as_ref(), root)
    }

    pub fn load_root(&self, hash: Hash) -> RootValue {
        dolt_core::table::load_root(self.store.as_ref(), hash).expect("root hash must resolve")
    }
}

pub fn test_signature(name: &str) -> Signature {
    Signature {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        timestamp: Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
    }
}

/// A `Table` value whose content hash varies with `seed`, for tests that
/// only care that a table changed, not what it contains.
pub fn fake_table(seed: u8) -> Table {
    Table {
        schema_hash: Hash::of(&[b's', seed]),
        row_index: Hash::of(&[b'r', seed]),
        secondary_indexes: BTreeMap::new(),
        artifacts: Hash::of(&[b'a', seed]),
        autoinc: None,
    }
}

/// Builds a linear or branching commit history on top of a [`TestRepo`],
/// writing each commit's table contents as it goes.
pub struct CommitGraphBuilder<'a> {
    repo: &'a TestRepo,
}

impl<'a> CommitGraphBuilder<'a> {
    pub fn new(repo: &'a TestRepo) -> Self {
        Self { repo }
    }

    /// Commits `root` with the given parents and message, returning the new
    /// commit id.
    pub fn commit(&self, parents: Vec<CommitId>, root: &RootValue, message: &str) -> CommitId {
        let root_hash = self.repo.store_root(root);
        self.repo.graph.put_commit(Commit {
            root: root_hash,
            parents,
            meta: CommitMeta {
                message: message.to_string(),
                author: test_signature("Test User"),
                committer: Some(test_signature("Test User")),
                signature: None,
            },
            is_ghost: false,
        })
    }

    /// Commits a new root that is `parent`'s root plus one table, named
    /// `table_name`, keyed by `seed`.
    pub fn commit_adding_table(&self, parent: CommitId, table_name: &str, seed: u8) -> CommitId {
        let parent_root = self.repo.load_root(self.repo.graph.resolve_root(parent).expect("parent must be resolvable"));
        let new_root = parent_root.put_table(TableName::unqualified(table_name), fake_table(seed));
        self.commit(vec![parent], &new_root, &format!("add {table_name}"))
    }
}

/// Asserts `ancestor` is reachable from `descendant` via parent edges.
pub fn assert_is_ancestor(graph: &CommitGraph, ancestor: CommitId, descendant: CommitId) {
    assert!(
        graph.is_ancestor(ancestor, descendant).expect("ancestry lookup must resolve"),
        "expected {ancestor:?} to be an ancestor of {descendant:?}"
    );
}

/// Asserts a root (as resolved through `store`) has a table by this name.
pub fn assert_has_table(store: &dyn ContentStore, root_hash: Hash, table_name: &str) {
    let root = dolt_core::table::load_root(store, root_hash).expect("root hash must resolve");
    let (table, _) = root.get_table(&TableName::unqualified(table_name));
    assert!(table.is_some(), "expected root to contain table {table_name:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_a_resolvable_main_branch() {
        let repo = TestRepo::init();
        let head = repo.refs.resolve_branch("main").unwrap();
        assert_eq!(head, repo.root_commit);
    }

    #[test]
    fn builder_chains_commits_and_tables() {
        let repo = TestRepo::init();
        let builder = CommitGraphBuilder::new(&repo);
        let c1 = builder.commit_adding_table(repo.root_commit, "t1", 1);
        let c2 = builder.commit_adding_table(c1, "t2", 2);

        assert_is_ancestor(&repo.graph, repo.root_commit, c2);
        assert_is_ancestor(&repo.graph, c1, c2);

        let root_hash = repo.graph.resolve_root(c2).unwrap();
        assert_has_table(repo.store.as_ref(), root_hash, "t1");
        assert_has_table(repo.store.as_ref(), root_hash, "t2");
    }
}
