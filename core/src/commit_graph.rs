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

//! CommitGraph (C2): the DAG of commits, spec resolution, ancestor queries.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::RwLock;

use thiserror::Error;
use tracing::instrument;

use crate::commit::Commit;
use crate::commit::CommitId;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::ContentHash as _;
use crate::hash::Hash;

#[derive(Debug, Error)]
pub enum CommitGraphError {
    #[error("commit {0} not found")]
    CommitNotFound(CommitId),
    #[error("commit {0} is a ghost commit and its root cannot be resolved")]
    GhostCommitEncountered(CommitId),
    #[error("could not resolve commit spec {0:?}")]
    InvalidRefSpec(String),
    #[error("{descendant} is not an ancestor-reachable from {ancestor}")]
    NotAnAncestor { descendant: CommitId, ancestor: CommitId },
}

impl ErrorKind for CommitGraphError {
    fn kind(&self) -> Kind {
        match self {
            Self::CommitNotFound(_) => Kind::InvalidRefSpec,
            Self::GhostCommitEncountered(_) => Kind::GhostCommitEncountered,
            Self::InvalidRefSpec(_) => Kind::InvalidRefSpec,
            Self::NotAnAncestor { .. } => Kind::InvalidRefSpec,
        }
    }
}

pub type CommitGraphResult<T> = Result<T, CommitGraphError>;

/// Looks up named refs (branches/tags/remote-tracking) by their bare name.
/// Implemented by `RefStore` so `CommitGraph::resolve` can honor spec forms
/// beyond raw hash / `HEAD` / ancestor arithmetic without this module
/// depending on `ref_store`.
pub trait RefLookup {
    fn lookup_branch(&self, name: &str) -> Option<CommitId>;
    fn lookup_tag(&self, name: &str) -> Option<CommitId>;
    fn lookup_remote_tracking(&self, name: &str) -> Option<CommitId>;
}

/// An append-only, in-memory store of commit objects, keyed by content hash.
#[derive(Debug, Default)]
pub struct CommitGraph {
    commits: RwLock<HashMap<CommitId, Commit>>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, commit))]
    pub fn put_commit(&self, commit: Commit) -> CommitId {
        let id = CommitId::new(commit.content_hash());
        self.commits.write().unwrap().entry(id).or_insert(commit);
        id
    }

    /// Registers a ghost commit: known only by hash, with no retrievable
    /// root. Used by shallow clones (spec §4.10 `Clone(depth)`).
    pub fn put_ghost(&self, id: CommitId, parents: Vec<CommitId>) {
        let mut commits = self.commits.write().unwrap();
        commits.entry(id).or_insert_with(|| Commit {
            root: Hash::of(b""),
            parents,
            meta: crate::commit::CommitMeta {
                message: String::new(),
                author: crate::commit::Signature {
                    name: String::new(),
                    email: String::new(),
                    timestamp: crate::commit::Timestamp {
                        millis_since_epoch: 0,
                        tz_offset_minutes: 0,
                    },
                },
                committer: None,
                signature: None,
            },
            is_ghost: true,
        });
    }

    pub fn contains(&self, id: CommitId) -> bool {
        self.commits.read().unwrap().contains_key(&id)
    }

    /// Every commit id ever registered, reachable from a ref or not. Used by
    /// the GC coordinator's `Full` mode to find commits no ref reaches
    /// anymore (spec §4.12).
    pub fn all_ids(&self) -> Vec<CommitId> {
        self.commits.read().unwrap().keys().copied().collect()
    }

    pub fn get_commit(&self, id: CommitId) -> CommitGraphResult<Commit> {
        self.commits
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(CommitGraphError::CommitNotFound(id))
    }

    /// Returns the commit's root, failing with `GhostCommitEncountered` if
    /// it is known only by hash.
    pub fn resolve_root(&self, id: CommitId) -> CommitGraphResult<Hash> {
        let commit = self.get_commit(id)?;
        if commit.is_ghost {
            return Err(CommitGraphError::GhostCommitEncountered(id));
        }
        Ok(commit.root)
    }

    fn parents_of(&self, id: CommitId) -> CommitGraphResult<Vec<CommitId>> {
        Ok(self.get_commit(id)?.parents)
    }

    /// Resolves a commit spec against `head`. Spec forms: raw hex hash,
    /// branch name, tag name, `REF~N` (ancestor), `REF^N` (nth parent),
    /// `HEAD`, remote-tracking name (`remote/branch`).
    #[instrument(skip(self, refs))]
    pub fn resolve(&self, spec: &str, head: CommitId, refs: &dyn RefLookup) -> CommitGraphResult<CommitId> {
        let spec = spec.trim();
        if spec == "HEAD" {
            return Ok(head);
        }
        if let Some((base, n)) = split_suffix(spec, '~') {
            let base_id = self.resolve(base, head, refs)?;
            return self.nth_ancestor(base_id, n);
        }
        if let Some((base, n)) = split_suffix(spec, '^') {
            let base_id = self.resolve(base, head, refs)?;
            return self.nth_parent(base_id, n);
        }
        if let Some(hash) = Hash::try_from_hex(spec) {
            let id = CommitId::new(hash);
            if self.contains(id) {
                return Ok(id);
            }
        }
        if let Some(id) = refs.lookup_branch(spec) {
            return Ok(id);
        }
        if let Some(id) = refs.lookup_tag(spec) {
            return Ok(id);
        }
        if let Some(id) = refs.lookup_remote_tracking(spec) {
            return Ok(id);
        }
        Err(CommitGraphError::InvalidRefSpec(spec.to_string()))
    }

    fn nth_ancestor(&self, start: CommitId, n: u32) -> CommitGraphResult<CommitId> {
        let mut current = start;
        for _ in 0..n {
            let parents = self.parents_of(current)?;
            current = *parents
                .first()
                .ok_or(CommitGraphError::NotAnAncestor { descendant: start, ancestor: current })?;
        }
        Ok(current)
    }

    fn nth_parent(&self, start: CommitId, n: u32) -> CommitGraphResult<CommitId> {
        if n == 0 {
            return Ok(start);
        }
        let parents = self.parents_of(start)?;
        parents
            .get((n - 1) as usize)
            .copied()
            .ok_or(CommitGraphError::NotAnAncestor { descendant: start, ancestor: start })
    }

    /// True iff `ancestor` is reachable from `descendant` by following
    /// parent edges (including `ancestor == descendant`).
    #[instrument(skip(self))]
    pub fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId) -> CommitGraphResult<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([descendant]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if id == ancestor {
                return Ok(true);
            }
            for parent in self.parents_of(id)? {
                queue.push_back(parent);
            }
        }
        Ok(false)
    }

    /// True iff `from` is an ancestor of `to`, i.e. advancing `from`'s
    /// branch head to `to` would be a fast-forward.
    pub fn can_fast_forward(&self, from: CommitId, to: CommitId) -> CommitGraphResult<bool> {
        self.is_ancestor(from, to)
    }

    /// Lowest common ancestor of `a` and `b`.
    #[instrument(skip(self))]
    pub fn get_ancestor(&self, a: CommitId, b: CommitId) -> CommitGraphResult<CommitId> {
        let ancestors_of_a = self.ancestor_set(a)?;
        let mut queue = VecDeque::from([b]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if ancestors_of_a.contains(&id) {
                return Ok(id);
            }
            for parent in self.parents_of(id)? {
                queue.push_back(parent);
            }
        }
        Err(CommitGraphError::NotAnAncestor { descendant: b, ancestor: a })
    }

    fn ancestor_set(&self, start: CommitId) -> CommitGraphResult<HashSet<CommitId>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for parent in self.parents_of(id)? {
                queue.push_back(parent);
            }
        }
        Ok(seen)
    }

    /// Commits reachable from any of `starts`, not reachable from any of
    /// `stops`, in a reverse-topological (descendants-before-ancestors) order.
    pub fn topological_iter(&self, starts: &[CommitId], stops: &[CommitId]) -> CommitGraphResult<Vec<CommitId>> {
        let excluded: HashSet<CommitId> = stops
            .iter()
            .map(|&s| self.ancestor_set(s))
            .collect::<CommitGraphResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from(starts.to_vec());
        while let Some(id) = queue.pop_front() {
            if excluded.contains(&id) || !seen.insert(id) {
                continue;
            }
            order.push(id);
            for parent in self.parents_of(id)? {
                queue.push_back(parent);
            }
        }
        Ok(order)
    }

    /// Number of commits strictly between `descendant` and `ancestor`
    /// (exclusive of `ancestor`, inclusive of `descendant`); fails if
    /// `ancestor` is not actually an ancestor of `descendant`.
    #[instrument(skip(self))]
    pub fn count_between(&self, descendant: CommitId, ancestor: CommitId) -> CommitGraphResult<u64> {
        if descendant == ancestor {
            return Ok(0);
        }
        if !self.is_ancestor(ancestor, descendant)? {
            return Err(CommitGraphError::NotAnAncestor { descendant, ancestor });
        }
        let stops = [ancestor];
        Ok(self.topological_iter(&[descendant], &stops)?.len() as u64)
    }

    /// `dolt_count_commits(from, to)`: resolves both, finds the LCA, and
    /// reports `(ahead, behind)` relative to that LCA (spec §4.2).
    #[instrument(skip(self))]
    pub fn dolt_count_commits(&self, from: CommitId, to: CommitId) -> CommitGraphResult<(u64, u64)> {
        let lca = self.get_ancestor(from, to)?;
        if lca == from && lca == to {
            return Ok((0, 0));
        }
        let ahead = self.count_between(from, lca)?;
        let behind = self.count_between(to, lca)?;
        Ok((ahead, behind))
    }
}

/// Splits `"REF~3"` into `("REF", 3)`, defaulting the count to 1 for a bare
/// trailing separator (`"REF~"`).
fn split_suffix(spec: &str, sep: char) -> Option<(&str, u32)> {
    let idx = spec.rfind(sep)?;
    let (base, rest) = spec.split_at(idx);
    let rest = &rest[1..];
    if rest.is_empty() {
        return Some((base, 1));
    }
    rest.parse().ok().map(|n| (base, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitMeta;
    use crate::commit::Signature;
    use crate::commit::Timestamp;

    struct NoRefs;
    impl RefLookup for NoRefs {
        fn lookup_branch(&self, _: &str) -> Option<CommitId> {
            None
        }
        fn lookup_tag(&self, _: &str) -> Option<CommitId> {
            None
        }
        fn lookup_remote_tracking(&self, _: &str) -> Option<CommitId> {
            None
        }
    }

    fn commit(root_seed: u8, parents: Vec<CommitId>) -> Commit {
        Commit {
            root: Hash::of(&[root_seed]),
            parents,
            meta: CommitMeta {
                message: format!("commit {root_seed}"),
                author: Signature {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: Timestamp { millis_since_epoch: root_seed as i64, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
            is_ghost: false,
        }
    }

    #[test]
    fn fast_forward_is_not_symmetric_unless_equal() {
        let graph = CommitGraph::new();
        let c0 = graph.put_commit(commit(0, vec![]));
        let c1 = graph.put_commit(commit(1, vec![c0]));
        assert!(graph.can_fast_forward(c0, c1).unwrap());
        assert!(!graph.can_fast_forward(c1, c0).unwrap());
        assert!(graph.can_fast_forward(c0, c0).unwrap());
    }

    #[test]
    fn count_commits_after_linear_history() {
        let graph = CommitGraph::new();
        let c0 = graph.put_commit(commit(0, vec![]));
        let c1 = graph.put_commit(commit(1, vec![c0]));
        let (ahead, behind) = graph.dolt_count_commits(c0, c1).unwrap();
        assert_eq!((ahead, behind), (0, 1));
    }

    #[test]
    fn lowest_common_ancestor_of_diverged_branches() {
        let graph = CommitGraph::new();
        let c0 = graph.put_commit(commit(0, vec![]));
        let a = graph.put_commit(commit(1, vec![c0]));
        let b = graph.put_commit(commit(2, vec![c0]));
        assert_eq!(graph.get_ancestor(a, b).unwrap(), c0);
    }

    #[test]
    fn resolve_head_and_ancestor_suffixes() {
        let graph = CommitGraph::new();
        let c0 = graph.put_commit(commit(0, vec![]));
        let c1 = graph.put_commit(commit(1, vec![c0]));
        let c2 = graph.put_commit(commit(2, vec![c1]));
        assert_eq!(graph.resolve("HEAD", c2, &NoRefs).unwrap(), c2);
        assert_eq!(graph.resolve("HEAD~1", c2, &NoRefs).unwrap(), c1);
        assert_eq!(graph.resolve("HEAD~2", c2, &NoRefs).unwrap(), c0);
        assert_eq!(graph.resolve("HEAD^1", c2, &NoRefs).unwrap(), c1);
    }

    #[test]
    fn ghost_commit_blocks_root_resolution() {
        let graph = CommitGraph::new();
        let ghost_id = CommitId::new(Hash::of(b"ghost"));
        graph.put_ghost(ghost_id, vec![]);
        assert!(matches!(
            graph.resolve_root(ghost_id),
            Err(CommitGraphError::GhostCommitEncountered(_))
        ));
    }
}
