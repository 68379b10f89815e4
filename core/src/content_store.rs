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

//! An opaque content-addressed byte store standing in for the chunk store
//! and prolly-tree index, which are an explicit Non-goal of this crate.
//!
//! Everything above this trait (tables, roots, commits) only ever asks for
//! bytes by [`Hash`] or asks the store to mint a new `Hash` for some bytes;
//! it never assumes anything about how those bytes are laid out on disk.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::RwLock;

use thiserror::Error;

use crate::hash::Hash;

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("object {0} not found in content store")]
    NotFound(Hash),
}

pub type ContentStoreResult<T> = Result<T, ContentStoreError>;

/// A content-addressed key/value store.
///
/// Real backends (on-disk, cloud-backed chunk stores) implement this same
/// trait; this crate only ships an in-memory implementation for use by the
/// engines in this crate and by the test fixtures in `dolt-core-testutils`.
pub trait ContentStore: Debug + Send + Sync {
    /// Stores `bytes` and returns its content address, writing only if the
    /// address is not already present.
    fn put(&self, bytes: &[u8]) -> Hash;

    /// Reads back bytes previously stored under `hash`.
    fn get(&self, hash: Hash) -> ContentStoreResult<Vec<u8>>;

    /// Returns whether `hash` is present without reading its bytes.
    fn contains(&self, hash: Hash) -> bool;

    /// Removes an object, if present. Used by the GC coordinator (`gc`) once
    /// it has established that an object is unreachable.
    fn remove(&self, hash: Hash);

    /// All hashes currently held, for GC bookkeeping (`Full` mode sweeps).
    fn all_hashes(&self) -> Vec<Hash>;
}

/// An in-process, in-memory [`ContentStore`].
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    objects: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, bytes: &[u8]) -> Hash {
        let hash = Hash::of(bytes);
        let mut objects = self.objects.write().unwrap();
        objects.entry(hash).or_insert_with(|| bytes.to_vec());
        hash
    }

    fn get(&self, hash: Hash) -> ContentStoreResult<Vec<u8>> {
        self.objects
            .read()
            .unwrap()
            .get(&hash)
            .cloned()
            .ok_or(ContentStoreError::NotFound(hash))
    }

    fn contains(&self, hash: Hash) -> bool {
        self.objects.read().unwrap().contains_key(&hash)
    }

    fn remove(&self, hash: Hash) {
        self.objects.write().unwrap().remove(&hash);
    }

    fn all_hashes(&self) -> Vec<Hash> {
        self.objects.read().unwrap().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryContentStore::new();
        let hash = store.put(b"payload");
        assert_eq!(store.get(hash).unwrap(), b"payload");
        assert!(store.contains(hash));
    }

    fn missing_hash_errors_from_empty() -> Hash {
        Hash::of(b"never written")
    }

    #[test]
    fn missing_hash_errors() {
        let store = MemoryContentStore::new();
        let hash = missing_hash_errors_from_empty();
        assert!(matches!(store.get(hash), Err(ContentStoreError::NotFound(h)) if h == hash));
    }

    #[test]
    fn remove_drops_object() {
        let store = MemoryContentStore::new();
        let hash = store.put(b"transient");
        store.remove(hash);
        assert!(!store.contains(hash));
    }
}
