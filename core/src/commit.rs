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

//! The commit object: `{root, parents, meta, is_ghost}` (spec §3).

use chrono::DateTime;
use chrono::Local;
use chrono::TimeZone;
use chrono::Utc;

use crate::hash::ContentHash;
use crate::hash::Hash;
use crate::hash::hash_id;

hash_id!(
    /// Content address of a [`Commit`].
    pub CommitId
);

/// Milliseconds since the Unix epoch, plus a timezone offset in minutes,
/// mirroring this ecosystem's own commit timestamp representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub millis_since_epoch: i64,
    pub tz_offset_minutes: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Local::now().into())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: dt.timestamp_millis(),
            tz_offset_minutes: 0,
        }
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis_since_epoch).single().unwrap_or_default()
    }
}

impl ContentHash for Timestamp {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.millis_since_epoch.to_le_bytes());
        buf.extend_from_slice(&self.tz_offset_minutes.to_le_bytes());
    }
}

/// An author or committer identity plus the time they acted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: Timestamp,
}

impl ContentHash for Signature {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.name.update_hash(buf);
        self.email.update_hash(buf);
        self.timestamp.update_hash(buf);
    }
}

/// A cryptographic signature over a commit's canonical signing string
/// (`CommitEngine::signing_payload`), produced by an external signing
/// collaborator (spec §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureSig {
    pub key_id: String,
    pub bytes: Vec<u8>,
}

impl ContentHash for SecureSig {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.key_id.update_hash(buf);
        buf.extend_from_slice(&(self.bytes.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.bytes);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub message: String,
    pub author: Signature,
    /// Present only when a distinct committer identity was recorded
    /// (`--committer`); otherwise the author acted as committer implicitly.
    pub committer: Option<Signature>,
    pub signature: Option<SecureSig>,
}

/// `parents` is empty for the initial commit, length 1 for ordinary
/// commits, length >= 2 for merges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub root: Hash,
    pub parents: Vec<CommitId>,
    pub meta: CommitMeta,
    /// True if this commit is known only by hash (shallow history); `root`
    /// resolution for a ghost commit is a hard error (`GhostCommitEncountered`).
    pub is_ghost: bool,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        self.parents.len() >= 2
    }

    pub fn is_initial(&self) -> bool {
        self.parents.is_empty()
    }
}

impl ContentHash for Commit {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.root.update_hash(buf);
        self.parents.update_hash(buf);
        self.meta.message.update_hash(buf);
        self.meta.author.update_hash(buf);
        self.meta.committer.update_hash(buf);
        match &self.meta.signature {
            None => buf.push(0),
            Some(sig) => {
                buf.push(1);
                sig.update_hash(buf);
            }
        }
    }
}

impl ContentHash for CommitId {
    fn update_hash(&self, buf: &mut Vec<u8>) {
        self.hash().update_hash(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(name: &str) -> Signature {
        Signature {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            timestamp: Timestamp {
                millis_since_epoch: 0,
                tz_offset_minutes: 0,
            },
        }
    }

    #[test]
    fn merge_detection_follows_parent_count() {
        let base = Commit {
            root: Hash::of(b"root"),
            parents: vec![],
            meta: CommitMeta {
                message: "init".to_string(),
                author: sig("a"),
                committer: None,
                signature: None,
            },
            is_ghost: false,
        };
        assert!(base.is_initial());
        assert!(!base.is_merge());

        let merge = Commit {
            parents: vec![CommitId::new(Hash::of(b"p1")), CommitId::new(Hash::of(b"p2"))],
            ..base
        };
        assert!(merge.is_merge());
    }

    #[test]
    fn identical_commits_hash_equal() {
        let make = || Commit {
            root: Hash::of(b"root"),
            parents: vec![CommitId::new(Hash::of(b"p"))],
            meta: CommitMeta {
                message: "msg".to_string(),
                author: sig("a"),
                committer: None,
                signature: None,
            },
            is_ghost: false,
        };
        assert_eq!(make().content_hash(), make().content_hash());
    }
}
