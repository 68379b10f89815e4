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

//! Commit Engine (C9): staging, pending-commit signing, and the atomic
//! advance performed by [`crate::session::Session::dolt_commit`].

use thiserror::Error;
use tracing::instrument;

use crate::commit::CommitId;
use crate::commit::SecureSig;
use crate::error::ErrorKind;
use crate::error::Kind;
use crate::hash::Hash;
use crate::session::PendingCommit;
use crate::session::Session;
use crate::session::SessionError;
use crate::table::RootValue;
use crate::table::TableName;

#[derive(Debug, Error)]
#[error("signing failed: {0}")]
pub struct SigningError(pub String);

impl ErrorKind for SigningError {
    fn kind(&self) -> Kind {
        Kind::SigningFailed
    }
}

/// An external signing collaborator (spec §4.9): given the canonical
/// signing payload, returns signature bytes to embed in the commit.
pub trait CommitSigner {
    fn key_id(&self) -> &str;
    fn sign(&self, payload: &str) -> Result<Vec<u8>, SigningError>;
}

#[derive(Debug, Error)]
pub enum CommitEngineError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Signing(#[from] SigningError),
}

impl ErrorKind for CommitEngineError {
    fn kind(&self) -> Kind {
        match self {
            Self::Session(e) => e.kind(),
            Self::Signing(e) => e.kind(),
        }
    }
}

pub type CommitEngineResult<T> = Result<T, CommitEngineError>;

/// Promotes `working` tables into `staged`: modified and deleted tables
/// always; newly added tables only when `include_untracked` (`add -A` vs.
/// `add -u`, spec §4.9).
pub fn stage_all(working: &RootValue, staged: &RootValue, include_untracked: bool) -> RootValue {
    let mut result = staged.clone();
    for name in working.union_table_names(staged) {
        let w = working.get_table(&name).0;
        let s = staged.get_table(&name).0;
        match (w, s) {
            (None, Some(_)) => {
                result = result.remove_tables(std::slice::from_ref(&name), true, true).unwrap_or(result);
            }
            (Some(wt), None) => {
                if include_untracked {
                    result = result.put_table(name, wt.clone());
                }
            }
            (Some(wt), Some(st)) => {
                if wt != st {
                    result = result.put_table(name, wt.clone());
                }
            }
            (None, None) => {}
        }
    }
    result
}

/// `add -u` style staging: modified and deleted tables only, never newly
/// added ones.
pub fn stage_modified_and_deleted(working: &RootValue, staged: &RootValue) -> RootValue {
    stage_all(working, staged, false)
}

/// Promotes just the named tables from `working` into `staged`.
pub fn stage_tables(working: &RootValue, staged: &RootValue, tables: &[TableName]) -> RootValue {
    let mut result = staged.clone();
    for name in tables {
        result = match working.get_table(name).0 {
            Some(t) => result.put_table(name.clone(), t.clone()),
            None => result.remove_tables(std::slice::from_ref(name), true, true).unwrap_or(result),
        };
    }
    result
}

/// Promotes the entire working root, including whatever non-table metadata
/// the (out of scope) SQL layer keeps alongside tables (spec §4.9). This
/// crate models no separate database-level metadata, so it coincides with
/// `stage_all(working, staged, true)`.
pub fn stage_database(working: &RootValue, _staged: &RootValue) -> RootValue {
    working.clone()
}

/// The canonical deterministic string signed for a commit (spec §4.9).
pub fn signing_payload(database: &str, message: &str, author_name: &str, author_email: &str, date_millis: i64, head_hash: Hash, staged_hash: Hash) -> String {
    format!("{database}\n{message}\n{author_name}\n{author_email}\n{date_millis}\n{head_hash}\n{staged_hash}")
}

/// Signs `pending` (if `signer` is given) and performs the atomic commit
/// advance via [`Session::dolt_commit`].
#[instrument(skip(session, pending, signer))]
pub fn sign_and_commit(session: &Session, mut pending: PendingCommit, database: &str, signer: Option<&dyn CommitSigner>) -> CommitEngineResult<CommitId> {
    if let Some(signer) = signer {
        let head_id = session.refs().resolve_branch(&session.branch).map_err(SessionError::from)?;
        let head_hash = session.graph().resolve_root(head_id).map_err(SessionError::from)?;
        let payload = signing_payload(
            database,
            &pending.meta.message,
            &pending.meta.author.name,
            &pending.meta.author.email,
            pending.meta.author.timestamp.millis_since_epoch,
            head_hash,
            pending.root,
        );
        let bytes = signer.sign(&payload)?;
        pending.meta.signature = Some(SecureSig {
            key_id: signer.key_id().to_string(),
            bytes,
        });
    }
    Ok(session.dolt_commit(pending)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_store::MemoryContentStore;
    use crate::table::Table;
    use std::collections::BTreeMap;

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
    fn stage_all_promotes_modified_and_new_tables() {
        let t1 = TableName::unqualified("t1");
        let t2 = TableName::unqualified("t2");
        let staged = RootValue::empty(1).put_table(t1.clone(), sample_table(1));
        let working = staged.clone().put_table(t1.clone(), sample_table(2)).put_table(t2.clone(), sample_table(3));
        let result = stage_all(&working, &staged, true);
        assert_eq!(result.get_table(&t1).0.unwrap().schema_hash, sample_table(2).schema_hash);
        assert!(result.get_table(&t2).0.is_some());
    }

    #[test]
    fn stage_modified_and_deleted_ignores_untracked_tables() {
        let t1 = TableName::unqualified("t1");
        let t2 = TableName::unqualified("t2");
        let staged = RootValue::empty(1).put_table(t1.clone(), sample_table(1));
        let working = staged.clone().put_table(t2.clone(), sample_table(3));
        let result = stage_modified_and_deleted(&working, &staged);
        assert!(result.get_table(&t2).0.is_none());
    }

    #[test]
    fn stage_all_removes_deleted_tables() {
        let t1 = TableName::unqualified("t1");
        let staged = RootValue::empty(1).put_table(t1.clone(), sample_table(1));
        let working = RootValue::empty(1);
        let result = stage_all(&working, &staged, true);
        assert!(result.get_table(&t1).0.is_none());
    }

    #[test]
    fn signing_payload_is_deterministic() {
        let a = signing_payload("db", "msg", "name", "email", 0, Hash::of(b"h"), Hash::of(b"s"));
        let b = signing_payload("db", "msg", "name", "email", 0, Hash::of(b"h"), Hash::of(b"s"));
        assert_eq!(a, b);
        let c = signing_payload("db", "other", "name", "email", 0, Hash::of(b"h"), Hash::of(b"s"));
        assert_ne!(a, c);
    }

    struct RejectingSigner;
    impl CommitSigner for RejectingSigner {
        fn key_id(&self) -> &str {
            "key"
        }
        fn sign(&self, _payload: &str) -> Result<Vec<u8>, SigningError> {
            Err(SigningError("no agent".to_string()))
        }
    }

    #[test]
    fn signing_failure_surfaces_as_signing_failed() {
        use crate::commit::Commit;
        use crate::commit::CommitMeta;
        use crate::commit::Signature;
        use crate::commit::Timestamp;
        use crate::commit_graph::CommitGraph;
        use crate::ref_store::RefStore;
        use std::sync::Arc;

        let _store = MemoryContentStore::new();
        let refs = Arc::new(RefStore::new());
        let graph = Arc::new(CommitGraph::new());
        let root = Hash::of(b"root");
        let c0 = graph.put_commit(Commit {
            root,
            parents: vec![],
            meta: CommitMeta {
                message: "init".to_string(),
                author: Signature {
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
        let session = Session::new("db", "main", refs, graph);
        let pending = PendingCommit {
            parents: vec![c0],
            root: Hash::of(b"staged"),
            meta: CommitMeta {
                message: "m".to_string(),
                author: Signature {
                    name: "a".to_string(),
                    email: "a@example.com".to_string(),
                    timestamp: Timestamp { millis_since_epoch: 0, tz_offset_minutes: 0 },
                },
                committer: None,
                signature: None,
            },
        };
        let err = sign_and_commit(&session, pending, "db", Some(&RejectingSigner)).unwrap_err();
        assert!(matches!(err, CommitEngineError::Signing(_)));
        assert!(matches!(err.kind(), Kind::SigningFailed));
    }
}
