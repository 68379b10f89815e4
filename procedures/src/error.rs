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

use thiserror::Error;

use dolt_core::branch_engine::CheckoutError;
use dolt_core::commit_engine::CommitEngineError;
use dolt_core::commit_graph::CommitGraphError;
use dolt_core::error::ErrorKind;
use dolt_core::error::Kind;
use dolt_core::gc::GcError;
use dolt_core::merge_engine::MergeError;
use dolt_core::ref_store::RefStoreError;
use dolt_core::remote_sync::RemoteSyncError;
use dolt_core::rewrite::RewriteError;
use dolt_core::session::SessionError;
use dolt_core::table::TableStoreError;

#[derive(Debug, Error)]
pub enum ProcedureError {
    #[error("database name must not be empty")]
    EmptyDatabaseName,
    #[error("write access denied on a read-only database")]
    ReadOnlyDatabase,
    #[error("unknown procedure {0:?}")]
    UnknownProcedure(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    RefStore(#[from] RefStoreError),
    #[error(transparent)]
    CommitGraph(#[from] CommitGraphError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    CommitEngine(#[from] CommitEngineError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    RemoteSync(#[from] RemoteSyncError),
    #[error(transparent)]
    Gc(#[from] GcError),
    #[error(transparent)]
    TableStore(#[from] TableStoreError),
}

impl ErrorKind for ProcedureError {
    fn kind(&self) -> Kind {
        match self {
            Self::EmptyDatabaseName => Kind::EmptyDatabaseName,
            Self::ReadOnlyDatabase => Kind::ReadOnlyDatabase,
            Self::UnknownProcedure(_) => Kind::InvalidArgs,
            Self::InvalidArgs(_) => Kind::InvalidArgs,
            Self::RefStore(e) => e.kind(),
            Self::CommitGraph(e) => e.kind(),
            Self::Session(e) => e.kind(),
            Self::Checkout(e) => e.kind(),
            Self::Merge(e) => e.kind(),
            Self::CommitEngine(e) => e.kind(),
            Self::Rewrite(e) => e.kind(),
            Self::RemoteSync(e) => e.kind(),
            Self::Gc(e) => e.kind(),
            Self::TableStore(TableStoreError::TableNotFound(_)) => Kind::TableNotFound,
            Self::TableStore(TableStoreError::ForeignKeyReferenced { .. }) => Kind::InvalidArgs,
        }
    }
}

pub type ProcedureResult<T> = Result<T, ProcedureError>;
