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

//! The stable error-kind taxonomy (spec §7), shared by every component so
//! the procedure dispatcher (`dolt-procedures`) can map any engine error to
//! exactly one surface identifier.

use std::fmt;

/// A stable error identifier, surfaced to the SQL client by the dispatcher.
///
/// Every component error type implements `ErrorKind::kind(&self) -> Kind`
/// (see the `kind()` inherent methods on `RefStoreError`, `MergeError`, etc.)
/// so that adding a new failure mode is a compile error until it is routed
/// to one of these identifiers, rather than silently falling back to a
/// generic "unknown error" bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kind {
    EmptyDatabaseName,
    DatabaseNotFound,
    InvalidArgs,
    PermissionDenied,
    BranchNotFound,
    BranchAlreadyExists,
    InvalidBranchName,
    EmptyBranchName,
    WorkingSetNotFound,
    WorkingSetsOnBothBranches,
    UncommittedChanges,
    MergeActive,
    MergeNeeded,
    UpToDate,
    UnresolvedConflictsOrViolations,
    DetachedHeadRefused,
    TableNotFound,
    GhostCommitEncountered,
    RemoteNotFound,
    BackupAlreadyExists,
    InvalidRefSpec,
    SigningFailed,
    ReadOnlyDatabase,
    ServerPerformedGc,
    ClusterRoleChanged,
    NothingToCommit,
}

impl Kind {
    /// Whether this kind is a local-recovery signal rather than a failure:
    /// `UpToDate` is reported as a warning (success for backup sync);
    /// `UnresolvedConflictsOrViolations` is persisted to the working set and
    /// reported as a warning, never a hard failure (spec §7).
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::UpToDate | Self::UnresolvedConflictsOrViolations)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Implemented by every component error enum so the dispatcher can recover a
/// stable [`Kind`] without matching on display strings.
pub trait ErrorKind {
    fn kind(&self) -> Kind;
}
