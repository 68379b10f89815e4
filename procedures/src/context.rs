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

//! `DbData` (spec §4.6): the bundle of engine handles a procedure loads from
//! the session before doing any work.

use dolt_core::branch_engine::BranchEngine;
use dolt_core::commit_engine::CommitSigner;
use dolt_core::content_store::ContentStore;
use dolt_core::session::Session;

/// Everything a (non-remote, non-GC) procedure needs: the session it runs
/// against, the shared content store, the branch lifecycle helper for
/// upstream-tracking metadata, and an optional signing collaborator for
/// `commit -S`.
pub struct ProcedureContext<'a> {
    pub session: &'a mut Session,
    pub store: &'a dyn ContentStore,
    pub branches: &'a BranchEngine,
    pub signer: Option<&'a dyn CommitSigner>,
    /// `true` blocks every mutating procedure with `ReadOnlyDatabase`.
    pub read_only: bool,
}

impl<'a> ProcedureContext<'a> {
    pub fn new(session: &'a mut Session, store: &'a dyn ContentStore, branches: &'a BranchEngine) -> Self {
        Self {
            session,
            store,
            branches,
            signer: None,
            read_only: false,
        }
    }

    pub fn check_write_permission(&self) -> crate::error::ProcedureResult<()> {
        if self.read_only {
            return Err(crate::error::ProcedureError::ReadOnlyDatabase);
        }
        Ok(())
    }
}
