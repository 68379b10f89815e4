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

//! The uniform result shapes every procedure returns (spec §4.6, §6).

/// One of the small set of row shapes a procedure hands back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultRows {
    /// Integer status procedures: `0` success, `1` failure.
    Status(i32),
    /// Commit / cherry-pick: a commit hash string.
    Hash(String),
    /// Merge / pull.
    MergeOutcome { hash: String, fast_forward: bool, conflicts: bool },
    /// Checkout.
    Checkout { status: i32, message: String },
    /// `dolt_count_commits`.
    CountCommits { ahead: u64, behind: u64 },
    /// `verify_constraints`.
    Violations(u64),
    /// `stash`: a short status line (`stash push`/`pop` report what moved).
    Text(String),
    /// `dolt_gc`.
    Gc { kept: u64, removed: u64 },
}

impl ResultRows {
    pub fn ok() -> Self {
        Self::Status(0)
    }

    pub fn failed() -> Self {
        Self::Status(1)
    }
}
