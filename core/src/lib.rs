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

//! Version-control orchestration core for a content-addressed,
//! commit-graph-based SQL storage engine.
//!
//! This crate owns the session/transaction coordinator: it reconciles the
//! three mutable roots of a session (working, staged, head) against a shared
//! [`commit_graph`], performs three-way merges (`merge_engine`), switches a
//! session's active branch atomically (`branch_engine`), and coordinates an
//! online garbage collector against live sessions (`gc`).

pub mod autoinc;
pub mod branch_engine;
pub mod commit;
pub mod commit_engine;
pub mod commit_graph;
pub mod config;
pub mod content_store;
pub mod error;
pub mod gc;
pub mod hash;
pub mod merge_engine;
pub mod prolly;
pub mod ref_store;
pub mod remote_sync;
pub mod rewrite;
pub mod session;
pub mod table;
pub mod working_set;

pub use commit::Commit;
pub use commit::CommitId;
pub use hash::Hash;
pub use ref_store::Ref;
pub use session::Session;
pub use table::RootValue;
pub use table::TableName;
pub use working_set::WorkingSet;
