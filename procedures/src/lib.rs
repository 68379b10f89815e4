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

//! Procedure Dispatcher (C6): the name-dispatched surface a SQL engine calls
//! with `(name, args: [string])`, sitting directly on top of `dolt-core`'s
//! engines. Every procedure follows the same preamble — resolve the current
//! database, check write permission, parse `args` as argv via a `clap`
//! schema, load the session's `DbData` — and returns one of a small set of
//! uniform result shapes (spec §4.6, §6).

pub mod commands;
pub mod context;
pub mod error;
pub mod result;

pub use context::ProcedureContext;
pub use error::ProcedureError;
pub use error::ProcedureResult;
pub use result::ResultRows;

use clap::Parser;

/// Parses `argv` (the procedure's `args: [string]`, without a leading
/// program name) via `T`'s `clap::Parser` schema. Unknown flags surface as
/// `InvalidArgs` rather than panicking (spec §4.6).
pub(crate) fn parse_args<T: Parser>(procedure: &str, argv: &[String]) -> ProcedureResult<T> {
    T::try_parse_from(std::iter::once(procedure.to_string()).chain(argv.iter().cloned())).map_err(|e| ProcedureError::InvalidArgs(e.to_string()))
}

/// Dispatches every procedure except the four that talk to a remote
/// (`fetch`/`pull`/`push`/`clone`, which are `async`, see
/// [`commands::remote::dispatch_remote_async`]) and `gc` (which needs the
/// process-wide session registry and cluster-role source, see
/// [`commands::gc::dispatch_gc`]).
#[tracing::instrument(skip(ctx, argv))]
pub fn dispatch(name: &str, argv: &[String], ctx: &mut ProcedureContext) -> ProcedureResult<ResultRows> {
    if ctx.session.database.is_empty() {
        return Err(ProcedureError::EmptyDatabaseName);
    }
    match name {
        "add" => commands::stage::add(ctx, argv),
        "reset" => commands::stage::reset(ctx, argv),
        "commit" => commands::commit::commit(ctx, argv),
        "branch" => commands::branch::branch(ctx, argv),
        "checkout" => commands::branch::checkout(ctx, argv),
        "tag" => commands::branch::tag(ctx, argv),
        "merge" => commands::merge::merge(ctx, argv),
        "revert" => commands::rewrite::revert(ctx, argv),
        "cherry_pick" => commands::rewrite::cherry_pick(ctx, argv),
        "conflicts_resolve" => commands::merge::conflicts_resolve(ctx, argv),
        "verify_constraints" => commands::merge::verify_constraints(ctx, argv),
        "stash" => commands::stash::stash(ctx, argv),
        "count_commits" => commands::count::count_commits(ctx, argv),
        "undrop" | "purge_dropped_databases" => commands::admin::undrop(ctx, argv),
        "rebase" | "fetch" | "pull" | "push" | "clone" | "backup" | "remote" | "gc" => {
            Err(ProcedureError::InvalidArgs(format!("{name} must be dispatched through its dedicated entry point, not dispatch()")))
        }
        other => Err(ProcedureError::UnknownProcedure(other.to_string())),
    }
}
