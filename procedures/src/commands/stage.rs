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

//! `add` and `reset`: staging and working-set rollback, both built directly
//! on `commit_engine`'s promotion helpers (spec §4.9).

use clap::Parser;
use dolt_core::commit_engine;
use dolt_core::session::Roots;
use dolt_core::table;
use dolt_core::table::RootValue;
use dolt_core::table::TableName;

use crate::ProcedureContext;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct AddArgs {
    tables: Vec<String>,
    #[arg(long)]
    all: bool,
    #[arg(long)]
    force: bool,
}

pub fn add(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: AddArgs = parse_args("add", argv)?;
    let roots = ctx.session.get_roots()?;
    let working = table::load_root(ctx.store, roots.working).unwrap_or_else(|| RootValue::empty(1));
    let staged = table::load_root(ctx.store, roots.staged).unwrap_or_else(|| RootValue::empty(1));

    let new_staged = if args.all || args.tables.iter().any(|t| t == ".") {
        commit_engine::stage_all(&working, &staged, true)
    } else {
        let tables: Vec<TableName> = args.tables.iter().cloned().map(TableName::unqualified).collect();
        commit_engine::stage_tables(&working, &staged, &tables)
    };

    let new_staged_hash = table::store_root(ctx.store, &new_staged);
    ctx.session.set_roots(Roots {
        head: roots.head,
        staged: new_staged_hash,
        working: roots.working,
    })?;
    Ok(ResultRows::ok())
}

#[derive(Parser)]
struct ResetArgs {
    target: Option<String>,
    #[arg(long)]
    hard: bool,
    #[arg(long)]
    soft: bool,
}

/// Resets the working set's staged (and, with `--hard`, working) root back
/// to `target` (HEAD by default). Never moves the branch ref itself — that
/// is `checkout`'s job, not `reset`'s.
///
/// `--soft` is a pure no-op on staged/working: `Roots::head` is always
/// derived live from the branch ref (`Session::get_roots`), never stored, so
/// the one thing `--soft` does elsewhere — move HEAD while leaving the index
/// and working tree untouched — has nothing left to do once this crate
/// refuses to touch staged/working at all. `--hard` resets both; the
/// default (mixed) resets only staged.
pub fn reset(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    let args: ResetArgs = parse_args("reset", argv)?;
    if args.soft {
        return Ok(ResultRows::ok());
    }
    let roots = ctx.session.get_roots()?;
    let target_root = match &args.target {
        None => roots.head,
        Some(spec) => {
            let head_id = ctx.session.refs().resolve_branch(&ctx.session.branch)?;
            let target_id = ctx.session.graph().resolve(spec, head_id, ctx.session.refs())?;
            ctx.session.graph().resolve_root(target_id)?
        }
    };

    let new_roots = if args.hard {
        Roots { head: roots.head, staged: target_root, working: target_root }
    } else {
        Roots { head: roots.head, staged: target_root, working: roots.working }
    };
    ctx.session.set_roots(new_roots)?;
    Ok(ResultRows::ok())
}
