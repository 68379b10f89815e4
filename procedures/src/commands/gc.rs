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

//! `dolt_gc`: the dedicated entry point the dispatcher routes to directly,
//! since it needs the process-wide session registry and cluster-role
//! source that an ordinary [`crate::ProcedureContext`] has no room for
//! (spec §4.12, §9 design note).

use clap::Parser;
use tokio_util::sync::CancellationToken;

use dolt_core::commit_graph::CommitGraph;
use dolt_core::config::DoltConfig;
use dolt_core::config::SafepointDiscipline;
use dolt_core::content_store::ContentStore;
use dolt_core::gc;
use dolt_core::gc::CachePurge;
use dolt_core::gc::ClusterRoleSource;
use dolt_core::gc::GcKeeper;
use dolt_core::gc::GcMode;
use dolt_core::gc::GcOptions;
use dolt_core::gc::KillConnectionsSafepoint;
use dolt_core::gc::SessionAwareSafepoint;
use dolt_core::gc::SessionRegistry;
use dolt_core::hash::Hash;
use dolt_core::ref_store::RefStore;

use crate::ProcedureError;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct GcArgs {
    #[arg(long)]
    full: bool,
    #[arg(long)]
    shallow: bool,
    #[arg(long = "archive-level")]
    archive_level: Option<u8>,
}

/// Every branch's persisted working-set roots, kept alongside whatever a
/// safepoint discipline collects from live sessions: a branch with no
/// connected session still has a staged/working root GC must not collect.
fn persisted_working_set_roots(refs: &RefStore) -> Vec<Hash> {
    let mut roots = Vec::new();
    for (branch, _) in refs.list_branches() {
        if let Ok(ws) = refs.get_working_set(&branch) {
            roots.push(ws.working_root);
            roots.push(ws.staged_root);
            if let Some(state) = &ws.merge_state {
                roots.push(state.pre_merge_working_root);
            }
        }
    }
    roots
}

/// `dolt_gc([--full] [--shallow] [--archive-level N])`: chooses a safepoint
/// discipline from `config`, runs it to completion, then collects.
pub async fn dispatch_gc(
    keeper: GcKeeper,
    registry: &dyn SessionRegistry,
    cluster: &dyn ClusterRoleSource,
    caches: &dyn CachePurge,
    store: &dyn ContentStore,
    graph: &CommitGraph,
    refs: &RefStore,
    config: &DoltConfig,
    cancel: &CancellationToken,
    argv: &[String],
) -> ProcedureResult<ResultRows> {
    if config.disable_gc_procedure() {
        return Err(ProcedureError::InvalidArgs("dolt_gc is disabled on this server".to_string()));
    }
    let args: GcArgs = parse_args("gc", argv)?;
    let mode = match (args.shallow, args.full) {
        (true, _) => GcMode::Shallow,
        (false, true) => GcMode::Full,
        (false, false) => GcMode::Default,
    };
    let opts = GcOptions { mode, archive_compression_level: args.archive_level };

    let report = match config.gc_safepoint_controller() {
        SafepointDiscipline::KillConnections => {
            let safepoint = KillConnectionsSafepoint::new(registry, cluster, caches);
            let run = safepoint.begin_gc(keeper);
            safepoint.establish_pre_finalize(&run)?;
            safepoint.establish_post_finalize(&run)?;
            let roots = persisted_working_set_roots(refs);
            gc::collect(store, graph, refs, &roots, opts)?
        }
        SafepointDiscipline::SessionAware => {
            let safepoint = SessionAwareSafepoint::new(registry, cluster, caches);
            let run = safepoint.begin_gc(keeper);
            let mut roots = safepoint.establish_pre_finalize(&run, cancel).await?;
            roots.extend(persisted_working_set_roots(refs));
            safepoint.establish_post_finalize(&run)?;
            gc::collect(store, graph, refs, &roots, opts)?
        }
    };
    Ok(ResultRows::Gc { kept: report.kept as u64, removed: report.removed as u64 })
}
