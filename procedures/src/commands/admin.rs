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

//! `dolt_undrop` / `purge_dropped_databases`: no dropped-database registry
//! exists in this crate (database lifecycle sits above it, in the SQL
//! engine layer), so both resolve to a no-op success. Recorded as an open
//! question decision rather than silently omitted.

use crate::ProcedureContext;
use crate::ProcedureResult;
use crate::ResultRows;

pub fn undrop(ctx: &mut ProcedureContext, _argv: &[String]) -> ProcedureResult<ResultRows> {
    ctx.check_write_permission()?;
    Ok(ResultRows::ok())
}
