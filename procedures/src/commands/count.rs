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

//! `dolt_count_commits`: ahead/behind reporting between two commit specs
//! (spec §4.4).

use clap::Parser;

use crate::ProcedureContext;
use crate::ProcedureResult;
use crate::ResultRows;
use crate::parse_args;

#[derive(Parser)]
struct CountCommitsArgs {
    #[arg(long = "from")]
    from: String,
    #[arg(long = "to")]
    to: String,
}

pub fn count_commits(ctx: &mut ProcedureContext, argv: &[String]) -> ProcedureResult<ResultRows> {
    let args: CountCommitsArgs = parse_args("count_commits", argv)?;
    let head = ctx.session.refs().resolve_branch(&ctx.session.branch)?;
    let from = ctx.session.graph().resolve(&args.from, head, ctx.session.refs())?;
    let to = ctx.session.graph().resolve(&args.to, head, ctx.session.refs())?;
    let (ahead, behind) = ctx.session.graph().dolt_count_commits(from, to)?;
    Ok(ResultRows::CountCommits { ahead, behind })
}
