use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use super::{batch, fanout, layer, run_pipe};
use crate::context::PipelineContext;
use crate::content::StuffContent;
use crate::error::PipeRunError;
use crate::memory::{MAIN_STUFF_NAME, WorkingMemory};
use crate::pipe::{Pipe, PipeOutput, PipeParallel, PipeRunParams, SubPipe};
use crate::stuff::Stuff;
use crate::tracker::{TrackerEvent, emit};

/// Fans out every branch on its own deep copy of `memory`, then merges the branch results back.
///
/// With `add_each_output` each result lands under its branch's result name and `main` points at
/// the last branch; with a combined output the results become the fields of one record.
pub(super) async fn run_parallel(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    parallel: &PipeParallel,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    debug!(pipe_code = %pipe.code, branch_count = parallel.parallels.len(), "parallel fan-out");
    let branches = parallel
        .parallels
        .iter()
        .map(|branch| branch_run(ctx, pipe, branch, memory.make_deep_copy(), params.for_sub_pipe(branch)))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = fanout::join_ordered(&pipe.code, branches).await?;

    let mut results: Vec<(String, Stuff)> = Vec::with_capacity(outputs.len());
    for (branch, output) in parallel.parallels.iter().zip(&outputs) {
        let stuff = output.main_stuff()?.clone();
        let name = branch.output_name.clone().unwrap_or_else(|| branch.pipe_code.clone());
        results.push((name, stuff));
    }

    let mut memory = memory;
    if parallel.add_each_output {
        for (name, stuff) in &results {
            memory.set_stuff(name, stuff.clone());
        }
        if let Some((last_name, _)) = results.last() {
            memory.set_alias(MAIN_STUFF_NAME, last_name)?;
        }
    }

    if let Some(combined) = &parallel.combined_output {
        let record: Map<String, Value> = results
            .iter()
            .map(|(name, stuff)| (name.clone(), stuff.content.to_field_value()))
            .collect();
        let content = StuffContent::from_record(&combined.structure_name, &Value::Object(record), ctx.libraries.structures())?;
        let name = output_name.unwrap_or(&pipe.code).to_string();
        let stored = memory.set_new_main_stuff(Stuff::new(name, combined.clone(), content), output_name)?;
        emit(
            ctx.tracker.as_ref(),
            TrackerEvent::AggregateStep {
                pipe_code: pipe.code.clone(),
                layer: layer(&params),
                from_stuff: results.iter().map(|(name, _)| name.clone()).collect(),
                to_stuff: stored,
            },
        );
    } else if let Some(output_name) = output_name {
        memory.store_main_as(output_name)?;
    }

    Ok(PipeOutput::new(memory))
}

/// One branch as an owned future. A branch with batch settings runs its pipe once per list item.
fn branch_run(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    branch: &SubPipe,
    memory: WorkingMemory,
    params: PipeRunParams,
) -> Result<BoxFuture<'static, Result<PipeOutput, PipeRunError>>, PipeRunError> {
    let Some(batch_params) = branch.batch_params.clone() else {
        return Ok(run_pipe(ctx.clone(), branch.pipe_code.clone(), memory, params, branch.output_name.clone()));
    };
    let target = ctx.libraries.pipes().get_required(&branch.pipe_code, &pipe.code)?;
    let ctx = ctx.clone();
    let owner_code = pipe.code.clone();
    let output_name = branch.output_name.clone();
    Ok(async move {
        let run = batch::BatchRun {
            owner_code: &owner_code,
            branch_code: &target.code,
            batch_params: &batch_params,
            output_concept: target.output.clone(),
        };
        batch::run_batch(&ctx, run, memory, params, output_name.as_deref()).await
    }
    .boxed())
}
