use std::sync::Arc;

use tracing::debug;

use super::{batch, run_pipe};
use crate::context::PipelineContext;
use crate::error::PipeRunError;
use crate::memory::WorkingMemory;
use crate::pipe::{Pipe, PipeOutput, PipeRunParams, PipeSequence};

/// Runs the steps in order. Memory flows through unchanged apart from each step's result.
pub(super) async fn run_sequence(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    sequence: &PipeSequence,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    let mut memory = memory;
    for (step_index, step) in sequence.steps.iter().enumerate() {
        debug!(pipe_code = %pipe.code, step_index, step_pipe = %step.pipe_code, "sequence step");
        let step_params = params.for_sub_pipe(step);
        let output = match &step.batch_params {
            Some(batch_params) => {
                let branch = ctx.libraries.pipes().get_required(&step.pipe_code, &pipe.code)?;
                let run = batch::BatchRun {
                    owner_code: &pipe.code,
                    branch_code: &branch.code,
                    batch_params,
                    output_concept: branch.output.clone(),
                };
                batch::run_batch(ctx, run, memory, step_params, step.output_name.as_deref()).await?
            }
            None => run_pipe(ctx.clone(), step.pipe_code.clone(), memory, step_params, step.output_name.clone()).await?,
        };
        memory = output.working_memory;
    }

    let produced = memory.main_stuff()?;
    if !ctx.libraries.concepts().is_compatible(&produced.concept, &pipe.output, false) {
        return Err(PipeRunError::OutputConceptMismatch {
            pipe_code: pipe.code.clone(),
            expected: pipe.output.concept_string(),
            actual: produced.concept.concept_string(),
        });
    }
    if let Some(output_name) = output_name {
        memory.store_main_as(output_name)?;
    }
    Ok(PipeOutput::new(memory))
}
