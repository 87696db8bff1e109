use std::sync::Arc;

use tracing::debug;

use super::{fanout, layer, run_pipe};
use crate::concept::Concept;
use crate::context::PipelineContext;
use crate::content::StuffContent;
use crate::error::{PipeRunError, WorkingMemoryError};
use crate::memory::WorkingMemory;
use crate::pipe::{BatchParams, PipeOutput, PipeRunParams};
use crate::stuff::Stuff;
use crate::tracker::{TrackerEvent, emit};

/// What a batch runs: a `PipeBatch` controller, or a sequence step or parallel branch with `batch_over`.
pub(super) struct BatchRun<'a> {
    pub owner_code: &'a str,
    pub branch_code: &'a str,
    pub batch_params: &'a BatchParams,
    /// Concept of the items of the resulting list.
    pub output_concept: Arc<Concept>,
}

/// Runs the branch once per list item, each on its own memory fork, and collects the results in
/// item order. An empty list yields an empty list.
pub(super) async fn run_batch(
    ctx: &Arc<PipelineContext>,
    batch: BatchRun<'_>,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    let BatchParams {
        input_list_name,
        input_item_name,
    } = batch.batch_params;
    let list_stuff = memory.get_stuff(input_list_name)?;
    let StuffContent::List { items } = &list_stuff.content else {
        return Err(WorkingMemoryError::TypeMismatch {
            variable: input_list_name.clone(),
            expected: "list".to_string(),
            actual: list_stuff.content.kind_name().to_string(),
        }
        .into());
    };
    let item_concept = list_stuff.concept.clone();
    debug!(pipe_code = %batch.owner_code, branch = %batch.branch_code, item_count = items.len(), "batch fan-out");

    let mut branches = Vec::with_capacity(items.len());
    for (item_index, item) in items.iter().enumerate() {
        let mut fork = memory.make_deep_copy();
        let item_stuff = Stuff::new(input_item_name.clone(), item_concept.clone(), item.clone());
        emit(
            ctx.tracker.as_ref(),
            TrackerEvent::BatchStep {
                pipe_code: batch.owner_code.to_string(),
                layer: layer(&params),
                list_stuff: input_list_name.clone(),
                item_index,
                item_stuff: item_stuff.code.clone(),
            },
        );
        fork.set_stuff(input_item_name, item_stuff);
        branches.push(run_pipe(ctx.clone(), batch.branch_code.to_string(), fork, params.nested(), None));
    }

    let outputs = fanout::join_ordered(batch.owner_code, branches).await?;
    let results = outputs
        .iter()
        .map(|output| output.main_stuff().map(|stuff| stuff.content.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let name = output_name.unwrap_or(batch.owner_code).to_string();
    let mut memory = memory;
    let stored = memory.set_new_main_stuff(Stuff::new(name, batch.output_concept, StuffContent::list(results)), output_name)?;
    emit(
        ctx.tracker.as_ref(),
        TrackerEvent::AggregateStep {
            pipe_code: batch.owner_code.to_string(),
            layer: layer(&params),
            from_stuff: vec![input_list_name.clone()],
            to_stuff: stored,
        },
    );
    Ok(PipeOutput::new(memory))
}
