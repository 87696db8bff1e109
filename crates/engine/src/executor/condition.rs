use std::sync::Arc;

use tracing::{debug, info};

use super::{layer, run_pipe};
use crate::context::PipelineContext;
use crate::error::PipeRunError;
use crate::memory::WorkingMemory;
use crate::pipe::{
    CONTINUE_OUTCOME, ConditionExpression, ConditionOutcome, FAIL_OUTCOME, Pipe, PipeCondition, PipeOutput, PipeRunParams,
};
use crate::tracker::{TrackerEvent, emit};

/// Evaluates the expression and routes to the matching outcome.
///
/// In dry mode every pipe outcome is explored on its own fork, skipping pipes already on the
/// stack, and `fail` does not raise: the run only checks that each branch is wired correctly.
pub(super) async fn run_condition(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    condition: &PipeCondition,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    let (expression, evaluated) = match &condition.expression {
        ConditionExpression::Expression(expression) => (expression, ctx.templates.evaluate_expression(expression, &memory)?),
        ConditionExpression::Template(template) => (template, ctx.templates.render(template, &memory)?),
    };
    let evaluated = evaluated.trim().to_string();
    let mut memory = memory;
    if let Some(target) = &condition.alias_target {
        debug!(pipe_code = %pipe.code, alias = %evaluated, target = %target, "aliasing evaluated value");
        memory.set_alias(&evaluated, target)?;
    }
    emit(
        ctx.tracker.as_ref(),
        TrackerEvent::ConditionStep {
            pipe_code: pipe.code.clone(),
            layer: layer(&params),
            expression: expression.clone(),
            evaluated: evaluated.clone(),
        },
    );

    let outcome = condition.outcome_for(&evaluated);
    let chosen = match outcome {
        ConditionOutcome::Pipe(code) => code.clone(),
        ConditionOutcome::Continue => CONTINUE_OUTCOME.to_string(),
        ConditionOutcome::Fail => FAIL_OUTCOME.to_string(),
    };
    info!(pipe_code = %pipe.code, evaluated = %evaluated, chosen = %chosen, "condition routed");
    emit(
        ctx.tracker.as_ref(),
        TrackerEvent::ChoiceStep {
            pipe_code: pipe.code.clone(),
            layer: layer(&params),
            evaluated: evaluated.clone(),
            chosen,
        },
    );

    if params.is_dry() {
        return explore_outcomes(ctx, pipe, condition, outcome, memory, params, output_name).await;
    }

    match outcome {
        ConditionOutcome::Continue => Ok(PipeOutput::new(memory)),
        ConditionOutcome::Fail => Err(PipeRunError::ConditionFailed {
            pipe_code: pipe.code.clone(),
            evaluated,
        }),
        ConditionOutcome::Pipe(code) => run_pipe(ctx.clone(), code.clone(), memory, params.nested(), output_name.map(str::to_string)).await,
    }
}

async fn explore_outcomes(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    condition: &PipeCondition,
    chosen: &ConditionOutcome,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    let mut chosen_output = None;
    let mut first_output = None;
    for code in condition.outcome_pipe_codes() {
        if params.pipe_stack.iter().any(|running| running == code) {
            debug!(pipe_code = %pipe.code, outcome = code, "outcome already running, not explored");
            continue;
        }
        let output = run_pipe(
            ctx.clone(),
            code.to_string(),
            memory.make_deep_copy(),
            params.nested(),
            output_name.map(str::to_string),
        )
        .await?;
        if chosen.pipe_code() == Some(code) {
            chosen_output = Some(output);
        } else if first_output.is_none() {
            first_output = Some(output);
        }
    }
    Ok(chosen_output.or(first_output).unwrap_or_else(|| PipeOutput::new(memory)))
}
