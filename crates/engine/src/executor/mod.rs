//! Execution engine: dispatches pipes to their controller or operator, guards the pipe stack,
//! and exposes the run and dry-run entry points.
//!
//! - `sequence`, `parallel`, `condition` and `batch` implement the controllers
//! - `operators` implements the leaf pipes on top of the injected content generator
//! - `fanout` joins concurrent branches, preserving declaration order
//!
//! Every controller goes through [`run_pipe`] for its sub-pipes, so live and dry runs share the
//! same presence and compatibility checks. Dry runs differ only in the generator they get from
//! [`PipelineContext::generator_for`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::context::PipelineContext;
use crate::dry_run::{DryRunFailure, DryRunReport, placeholder_memory};
use crate::error::{MissingInputsError, MissingPipesError, PipeRunError};
use crate::memory::WorkingMemory;
use crate::pipe::{Multiplicity, Pipe, PipeKind, PipeOutput, PipeRunParams};
use crate::resolver::needed_inputs;

mod batch;
mod condition;
mod fanout;
mod operators;
mod parallel;
mod sequence;

/// Runs the pipe `pipe_code` against `memory`.
///
/// The pipe is pushed onto the stack first, so recursion deeper than the configured limit fails
/// with [`PipeRunError::StackOverflow`]. Errors get the pipe code and stack of the innermost
/// failing pipe attached once.
pub fn run_pipe(
    ctx: Arc<PipelineContext>,
    pipe_code: String,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<String>,
) -> BoxFuture<'static, Result<PipeOutput, PipeRunError>> {
    async move {
        let pipe = ctx
            .libraries
            .pipes()
            .get(&pipe_code)
            .ok_or_else(|| {
                PipeRunError::from(MissingPipesError {
                    pipe_code: params.pipe_stack.last().cloned().unwrap_or_else(|| pipe_code.clone()),
                    missing_pipe_codes: vec![pipe_code.clone()],
                })
            })
            .map_err(|error| error.with_context(&pipe_code, &params.pipe_stack))?;
        let params = params
            .push_pipe(&pipe.code, ctx.config.max_stack_depth)
            .map_err(|error| error.with_context(&pipe_code, &params.pipe_stack))?;
        let pipe_stack = params.pipe_stack.clone();

        dispatch(&ctx, &pipe, memory, params, output_name.as_deref())
            .await
            .map_err(|error| error.with_context(&pipe.code, &pipe_stack))
    }
    .boxed()
}

async fn dispatch(
    ctx: &Arc<PipelineContext>,
    pipe: &Pipe,
    memory: WorkingMemory,
    params: PipeRunParams,
    output_name: Option<&str>,
) -> Result<PipeOutput, PipeRunError> {
    check_inputs(ctx, pipe, &memory)?;
    debug!(
        pipe_code = %pipe.code,
        pipe_type = pipe.type_name(),
        depth = params.pipe_stack.len(),
        dry = params.is_dry(),
        "running pipe"
    );

    match &pipe.kind {
        PipeKind::Sequence(sequence) => sequence::run_sequence(ctx, pipe, sequence, memory, params, output_name).await,
        PipeKind::Parallel(parallel) => parallel::run_parallel(ctx, pipe, parallel, memory, params, output_name).await,
        PipeKind::Condition(condition) => condition::run_condition(ctx, pipe, condition, memory, params, output_name).await,
        PipeKind::Batch(batch) => {
            let run = batch::BatchRun {
                owner_code: &pipe.code,
                branch_code: &batch.branch_pipe_code,
                batch_params: &batch.batch_params,
                output_concept: pipe.output.clone(),
            };
            batch::run_batch(ctx, run, memory, params, output_name).await
        }
        PipeKind::Operator(operator) => operators::run_operator(ctx, pipe, operator, memory, params, output_name).await,
    }
}

/// Every declared input must be present, of a compatible concept, with the declared multiplicity.
fn check_inputs(ctx: &PipelineContext, pipe: &Pipe, memory: &WorkingMemory) -> Result<(), PipeRunError> {
    let missing: Vec<String> = pipe
        .inputs
        .iter()
        .filter(|requirement| memory.get_optional_stuff(&requirement.variable_name).is_none())
        .map(|requirement| requirement.variable_name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(MissingInputsError {
            pipe_code: pipe.code.clone(),
            missing_variables: missing,
        }
        .into());
    }

    let concepts = ctx.libraries.concepts();
    for requirement in pipe.inputs.iter() {
        let stuff = memory.get_stuff(&requirement.variable_name)?;
        if !concepts.is_compatible(&stuff.concept, &requirement.concept, false) {
            return Err(PipeRunError::InputConceptMismatch {
                pipe_code: pipe.code.clone(),
                variable: requirement.variable_name.clone(),
                expected: requirement.concept.concept_string(),
                actual: stuff.concept.concept_string(),
            });
        }
        if requirement.concept.is_wildcard() {
            continue;
        }
        let multiplicity_matches = match requirement.multiplicity {
            Multiplicity::Single => !stuff.is_list(),
            Multiplicity::List => stuff.is_list(),
            Multiplicity::Fixed(count) => stuff.list_len() == Some(count),
        };
        if !multiplicity_matches {
            return Err(PipeRunError::InputMultiplicityMismatch {
                pipe_code: pipe.code.clone(),
                variable: requirement.variable_name.clone(),
                expected: requirement.multiplicity.to_string(),
                actual: match stuff.list_len() {
                    Some(length) => format!("list of {length}"),
                    None => "single".to_string(),
                },
            });
        }
    }
    Ok(())
}

/// Runs `pipe_code` for real against `memory`.
pub async fn execute_pipeline(ctx: Arc<PipelineContext>, pipe_code: &str, memory: WorkingMemory) -> Result<PipeOutput, PipeRunError> {
    run_root(ctx, pipe_code, memory, PipeRunParams::live()).await
}

/// Runs `pipe_code` with caller-supplied parameters, such as the concept a `Dynamic` output
/// should take.
pub async fn execute_pipeline_with(
    ctx: Arc<PipelineContext>,
    pipe_code: &str,
    memory: WorkingMemory,
    params: PipeRunParams,
) -> Result<PipeOutput, PipeRunError> {
    run_root(ctx, pipe_code, memory, params).await
}

/// Dry-runs `pipe_code` against placeholder inputs. No real backend is called.
pub async fn dry_run_pipe(ctx: Arc<PipelineContext>, pipe_code: &str) -> Result<PipeOutput, PipeRunError> {
    let pipe = ctx.libraries.pipes().get_required(pipe_code, pipe_code)?;
    let mut requirements = pipe.inputs.clone();
    requirements.merge(needed_inputs(&ctx.libraries, ctx.templates.as_ref(), &pipe)?);
    let memory = placeholder_memory(&ctx.libraries, &requirements, ctx.config.dry_run_list_size)?;
    run_root(ctx, pipe_code, memory, PipeRunParams::dry()).await
}

/// Dry-runs every registered pipe, collecting failures instead of stopping at the first one.
pub async fn dry_run_all(ctx: Arc<PipelineContext>) -> DryRunReport {
    let mut report = DryRunReport::default();
    for pipe_code in ctx.libraries.pipes().codes() {
        match dry_run_pipe(ctx.clone(), &pipe_code).await {
            Ok(_) => report.succeeded.push(pipe_code),
            Err(error) => report.failures.push(DryRunFailure { pipe_code, error }),
        }
    }
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failures.len(),
        "dry run finished"
    );
    report
}

async fn run_root(ctx: Arc<PipelineContext>, pipe_code: &str, memory: WorkingMemory, params: PipeRunParams) -> Result<PipeOutput, PipeRunError> {
    let dry = params.is_dry();
    info!(pipe_code, dry, "pipeline run started");
    let run = run_pipe(ctx.clone(), pipe_code.to_string(), memory, params, None);
    let result = match ctx.config.run_timeout_secs {
        Some(timeout_secs) => tokio::time::timeout(Duration::from_secs(timeout_secs), run)
            .await
            .unwrap_or_else(|_| {
                Err(PipeRunError::Timeout {
                    pipe_code: pipe_code.to_string(),
                    timeout_secs,
                })
            }),
        None => run.await,
    };
    match &result {
        Ok(_) => info!(pipe_code, dry, "pipeline run finished"),
        Err(error) => warn!(pipe_code, dry, category = ?error.category(), error = %error, "pipeline run failed"),
    }
    result
}

/// Layer of the pipe currently on top of the stack, for tracker events.
fn layer(params: &PipeRunParams) -> usize {
    params.pipe_stack.len()
}
