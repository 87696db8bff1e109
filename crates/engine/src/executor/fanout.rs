use std::future::Future;

use tokio::task::JoinSet;
use tracing::debug;

use crate::error::PipeRunError;
use crate::pipe::PipeOutput;

/// Runs `branches` concurrently and returns their outputs in the order they were given.
///
/// The first failure aborts every branch still running and is returned as is.
pub(super) async fn join_ordered<F>(pipe_code: &str, branches: Vec<F>) -> Result<Vec<PipeOutput>, PipeRunError>
where
    F: Future<Output = Result<PipeOutput, PipeRunError>> + Send + 'static,
{
    let branch_count = branches.len();
    let mut tasks = JoinSet::new();
    for (index, branch) in branches.into_iter().enumerate() {
        tasks.spawn(async move { (index, branch.await) });
    }

    let mut slots: Vec<Option<PipeOutput>> = (0..branch_count).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(output))) => slots[index] = Some(output),
            Ok((index, Err(error))) => {
                debug!(pipe_code, branch_index = index, "branch failed, aborting siblings");
                tasks.abort_all();
                return Err(error);
            }
            Err(join_error) => {
                tasks.abort_all();
                return Err(PipeRunError::BranchAborted {
                    pipe_code: pipe_code.to_string(),
                    message: join_error.to_string(),
                });
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| PipeRunError::BranchAborted {
                pipe_code: pipe_code.to_string(),
                message: format!("branch {index} produced no output"),
            })
        })
        .collect()
}
