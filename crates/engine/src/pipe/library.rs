use std::sync::Arc;

use indexmap::IndexMap;

use super::Pipe;
use crate::error::{DefinitionError, MissingPipesError};

/// Registered pipes keyed by code. Pipe codes are global across domains.
#[derive(Debug, Clone, Default)]
pub struct PipeLibrary {
    pipes: IndexMap<String, Arc<Pipe>>,
}

impl PipeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pipe: Pipe) -> Result<Arc<Pipe>, DefinitionError> {
        if self.pipes.contains_key(&pipe.code) {
            return Err(DefinitionError::DuplicatePipe { pipe_code: pipe.code });
        }
        let pipe = Arc::new(pipe);
        self.pipes.insert(pipe.code.clone(), pipe.clone());
        Ok(pipe)
    }

    pub fn get(&self, pipe_code: &str) -> Option<Arc<Pipe>> {
        self.pipes.get(pipe_code).cloned()
    }

    pub fn contains(&self, pipe_code: &str) -> bool {
        self.pipes.contains_key(pipe_code)
    }

    /// Looks up `pipe_code` on behalf of `requested_by`.
    pub fn get_required(&self, pipe_code: &str, requested_by: &str) -> Result<Arc<Pipe>, MissingPipesError> {
        self.get(pipe_code).ok_or_else(|| MissingPipesError {
            pipe_code: requested_by.to_string(),
            missing_pipe_codes: vec![pipe_code.to_string()],
        })
    }

    pub fn pipes(&self) -> impl Iterator<Item = &Arc<Pipe>> {
        self.pipes.values()
    }

    pub fn codes(&self) -> Vec<String> {
        self.pipes.keys().cloned().collect()
    }

    /// Every sub-pipe referenced by `pipe` must be registered.
    pub fn check_sub_pipes(&self, pipe: &Pipe) -> Result<(), MissingPipesError> {
        let missing: Vec<String> = pipe
            .sub_pipe_codes()
            .into_iter()
            .filter(|code| !self.pipes.contains_key(code))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingPipesError {
                pipe_code: pipe.code.clone(),
                missing_pipe_codes: missing,
            })
        }
    }

    pub fn remove_domain(&mut self, domain: &str) -> usize {
        let before = self.pipes.len();
        self.pipes.retain(|_, pipe| pipe.domain != domain);
        before - self.pipes.len()
    }
}
