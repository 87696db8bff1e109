//! Explicit run context handed to every controller and operator.

use std::sync::Arc;

use crate::backend::{ContentGenerator, UnavailableGenerator};
use crate::config::EngineConfig;
use crate::dry_run::DryRunContentGenerator;
use crate::functions::FunctionRegistry;
use crate::libraries::Libraries;
use crate::pipe::RunMode;
use crate::templates::{DollarBraceTemplates, TemplateEngine};
use crate::tracker::{NoopTracker, PipelineTracker};

/// Collaborators of a pipeline run. Built once, shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub libraries: Arc<Libraries>,
    pub backend: Arc<dyn ContentGenerator>,
    pub templates: Arc<dyn TemplateEngine>,
    pub tracker: Arc<dyn PipelineTracker>,
    pub functions: Arc<FunctionRegistry>,
    pub config: EngineConfig,
}

impl PipelineContext {
    pub fn new(libraries: Libraries) -> Self {
        Self {
            libraries: Arc::new(libraries),
            backend: Arc::new(UnavailableGenerator),
            templates: Arc::new(DollarBraceTemplates),
            tracker: Arc::new(NoopTracker),
            functions: Arc::new(FunctionRegistry::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ContentGenerator>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateEngine>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn PipelineTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend answering calls in `mode`: the injected one for live runs, placeholders for dry runs.
    pub fn generator_for(&self, mode: RunMode) -> Arc<dyn ContentGenerator> {
        match mode {
            RunMode::Live => self.backend.clone(),
            RunMode::Dry => Arc::new(DryRunContentGenerator::new(self.libraries.clone(), self.config.dry_run_list_size)),
        }
    }

    /// System prompt of `domain`, if its bundle declared one.
    pub fn domain_system_prompt(&self, domain: &str) -> Option<&str> {
        self.libraries.domain(domain).and_then(|domain| domain.system_prompt.as_deref())
    }
}
