//! # Pipewright Engine
//!
//! The Pipewright Engine composes declared units of computation ("pipes") into sequences,
//! parallel fan-outs, conditional branches and per-item batches. It resolves what each pipe needs,
//! checks that produced values fit the inputs they feed, and routes typed values between pipes
//! through a run-scoped working memory.
//!
//! ## Key Features
//!
//! - **Concepts**: named structural types with refinement and a fixed compatibility order
//! - **Structure Synthesis**: field schemas compiled into validated record structures at load time
//! - **Working Memory**: named values with aliases, dotted-path broadcast and deep-copy forks
//! - **Input Resolution**: recursive, cycle-safe computation of the inputs a pipe graph needs
//! - **Controllers**: sequence, parallel, condition and batch, each with a dry-run path
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use pipewright_engine::{DollarBraceTemplates, Libraries, PipelineContext, dry_run_pipe};
//! use pipewright_types::{BundleBlueprint, ValidationReactionConfig};
//!
//! let bundle: BundleBlueprint = serde_yaml::from_str(r#"
//! domain: greetings
//! pipe:
//!   greet:
//!     type: PipeCompose
//!     description: Greet someone
//!     inputs:
//!       name: Text
//!     output: Text
//!     template: "Hello ${{ name }}"
//! "#)?;
//!
//! let mut libraries = Libraries::new();
//! libraries.load_bundle(&bundle, &DollarBraceTemplates, &ValidationReactionConfig::default())?;
//! let ctx = Arc::new(PipelineContext::new(libraries));
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let output = runtime.block_on(dry_run_pipe(ctx, "greet"))?;
//! assert!(output.main_stuff()?.content.render_text().starts_with("Hello"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`concept`** / **`structure`**: the type system and the structure synthesizer
//! - **`memory`**, **`stuff`**, **`content`**: values and the store they live in
//! - **`pipe`**: pipe definitions, their factory and library
//! - **`resolver`**: needed inputs, required variables and static validation
//! - **`executor`**: controllers, operators and the run / dry-run entry points
//! - **`backend`**, **`tracker`**, **`templates`**: capabilities injected through [`PipelineContext`]

pub mod backend;
pub mod concept;
pub mod config;
pub mod content;
pub mod context;
pub mod dry_run;
pub mod error;
pub mod executor;
pub mod field_paths;
pub mod functions;
pub mod libraries;
pub mod memory;
pub mod pipe;
pub mod resolve;
pub mod resolver;
pub mod structure;
pub mod stuff;
pub mod templates;
pub mod tracker;

// Re-export commonly used types for convenience
pub use backend::{ContentGenerator, DocumentSource, ObjectSchema, UnavailableGenerator};
pub use concept::{Concept, ConceptLibrary, NativeConceptCode};
pub use config::{ConfigError, EngineConfig, load_config, load_config_from_path};
pub use content::{ImageContent, LlmPromptContent, PageContent, StuffContent, TextAndImagesContent};
pub use context::PipelineContext;
pub use dry_run::{DryRunContentGenerator, DryRunFailure, DryRunReport};
pub use error::{
    BackendError, BundleLoadError, DefinitionError, FunctionError, MissingInputsError, MissingPipesError, PipeRunError,
    RunFailureCategory, StaticValidationError, StructureError, TemplatingError, WorkingMemoryError,
};
pub use executor::{dry_run_all, dry_run_pipe, execute_pipeline, execute_pipeline_with, run_pipe};
pub use functions::FunctionRegistry;
pub use libraries::{Domain, Libraries};
pub use memory::{MAIN_STUFF_NAME, WorkingMemory};
pub use pipe::{InputRequirement, InputRequirements, Multiplicity, Pipe, PipeLibrary, PipeOutput, PipeRunParams, RunMode};
pub use resolver::{needed_inputs, required_variables, validate_pipe};
pub use stuff::Stuff;
pub use templates::{DollarBraceTemplates, TemplateEngine};
pub use tracker::{NoopTracker, PipelineTracker, RecordingTracker, TrackerError, TrackerEvent};
