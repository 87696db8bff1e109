//! Error families surfaced by the engine.
//!
//! - Definition errors abort a bundle load.
//! - Static validation findings follow the configured reaction policy.
//! - Run errors abort the pipeline and carry the pipe stack of the failure.
//! - Structure errors come out of the structure synthesizer and may carry a source location.

use std::fmt;

use pipewright_types::ValidationErrorType;
use thiserror::Error;

/// Line/column range inside a structure definition source (1-based, end inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == self.end_line {
            write!(f, "line {}, columns {}-{}", self.line, self.column, self.end_column)
        } else {
            write!(f, "line {} column {} to line {} column {}", self.line, self.column, self.end_line, self.end_column)
        }
    }
}

/// Failure to turn a field schema (or structure source) into a structure definition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StructureError {
    #[error("syntax error in structure '{structure_name}' at {location}: {message}")]
    Syntax {
        structure_name: String,
        message: String,
        location: SourceLocation,
        source_text: String,
    },

    #[error("invalid structure definition '{structure_name}': {message}")]
    Definition {
        structure_name: String,
        message: String,
        source_text: String,
    },
}

impl StructureError {
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            StructureError::Syntax { location, .. } => Some(*location),
            StructureError::Definition { .. } => None,
        }
    }

    pub fn source_text(&self) -> &str {
        match self {
            StructureError::Syntax { source_text, .. } | StructureError::Definition { source_text, .. } => source_text,
        }
    }
}

/// A structured record does not satisfy its structure definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("record does not match structure '{structure}' at field '{field}': {message}")]
pub struct RecordValidationError {
    pub structure: String,
    pub field: String,
    pub message: String,
}

/// Template parsing or evaluation failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplatingError {
    #[error("template syntax error in '{source_text}': {detail}")]
    Syntax { source_text: String, detail: String },

    #[error("template '{source_text}' references undefined variable '{variable}': {detail}")]
    Undefined {
        source_text: String,
        variable: String,
        detail: String,
    },
}

impl TemplatingError {
    pub fn syntax(source_text: &str, detail: impl Into<String>) -> Self {
        TemplatingError::Syntax {
            source_text: source_text.to_string(),
            detail: detail.into(),
        }
    }
}

/// Inputs absent from working memory when a pipe is about to run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pipe '{pipe_code}' is missing required inputs: {}", .missing_variables.join(", "))]
pub struct MissingInputsError {
    pub pipe_code: String,
    pub missing_variables: Vec<String>,
}

/// Pipe codes referenced by a controller that are not registered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pipe '{pipe_code}' references unknown pipes: {}", .missing_pipe_codes.join(", "))]
pub struct MissingPipesError {
    pub pipe_code: String,
    pub missing_pipe_codes: Vec<String>,
}

/// Working memory access failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkingMemoryError {
    #[error("variable '{name}' not found in working memory (available: {})", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("stuff code '{code}' is already stored under '{existing_name}', refusing to add it as '{name}'")]
    DuplicateStuffCode { code: String, name: String, existing_name: String },

    #[error("alias '{alias}' cannot target itself")]
    SelfAlias { alias: String },

    #[error("alias '{alias}' targets '{target}' which is not in working memory")]
    AliasTargetMissing { alias: String, target: String },

    #[error("variable '{variable}' has content '{actual}', expected '{expected}'")]
    TypeMismatch {
        variable: String,
        expected: String,
        actual: String,
    },

    #[error("attribute path '{path}' cannot be resolved on variable '{variable}'")]
    AttributeNotFound { variable: String, path: String },

    #[error("working memory has no main stuff")]
    MainStuffMissing,

    #[error("invalid input document entry '{name}': {message}")]
    InvalidInput { name: String, message: String },
}

/// Failure of the sub-pipe lookup or template analysis the resolver depends on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    MissingPipes(#[from] MissingPipesError),

    #[error(transparent)]
    Templating(#[from] TemplatingError),

    #[error("pipe '{pipe_code}' batches '{branch_pipe_code}' over item '{item_name}', which '{branch_pipe_code}' does not declare as an input")]
    BatchItemNotDeclared {
        pipe_code: String,
        branch_pipe_code: String,
        item_name: String,
    },
}

/// Malformed concept or pipe declarations, caught while a bundle is loaded.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionError {
    #[error("invalid {kind} code '{code}': {reason}")]
    InvalidCode { kind: &'static str, code: String, reason: String },

    #[error("domain '{domain}' is already loaded")]
    DuplicateDomain { domain: String },

    #[error("concept '{concept}' is already defined")]
    DuplicateConcept { concept: String },

    #[error("pipe '{pipe_code}' is already defined")]
    DuplicatePipe { pipe_code: String },

    #[error("structure '{structure}' is already defined")]
    DuplicateStructure { structure: String },

    #[error("unknown concept '{reference}' referenced by {context}")]
    UnknownConcept { reference: String, context: String },

    #[error("unknown structure '{structure}' referenced by concept '{concept}'")]
    UnknownStructure { concept: String, structure: String },

    #[error("concept '{concept}' declares both a structure and a refinement")]
    StructureAndRefinement { concept: String },

    #[error("concept '{concept}' can only refine a native concept, not '{refines}'")]
    InvalidRefinement { concept: String, refines: String },

    #[error("invalid pipe '{pipe_code}': {reason}")]
    InvalidPipe { pipe_code: String, reason: String },

    #[error(
        "condition pipe '{pipe_code}' declares output '{declared_output}' but branch '{branch_pipe_code}' produces '{branch_output}'"
    )]
    IncompatibleConditionOutput {
        pipe_code: String,
        branch_pipe_code: String,
        branch_output: String,
        declared_output: String,
    },

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    MissingPipes(#[from] MissingPipesError),

    #[error("pipe '{pipe_code}' has an invalid template: {source}")]
    Templating {
        pipe_code: String,
        #[source]
        source: TemplatingError,
    },
}

impl From<ResolveError> for DefinitionError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::MissingPipes(missing) => DefinitionError::MissingPipes(missing),
            ResolveError::Templating(source) => DefinitionError::Templating {
                pipe_code: String::new(),
                source,
            },
            ResolveError::BatchItemNotDeclared { ref pipe_code, .. } => DefinitionError::InvalidPipe {
                pipe_code: pipe_code.clone(),
                reason: error.to_string(),
            },
        }
    }
}

/// One static validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFinding {
    pub error_type: ValidationErrorType,
    pub pipe_code: String,
    pub message: String,
}

impl fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

/// Static validation findings whose configured reaction is `raise`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pipe '{pipe_code}' failed static validation: {}", format_findings(.findings))]
pub struct StaticValidationError {
    pub pipe_code: String,
    pub findings: Vec<ValidationFinding>,
}

fn format_findings(findings: &[ValidationFinding]) -> String {
    findings.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// A bundle could not be loaded. Nothing from the bundle was registered.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BundleLoadError {
    #[error("bundle '{domain}': {source}")]
    Definition {
        domain: String,
        #[source]
        source: DefinitionError,
    },

    #[error("bundle '{domain}': {source}")]
    Validation {
        domain: String,
        #[source]
        source: StaticValidationError,
    },
}

/// Failure reported by a content-generation backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("{operation} failed: {message}")]
    Generation { operation: String, message: String },
}

/// Failure reported by a registered pipe function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Broad classification of run failures, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFailureCategory {
    Input,
    Definition,
    Templating,
    Backend,
    Condition,
    StackDepth,
    Timeout,
    Internal,
}

/// Errors that abort a pipeline run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipeRunError {
    #[error(transparent)]
    MissingInputs(#[from] MissingInputsError),

    #[error(transparent)]
    MissingPipes(#[from] MissingPipesError),

    #[error(transparent)]
    Templating(#[from] TemplatingError),

    #[error(transparent)]
    WorkingMemory(#[from] WorkingMemoryError),

    #[error(transparent)]
    InvalidRecord(#[from] RecordValidationError),

    #[error("pipe '{pipe_code}' input '{variable}' expects concept '{expected}' but got '{actual}'")]
    InputConceptMismatch {
        pipe_code: String,
        variable: String,
        expected: String,
        actual: String,
    },

    #[error("pipe '{pipe_code}' input '{variable}' expects {expected} but got {actual}")]
    InputMultiplicityMismatch {
        pipe_code: String,
        variable: String,
        expected: String,
        actual: String,
    },

    #[error("pipe '{pipe_code}' must output '{expected}' but produced '{actual}'")]
    OutputConceptMismatch {
        pipe_code: String,
        expected: String,
        actual: String,
    },

    #[error("unknown concept '{reference}' requested by pipe '{pipe_code}'")]
    UnknownConcept { pipe_code: String, reference: String },

    #[error("condition pipe '{pipe_code}' failed on evaluated value '{evaluated}'")]
    ConditionFailed { pipe_code: String, evaluated: String },

    #[error("pipe stack exceeded {limit} levels while entering '{pipe_code}'")]
    StackOverflow { pipe_code: String, limit: usize },

    #[error("pipe '{pipe_code}' backend call failed: {source}")]
    Backend {
        pipe_code: String,
        #[source]
        source: BackendError,
    },

    #[error("pipe '{pipe_code}' calls unregistered function '{function_name}'")]
    FunctionNotFound { pipe_code: String, function_name: String },

    #[error("pipe '{pipe_code}' function '{function_name}' failed: {source}")]
    Function {
        pipe_code: String,
        function_name: String,
        #[source]
        source: FunctionError,
    },

    #[error("branch of pipe '{pipe_code}' was aborted: {message}")]
    BranchAborted { pipe_code: String, message: String },

    #[error("pipeline '{pipe_code}' timed out after {timeout_secs}s")]
    Timeout { pipe_code: String, timeout_secs: u64 },

    #[error("pipe '{pipe_code}' failed (stack: {}): {source}", .pipe_stack.join(" > "))]
    Failed {
        pipe_code: String,
        pipe_stack: Vec<String>,
        #[source]
        source: Box<PipeRunError>,
    },
}

impl From<ResolveError> for PipeRunError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::MissingPipes(missing) => PipeRunError::MissingPipes(missing),
            ResolveError::Templating(templating) => PipeRunError::Templating(templating),
            ResolveError::BatchItemNotDeclared {
                branch_pipe_code, item_name, ..
            } => PipeRunError::MissingInputs(MissingInputsError {
                pipe_code: branch_pipe_code,
                missing_variables: vec![item_name],
            }),
        }
    }
}

impl PipeRunError {
    /// Wraps the error with the failing pipe and its enclosing stack, once.
    ///
    /// The innermost failure keeps its context; outer controllers pass it through unchanged.
    pub fn with_context(self, pipe_code: &str, pipe_stack: &[String]) -> Self {
        match self {
            PipeRunError::Failed { .. } => self,
            other => PipeRunError::Failed {
                pipe_code: pipe_code.to_string(),
                pipe_stack: pipe_stack.to_vec(),
                source: Box::new(other),
            },
        }
    }

    /// The error without its contextual wrapper.
    pub fn root_cause(&self) -> &PipeRunError {
        match self {
            PipeRunError::Failed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Stack of pipe codes enclosing the failure, outermost first.
    pub fn pipe_stack(&self) -> &[String] {
        match self {
            PipeRunError::Failed { pipe_stack, .. } => pipe_stack,
            _ => &[],
        }
    }

    pub fn category(&self) -> RunFailureCategory {
        match self.root_cause() {
            PipeRunError::MissingInputs(_)
            | PipeRunError::WorkingMemory(_)
            | PipeRunError::InputConceptMismatch { .. }
            | PipeRunError::InputMultiplicityMismatch { .. } => RunFailureCategory::Input,
            PipeRunError::MissingPipes(_)
            | PipeRunError::UnknownConcept { .. }
            | PipeRunError::FunctionNotFound { .. }
            | PipeRunError::OutputConceptMismatch { .. } => RunFailureCategory::Definition,
            PipeRunError::Templating(_) => RunFailureCategory::Templating,
            PipeRunError::Backend { .. } | PipeRunError::Function { .. } | PipeRunError::InvalidRecord(_) => RunFailureCategory::Backend,
            PipeRunError::ConditionFailed { .. } => RunFailureCategory::Condition,
            PipeRunError::StackOverflow { .. } => RunFailureCategory::StackDepth,
            PipeRunError::Timeout { .. } => RunFailureCategory::Timeout,
            PipeRunError::BranchAborted { .. } | PipeRunError::Failed { .. } => RunFailureCategory::Internal,
        }
    }
}
