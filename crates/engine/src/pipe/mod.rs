//! Pipe model: declared signatures and the sealed set of pipe variants.

pub mod factory;
pub mod library;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::concept::Concept;
use crate::error::{DefinitionError, PipeRunError, WorkingMemoryError};
use crate::memory::{MAIN_STUFF_NAME, WorkingMemory};
use crate::stuff::Stuff;
use crate::structure::StructureRegistry;

pub use library::PipeLibrary;

/// Outcome sentinel: leave memory unchanged and stop.
pub const CONTINUE_OUTCOME: &str = "continue";
/// Outcome sentinel: abort the run with a condition failure.
pub const FAIL_OUTCOME: &str = "fail";

/// How many values a variable holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Multiplicity {
    #[default]
    Single,
    List,
    Fixed(usize),
}

impl Multiplicity {
    pub fn is_multiple(&self) -> bool {
        !matches!(self, Multiplicity::Single)
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Multiplicity::Single => f.write_str("a single value"),
            Multiplicity::List => f.write_str("a list"),
            Multiplicity::Fixed(size) => write!(f, "a list of {size}"),
        }
    }
}

/// Splits `Code[]` / `Code[3]` / `Code` into the concept reference and its multiplicity.
pub fn parse_concept_reference(reference: &str) -> Option<(String, Multiplicity)> {
    let trimmed = reference.trim();
    let Some(open) = trimmed.find('[') else {
        return (!trimmed.is_empty()).then(|| (trimmed.to_string(), Multiplicity::Single));
    };
    let code = trimmed[..open].trim();
    let size = trimmed[open + 1..].strip_suffix(']')?.trim();
    if code.is_empty() {
        return None;
    }
    let multiplicity = if size.is_empty() {
        Multiplicity::List
    } else {
        Multiplicity::Fixed(size.parse::<usize>().ok().filter(|size| *size > 0)?)
    };
    Some((code.to_string(), multiplicity))
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputRequirement {
    pub variable_name: String,
    pub concept: Arc<Concept>,
    pub multiplicity: Multiplicity,
}

/// Ordered mapping of variable name to requirement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputRequirements {
    items: IndexMap<String, InputRequirement>,
}

impl InputRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a requirement unless the variable is already present.
    pub fn add(&mut self, requirement: InputRequirement) {
        self.items.entry(requirement.variable_name.clone()).or_insert(requirement);
    }

    /// Adds every requirement of `other` not already present.
    pub fn merge(&mut self, other: InputRequirements) {
        for requirement in other.items.into_values() {
            self.add(requirement);
        }
    }

    pub fn remove(&mut self, variable_name: &str) -> Option<InputRequirement> {
        self.items.shift_remove(variable_name)
    }

    pub fn get(&self, variable_name: &str) -> Option<&InputRequirement> {
        self.items.get(variable_name)
    }

    pub fn contains(&self, variable_name: &str) -> bool {
        self.items.contains_key(variable_name)
    }

    pub fn names(&self) -> Vec<String> {
        self.items.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputRequirement> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<InputRequirement> for InputRequirements {
    fn from_iter<T: IntoIterator<Item = InputRequirement>>(iter: T) -> Self {
        let mut requirements = InputRequirements::new();
        for requirement in iter {
            requirements.add(requirement);
        }
        requirements
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchParams {
    pub input_list_name: String,
    pub input_item_name: String,
}

/// Invocation of a pipe from a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubPipe {
    pub pipe_code: String,
    pub output_name: Option<String>,
    pub output_multiplicity: Option<Multiplicity>,
    pub batch_params: Option<BatchParams>,
}

impl SubPipe {
    pub fn new(pipe_code: impl Into<String>) -> Self {
        Self {
            pipe_code: pipe_code.into(),
            output_name: None,
            output_multiplicity: None,
            batch_params: None,
        }
    }

    pub fn with_output_name(mut self, output_name: impl Into<String>) -> Self {
        self.output_name = Some(output_name.into());
        self
    }

    pub fn with_batch(mut self, input_list_name: impl Into<String>, input_item_name: impl Into<String>) -> Self {
        self.batch_params = Some(BatchParams {
            input_list_name: input_list_name.into(),
            input_item_name: input_item_name.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeCategory {
    Operator,
    Controller,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipe {
    pub code: String,
    pub domain: String,
    pub description: String,
    pub inputs: InputRequirements,
    pub output: Arc<Concept>,
    pub output_multiplicity: Multiplicity,
    pub kind: PipeKind,
}

impl Pipe {
    pub fn category(&self) -> PipeCategory {
        match self.kind {
            PipeKind::Operator(_) => PipeCategory::Operator,
            _ => PipeCategory::Controller,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            PipeKind::Sequence(_) => "PipeSequence",
            PipeKind::Parallel(_) => "PipeParallel",
            PipeKind::Condition(_) => "PipeCondition",
            PipeKind::Batch(_) => "PipeBatch",
            PipeKind::Operator(PipeOperator::Llm(_)) => "PipeLLM",
            PipeKind::Operator(PipeOperator::ImgGen(_)) => "PipeImgGen",
            PipeKind::Operator(PipeOperator::Extract(_)) => "PipeExtract",
            PipeKind::Operator(PipeOperator::Func(_)) => "PipeFunc",
            PipeKind::Operator(PipeOperator::Compose(_)) => "PipeCompose",
        }
    }

    /// Codes of the pipes this pipe may invoke directly.
    pub fn sub_pipe_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        let mut push = |code: &str| {
            if !codes.iter().any(|existing| existing == code) {
                codes.push(code.to_string());
            }
        };
        match &self.kind {
            PipeKind::Sequence(sequence) => sequence.steps.iter().for_each(|step| push(&step.pipe_code)),
            PipeKind::Parallel(parallel) => parallel.parallels.iter().for_each(|branch| push(&branch.pipe_code)),
            PipeKind::Condition(condition) => condition.outcome_pipe_codes().into_iter().for_each(|code| push(code)),
            PipeKind::Batch(batch) => push(&batch.branch_pipe_code),
            PipeKind::Operator(_) => {}
        }
        codes
    }
}

/// Sealed set of pipe variants.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeKind {
    Sequence(PipeSequence),
    Parallel(PipeParallel),
    Condition(PipeCondition),
    Batch(PipeBatch),
    Operator(PipeOperator),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeSequence {
    pub steps: Vec<SubPipe>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeParallel {
    pub parallels: Vec<SubPipe>,
    pub add_each_output: bool,
    pub combined_output: Option<Arc<Concept>>,
}

impl PipeParallel {
    /// Validates the branch wiring before any run can happen.
    pub fn new(
        pipe_code: &str,
        parallels: Vec<SubPipe>,
        add_each_output: bool,
        combined_output: Option<Arc<Concept>>,
        structures: &StructureRegistry,
    ) -> Result<Self, DefinitionError> {
        let invalid = |reason: String| DefinitionError::InvalidPipe {
            pipe_code: pipe_code.to_string(),
            reason,
        };
        if !add_each_output && combined_output.is_none() {
            return Err(invalid("either add_each_output or combined_output must be set".to_string()));
        }
        if parallels.is_empty() {
            return Err(invalid("a parallel pipe needs at least one branch".to_string()));
        }

        let mut output_names: Vec<&str> = Vec::new();
        for branch in &parallels {
            let Some(output_name) = branch.output_name.as_deref() else {
                return Err(invalid(format!("branch '{}' has no result name", branch.pipe_code)));
            };
            if output_names.contains(&output_name) {
                return Err(invalid(format!("result name '{output_name}' is used by more than one branch")));
            }
            output_names.push(output_name);
        }

        if let Some(combined) = &combined_output {
            let fields = structures.all_fields(&combined.structure_name);
            if let Some(missing) = output_names.iter().find(|name| !fields.contains_key(**name)) {
                return Err(invalid(format!(
                    "combined output '{}' has no field for branch result '{missing}'",
                    combined.concept_string()
                )));
            }
        }

        Ok(Self {
            parallels,
            add_each_output,
            combined_output,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Pipe(String),
    Continue,
    Fail,
}

impl ConditionOutcome {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            CONTINUE_OUTCOME => ConditionOutcome::Continue,
            FAIL_OUTCOME => ConditionOutcome::Fail,
            code => ConditionOutcome::Pipe(code.to_string()),
        }
    }

    pub fn pipe_code(&self) -> Option<&str> {
        match self {
            ConditionOutcome::Pipe(code) => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionExpression {
    /// Bare expression, evaluated as if wrapped in `${{ }}`.
    Expression(String),
    /// Template rendered to the outcome key.
    Template(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeCondition {
    pub expression: ConditionExpression,
    pub outcomes: IndexMap<String, ConditionOutcome>,
    pub default_outcome: ConditionOutcome,
    /// When set, the evaluated value is registered as an alias of this variable.
    pub alias_target: Option<String>,
}

impl PipeCondition {
    /// Distinct pipe codes reachable from the outcome map and the default, in declaration order.
    pub fn outcome_pipe_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = Vec::new();
        for outcome in self.outcomes.values().chain(std::iter::once(&self.default_outcome)) {
            if let Some(code) = outcome.pipe_code()
                && !codes.contains(&code)
            {
                codes.push(code);
            }
        }
        codes
    }

    /// Outcome for an evaluated value, falling back to the default.
    pub fn outcome_for(&self, evaluated: &str) -> &ConditionOutcome {
        self.outcomes.get(evaluated).unwrap_or(&self.default_outcome)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipeBatch {
    pub branch_pipe_code: String,
    pub batch_params: BatchParams,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipeOperator {
    Llm(LlmOperator),
    ImgGen(ImgGenOperator),
    Extract(ExtractOperator),
    Func(FuncOperator),
    Compose(ComposeOperator),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmOperator {
    pub prompt_template: String,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImgGenOperator {
    pub prompt_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOperator {
    pub page_views: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncOperator {
    pub function_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposeOperator {
    pub template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Live,
    Dry,
}

/// Per-invocation run parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipeRunParams {
    pub mode: RunMode,
    /// Codes of the pipes currently being run, outermost first.
    pub pipe_stack: Vec<String>,
    pub output_multiplicity: Option<Multiplicity>,
    /// Concept reference substituted for a `Dynamic` output.
    pub dynamic_output_concept: Option<String>,
}

impl PipeRunParams {
    pub fn live() -> Self {
        Self::default()
    }

    pub fn dry() -> Self {
        Self {
            mode: RunMode::Dry,
            ..Self::default()
        }
    }

    pub fn is_dry(&self) -> bool {
        self.mode == RunMode::Dry
    }

    /// Enters `pipe_code`, refusing to go deeper than `limit` levels.
    pub fn push_pipe(&self, pipe_code: &str, limit: usize) -> Result<Self, PipeRunError> {
        if self.pipe_stack.len() >= limit {
            return Err(PipeRunError::StackOverflow {
                pipe_code: pipe_code.to_string(),
                limit,
            });
        }
        let mut pipe_stack = self.pipe_stack.clone();
        pipe_stack.push(pipe_code.to_string());
        Ok(Self {
            pipe_stack,
            ..self.clone()
        })
    }

    /// Parameters for a sub-pipe: same mode and stack, with the sub-pipe's own overrides.
    pub fn for_sub_pipe(&self, sub_pipe: &SubPipe) -> Self {
        Self {
            mode: self.mode,
            pipe_stack: self.pipe_stack.clone(),
            output_multiplicity: sub_pipe.output_multiplicity,
            dynamic_output_concept: None,
        }
    }

    /// Parameters for a plain nested call with no overrides.
    pub fn nested(&self) -> Self {
        Self {
            mode: self.mode,
            pipe_stack: self.pipe_stack.clone(),
            output_multiplicity: None,
            dynamic_output_concept: None,
        }
    }
}

/// Result of running a pipe: the updated memory, whose `main` alias points at the result.
#[derive(Debug, Clone, PartialEq)]
pub struct PipeOutput {
    pub working_memory: WorkingMemory,
}

impl PipeOutput {
    pub fn new(working_memory: WorkingMemory) -> Self {
        Self { working_memory }
    }

    pub fn main_stuff(&self) -> Result<&Stuff, WorkingMemoryError> {
        self.working_memory.main_stuff()
    }

    pub fn main_stuff_name(&self) -> Option<&str> {
        self.working_memory.aliases().get(MAIN_STUFF_NAME).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{ConceptLibrary, NativeConceptCode};

    #[test]
    fn parse_concept_reference_reads_multiplicity() {
        assert_eq!(parse_concept_reference("Text"), Some(("Text".to_string(), Multiplicity::Single)));
        assert_eq!(parse_concept_reference("qa.Question[]"), Some(("qa.Question".to_string(), Multiplicity::List)));
        assert_eq!(parse_concept_reference("Image[3]"), Some(("Image".to_string(), Multiplicity::Fixed(3))));
        assert_eq!(parse_concept_reference("Image[0]"), None);
        assert_eq!(parse_concept_reference("Image[x]"), None);
        assert_eq!(parse_concept_reference("[]"), None);
    }

    #[test]
    fn parallel_requires_a_combination_mode() {
        let structures = StructureRegistry::new();
        let branches = vec![SubPipe::new("a").with_output_name("a_out")];
        let error = PipeParallel::new("fan", branches.clone(), false, None, &structures).unwrap_err();
        assert!(matches!(error, DefinitionError::InvalidPipe { .. }));
        assert!(PipeParallel::new("fan", branches, true, None, &structures).is_ok());
    }

    #[test]
    fn parallel_rejects_duplicate_result_names() {
        let structures = StructureRegistry::new();
        let branches = vec![
            SubPipe::new("a").with_output_name("out"),
            SubPipe::new("b").with_output_name("out"),
        ];
        assert!(PipeParallel::new("fan", branches, true, None, &structures).is_err());
    }

    #[test]
    fn combined_output_needs_a_field_per_branch() {
        let library = ConceptLibrary::new();
        let branches = vec![SubPipe::new("a").with_output_name("caption")];
        let image = library.native(NativeConceptCode::Image);
        assert!(PipeParallel::new("fan", branches.clone(), false, Some(image), library.structures()).is_ok());
        let text = library.native(NativeConceptCode::Text);
        assert!(PipeParallel::new("fan", branches, false, Some(text), library.structures()).is_err());
    }

    #[test]
    fn push_pipe_guards_stack_depth() {
        let params = PipeRunParams::live().push_pipe("a", 2).expect("a");
        let params = params.push_pipe("b", 2).expect("b");
        assert_eq!(params.pipe_stack, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(params.push_pipe("c", 2), Err(PipeRunError::StackOverflow { .. })));
    }
}
