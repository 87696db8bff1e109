//! Declarative blueprint schema shared between bundle loaders and the engine.
//!
//! Blueprints are the immutable, parsed form of a pipeline bundle file. They carry no behaviour:
//! the engine's factories turn them into concepts, structures, and pipes. Authoring order is
//! preserved with `IndexMap` so diagnostics and dry runs walk definitions in the order they were
//! written.

pub mod validation;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A full bundle: one domain with its concepts and pipes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BundleBlueprint {
    /// Domain code owning every concept and pipe declared in this bundle.
    pub domain: String,
    /// Optional human-readable description of the domain.
    #[serde(default)]
    pub description: Option<String>,
    /// Optional system prompt applied to LLM operators of this domain.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Concept definitions keyed by concept code.
    #[serde(default)]
    pub concept: IndexMap<String, ConceptBlueprint>,
    /// Pipe definitions keyed by pipe code.
    #[serde(default)]
    pub pipe: IndexMap<String, PipeBlueprint>,
    /// Pipe run by default when the bundle is executed as a whole.
    #[serde(default)]
    pub main_pipe: Option<String>,
}

impl BundleBlueprint {
    /// Builds the domain-level view of this bundle.
    pub fn domain_blueprint(&self) -> DomainBlueprint {
        DomainBlueprint {
            code: self.domain.clone(),
            description: self.description.clone(),
            system_prompt: self.system_prompt.clone(),
        }
    }
}

/// Domain metadata extracted from a bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DomainBlueprint {
    pub code: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// Concept definition. A concept either owns a structure or refines a native concept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConceptBlueprint {
    /// Shorthand: only a description, the concept is plain text-shaped.
    Description(String),
    /// Full definition.
    Definition(ConceptDefinitionBlueprint),
}

impl ConceptBlueprint {
    pub fn description(&self) -> &str {
        match self {
            ConceptBlueprint::Description(description) => description,
            ConceptBlueprint::Definition(definition) => &definition.description,
        }
    }

    pub fn structure(&self) -> Option<&ConceptStructureBlueprint> {
        match self {
            ConceptBlueprint::Description(_) => None,
            ConceptBlueprint::Definition(definition) => definition.structure.as_ref(),
        }
    }

    pub fn refines(&self) -> Option<&str> {
        match self {
            ConceptBlueprint::Description(_) => None,
            ConceptBlueprint::Definition(definition) => definition.refines.as_deref(),
        }
    }
}

/// Long-form concept definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConceptDefinitionBlueprint {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub structure: Option<ConceptStructureBlueprint>,
    /// Concept reference of a native concept this concept refines (for example `Text`).
    #[serde(default)]
    pub refines: Option<String>,
}

/// Structure of a concept: a reference to an already known structure, or an inline field schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConceptStructureBlueprint {
    Named(String),
    Fields(IndexMap<String, FieldBlueprint>),
}

/// One field of an inline structure schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldBlueprint {
    /// Shorthand: the string is the description of a required text field.
    Description(String),
    Definition(FieldDefinitionBlueprint),
}

impl FieldBlueprint {
    /// Expands the shorthand form into a full definition.
    pub fn to_definition(&self) -> FieldDefinitionBlueprint {
        match self {
            FieldBlueprint::Description(description) => FieldDefinitionBlueprint {
                description: Some(description.clone()),
                ..Default::default()
            },
            FieldBlueprint::Definition(definition) => definition.clone(),
        }
    }
}

/// Full field schema entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDefinitionBlueprint {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub field_type: FieldTypeBlueprint,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<JsonValue>,
    /// Closed set of allowed text values.
    #[serde(default)]
    pub choices: Vec<String>,
    /// Element type of `list` fields.
    #[serde(default)]
    pub item_type: Option<FieldTypeBlueprint>,
    /// Key type of `dict` fields.
    #[serde(default)]
    pub key_type: Option<FieldTypeBlueprint>,
    /// Value type of `dict` fields.
    #[serde(default)]
    pub value_type: Option<FieldTypeBlueprint>,
}

impl Default for FieldDefinitionBlueprint {
    fn default() -> Self {
        Self {
            description: None,
            field_type: FieldTypeBlueprint::Text,
            required: default_required(),
            default: None,
            choices: Vec::new(),
            item_type: None,
            key_type: None,
            value_type: None,
        }
    }
}

fn default_required() -> bool {
    true
}

/// Primitive field types understood by the structure synthesizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldTypeBlueprint {
    #[default]
    Text,
    Integer,
    Boolean,
    Number,
    Date,
    List,
    Dict,
}

impl FieldTypeBlueprint {
    pub fn keyword(&self) -> &'static str {
        match self {
            FieldTypeBlueprint::Text => "text",
            FieldTypeBlueprint::Integer => "integer",
            FieldTypeBlueprint::Boolean => "boolean",
            FieldTypeBlueprint::Number => "number",
            FieldTypeBlueprint::Date => "date",
            FieldTypeBlueprint::List => "list",
            FieldTypeBlueprint::Dict => "dict",
        }
    }
}

/// Pipe definition, tagged by its `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PipeBlueprint {
    PipeSequence(PipeSequenceBlueprint),
    PipeParallel(PipeParallelBlueprint),
    PipeCondition(PipeConditionBlueprint),
    PipeBatch(PipeBatchBlueprint),
    #[serde(rename = "PipeLLM")]
    PipeLlm(PipeLlmBlueprint),
    PipeImgGen(PipeImgGenBlueprint),
    PipeExtract(PipeExtractBlueprint),
    PipeFunc(PipeFuncBlueprint),
    PipeCompose(PipeComposeBlueprint),
}

impl PipeBlueprint {
    /// Fields every pipe variant shares.
    pub fn signature(&self) -> &PipeSignatureBlueprint {
        match self {
            PipeBlueprint::PipeSequence(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeParallel(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeCondition(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeBatch(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeLlm(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeImgGen(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeExtract(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeFunc(blueprint) => &blueprint.signature,
            PipeBlueprint::PipeCompose(blueprint) => &blueprint.signature,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PipeBlueprint::PipeSequence(_) => "PipeSequence",
            PipeBlueprint::PipeParallel(_) => "PipeParallel",
            PipeBlueprint::PipeCondition(_) => "PipeCondition",
            PipeBlueprint::PipeBatch(_) => "PipeBatch",
            PipeBlueprint::PipeLlm(_) => "PipeLLM",
            PipeBlueprint::PipeImgGen(_) => "PipeImgGen",
            PipeBlueprint::PipeExtract(_) => "PipeExtract",
            PipeBlueprint::PipeFunc(_) => "PipeFunc",
            PipeBlueprint::PipeCompose(_) => "PipeCompose",
        }
    }
}

/// Declared signature shared by all pipes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PipeSignatureBlueprint {
    #[serde(default)]
    pub description: String,
    /// Variable name to concept reference. A `[]` suffix declares a list, `[N]` a fixed-size list.
    #[serde(default)]
    pub inputs: IndexMap<String, String>,
    /// Output concept reference, with the same multiplicity suffixes as inputs.
    pub output: String,
}

/// One step of a sequence or one branch of a parallel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SubPipeBlueprint {
    /// Code of the pipe to invoke.
    pub pipe: String,
    /// Name under which the step result is stored in working memory.
    #[serde(default)]
    pub result: Option<String>,
    /// Request a fixed number of outputs.
    #[serde(default)]
    pub nb_output: Option<usize>,
    /// Request an open-ended list of outputs.
    #[serde(default)]
    pub multiple_output: Option<bool>,
    /// List variable to batch over.
    #[serde(default)]
    pub batch_over: Option<String>,
    /// Item variable bound for each batch branch.
    #[serde(default)]
    pub batch_as: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeSequenceBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    #[serde(default)]
    pub steps: Vec<SubPipeBlueprint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeParallelBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    #[serde(default)]
    pub parallels: Vec<SubPipeBlueprint>,
    #[serde(default)]
    pub add_each_output: bool,
    /// Concept reference of the structure combining every branch output.
    #[serde(default)]
    pub combined_output: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeConditionBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    /// Bare expression, evaluated as if wrapped in `${{ }}`.
    #[serde(default)]
    pub expression: Option<String>,
    /// Template rendered to the outcome key.
    #[serde(default)]
    pub expression_template: Option<String>,
    /// Evaluated value to pipe code (or `continue` / `fail`).
    #[serde(default)]
    pub outcomes: IndexMap<String, String>,
    pub default_outcome: String,
    /// Variable that the evaluated value becomes an alias of.
    #[serde(default)]
    pub add_alias_from_expression_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeBatchBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    pub branch_pipe_code: String,
    pub input_list_name: String,
    pub input_item_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeLlmBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    pub prompt_template: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub nb_output: Option<usize>,
    #[serde(default)]
    pub multiple_output: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeImgGenBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    /// Prompt template. When absent, the single declared input provides the prompt.
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub nb_output: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeExtractBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    /// Include a rendered view of each page.
    #[serde(default)]
    pub page_views: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeFuncBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    pub function_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipeComposeBlueprint {
    #[serde(flatten)]
    pub signature: PipeSignatureBlueprint,
    pub template: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_bundle_with_every_pipe_family() {
        let yaml = r#"
domain: review
description: Reviews documents
concept:
  Question: "A question asked about a document"
  Verdict:
    description: Outcome of a review
    structure:
      summary: Short summary
      score:
        type: integer
        required: false
        default: 0
main_pipe: review_all
pipe:
  review_all:
    type: PipeSequence
    description: Review everything
    inputs:
      questions: Question[]
    output: Verdict
    steps:
      - pipe: answer
        batch_over: questions
        batch_as: question
        result: answers
      - pipe: judge
        result: verdict
  answer:
    type: PipeLLM
    inputs:
      question: Question
    output: Text
    prompt_template: "Answer ${{ question }}"
  judge:
    type: PipeCondition
    inputs:
      answers: Text[]
    output: Verdict
    expression: answers.text
    outcomes:
      ok: summarize
    default_outcome: fail
"#;
        let bundle: BundleBlueprint = serde_yaml::from_str(yaml).expect("parse bundle");
        assert_eq!(bundle.domain, "review");
        assert_eq!(bundle.concept["Question"].description(), "A question asked about a document");
        let Some(ConceptStructureBlueprint::Fields(fields)) = bundle.concept["Verdict"].structure() else {
            panic!("expected inline structure");
        };
        assert_eq!(fields["summary"].to_definition().field_type, FieldTypeBlueprint::Text);
        let score = fields["score"].to_definition();
        assert_eq!(score.field_type, FieldTypeBlueprint::Integer);
        assert!(!score.required);

        let PipeBlueprint::PipeSequence(sequence) = &bundle.pipe["review_all"] else {
            panic!("expected sequence");
        };
        assert_eq!(sequence.signature.inputs["questions"], "Question[]");
        assert_eq!(sequence.steps[0].batch_as.as_deref(), Some("question"));
        assert_eq!(bundle.pipe["answer"].type_name(), "PipeLLM");
        assert_eq!(bundle.pipe["judge"].signature().output, "Verdict");
    }
}
