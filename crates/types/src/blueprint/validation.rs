//! Reaction policy for static pipe validation findings.
//!
//! Every static check the engine runs reports a [`ValidationErrorType`]. The policy decides
//! whether the finding is dropped, logged, or raised. Anything not configured raises.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kinds of static validation findings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    /// An input is declared but never referenced or needed.
    ExtraneousInputVariable,
    /// A variable is referenced or needed but not declared as an input.
    MissingInputVariable,
    /// A declared input concept cannot accept what the pipe actually needs.
    InadequateInputConcept,
    /// A produced output is not compatible with the declared output concept.
    InadequateOutputConcept,
    /// A declared input is a list where a single value is needed, or the reverse.
    InadequateInputMultiplicity,
}

impl ValidationErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorType::ExtraneousInputVariable => "extraneous_input_variable",
            ValidationErrorType::MissingInputVariable => "missing_input_variable",
            ValidationErrorType::InadequateInputConcept => "inadequate_input_concept",
            ValidationErrorType::InadequateOutputConcept => "inadequate_output_concept",
            ValidationErrorType::InadequateInputMultiplicity => "inadequate_input_multiplicity",
        }
    }
}

impl fmt::Display for ValidationErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with a validation finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReaction {
    Ignore,
    Log,
    #[default]
    Raise,
}

/// Per-finding reaction table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationReactionConfig {
    /// Reaction used for finding types absent from `reactions`.
    #[serde(default)]
    pub default_reaction: ValidationReaction,
    #[serde(default)]
    pub reactions: IndexMap<ValidationErrorType, ValidationReaction>,
}

impl ValidationReactionConfig {
    /// Returns the configured reaction for a finding type.
    pub fn reaction_for(&self, error_type: ValidationErrorType) -> ValidationReaction {
        self.reactions.get(&error_type).copied().unwrap_or(self.default_reaction)
    }

    /// Builder-style override used by tests and embedders.
    pub fn with_reaction(mut self, error_type: ValidationErrorType, reaction: ValidationReaction) -> Self {
        self.reactions.insert(error_type, reaction);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_findings_raise() {
        let config = ValidationReactionConfig::default();
        assert_eq!(
            config.reaction_for(ValidationErrorType::ExtraneousInputVariable),
            ValidationReaction::Raise
        );
    }

    #[test]
    fn reactions_deserialize_from_snake_case_keys() {
        let config: ValidationReactionConfig = serde_json::from_str(
            r#"{ "reactions": { "extraneous_input_variable": "log", "missing_input_variable": "ignore" } }"#,
        )
        .expect("parse reactions");
        assert_eq!(
            config.reaction_for(ValidationErrorType::ExtraneousInputVariable),
            ValidationReaction::Log
        );
        assert_eq!(config.reaction_for(ValidationErrorType::MissingInputVariable), ValidationReaction::Ignore);
        assert_eq!(
            config.reaction_for(ValidationErrorType::InadequateOutputConcept),
            ValidationReaction::Raise
        );
    }
}
