//! Domain, concept and pipe libraries, and the bundle lifecycle that fills them.

use indexmap::IndexMap;
use pipewright_types::{BundleBlueprint, ValidationReactionConfig};
use tracing::{debug, info};

use crate::concept::ConceptLibrary;
use crate::concept::factory::make_concept;
use crate::error::{BundleLoadError, DefinitionError};
use crate::pipe::factory::make_pipe;
use crate::pipe::{PipeKind, PipeLibrary};
use crate::resolver::{apply_reactions, validate_pipe};
use crate::structure::StructureRegistry;
use crate::templates::TemplateEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub code: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainLibrary {
    domains: IndexMap<String, Domain>,
}

impl DomainLibrary {
    pub fn get(&self, code: &str) -> Option<&Domain> {
        self.domains.get(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.domains.contains_key(code)
    }

    pub fn codes(&self) -> Vec<String> {
        self.domains.keys().cloned().collect()
    }

    fn add(&mut self, domain: Domain) -> Result<(), DefinitionError> {
        if self.domains.contains_key(&domain.code) {
            return Err(DefinitionError::DuplicateDomain { domain: domain.code });
        }
        self.domains.insert(domain.code.clone(), domain);
        Ok(())
    }

    fn remove(&mut self, code: &str) -> Option<Domain> {
        self.domains.shift_remove(code)
    }
}

/// Everything a run can look up: domains, concepts with their structures, and pipes.
#[derive(Debug, Clone, Default)]
pub struct Libraries {
    domains: DomainLibrary,
    concepts: ConceptLibrary,
    pipes: PipeLibrary,
}

impl Libraries {
    pub fn new() -> Self {
        Self {
            domains: DomainLibrary::default(),
            concepts: ConceptLibrary::new(),
            pipes: PipeLibrary::new(),
        }
    }

    pub fn domains(&self) -> &DomainLibrary {
        &self.domains
    }

    pub fn concepts(&self) -> &ConceptLibrary {
        &self.concepts
    }

    pub fn structures(&self) -> &StructureRegistry {
        self.concepts.structures()
    }

    pub fn pipes(&self) -> &PipeLibrary {
        &self.pipes
    }

    pub fn domain(&self, code: &str) -> Option<&Domain> {
        self.domains.get(code)
    }

    /// Loads a bundle. Either every concept and pipe of the bundle is registered, or nothing is.
    ///
    /// The bundle is built into a staged copy of the libraries: definitions first, then sub-pipe
    /// references, condition branch outputs, and finally the static signature checks filtered
    /// through `reactions`.
    pub fn load_bundle(
        &mut self,
        bundle: &BundleBlueprint,
        templates: &dyn TemplateEngine,
        reactions: &ValidationReactionConfig,
    ) -> Result<(), BundleLoadError> {
        let domain = bundle.domain.clone();
        let definition = |source: DefinitionError| BundleLoadError::Definition {
            domain: domain.clone(),
            source,
        };

        let mut staged = self.clone();
        staged
            .domains
            .add(Domain {
                code: bundle.domain.clone(),
                description: bundle.description.clone(),
                system_prompt: bundle.system_prompt.clone(),
            })
            .map_err(definition)?;

        for (code, blueprint) in &bundle.concept {
            let concept = make_concept(&bundle.domain, code, blueprint, &mut staged.concepts).map_err(definition)?;
            staged.concepts.add(concept).map_err(definition)?;
        }

        let mut new_pipes = Vec::with_capacity(bundle.pipe.len());
        for (code, blueprint) in &bundle.pipe {
            let pipe = make_pipe(&bundle.domain, code, blueprint, &staged.concepts, templates).map_err(definition)?;
            new_pipes.push(staged.pipes.add(pipe).map_err(definition)?);
        }

        for pipe in &new_pipes {
            staged
                .pipes
                .check_sub_pipes(pipe)
                .map_err(|source| definition(DefinitionError::MissingPipes(source)))?;
            staged.check_condition_outputs(pipe).map_err(definition)?;
        }

        if let Some(main_pipe) = &bundle.main_pipe
            && !staged.pipes.contains(main_pipe)
        {
            return Err(definition(DefinitionError::InvalidPipe {
                pipe_code: main_pipe.clone(),
                reason: format!("main pipe of bundle '{domain}' is not defined"),
            }));
        }

        for pipe in &new_pipes {
            let findings = validate_pipe(&staged, templates, pipe).map_err(|source| definition(DefinitionError::from(source)))?;
            debug!(pipe_code = %pipe.code, finding_count = findings.len(), "validated pipe signature");
            apply_reactions(&pipe.code, findings, reactions).map_err(|source| BundleLoadError::Validation {
                domain: domain.clone(),
                source,
            })?;
        }

        *self = staged;
        info!(
            domain = %bundle.domain,
            concept_count = bundle.concept.len(),
            pipe_count = bundle.pipe.len(),
            "loaded bundle"
        );
        Ok(())
    }

    /// Every pipe a condition can route to must produce something its declared output accepts.
    fn check_condition_outputs(&self, pipe: &crate::pipe::Pipe) -> Result<(), DefinitionError> {
        let PipeKind::Condition(condition) = &pipe.kind else {
            return Ok(());
        };
        for code in condition.outcome_pipe_codes() {
            let branch = self.pipes.get_required(code, &pipe.code)?;
            if !self.concepts.is_compatible(&branch.output, &pipe.output, false) {
                return Err(DefinitionError::IncompatibleConditionOutput {
                    pipe_code: pipe.code.clone(),
                    branch_pipe_code: branch.code.clone(),
                    branch_output: branch.output.concept_string(),
                    declared_output: pipe.output.concept_string(),
                });
            }
        }
        Ok(())
    }

    /// Removes a bundle's domain with every concept, structure and pipe it owns.
    pub fn unload_bundle(&mut self, domain: &str) -> bool {
        if self.domains.remove(domain).is_none() {
            return false;
        }
        let pipe_count = self.pipes.remove_domain(domain);
        let concept_count = self.concepts.remove_domain(domain);
        info!(domain, pipe_count, concept_count, "unloaded bundle");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::DollarBraceTemplates;
    use pipewright_types::ValidationErrorType;

    fn bundle(yaml: &str) -> BundleBlueprint {
        serde_yaml::from_str(yaml).expect("bundle yaml")
    }

    const QA_BUNDLE: &str = r#"
domain: qa
concept:
  Question:
    description: A question asked by a user
    refines: Text
  Answer:
    description: An answer
    structure:
      text: The answer text
      confidence:
        type: number
        description: How sure the answer is
        required: false
pipe:
  answer_question:
    type: PipeLLM
    description: Answer a question
    inputs:
      question: Question
    output: Answer
    prompt_template: "Answer: ${{ question }}"
  answer_all:
    type: PipeBatch
    description: Answer every question
    inputs:
      questions: Question[]
    output: Answer[]
    branch_pipe_code: answer_question
    input_list_name: questions
    input_item_name: question
"#;

    #[test]
    fn loads_a_bundle_and_unloads_it_completely() {
        let mut libraries = Libraries::new();
        libraries
            .load_bundle(&bundle(QA_BUNDLE), &DollarBraceTemplates, &ValidationReactionConfig::default())
            .expect("load");

        assert!(libraries.domain("qa").is_some());
        assert!(libraries.concepts().get("qa.Question").is_some());
        assert!(libraries.structures().contains("Answer"));
        assert!(libraries.pipes().contains("answer_all"));

        assert!(libraries.unload_bundle("qa"));
        assert!(libraries.concepts().get("qa.Question").is_none());
        assert!(!libraries.structures().contains("Answer"));
        assert!(!libraries.pipes().contains("answer_question"));
        assert!(!libraries.unload_bundle("qa"));
    }

    #[test]
    fn failed_load_leaves_libraries_untouched() {
        let broken = r#"
domain: broken
concept:
  Topic:
    description: A topic
    refines: Text
pipe:
  route:
    type: PipeSequence
    description: Calls a pipe that does not exist
    inputs:
      topic: Topic
    output: Text
    steps:
      - pipe: nowhere
        result: out
"#;
        let mut libraries = Libraries::new();
        let error = libraries
            .load_bundle(&bundle(broken), &DollarBraceTemplates, &ValidationReactionConfig::default())
            .expect_err("missing sub-pipe");

        assert!(matches!(
            error,
            BundleLoadError::Definition {
                source: DefinitionError::MissingPipes(_),
                ..
            }
        ));
        assert!(libraries.domain("broken").is_none());
        assert!(libraries.concepts().get("broken.Topic").is_none());
        assert!(libraries.pipes().codes().is_empty());
    }

    #[test]
    fn duplicate_domain_is_rejected() {
        let mut libraries = Libraries::new();
        let reactions = ValidationReactionConfig::default();
        libraries.load_bundle(&bundle(QA_BUNDLE), &DollarBraceTemplates, &reactions).expect("first load");
        let error = libraries
            .load_bundle(&bundle(QA_BUNDLE), &DollarBraceTemplates, &reactions)
            .expect_err("second load");
        assert!(matches!(
            error,
            BundleLoadError::Definition {
                source: DefinitionError::DuplicateDomain { .. },
                ..
            }
        ));
    }

    #[test]
    fn extraneous_input_follows_reaction_policy() {
        let yaml = r#"
domain: notes
pipe:
  summarize:
    type: PipeCompose
    description: Summarize a note
    inputs:
      note: Text
      unused: Text
    output: Text
    template: "Summary of ${{ note }}"
"#;
        let mut strict = Libraries::new();
        let error = strict
            .load_bundle(&bundle(yaml), &DollarBraceTemplates, &ValidationReactionConfig::default())
            .expect_err("extraneous input raises by default");
        let BundleLoadError::Validation { source, .. } = error else {
            panic!("expected a validation error");
        };
        assert_eq!(source.findings[0].error_type, ValidationErrorType::ExtraneousInputVariable);

        let mut lenient = Libraries::new();
        let mut reactions = ValidationReactionConfig::default();
        reactions
            .reactions
            .insert(ValidationErrorType::ExtraneousInputVariable, pipewright_types::ValidationReaction::Log);
        lenient.load_bundle(&bundle(yaml), &DollarBraceTemplates, &reactions).expect("logged only");
    }

    #[test]
    fn condition_branches_must_match_the_declared_output() {
        let yaml = r#"
domain: routing
concept:
  Verdict:
    description: A verdict
    structure:
      label: The label
pipe:
  say_text:
    type: PipeCompose
    description: Plain text
    inputs:
      mood: Text
    output: Text
    template: "${{ mood }}"
  route:
    type: PipeCondition
    description: Route on mood
    inputs:
      mood: Text
    output: Verdict
    expression: mood
    outcomes:
      happy: say_text
    default_outcome: fail
"#;
        let mut libraries = Libraries::new();
        let error = libraries
            .load_bundle(&bundle(yaml), &DollarBraceTemplates, &ValidationReactionConfig::default())
            .expect_err("text cannot become a verdict");
        assert!(matches!(
            error,
            BundleLoadError::Definition {
                source: DefinitionError::IncompatibleConditionOutput { .. },
                ..
            }
        ));
    }
}
