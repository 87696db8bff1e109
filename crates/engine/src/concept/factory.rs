//! Builds concepts from blueprints.

use once_cell::sync::Lazy;
use pipewright_types::{ConceptBlueprint, ConceptStructureBlueprint};
use regex::Regex;
use tracing::debug;

use super::{Concept, ConceptLibrary, NativeConceptCode, concept_string};
use crate::error::DefinitionError;
use crate::structure::{TEXT_CONTENT, synth};

static CONCEPT_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z][A-Za-z0-9]*$").expect("valid concept code regex"));

/// Builds a concept of `domain` and registers any structure it synthesizes.
///
/// The concept itself is not added to the library; callers do that once it is built so a
/// failing definition leaves no concept behind.
pub fn make_concept(
    domain: &str,
    code: &str,
    blueprint: &ConceptBlueprint,
    library: &mut ConceptLibrary,
) -> Result<Concept, DefinitionError> {
    validate_concept_code(code)?;
    let concept_id = concept_string(domain, code);

    let (structure_name, refines) = match (blueprint.structure(), blueprint.refines()) {
        (Some(_), Some(_)) => return Err(DefinitionError::StructureAndRefinement { concept: concept_id }),
        (None, Some(reference)) => {
            let parent = library
                .resolve_reference(reference, domain)
                .ok_or_else(|| DefinitionError::UnknownConcept {
                    reference: reference.to_string(),
                    context: format!("refinement of concept '{concept_id}'"),
                })?;
            if !parent.is_native() {
                return Err(DefinitionError::InvalidRefinement {
                    concept: concept_id,
                    refines: parent.concept_string(),
                });
            }
            (parent.structure_name.clone(), Some(parent.concept_string()))
        }
        (Some(ConceptStructureBlueprint::Named(name)), None) => {
            if !library.structures().contains(name) {
                return Err(DefinitionError::UnknownStructure {
                    concept: concept_id,
                    structure: name.clone(),
                });
            }
            (name.clone(), None)
        }
        (Some(ConceptStructureBlueprint::Fields(schema)), None) => {
            let definition = synth::synthesize(code, schema, library.structures())?;
            debug!(concept = %concept_id, fields = definition.fields.len(), "synthesized concept structure");
            library.structures_mut().register(definition)?;
            (code.to_string(), None)
        }
        (None, None) => (TEXT_CONTENT.to_string(), None),
    };

    Ok(Concept {
        code: code.to_string(),
        domain: domain.to_string(),
        description: blueprint.description().to_string(),
        structure_name,
        refines,
    })
}

fn validate_concept_code(code: &str) -> Result<(), DefinitionError> {
    if !CONCEPT_CODE.is_match(code) {
        return Err(DefinitionError::InvalidCode {
            kind: "concept",
            code: code.to_string(),
            reason: "concept codes must be PascalCase".to_string(),
        });
    }
    if NativeConceptCode::from_code(code).is_some() {
        return Err(DefinitionError::InvalidCode {
            kind: "concept",
            code: code.to_string(),
            reason: "code is reserved for a native concept".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_types::ConceptDefinitionBlueprint;

    fn definition(structure: Option<ConceptStructureBlueprint>, refines: Option<&str>) -> ConceptBlueprint {
        ConceptBlueprint::Definition(ConceptDefinitionBlueprint {
            description: "test".to_string(),
            structure,
            refines: refines.map(str::to_string),
        })
    }

    #[test]
    fn description_only_concepts_are_text_shaped() {
        let mut library = ConceptLibrary::new();
        let concept = make_concept("qa", "Answer", &ConceptBlueprint::Description("An answer".to_string()), &mut library)
            .expect("concept");
        assert_eq!(concept.structure_name, TEXT_CONTENT);
        assert_eq!(concept.refines, None);
    }

    #[test]
    fn refinement_takes_the_native_structure() {
        let mut library = ConceptLibrary::new();
        let concept = make_concept("qa", "Question", &definition(None, Some("Text")), &mut library).expect("concept");
        assert_eq!(concept.refines.as_deref(), Some("native.Text"));
        assert_eq!(concept.structure_name, TEXT_CONTENT);
    }

    #[test]
    fn refinement_of_a_domain_concept_is_rejected() {
        let mut library = ConceptLibrary::new();
        let answer = make_concept("qa", "Answer", &ConceptBlueprint::Description("An answer".to_string()), &mut library)
            .expect("answer");
        library.add(answer).expect("add answer");
        let error = make_concept("qa", "ShortAnswer", &definition(None, Some("Answer")), &mut library).unwrap_err();
        assert!(matches!(error, DefinitionError::InvalidRefinement { .. }));
    }

    #[test]
    fn structure_and_refinement_are_exclusive() {
        let mut library = ConceptLibrary::new();
        let error = make_concept(
            "qa",
            "Question",
            &definition(Some(ConceptStructureBlueprint::Named(TEXT_CONTENT.to_string())), Some("Text")),
            &mut library,
        )
        .unwrap_err();
        assert!(matches!(error, DefinitionError::StructureAndRefinement { .. }));
    }

    #[test]
    fn codes_must_be_pascal_case_and_not_native() {
        let mut library = ConceptLibrary::new();
        let blueprint = ConceptBlueprint::Description("x".to_string());
        assert!(make_concept("qa", "my_concept", &blueprint, &mut library).is_err());
        assert!(make_concept("qa", "Text", &blueprint, &mut library).is_err());
    }
}
