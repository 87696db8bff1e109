//! Concept registry and the compatibility predicate.

use std::sync::Arc;

use indexmap::IndexMap;

use super::{Concept, NATIVE_DOMAIN, NativeConceptCode, concept_string};
use crate::error::DefinitionError;
use crate::structure::StructureRegistry;

/// Every registered concept plus the structures backing them.
#[derive(Debug, Clone)]
pub struct ConceptLibrary {
    concepts: IndexMap<String, Arc<Concept>>,
    structures: StructureRegistry,
}

impl Default for ConceptLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ConceptLibrary {
    /// Creates a library with the native concepts and structures registered.
    pub fn new() -> Self {
        let concepts = NativeConceptCode::ALL
            .into_iter()
            .map(|native| (native.concept_string(), Arc::new(native.to_concept())))
            .collect();
        Self {
            concepts,
            structures: StructureRegistry::new(),
        }
    }

    pub fn structures(&self) -> &StructureRegistry {
        &self.structures
    }

    pub fn structures_mut(&mut self) -> &mut StructureRegistry {
        &mut self.structures
    }

    pub fn add(&mut self, concept: Concept) -> Result<Arc<Concept>, DefinitionError> {
        let key = concept.concept_string();
        if self.concepts.contains_key(&key) {
            return Err(DefinitionError::DuplicateConcept { concept: key });
        }
        if !self.structures.contains(&concept.structure_name) {
            return Err(DefinitionError::UnknownStructure {
                concept: key,
                structure: concept.structure_name,
            });
        }
        let concept = Arc::new(concept);
        self.concepts.insert(key, concept.clone());
        Ok(concept)
    }

    /// Looks a concept up by its concept string.
    pub fn get(&self, concept_string: &str) -> Option<Arc<Concept>> {
        self.concepts.get(concept_string).cloned()
    }

    pub fn native(&self, code: NativeConceptCode) -> Arc<Concept> {
        self.concepts
            .get(&code.concept_string())
            .cloned()
            .unwrap_or_else(|| Arc::new(code.to_concept()))
    }

    /// Resolves `Code` (within `domain`, then native) or `domain.Code`.
    pub fn resolve_reference(&self, reference: &str, domain: &str) -> Option<Arc<Concept>> {
        let reference = reference.trim();
        if reference.contains('.') {
            return self.get(reference);
        }
        self.get(&concept_string(domain, reference))
            .or_else(|| self.get(&concept_string(NATIVE_DOMAIN, reference)))
    }

    pub fn concepts(&self) -> impl Iterator<Item = &Arc<Concept>> {
        self.concepts.values()
    }

    /// Removes the concepts of `domain` and the structures they synthesized.
    pub fn remove_domain(&mut self, domain: &str) -> usize {
        let removed: Vec<Arc<Concept>> = self
            .concepts
            .values()
            .filter(|concept| concept.domain == domain)
            .cloned()
            .collect();
        for concept in &removed {
            self.concepts.shift_remove(&concept.concept_string());
            let shared = self
                .concepts
                .values()
                .any(|other| other.structure_name == concept.structure_name);
            if !shared {
                self.structures.remove(&concept.structure_name);
            }
        }
        removed.len()
    }

    /// Decides whether content of concept `tested` may feed an input expecting `wanted`.
    ///
    /// Checks run in a fixed order and the first match decides.
    pub fn is_compatible(&self, tested: &Concept, wanted: &Concept, strict: bool) -> bool {
        if tested.is_wildcard() || wanted.is_wildcard() {
            return true;
        }
        let wanted_string = wanted.concept_string();
        if tested.concept_string() == wanted_string {
            return true;
        }
        if tested.structure_name == wanted.structure_name {
            return true;
        }
        if tested.refines.as_deref() == Some(wanted_string.as_str()) {
            return true;
        }
        if tested.refines.is_none() && wanted.refines.is_none() {
            if strict {
                return self
                    .structures
                    .structurally_equivalent(&tested.structure_name, &wanted.structure_name);
            }
            return self.structures.is_subtype(&tested.structure_name, &wanted.structure_name)
                || self
                    .structures
                    .has_compatible_fields(&tested.structure_name, &wanted.structure_name);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{FieldDefinition, FieldType, STRUCTURED_CONTENT, StructureDefinition};

    fn structure(name: &str, extends: &str, fields: Vec<FieldDefinition>) -> StructureDefinition {
        StructureDefinition {
            name: name.to_string(),
            extends: Some(extends.to_string()),
            fields: fields.into_iter().map(|field| (field.name.clone(), field)).collect(),
            native: false,
        }
    }

    fn concept(domain: &str, code: &str, structure_name: &str, refines: Option<&str>) -> Concept {
        Concept {
            code: code.to_string(),
            domain: domain.to_string(),
            description: code.to_string(),
            structure_name: structure_name.to_string(),
            refines: refines.map(str::to_string),
        }
    }

    fn library() -> ConceptLibrary {
        let mut library = ConceptLibrary::new();
        let structures = library.structures_mut();
        structures
            .register(structure(
                "Person",
                STRUCTURED_CONTENT,
                vec![FieldDefinition::required("name", FieldType::Text, "Name")],
            ))
            .expect("person");
        structures
            .register(structure(
                "Employee",
                "Person",
                vec![FieldDefinition::required("badge", FieldType::Integer, "Badge")],
            ))
            .expect("employee");
        structures
            .register(structure(
                "Contact",
                STRUCTURED_CONTENT,
                vec![
                    FieldDefinition::required("name", FieldType::Text, "Name"),
                    FieldDefinition::optional("email", FieldType::Text, "Email"),
                ],
            ))
            .expect("contact");
        library.add(concept("hr", "Person", "Person", None)).expect("person concept");
        library.add(concept("hr", "Employee", "Employee", None)).expect("employee concept");
        library.add(concept("hr", "Contact", "Contact", None)).expect("contact concept");
        library
            .add(concept("qa", "Question", "TextContent", Some("native.Text")))
            .expect("question concept");
        library
    }

    #[test]
    fn every_concept_is_strictly_compatible_with_itself() {
        let library = library();
        for concept in library.concepts() {
            assert!(library.is_compatible(concept, concept, true), "{concept}");
        }
    }

    #[test]
    fn refinement_of_text_shares_its_structure() {
        let library = library();
        let question = library.get("qa.Question").expect("question");
        let text = library.native(NativeConceptCode::Text);
        assert!(library.is_compatible(&question, &text, true));
        // Question is backed by the text structure, so the reverse holds as well.
        assert!(library.is_compatible(&text, &question, true));
    }

    #[test]
    fn subtype_relation_is_directional() {
        let library = library();
        let person = library.get("hr.Person").expect("person");
        let employee = library.get("hr.Employee").expect("employee");
        assert!(library.is_compatible(&employee, &person, false));
        assert!(!library.is_compatible(&person, &employee, false));
        assert!(!library.is_compatible(&employee, &person, true));
    }

    #[test]
    fn compatible_fields_are_enough_outside_strict_mode() {
        let library = library();
        let contact = library.get("hr.Contact").expect("contact");
        let person = library.get("hr.Person").expect("person");
        assert!(library.is_compatible(&contact, &person, false));
        assert!(!library.is_compatible(&person, &contact, true));
    }

    #[test]
    fn optional_only_structures_do_not_accept_unrelated_concepts() {
        let library = library();
        let native = |code| library.native(code);
        let pairs = [
            (NativeConceptCode::Number, NativeConceptCode::TextAndImages),
            (NativeConceptCode::Image, NativeConceptCode::LlmPrompt),
            (NativeConceptCode::Pdf, NativeConceptCode::Image),
        ];
        for (tested, wanted) in pairs {
            assert!(
                !library.is_compatible(&native(tested), &native(wanted), false),
                "{tested:?} should not fit {wanted:?}"
            );
        }
        let person = library.get("hr.Person").expect("person");
        assert!(!library.is_compatible(&native(NativeConceptCode::Number), &person, false));
    }

    #[test]
    fn structures_without_fields_match_nothing_on_fields() {
        let mut library = library();
        library
            .structures_mut()
            .register(structure("Marker", STRUCTURED_CONTENT, Vec::new()))
            .expect("marker");
        library.add(concept("hr", "Marker", "Marker", None)).expect("marker concept");
        let marker = library.get("hr.Marker").expect("marker");
        let person = library.get("hr.Person").expect("person");
        assert!(!library.is_compatible(&person, &marker, false));
    }

    #[test]
    fn wildcards_accept_everything() {
        let library = library();
        let anything = library.native(NativeConceptCode::Anything);
        let image = library.native(NativeConceptCode::Image);
        assert!(library.is_compatible(&image, &anything, true));
        assert!(library.is_compatible(&anything, &image, true));
    }

    #[test]
    fn references_resolve_within_domain_then_native() {
        let library = library();
        assert_eq!(
            library.resolve_reference("Person", "hr").map(|c| c.concept_string()),
            Some("hr.Person".to_string())
        );
        assert_eq!(
            library.resolve_reference("Text", "hr").map(|c| c.concept_string()),
            Some("native.Text".to_string())
        );
        assert!(library.resolve_reference("Person", "qa").is_none());
        assert!(library.resolve_reference("hr.Person", "qa").is_some());
    }
}
