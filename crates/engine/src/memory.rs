//! Run-scoped working memory.
//!
//! Entries are stuffs keyed by name, plus an alias table whose reserved `main` alias points at
//! the current primary result. Aliases resolve through exactly one hop. Forks for concurrent
//! branches are deep copies: no branch can observe another branch's writes.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::concept::{ConceptLibrary, NATIVE_DOMAIN, NativeConceptCode};
use crate::content::{ImageContent, StuffContent};
use crate::error::WorkingMemoryError;
use crate::field_paths::{PathSegment, navigate, parse_path, root_variable};
use crate::pipe::{Multiplicity, parse_concept_reference};
use crate::stuff::Stuff;

/// Reserved alias of the current primary result.
pub const MAIN_STUFF_NAME: &str = "main";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingMemory {
    root: IndexMap<String, Stuff>,
    aliases: IndexMap<String, String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Every name a lookup can succeed with: entries then aliases.
    pub fn names(&self) -> Vec<String> {
        self.root.keys().chain(self.aliases.keys()).cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_optional_stuff(name).is_some()
    }

    pub fn get_optional_stuff(&self, name: &str) -> Option<&Stuff> {
        self.root.get(self.resolve_name(name))
    }

    pub fn get_stuff(&self, name: &str) -> Result<&Stuff, WorkingMemoryError> {
        self.get_optional_stuff(name).ok_or_else(|| WorkingMemoryError::NotFound {
            name: name.to_string(),
            available: self.names(),
        })
    }

    /// Inserts or replaces the entry `name`. A same-named alias is dropped.
    pub fn set_stuff(&mut self, name: &str, stuff: Stuff) {
        self.aliases.shift_remove(name);
        self.root.insert(name.to_string(), stuff.renamed(name));
    }

    /// Adds a stuff whose code must not already be stored under another name.
    pub fn add_new_stuff(&mut self, name: &str, stuff: Stuff, aliases: &[String]) -> Result<(), WorkingMemoryError> {
        if let Some((existing_name, _)) = self.root.iter().find(|(key, existing)| existing.code == stuff.code && key.as_str() != name) {
            warn!(stuff_code = %stuff.code, name, existing_name = %existing_name, "refusing to store a stuff twice");
            return Err(WorkingMemoryError::DuplicateStuffCode {
                code: stuff.code,
                name: name.to_string(),
                existing_name: existing_name.clone(),
            });
        }
        self.set_stuff(name, stuff);
        for alias in aliases {
            self.set_alias(alias, name)?;
        }
        Ok(())
    }

    pub fn set_alias(&mut self, alias: &str, target: &str) -> Result<(), WorkingMemoryError> {
        if alias == target {
            return Err(WorkingMemoryError::SelfAlias { alias: alias.to_string() });
        }
        if !self.root.contains_key(target) {
            return Err(WorkingMemoryError::AliasTargetMissing {
                alias: alias.to_string(),
                target: target.to_string(),
            });
        }
        self.aliases.insert(alias.to_string(), target.to_string());
        Ok(())
    }

    pub fn aliases(&self) -> &IndexMap<String, String> {
        &self.aliases
    }

    /// Stores `stuff` and points `main` at it. Returns the name it was stored under.
    ///
    /// Without an explicit name the stuff keeps its own name, or its code when it has none.
    pub fn set_new_main_stuff(&mut self, stuff: Stuff, name: Option<&str>) -> Result<String, WorkingMemoryError> {
        let name = match name {
            Some(name) => name.to_string(),
            None if !stuff.name.is_empty() && stuff.name != MAIN_STUFF_NAME => stuff.name.clone(),
            None => stuff.code.clone(),
        };
        self.set_stuff(&name, stuff);
        self.set_alias(MAIN_STUFF_NAME, &name)?;
        Ok(name)
    }

    pub fn main_stuff(&self) -> Result<&Stuff, WorkingMemoryError> {
        self.get_optional_stuff(MAIN_STUFF_NAME)
            .ok_or(WorkingMemoryError::MainStuffMissing)
    }

    /// Stores the main stuff under `name` too and re-points `main` at the new entry.
    pub fn store_main_as(&mut self, name: &str) -> Result<(), WorkingMemoryError> {
        let main = self.main_stuff()?.clone();
        if self.aliases.get(MAIN_STUFF_NAME).map(String::as_str) == Some(name) {
            return Ok(());
        }
        self.set_stuff(name, main);
        self.set_alias(MAIN_STUFF_NAME, name)
    }

    /// Fully independent copy, taken before forking into a concurrent branch.
    pub fn make_deep_copy(&self) -> Self {
        self.clone()
    }

    /// Resolves a dotted attribute path to a JSON value.
    ///
    /// When the base variable holds a list and the path goes on with a field, the rest of the
    /// path is applied to every item and the results are flattened one level: a field that is
    /// itself a list is concatenated, not nested. An index right after the base selects an item.
    pub fn resolve_path_value(&self, path: &str) -> Result<Value, WorkingMemoryError> {
        let variable = root_variable(path).to_string();
        let attribute_error = || WorkingMemoryError::AttributeNotFound {
            variable: variable.clone(),
            path: path.to_string(),
        };
        let segments = parse_path(path).ok_or_else(attribute_error)?;
        let stuff = self.get_stuff(&variable)?;
        let rest = &segments[1..];
        let Some(first) = rest.first() else {
            return Ok(stuff.content.to_field_value());
        };

        match &stuff.content {
            StuffContent::List { items } => {
                let index = match first {
                    PathSegment::Index(index) => Some(*index),
                    PathSegment::Key(key) => key.parse::<usize>().ok(),
                };
                if let Some(index) = index {
                    let item = items.get(index).ok_or_else(attribute_error)?;
                    return resolve_in_content(item, &rest[1..]).ok_or_else(attribute_error);
                }
                let mut values = Vec::new();
                for item in items {
                    match resolve_in_content(item, rest).ok_or_else(attribute_error)? {
                        Value::Array(nested) => values.extend(nested),
                        other => values.push(other),
                    }
                }
                Ok(Value::Array(values))
            }
            content => resolve_in_content(content, rest).ok_or_else(attribute_error),
        }
    }

    pub fn get_text(&self, name: &str) -> Result<&str, WorkingMemoryError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Text { text } => Ok(text),
            other => Err(type_mismatch(name, "text", other)),
        }
    }

    pub fn get_number(&self, name: &str) -> Result<f64, WorkingMemoryError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Number { number } => Ok(*number),
            other => Err(type_mismatch(name, "number", other)),
        }
    }

    pub fn get_image(&self, name: &str) -> Result<&ImageContent, WorkingMemoryError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Image(image) => Ok(image),
            other => Err(type_mismatch(name, "image", other)),
        }
    }

    pub fn get_list(&self, name: &str) -> Result<&[StuffContent], WorkingMemoryError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::List { items } => Ok(items),
            other => Err(type_mismatch(name, "list", other)),
        }
    }

    pub fn get_structured(&self, name: &str) -> Result<&IndexMap<String, Value>, WorkingMemoryError> {
        let stuff = self.get_stuff(name)?;
        match &stuff.content {
            StuffContent::Structured { fields, .. } => Ok(fields),
            other => Err(type_mismatch(name, "structured", other)),
        }
    }

    /// Builds a memory from `{ name: { concept, content } }`; a bare string is `Text` content.
    ///
    /// Concept references resolve in `domain` first, then among native concepts. A `[]` suffix
    /// or an array content produces a list stuff.
    pub fn from_json_inputs(library: &ConceptLibrary, domain: Option<&str>, inputs: &Value) -> Result<Self, WorkingMemoryError> {
        let invalid = |name: &str, message: String| WorkingMemoryError::InvalidInput {
            name: name.to_string(),
            message,
        };
        let Some(entries) = inputs.as_object() else {
            return Err(invalid("", "inputs must be a JSON object".to_string()));
        };

        let mut memory = WorkingMemory::new();
        for (name, entry) in entries {
            if name == MAIN_STUFF_NAME {
                return Err(invalid(name, "'main' is reserved for the result alias".to_string()));
            }
            let stuff = match entry {
                Value::String(text) => Stuff::new(name, library.native(NativeConceptCode::Text), StuffContent::text(text.clone())),
                Value::Number(number) => Stuff::new(
                    name,
                    library.native(NativeConceptCode::Number),
                    StuffContent::Number {
                        number: number.as_f64().unwrap_or_default(),
                    },
                ),
                Value::Object(object) => {
                    let reference = object
                        .get("concept")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid(name, "missing 'concept'".to_string()))?;
                    let (code, multiplicity) =
                        parse_concept_reference(reference).ok_or_else(|| invalid(name, format!("invalid concept reference '{reference}'")))?;
                    let concept = library
                        .resolve_reference(&code, domain.unwrap_or(NATIVE_DOMAIN))
                        .ok_or_else(|| invalid(name, format!("unknown concept '{code}'")))?;
                    let raw = object.get("content").cloned().unwrap_or(Value::Null);
                    let structures = library.structures();
                    let content = match raw {
                        Value::Array(items) => StuffContent::list(
                            items
                                .iter()
                                .map(|item| StuffContent::from_record(&concept.structure_name, item, structures))
                                .collect::<Result<Vec<_>, _>>()
                                .map_err(|error| invalid(name, error.to_string()))?,
                        ),
                        single if multiplicity == Multiplicity::Single => {
                            StuffContent::from_record(&concept.structure_name, &single, structures).map_err(|error| invalid(name, error.to_string()))?
                        }
                        _ => return Err(invalid(name, "list concepts need an array content".to_string())),
                    };
                    Stuff::new(name, concept, content)
                }
                other => return Err(invalid(name, format!("unsupported input value {other}"))),
            };
            memory.set_stuff(name, stuff);
        }
        Ok(memory)
    }
}

impl fmt::Display for WorkingMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, stuff) in &self.root {
            writeln!(f, "{name}: {} ({})", stuff.concept, stuff.content.kind_name())?;
        }
        for (alias, target) in &self.aliases {
            writeln!(f, "{alias} -> {target}")?;
        }
        Ok(())
    }
}

fn resolve_in_content(content: &StuffContent, rest: &[PathSegment]) -> Option<Value> {
    if rest.is_empty() {
        return Some(content.to_field_value());
    }
    navigate(&content.to_json(), rest)
}

fn type_mismatch(name: &str, expected: &str, actual: &StuffContent) -> WorkingMemoryError {
    WorkingMemoryError::TypeMismatch {
        variable: name.to_string(),
        expected: expected.to_string(),
        actual: actual.kind_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_stuff(library: &ConceptLibrary, name: &str, text: &str) -> Stuff {
        Stuff::new(name, library.native(NativeConceptCode::Text), StuffContent::text(text))
    }

    #[test]
    fn set_alias_rejects_self_and_missing_targets() {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        memory.set_stuff("question", text_stuff(&library, "question", "why?"));

        assert!(matches!(
            memory.set_alias("question", "question"),
            Err(WorkingMemoryError::SelfAlias { .. })
        ));
        assert!(matches!(
            memory.set_alias("q", "answer"),
            Err(WorkingMemoryError::AliasTargetMissing { .. })
        ));
        memory.set_alias("q", "question").expect("alias");
        assert_eq!(memory.get_text("q").expect("text"), "why?");
    }

    #[test]
    fn not_found_lists_available_names() {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        memory
            .set_new_main_stuff(text_stuff(&library, "answer", "42"), None)
            .expect("main");
        let Err(WorkingMemoryError::NotFound { name, available }) = memory.get_stuff("question") else {
            panic!("expected not found");
        };
        assert_eq!(name, "question");
        assert_eq!(available, vec!["answer".to_string(), MAIN_STUFF_NAME.to_string()]);
    }

    #[test]
    fn add_new_stuff_refuses_a_code_stored_under_another_name() {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        let stuff = text_stuff(&library, "a", "x");
        memory.add_new_stuff("a", stuff.clone(), &[]).expect("first insert");
        let error = memory.add_new_stuff("b", stuff, &[]).unwrap_err();
        assert!(matches!(error, WorkingMemoryError::DuplicateStuffCode { .. }));
    }

    #[test]
    fn list_paths_broadcast_and_flatten_one_level() {
        let library = ConceptLibrary::new();
        let concept = library.native(NativeConceptCode::Anything);
        let items = vec![
            StuffContent::Dynamic {
                value: json!({ "title": "a", "tags": ["x", "y"] }),
            },
            StuffContent::Dynamic {
                value: json!({ "title": "b", "tags": ["z"] }),
            },
        ];
        let mut memory = WorkingMemory::new();
        memory.set_stuff("docs", Stuff::new("docs", concept, StuffContent::list(items)));

        assert_eq!(memory.resolve_path_value("docs.title").expect("titles"), json!(["a", "b"]));
        assert_eq!(memory.resolve_path_value("docs.tags").expect("tags"), json!(["x", "y", "z"]));
        assert_eq!(memory.resolve_path_value("docs[1].title").expect("item"), json!("b"));
        assert!(matches!(
            memory.resolve_path_value("docs.missing"),
            Err(WorkingMemoryError::AttributeNotFound { .. })
        ));
    }

    #[test]
    fn typed_accessors_report_mismatches() {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        memory.set_stuff("question", text_stuff(&library, "question", "why?"));
        let Err(WorkingMemoryError::TypeMismatch { variable, expected, actual }) = memory.get_list("question") else {
            panic!("expected mismatch");
        };
        assert_eq!((variable.as_str(), expected.as_str(), actual.as_str()), ("question", "list", "text"));
    }

    #[test]
    fn deep_copies_are_isolated() {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        memory.set_stuff("question", text_stuff(&library, "question", "why?"));
        let mut fork = memory.make_deep_copy();
        fork.set_stuff("question", text_stuff(&library, "question", "how?"));
        assert_eq!(memory.get_text("question").expect("text"), "why?");
        assert_eq!(fork.get_text("question").expect("text"), "how?");
    }

    #[test]
    fn from_json_inputs_builds_lists_and_text() {
        let library = ConceptLibrary::new();
        let inputs = json!({
            "topic": "rust",
            "pictures": { "concept": "Image[]", "content": [{ "url": "https://a" }, { "url": "https://b" }] }
        });
        let memory = WorkingMemory::from_json_inputs(&library, None, &inputs).expect("inputs");
        assert_eq!(memory.get_text("topic").expect("topic"), "rust");
        assert_eq!(memory.get_list("pictures").expect("pictures").len(), 2);
        assert_eq!(memory.get_stuff("pictures").expect("pictures").concept.code, "Image");
    }

    #[test]
    fn from_json_inputs_rejects_the_main_alias_name() {
        let library = ConceptLibrary::new();
        let error = WorkingMemory::from_json_inputs(&library, None, &json!({ "main": "shadowed" })).expect_err("main is reserved");
        assert!(matches!(error, WorkingMemoryError::InvalidInput { ref name, .. } if name == "main"), "{error}");
    }
}
