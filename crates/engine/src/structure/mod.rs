//! Structural types backing concepts.
//!
//! A structure is a named, ordered set of typed fields that may extend a parent structure. Every
//! structure usable as stuff content must extend [`STRUCTURED_CONTENT`], directly or through a
//! chain. Records (JSON objects) are validated against a structure at the boundary: defaults are
//! filled in, unknown fields are rejected, and every value is checked against its field type.

pub mod synth;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{DefinitionError, RecordValidationError};

/// Root of every content structure.
pub const STRUCTURED_CONTENT: &str = "StructuredContent";

pub const TEXT_CONTENT: &str = "TextContent";
pub const NUMBER_CONTENT: &str = "NumberContent";
pub const IMAGE_CONTENT: &str = "ImageContent";
pub const PDF_CONTENT: &str = "PdfContent";
pub const TEXT_AND_IMAGES_CONTENT: &str = "TextAndImagesContent";
pub const PAGE_CONTENT: &str = "PageContent";
pub const LLM_PROMPT_CONTENT: &str = "LlmPromptContent";
pub const IMG_GEN_PROMPT_CONTENT: &str = "ImgGenPromptContent";
pub const DYNAMIC_CONTENT: &str = "DynamicContent";

/// Type of a structure field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Number,
    Date,
    /// List with an optional element type. Untyped lists accept any JSON array.
    List(Option<Box<FieldType>>),
    Dict {
        key: Box<FieldType>,
        value: Option<Box<FieldType>>,
    },
    /// Value shaped by another registered structure.
    Nested(String),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => f.write_str("text"),
            FieldType::Integer => f.write_str("integer"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Number => f.write_str("number"),
            FieldType::Date => f.write_str("date"),
            FieldType::List(None) => f.write_str("list"),
            FieldType::List(Some(item)) => write!(f, "list<{item}>"),
            FieldType::Dict { key, value: None } => write!(f, "dict<{key}>"),
            FieldType::Dict { key, value: Some(value) } => write!(f, "dict<{key}, {value}>"),
            FieldType::Nested(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<Value>,
    pub choices: Vec<String>,
    pub description: Option<String>,
}

impl FieldDefinition {
    pub fn required(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            default: None,
            choices: Vec::new(),
            description: Some(description.to_string()),
        }
    }

    pub fn optional(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type, description)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructureDefinition {
    pub name: String,
    /// Parent structure; `None` only for the root.
    pub extends: Option<String>,
    /// Fields declared on this structure, excluding inherited ones.
    pub fields: IndexMap<String, FieldDefinition>,
    /// Built-in structures are never removed by bundle unloads.
    pub native: bool,
}

impl StructureDefinition {
    fn native(name: &str, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.to_string(),
            extends: Some(STRUCTURED_CONTENT.to_string()),
            fields: fields.into_iter().map(|field| (field.name.clone(), field)).collect(),
            native: true,
        }
    }
}

/// Registry of every known structure, keyed by name. Structure names are global.
#[derive(Debug, Clone)]
pub struct StructureRegistry {
    structures: IndexMap<String, Arc<StructureDefinition>>,
}

impl Default for StructureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureRegistry {
    /// Creates a registry holding the built-in content structures.
    pub fn new() -> Self {
        let image = || FieldType::Nested(IMAGE_CONTENT.to_string());
        let mut registry = Self {
            structures: IndexMap::new(),
        };
        registry.insert(StructureDefinition {
            name: STRUCTURED_CONTENT.to_string(),
            extends: None,
            fields: IndexMap::new(),
            native: true,
        });
        registry.insert(StructureDefinition::native(
            TEXT_CONTENT,
            vec![FieldDefinition::required("text", FieldType::Text, "Text value")],
        ));
        registry.insert(StructureDefinition::native(
            NUMBER_CONTENT,
            vec![FieldDefinition::required("number", FieldType::Number, "Numeric value")],
        ));
        registry.insert(StructureDefinition::native(
            IMAGE_CONTENT,
            vec![
                FieldDefinition::required("url", FieldType::Text, "Location of the image"),
                FieldDefinition::optional("caption", FieldType::Text, "Caption of the image"),
            ],
        ));
        registry.insert(StructureDefinition::native(
            PDF_CONTENT,
            vec![FieldDefinition::required("url", FieldType::Text, "Location of the document")],
        ));
        registry.insert(StructureDefinition::native(
            TEXT_AND_IMAGES_CONTENT,
            vec![
                FieldDefinition::optional("text", FieldType::Text, "Text part"),
                FieldDefinition::optional("images", FieldType::List(Some(Box::new(image()))), "Image parts"),
            ],
        ));
        registry.insert(StructureDefinition::native(
            PAGE_CONTENT,
            vec![
                FieldDefinition::required(
                    "text_and_images",
                    FieldType::Nested(TEXT_AND_IMAGES_CONTENT.to_string()),
                    "Extracted page content",
                ),
                FieldDefinition::optional("page_view", image(), "Rendered view of the page"),
            ],
        ));
        registry.insert(StructureDefinition::native(
            LLM_PROMPT_CONTENT,
            vec![
                FieldDefinition::optional("system_text", FieldType::Text, "System prompt"),
                FieldDefinition::optional("user_text", FieldType::Text, "User prompt"),
                FieldDefinition::optional("user_images", FieldType::List(Some(Box::new(image()))), "Prompt images"),
            ],
        ));
        registry.insert(StructureDefinition::native(
            IMG_GEN_PROMPT_CONTENT,
            vec![FieldDefinition::required("positive_text", FieldType::Text, "Image description")],
        ));
        registry.insert(StructureDefinition::native(DYNAMIC_CONTENT, Vec::new()));
        registry
    }

    fn insert(&mut self, definition: StructureDefinition) {
        self.structures.insert(definition.name.clone(), Arc::new(definition));
    }

    /// Registers a structure. Names are unique across domains.
    pub fn register(&mut self, definition: StructureDefinition) -> Result<(), DefinitionError> {
        if self.structures.contains_key(&definition.name) {
            return Err(DefinitionError::DuplicateStructure {
                structure: definition.name,
            });
        }
        self.insert(definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<StructureDefinition>> {
        self.structures.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.structures.contains_key(name)
    }

    /// Removes a non-native structure.
    pub fn remove(&mut self, name: &str) -> Option<Arc<StructureDefinition>> {
        match self.structures.get(name) {
            Some(definition) if !definition.native => self.structures.shift_remove(name),
            _ => None,
        }
    }

    /// Names from `name` up to the root, following `extends`. Stops on unknown parents and cycles.
    pub fn ancestry(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(name.to_string());
        while let Some(structure_name) = current {
            if !seen.insert(structure_name.clone()) {
                break;
            }
            current = self.structures.get(&structure_name).and_then(|definition| definition.extends.clone());
            chain.push(structure_name);
        }
        chain
    }

    /// True when `tested` is `wanted` or extends it through its parent chain.
    pub fn is_subtype(&self, tested: &str, wanted: &str) -> bool {
        self.ancestry(tested).iter().any(|name| name == wanted)
    }

    /// True when the `extends` chain of `name` ends at the content root.
    pub fn is_content_structure(&self, name: &str) -> bool {
        self.ancestry(name).last().map(String::as_str) == Some(STRUCTURED_CONTENT)
    }

    /// Every field of `name`, inherited fields first.
    pub fn all_fields(&self, name: &str) -> IndexMap<String, FieldDefinition> {
        let mut fields = IndexMap::new();
        for structure_name in self.ancestry(name).iter().rev() {
            if let Some(definition) = self.structures.get(structure_name) {
                for (field_name, field) in &definition.fields {
                    fields.insert(field_name.clone(), field.clone());
                }
            }
        }
        fields
    }

    /// Every required field of `wanted` exists in `tested` with the same type, and at least one
    /// field of `wanted` is matched. Two built-in structures never match on fields alone.
    pub fn has_compatible_fields(&self, tested: &str, wanted: &str) -> bool {
        let is_native = |name: &str| self.structures.get(name).is_some_and(|definition| definition.native);
        if is_native(tested) && is_native(wanted) {
            return false;
        }
        let tested_fields = self.all_fields(tested);
        let wanted_fields = self.all_fields(wanted);
        let matches = |field: &FieldDefinition| {
            tested_fields
                .get(&field.name)
                .is_some_and(|candidate| candidate.field_type == field.field_type)
        };
        wanted_fields.values().any(matches) && wanted_fields.values().filter(|field| field.required).all(matches)
    }

    /// Same fields with the same types, requiredness and descriptions.
    pub fn structurally_equivalent(&self, left: &str, right: &str) -> bool {
        let left_fields = self.all_fields(left);
        let right_fields = self.all_fields(right);
        left_fields.len() == right_fields.len()
            && left_fields.iter().all(|(name, field)| {
                right_fields.get(name).is_some_and(|other| {
                    other.field_type == field.field_type && other.required == field.required && other.description == field.description
                })
            })
    }

    /// Validates a record against a structure and returns it with defaults filled in.
    pub fn validate_record(&self, structure: &str, record: &Map<String, Value>) -> Result<IndexMap<String, Value>, RecordValidationError> {
        let fields = self.all_fields(structure);
        if !self.structures.contains_key(structure) {
            return Err(record_error(structure, "", "unknown structure"));
        }
        if let Some(unknown) = record.keys().find(|key| !fields.contains_key(*key)) {
            return Err(record_error(structure, unknown, "field is not part of the structure"));
        }

        let mut validated = IndexMap::new();
        for (name, field) in &fields {
            let value = match record.get(name) {
                Some(Value::Null) | None => match &field.default {
                    Some(default) => default.clone(),
                    None if field.required => return Err(record_error(structure, name, "required field is missing")),
                    None => continue,
                },
                Some(value) => value.clone(),
            };
            self.check_value(structure, name, &field.field_type, &value)?;
            if !field.choices.is_empty() {
                let allowed = value.as_str().is_some_and(|text| field.choices.iter().any(|choice| choice == text));
                if !allowed {
                    return Err(record_error(
                        structure,
                        name,
                        &format!("value {value} is not one of [{}]", field.choices.join(", ")),
                    ));
                }
            }
            validated.insert(name.clone(), value);
        }
        Ok(validated)
    }

    fn check_value(&self, structure: &str, field: &str, field_type: &FieldType, value: &Value) -> Result<(), RecordValidationError> {
        let matches = match field_type {
            FieldType::Text => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Number => value.is_number(),
            FieldType::Date => value.as_str().is_some_and(is_valid_date),
            FieldType::List(item_type) => {
                let Some(items) = value.as_array() else {
                    return Err(record_error(structure, field, &format!("expected {field_type}, got {value}")));
                };
                if let Some(item_type) = item_type {
                    for item in items {
                        self.check_value(structure, field, item_type, item)?;
                    }
                }
                true
            }
            FieldType::Dict { key, value: value_type } => {
                let Some(entries) = value.as_object() else {
                    return Err(record_error(structure, field, &format!("expected {field_type}, got {value}")));
                };
                for (entry_key, entry_value) in entries {
                    self.check_value(structure, field, key, &Value::String(entry_key.clone()))?;
                    if let Some(value_type) = value_type {
                        self.check_value(structure, field, value_type, entry_value)?;
                    }
                }
                true
            }
            FieldType::Nested(nested) => {
                let Some(object) = value.as_object() else {
                    return Err(record_error(structure, field, &format!("expected {nested} record, got {value}")));
                };
                self.validate_record(nested, object).map_err(|error| {
                    record_error(structure, &format!("{field}.{}", error.field), &error.message)
                })?;
                true
            }
        };
        if matches {
            Ok(())
        } else {
            Err(record_error(structure, field, &format!("expected {field_type}, got {value}")))
        }
    }
}

/// Accepts ISO dates and RFC 3339 timestamps.
pub fn is_valid_date(text: &str) -> bool {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok() || chrono::DateTime::parse_from_rfc3339(text).is_ok()
}

fn record_error(structure: &str, field: &str, message: &str) -> RecordValidationError {
    RecordValidationError {
        structure: structure.to_string(),
        field: field.to_string(),
        message: message.to_string(),
    }
}
