//! Placeholder content for dry runs.
//!
//! A dry run swaps the real backend for [`DryRunContentGenerator`], which answers every call with
//! schema-valid placeholders and never leaves the process. The same placeholders seed the working
//! memory of [`dry_run_pipe`](crate::executor::dry_run_pipe).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::backend::{ContentGenerator, DocumentSource, ObjectSchema};
use crate::concept::Concept;
use crate::content::{ImageContent, LlmPromptContent, PageContent, StuffContent, TextAndImagesContent};
use crate::error::{BackendError, PipeRunError, RecordValidationError};
use crate::libraries::Libraries;
use crate::memory::WorkingMemory;
use crate::pipe::{InputRequirements, Multiplicity};
use crate::structure::{self, FieldDefinition, FieldType, StructureRegistry};
use crate::stuff::Stuff;

const PLACEHOLDER_DATE: &str = "2024-01-01";
const PLACEHOLDER_URL: &str = "https://dry-run.invalid";

#[derive(Debug, Clone)]
pub struct DryRunContentGenerator {
    libraries: Arc<Libraries>,
    list_size: usize,
}

impl DryRunContentGenerator {
    pub fn new(libraries: Arc<Libraries>, list_size: usize) -> Self {
        Self { libraries, list_size }
    }

    fn object(&self, schema: &ObjectSchema) -> Value {
        placeholder_fields(self.libraries.structures(), schema.fields.values(), self.list_size)
    }
}

#[async_trait]
impl ContentGenerator for DryRunContentGenerator {
    async fn generate_text(&self, prompt: &LlmPromptContent) -> Result<String, BackendError> {
        let excerpt: String = prompt.user_text.as_deref().unwrap_or_default().chars().take(40).collect();
        Ok(format!("dry run text for: {excerpt}"))
    }

    async fn generate_object(&self, _prompt: &LlmPromptContent, schema: &ObjectSchema) -> Result<Value, BackendError> {
        Ok(self.object(schema))
    }

    async fn generate_objects(
        &self,
        _prompt: &LlmPromptContent,
        schema: &ObjectSchema,
        count: Option<usize>,
    ) -> Result<Vec<Value>, BackendError> {
        Ok((0..count.unwrap_or(self.list_size)).map(|_| self.object(schema)).collect())
    }

    async fn generate_images(&self, _prompt: &str, count: usize) -> Result<Vec<ImageContent>, BackendError> {
        Ok((0..count).map(placeholder_image).collect())
    }

    async fn extract_pages(&self, document: &DocumentSource, page_views: bool) -> Result<Vec<PageContent>, BackendError> {
        Ok((0..self.list_size)
            .map(|index| PageContent {
                text_and_images: TextAndImagesContent {
                    text: Some(format!("dry run page {} of {}", index + 1, document.url())),
                    images: Vec::new(),
                },
                page_view: page_views.then(|| placeholder_image(index)),
            })
            .collect())
    }
}

fn placeholder_image(index: usize) -> ImageContent {
    ImageContent {
        url: format!("{PLACEHOLDER_URL}/image-{index}.png"),
        caption: None,
    }
}

/// Placeholder JSON for one field: its default, else its first choice, else a value of its type.
pub fn placeholder_field_value(structures: &StructureRegistry, field: &FieldDefinition, list_size: usize) -> Value {
    placeholder_field(structures, field, list_size)
}

fn placeholder_field(structures: &StructureRegistry, field: &FieldDefinition, list_size: usize) -> Value {
    if let Some(default) = &field.default {
        return default.clone();
    }
    if let Some(choice) = field.choices.first() {
        return Value::String(choice.clone());
    }
    placeholder_of_type(structures, &field.field_type, &field.name, list_size)
}

/// Nested structures only reference structures registered before them, so recursion ends.
fn placeholder_of_type(structures: &StructureRegistry, field_type: &FieldType, name: &str, list_size: usize) -> Value {
    match field_type {
        FieldType::Text => Value::String(format!("dry run {name}")),
        FieldType::Integer => json!(1),
        FieldType::Boolean => Value::Bool(false),
        FieldType::Number => json!(1.0),
        FieldType::Date => Value::String(PLACEHOLDER_DATE.to_string()),
        FieldType::List(None) => Value::Array(Vec::new()),
        FieldType::List(Some(item)) => Value::Array(
            (0..list_size)
                .map(|_| placeholder_of_type(structures, item, name, list_size))
                .collect(),
        ),
        FieldType::Dict { .. } => Value::Object(Map::new()),
        FieldType::Nested(structure_name) => placeholder_fields(structures, structures.all_fields(structure_name).values(), list_size),
    }
}

fn placeholder_fields<'a>(
    structures: &StructureRegistry,
    fields: impl Iterator<Item = &'a FieldDefinition>,
    list_size: usize,
) -> Value {
    Value::Object(
        fields
            .map(|field| (field.name.clone(), placeholder_field(structures, field, list_size)))
            .collect(),
    )
}

/// Placeholder content of one `concept` value.
pub fn placeholder_content(concept: &Concept, structures: &StructureRegistry, list_size: usize) -> Result<StuffContent, RecordValidationError> {
    let label = concept.concept_string();
    let content = match concept.structure_name.as_str() {
        structure::TEXT_CONTENT => StuffContent::text(format!("dry run {label}")),
        structure::NUMBER_CONTENT => StuffContent::Number { number: 1.0 },
        structure::IMAGE_CONTENT => StuffContent::Image(placeholder_image(0)),
        structure::PDF_CONTENT => StuffContent::Pdf {
            url: format!("{PLACEHOLDER_URL}/document.pdf"),
        },
        structure::TEXT_AND_IMAGES_CONTENT => StuffContent::TextAndImages(TextAndImagesContent {
            text: Some(format!("dry run {label}")),
            images: Vec::new(),
        }),
        structure::PAGE_CONTENT => StuffContent::Page(PageContent {
            text_and_images: TextAndImagesContent {
                text: Some(format!("dry run {label}")),
                images: Vec::new(),
            },
            page_view: None,
        }),
        structure::LLM_PROMPT_CONTENT => StuffContent::LlmPrompt(LlmPromptContent {
            system_text: None,
            user_text: Some(format!("dry run {label}")),
            user_images: Vec::new(),
        }),
        structure::IMG_GEN_PROMPT_CONTENT => StuffContent::ImgGenPrompt {
            positive_text: format!("dry run {label}"),
        },
        structure::DYNAMIC_CONTENT => StuffContent::Dynamic {
            value: Value::String(format!("dry run {label}")),
        },
        other => {
            let record = placeholder_fields(structures, structures.all_fields(other).values(), list_size);
            StuffContent::from_record(other, &record, structures)?
        }
    };
    Ok(content)
}

/// Placeholder stuff for a value of `concept` with the given multiplicity.
pub fn placeholder_stuff(
    name: &str,
    concept: Arc<Concept>,
    multiplicity: Multiplicity,
    structures: &StructureRegistry,
    list_size: usize,
) -> Result<Stuff, RecordValidationError> {
    let content = match multiplicity {
        Multiplicity::Single => placeholder_content(&concept, structures, list_size)?,
        Multiplicity::List => StuffContent::list(
            (0..list_size)
                .map(|_| placeholder_content(&concept, structures, list_size))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Multiplicity::Fixed(count) => StuffContent::list(
            (0..count)
                .map(|_| placeholder_content(&concept, structures, list_size))
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(Stuff::new(name, concept, content))
}

/// Working memory holding one placeholder per requirement.
pub fn placeholder_memory(libraries: &Libraries, requirements: &InputRequirements, list_size: usize) -> Result<WorkingMemory, PipeRunError> {
    let mut memory = WorkingMemory::new();
    for requirement in requirements.iter() {
        let stuff = placeholder_stuff(
            &requirement.variable_name,
            requirement.concept.clone(),
            requirement.multiplicity,
            libraries.structures(),
            list_size,
        )?;
        memory.add_new_stuff(&requirement.variable_name, stuff, &[])?;
    }
    Ok(memory)
}

/// Outcome of dry-running several pipes.
#[derive(Debug, Default)]
pub struct DryRunReport {
    pub succeeded: Vec<String>,
    pub failures: Vec<DryRunFailure>,
}

#[derive(Debug)]
pub struct DryRunFailure {
    pub pipe_code: String,
    pub error: PipeRunError,
}

impl DryRunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::NativeConceptCode;
    use crate::structure::StructureDefinition;
    use indexmap::IndexMap;

    fn registry_with_recipe() -> StructureRegistry {
        let mut registry = StructureRegistry::new();
        let mut fields = IndexMap::new();
        fields.insert("title".to_string(), FieldDefinition::required("title", FieldType::Text, "Title"));
        fields.insert(
            "steps".to_string(),
            FieldDefinition::required("steps", FieldType::List(Some(Box::new(FieldType::Text))), "Steps"),
        );
        fields.insert("cooked_on".to_string(), FieldDefinition::optional("cooked_on", FieldType::Date, "Date"));
        let mut difficulty = FieldDefinition::required("difficulty", FieldType::Text, "Difficulty");
        difficulty.choices = vec!["easy".to_string(), "hard".to_string()];
        fields.insert("difficulty".to_string(), difficulty);
        registry
            .register(StructureDefinition {
                name: "Recipe".to_string(),
                extends: Some(structure::STRUCTURED_CONTENT.to_string()),
                fields,
                native: false,
            })
            .expect("register");
        registry
    }

    #[test]
    fn structured_placeholders_validate_against_their_structure() {
        let registry = registry_with_recipe();
        let concept = Concept {
            code: "Recipe".to_string(),
            domain: "kitchen".to_string(),
            description: "A recipe".to_string(),
            structure_name: "Recipe".to_string(),
            refines: None,
        };
        let content = placeholder_content(&concept, &registry, 2).expect("placeholder");
        let StuffContent::Structured { fields, .. } = content else {
            panic!("expected structured content");
        };
        assert_eq!(fields["difficulty"], json!("easy"));
        assert_eq!(fields["steps"].as_array().map(Vec::len), Some(2));
        assert!(structure::is_valid_date(fields["cooked_on"].as_str().unwrap_or_default()));
    }

    #[test]
    fn deeply_nested_structures_get_full_placeholders() {
        let mut registry = StructureRegistry::new();
        for level in 0..7 {
            let field = if level == 0 {
                FieldDefinition::required("leaf", FieldType::Text, "Leaf")
            } else {
                FieldDefinition::required("child", FieldType::Nested(format!("Level{}", level - 1)), "Child")
            };
            registry
                .register(StructureDefinition {
                    name: format!("Level{level}"),
                    extends: Some(structure::STRUCTURED_CONTENT.to_string()),
                    fields: IndexMap::from([(field.name.clone(), field)]),
                    native: false,
                })
                .expect("register level");
        }
        let concept = Concept {
            code: "Level6".to_string(),
            domain: "deep".to_string(),
            description: "Deep".to_string(),
            structure_name: "Level6".to_string(),
            refines: None,
        };
        let content = placeholder_content(&concept, &registry, 1).expect("deep placeholder");
        let StuffContent::Structured { fields, .. } = content else {
            panic!("expected structured content");
        };
        let mut value = fields["child"].clone();
        for _ in 0..5 {
            value = value["child"].clone();
        }
        assert_eq!(value["leaf"], json!("dry run leaf"));
    }

    #[test]
    fn fixed_multiplicity_controls_list_length() {
        let registry = StructureRegistry::new();
        let stuff = placeholder_stuff(
            "pictures",
            Arc::new(NativeConceptCode::Image.to_concept()),
            Multiplicity::Fixed(5),
            &registry,
            3,
        )
        .expect("placeholder");
        assert_eq!(stuff.list_len(), Some(5));
    }

    #[tokio::test]
    async fn generator_honors_requested_counts() {
        let generator = DryRunContentGenerator::new(Arc::new(Libraries::new()), 2);
        let images = generator.generate_images("a cat", 4).await.expect("images");
        assert_eq!(images.len(), 4);
        let pages = generator
            .extract_pages(&DocumentSource::Pdf { url: "file.pdf".to_string() }, true)
            .await
            .expect("pages");
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|page| page.page_view.is_some()));
    }
}
