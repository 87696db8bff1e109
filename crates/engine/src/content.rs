//! Stuff content: the tagged union of values that flow between pipes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::RecordValidationError;
use crate::structure::{self, StructureRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TextAndImagesContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub text_and_images: TextAndImagesContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_view: Option<ImageContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LlmPromptContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_text: Option<String>,
    #[serde(default)]
    pub user_images: Vec<ImageContent>,
}

/// Content of a stuff. Immutable once stored: updates replace the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StuffContent {
    Text { text: String },
    Number { number: f64 },
    Image(ImageContent),
    Pdf { url: String },
    TextAndImages(TextAndImagesContent),
    Page(PageContent),
    LlmPrompt(LlmPromptContent),
    ImgGenPrompt { positive_text: String },
    List { items: Vec<StuffContent> },
    Structured { structure: String, fields: IndexMap<String, Value> },
    Dynamic { value: Value },
}

impl StuffContent {
    pub fn text(text: impl Into<String>) -> Self {
        StuffContent::Text { text: text.into() }
    }

    pub fn list(items: Vec<StuffContent>) -> Self {
        StuffContent::List { items }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            StuffContent::Text { .. } => "text",
            StuffContent::Number { .. } => "number",
            StuffContent::Image(_) => "image",
            StuffContent::Pdf { .. } => "pdf",
            StuffContent::TextAndImages(_) => "text_and_images",
            StuffContent::Page(_) => "page",
            StuffContent::LlmPrompt(_) => "llm_prompt",
            StuffContent::ImgGenPrompt { .. } => "img_gen_prompt",
            StuffContent::List { .. } => "list",
            StuffContent::Structured { .. } => "structured",
            StuffContent::Dynamic { .. } => "dynamic",
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, StuffContent::List { .. })
    }

    /// Record view used for attribute-path navigation.
    pub fn to_json(&self) -> Value {
        match self {
            StuffContent::Text { text } => json!({ "text": text }),
            StuffContent::Number { number } => json!({ "number": number }),
            StuffContent::Image(image) => serde_json::to_value(image).unwrap_or(Value::Null),
            StuffContent::Pdf { url } => json!({ "url": url }),
            StuffContent::TextAndImages(content) => serde_json::to_value(content).unwrap_or(Value::Null),
            StuffContent::Page(page) => serde_json::to_value(page).unwrap_or(Value::Null),
            StuffContent::LlmPrompt(prompt) => serde_json::to_value(prompt).unwrap_or(Value::Null),
            StuffContent::ImgGenPrompt { positive_text } => json!({ "positive_text": positive_text }),
            StuffContent::List { items } => Value::Array(items.iter().map(StuffContent::to_json).collect()),
            StuffContent::Structured { fields, .. } => Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            StuffContent::Dynamic { value } => value.clone(),
        }
    }

    /// Value used when the content is referenced as a whole: bare scalars for text and numbers.
    pub fn to_field_value(&self) -> Value {
        match self {
            StuffContent::Text { text } => Value::String(text.clone()),
            StuffContent::Number { number } => json!(number),
            StuffContent::ImgGenPrompt { positive_text } => Value::String(positive_text.clone()),
            StuffContent::List { items } => Value::Array(items.iter().map(StuffContent::to_field_value).collect()),
            other => other.to_json(),
        }
    }

    /// Text rendering used when the content is interpolated into a prompt.
    pub fn render_text(&self) -> String {
        match self {
            StuffContent::Text { text } => text.clone(),
            StuffContent::Number { number } => format_number(*number),
            StuffContent::Image(image) => image.url.clone(),
            StuffContent::Pdf { url } => url.clone(),
            StuffContent::TextAndImages(content) => content.text.clone().unwrap_or_default(),
            StuffContent::Page(page) => page.text_and_images.text.clone().unwrap_or_default(),
            StuffContent::LlmPrompt(prompt) => prompt.user_text.clone().unwrap_or_default(),
            StuffContent::ImgGenPrompt { positive_text } => positive_text.clone(),
            StuffContent::List { items } => items.iter().map(StuffContent::render_text).collect::<Vec<_>>().join("\n"),
            StuffContent::Structured { .. } => serde_json::to_string_pretty(&self.to_json()).unwrap_or_default(),
            StuffContent::Dynamic { value } => match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        }
    }

    /// Images carried by the content, for prompt attachments.
    pub fn images(&self) -> Vec<ImageContent> {
        match self {
            StuffContent::Image(image) => vec![image.clone()],
            StuffContent::TextAndImages(content) => content.images.clone(),
            StuffContent::Page(page) => {
                let mut images = page.text_and_images.images.clone();
                images.extend(page.page_view.clone());
                images
            }
            StuffContent::List { items } => items.iter().flat_map(StuffContent::images).collect(),
            _ => Vec::new(),
        }
    }

    /// Builds content of structure `structure_name` from a JSON value.
    ///
    /// Native structures map to their dedicated variants. Bare strings and numbers are accepted for
    /// text and number content; everything else must be a record valid against the structure.
    pub fn from_record(structure_name: &str, value: &Value, structures: &StructureRegistry) -> Result<StuffContent, RecordValidationError> {
        match (structure_name, value) {
            (structure::TEXT_CONTENT, Value::String(text)) => return Ok(StuffContent::text(text.clone())),
            (structure::NUMBER_CONTENT, Value::Number(number)) => {
                return Ok(StuffContent::Number {
                    number: number.as_f64().unwrap_or_default(),
                });
            }
            (structure::IMG_GEN_PROMPT_CONTENT, Value::String(text)) => {
                return Ok(StuffContent::ImgGenPrompt {
                    positive_text: text.clone(),
                });
            }
            (structure::DYNAMIC_CONTENT, other) => return Ok(StuffContent::Dynamic { value: other.clone() }),
            _ => {}
        }

        let Some(record) = value.as_object() else {
            return Err(RecordValidationError {
                structure: structure_name.to_string(),
                field: String::new(),
                message: format!("expected a record, got {value}"),
            });
        };
        let fields = structures.validate_record(structure_name, record)?;
        let object: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let decode_error = |error: serde_json::Error| RecordValidationError {
            structure: structure_name.to_string(),
            field: String::new(),
            message: error.to_string(),
        };
        let text_field = |name: &str| fields.get(name).and_then(Value::as_str).unwrap_or_default().to_string();

        let content = match structure_name {
            structure::TEXT_CONTENT => StuffContent::text(text_field("text")),
            structure::NUMBER_CONTENT => StuffContent::Number {
                number: fields.get("number").and_then(Value::as_f64).unwrap_or_default(),
            },
            structure::IMAGE_CONTENT => StuffContent::Image(serde_json::from_value(Value::Object(object)).map_err(decode_error)?),
            structure::PDF_CONTENT => StuffContent::Pdf { url: text_field("url") },
            structure::TEXT_AND_IMAGES_CONTENT => {
                StuffContent::TextAndImages(serde_json::from_value(Value::Object(object)).map_err(decode_error)?)
            }
            structure::PAGE_CONTENT => StuffContent::Page(serde_json::from_value(Value::Object(object)).map_err(decode_error)?),
            structure::LLM_PROMPT_CONTENT => StuffContent::LlmPrompt(serde_json::from_value(Value::Object(object)).map_err(decode_error)?),
            structure::IMG_GEN_PROMPT_CONTENT => StuffContent::ImgGenPrompt {
                positive_text: text_field("positive_text"),
            },
            _ => StuffContent::Structured {
                structure: structure_name.to_string(),
                fields,
            },
        };
        Ok(content)
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}
