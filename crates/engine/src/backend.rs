//! Content-generation capability injected into the engine.
//!
//! Operators never talk to a vendor directly; they call a [`ContentGenerator`]. Real runs use
//! whatever implementation the host provides, dry runs use
//! [`DryRunContentGenerator`](crate::dry_run::DryRunContentGenerator).

use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::content::{ImageContent, LlmPromptContent, PageContent};
use crate::error::BackendError;
use crate::structure::{FieldDefinition, StructureRegistry};

/// Shape a structured generation must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub structure: String,
    pub fields: IndexMap<String, FieldDefinition>,
}

impl ObjectSchema {
    /// Schema of `structure`, including inherited fields.
    pub fn of(structure: &str, structures: &StructureRegistry) -> Self {
        Self {
            structure: structure.to_string(),
            fields: structures.all_fields(structure),
        }
    }
}

/// Document handed to page extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Image { url: String },
    Pdf { url: String },
}

impl DocumentSource {
    pub fn url(&self) -> &str {
        match self {
            DocumentSource::Image { url } | DocumentSource::Pdf { url } => url,
        }
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync + fmt::Debug {
    async fn generate_text(&self, prompt: &LlmPromptContent) -> Result<String, BackendError>;

    /// One record matching `schema`, as a JSON object.
    async fn generate_object(&self, prompt: &LlmPromptContent, schema: &ObjectSchema) -> Result<Value, BackendError>;

    /// `count` records, or as many as the backend decides when `count` is `None`.
    async fn generate_objects(
        &self,
        prompt: &LlmPromptContent,
        schema: &ObjectSchema,
        count: Option<usize>,
    ) -> Result<Vec<Value>, BackendError>;

    async fn generate_images(&self, prompt: &str, count: usize) -> Result<Vec<ImageContent>, BackendError>;

    async fn extract_pages(&self, document: &DocumentSource, page_views: bool) -> Result<Vec<PageContent>, BackendError>;
}

/// Backend for hosts that only ever dry-run. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableGenerator;

impl UnavailableGenerator {
    fn unavailable<T>(operation: &str) -> Result<T, BackendError> {
        Err(BackendError::Unavailable {
            message: format!("no content generator configured for {operation}"),
        })
    }
}

#[async_trait]
impl ContentGenerator for UnavailableGenerator {
    async fn generate_text(&self, _prompt: &LlmPromptContent) -> Result<String, BackendError> {
        Self::unavailable("text generation")
    }

    async fn generate_object(&self, _prompt: &LlmPromptContent, _schema: &ObjectSchema) -> Result<Value, BackendError> {
        Self::unavailable("object generation")
    }

    async fn generate_objects(
        &self,
        _prompt: &LlmPromptContent,
        _schema: &ObjectSchema,
        _count: Option<usize>,
    ) -> Result<Vec<Value>, BackendError> {
        Self::unavailable("object generation")
    }

    async fn generate_images(&self, _prompt: &str, _count: usize) -> Result<Vec<ImageContent>, BackendError> {
        Self::unavailable("image generation")
    }

    async fn extract_pages(&self, _document: &DocumentSource, _page_views: bool) -> Result<Vec<PageContent>, BackendError> {
        Self::unavailable("page extraction")
    }
}
