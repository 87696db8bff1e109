//! Named, typed values living in working memory.

use std::sync::Arc;

use uuid::Uuid;

use crate::concept::Concept;
use crate::content::StuffContent;

/// A value instance. A list stuff carries the concept of its items.
#[derive(Debug, Clone, PartialEq)]
pub struct Stuff {
    /// Unique identifier of this value.
    pub code: String,
    pub name: String,
    pub concept: Arc<Concept>,
    pub content: StuffContent,
}

impl Stuff {
    pub fn new(name: impl Into<String>, concept: Arc<Concept>, content: StuffContent) -> Self {
        Self {
            code: Uuid::new_v4().to_string(),
            name: name.into(),
            concept,
            content,
        }
    }

    /// Same value under another name; the code is kept.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn is_list(&self) -> bool {
        self.content.is_list()
    }

    /// Number of items for list content.
    pub fn list_len(&self) -> Option<usize> {
        match &self.content {
            StuffContent::List { items } => Some(items.len()),
            _ => None,
        }
    }
}
