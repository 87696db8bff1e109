//! Concepts: named structural types of the pipeline type system.

pub mod factory;
pub mod library;

use std::fmt;

use crate::structure;

pub use library::ConceptLibrary;

/// Domain owning the built-in concepts.
pub const NATIVE_DOMAIN: &str = "native";

/// Built-in concepts, each bound to a canonical structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeConceptCode {
    Text,
    Image,
    Pdf,
    TextAndImages,
    Number,
    Page,
    LlmPrompt,
    ImgGenPrompt,
    Dynamic,
    Anything,
}

impl NativeConceptCode {
    pub const ALL: [NativeConceptCode; 10] = [
        NativeConceptCode::Text,
        NativeConceptCode::Image,
        NativeConceptCode::Pdf,
        NativeConceptCode::TextAndImages,
        NativeConceptCode::Number,
        NativeConceptCode::Page,
        NativeConceptCode::LlmPrompt,
        NativeConceptCode::ImgGenPrompt,
        NativeConceptCode::Dynamic,
        NativeConceptCode::Anything,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            NativeConceptCode::Text => "Text",
            NativeConceptCode::Image => "Image",
            NativeConceptCode::Pdf => "PDF",
            NativeConceptCode::TextAndImages => "TextAndImages",
            NativeConceptCode::Number => "Number",
            NativeConceptCode::Page => "Page",
            NativeConceptCode::LlmPrompt => "LLMPrompt",
            NativeConceptCode::ImgGenPrompt => "ImgGenPrompt",
            NativeConceptCode::Dynamic => "Dynamic",
            NativeConceptCode::Anything => "Anything",
        }
    }

    pub fn structure_name(&self) -> &'static str {
        match self {
            NativeConceptCode::Text => structure::TEXT_CONTENT,
            NativeConceptCode::Image => structure::IMAGE_CONTENT,
            NativeConceptCode::Pdf => structure::PDF_CONTENT,
            NativeConceptCode::TextAndImages => structure::TEXT_AND_IMAGES_CONTENT,
            NativeConceptCode::Number => structure::NUMBER_CONTENT,
            NativeConceptCode::Page => structure::PAGE_CONTENT,
            NativeConceptCode::LlmPrompt => structure::LLM_PROMPT_CONTENT,
            NativeConceptCode::ImgGenPrompt => structure::IMG_GEN_PROMPT_CONTENT,
            NativeConceptCode::Dynamic | NativeConceptCode::Anything => structure::DYNAMIC_CONTENT,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            NativeConceptCode::Text => "A text",
            NativeConceptCode::Image => "An image",
            NativeConceptCode::Pdf => "A PDF document",
            NativeConceptCode::TextAndImages => "Text with attached images",
            NativeConceptCode::Number => "A number",
            NativeConceptCode::Page => "A page extracted from a document",
            NativeConceptCode::LlmPrompt => "A prompt for a language model",
            NativeConceptCode::ImgGenPrompt => "A prompt for an image generator",
            NativeConceptCode::Dynamic => "A value whose concept is decided at run time",
            NativeConceptCode::Anything => "Any value",
        }
    }

    pub fn from_code(code: &str) -> Option<NativeConceptCode> {
        Self::ALL.into_iter().find(|native| native.code() == code)
    }

    pub fn concept_string(&self) -> String {
        concept_string(NATIVE_DOMAIN, self.code())
    }

    pub fn to_concept(self) -> Concept {
        Concept {
            code: self.code().to_string(),
            domain: NATIVE_DOMAIN.to_string(),
            description: self.description().to_string(),
            structure_name: self.structure_name().to_string(),
            refines: None,
        }
    }
}

/// Globally unique identifier of a concept.
pub fn concept_string(domain: &str, code: &str) -> String {
    format!("{domain}.{code}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    pub code: String,
    pub domain: String,
    pub description: String,
    pub structure_name: String,
    /// Concept string of the native concept this one refines.
    pub refines: Option<String>,
}

impl Concept {
    pub fn concept_string(&self) -> String {
        concept_string(&self.domain, &self.code)
    }

    pub fn is_native(&self) -> bool {
        self.domain == NATIVE_DOMAIN
    }

    pub fn native_code(&self) -> Option<NativeConceptCode> {
        if self.is_native() { NativeConceptCode::from_code(&self.code) } else { None }
    }

    /// `Dynamic` and `Anything` accept, and are accepted by, every concept.
    pub fn is_wildcard(&self) -> bool {
        matches!(
            self.native_code(),
            Some(NativeConceptCode::Dynamic) | Some(NativeConceptCode::Anything)
        )
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.code)
    }
}
