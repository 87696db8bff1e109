//! Structure synthesis from field schemas.
//!
//! A schema is first rendered into a small structure-definition language and then compiled, so
//! that every failure can be reported against concrete source text:
//!
//! ```text
//! structure Verdict extends StructuredContent {
//!     summary: text doc "Short summary"
//!     score?: integer default "0"
//!     label: text in ["good", "bad"]
//!     tags?: list<text>
//! }
//! ```
//!
//! Compilation checks, in order, that the source is well-formed (syntax errors carry a
//! line/column range), that it declares exactly one structure with the expected name, and that
//! the structure extends the content root.

use indexmap::IndexMap;
use pipewright_types::{FieldBlueprint, FieldTypeBlueprint};
use serde_json::Value;

use super::{FieldDefinition, FieldType, STRUCTURED_CONTENT, StructureDefinition, StructureRegistry};
use crate::error::{SourceLocation, StructureError};

/// Builds a structure named `name` from an inline field schema.
pub fn synthesize(
    name: &str,
    schema: &IndexMap<String, FieldBlueprint>,
    registry: &StructureRegistry,
) -> Result<StructureDefinition, StructureError> {
    let source = render_schema(name, schema);
    compile_source(name, &source, registry)
}

/// Renders a field schema into structure-definition source.
pub fn render_schema(name: &str, schema: &IndexMap<String, FieldBlueprint>) -> String {
    let mut source = format!("structure {name} extends {STRUCTURED_CONTENT} {{\n");
    for (field_name, field) in schema {
        let definition = field.to_definition();
        let marker = if definition.required { "" } else { "?" };
        source.push_str(&format!("    {field_name}{marker}: {}", render_type(&definition)));
        if !definition.choices.is_empty() {
            let choices: Vec<String> = definition.choices.iter().map(|choice| quote(choice)).collect();
            source.push_str(&format!(" in [{}]", choices.join(", ")));
        }
        if let Some(default) = &definition.default {
            source.push_str(&format!(" default {}", quote(&default.to_string())));
        }
        if let Some(description) = &definition.description {
            source.push_str(&format!(" doc {}", quote(description)));
        }
        source.push('\n');
    }
    source.push_str("}\n");
    source
}

fn render_type(definition: &pipewright_types::FieldDefinitionBlueprint) -> String {
    match definition.field_type {
        FieldTypeBlueprint::List => match definition.item_type {
            Some(item) => format!("list<{}>", item.keyword()),
            None => "list".to_string(),
        },
        FieldTypeBlueprint::Dict => {
            let key = definition.key_type.unwrap_or(FieldTypeBlueprint::Text);
            match definition.value_type {
                Some(value) => format!("dict<{}, {}>", key.keyword(), value.keyword()),
                None => format!("dict<{}>", key.keyword()),
            }
        }
        other => other.keyword().to_string(),
    }
}

fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// Compiles structure-definition source and checks it defines `expected_name`.
pub fn compile_source(expected_name: &str, source: &str, registry: &StructureRegistry) -> Result<StructureDefinition, StructureError> {
    let tokens = tokenize(expected_name, source)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        structure_name: expected_name,
        source,
    };
    let mut parsed = parser.parse_file()?;

    let definition_error = |message: String| StructureError::Definition {
        structure_name: expected_name.to_string(),
        message,
        source_text: source.to_string(),
    };

    if parsed.len() != 1 {
        return Err(definition_error(format!("expected exactly one structure, found {}", parsed.len())));
    }
    let definition = parsed.remove(0);
    if definition.name != expected_name {
        return Err(definition_error(format!(
            "expected a structure named '{expected_name}', found '{}'",
            definition.name
        )));
    }

    match definition.extends.as_deref() {
        None => return Err(definition_error(format!("structure must extend {STRUCTURED_CONTENT}"))),
        Some(parent) if parent != STRUCTURED_CONTENT && !registry.is_content_structure(parent) => {
            return Err(definition_error(format!(
                "parent '{parent}' is not a {STRUCTURED_CONTENT} structure"
            )));
        }
        Some(_) => {}
    }

    for field in definition.fields.values() {
        check_field(&definition.name, field, registry).map_err(definition_error)?;
    }
    Ok(definition)
}

fn check_field(structure: &str, field: &FieldDefinition, registry: &StructureRegistry) -> Result<(), String> {
    for nested in nested_references(&field.field_type) {
        if nested == structure || !registry.contains(nested) {
            return Err(format!("field '{}' references unknown structure '{nested}'", field.name));
        }
    }
    if !field.choices.is_empty() && field.field_type != FieldType::Text {
        return Err(format!("field '{}' declares choices but is not a text field", field.name));
    }
    if let Some(default) = &field.default {
        registry
            .check_value(structure, &field.name, &field.field_type, default)
            .map_err(|error| format!("default of field '{}' is invalid: {}", field.name, error.message))?;
        if !field.choices.is_empty() && !default.as_str().is_some_and(|text| field.choices.iter().any(|choice| choice == text)) {
            return Err(format!("default of field '{}' is not one of its choices", field.name));
        }
    }
    Ok(())
}

fn nested_references(field_type: &FieldType) -> Vec<&str> {
    match field_type {
        FieldType::Nested(name) => vec![name.as_str()],
        FieldType::List(Some(item)) => nested_references(item),
        FieldType::Dict { key, value } => {
            let mut references = nested_references(key);
            if let Some(value) = value {
                references.extend(nested_references(value));
            }
            references
        }
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    location: SourceLocation,
}

fn tokenize(structure_name: &str, source: &str) -> Result<Vec<Token>, StructureError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    let mut line = 1usize;
    let mut column = 1usize;

    while let Some((index, character)) = chars.next() {
        let start_line = line;
        let start_column = column;
        let advance = |line: &mut usize, column: &mut usize, character: char| {
            if character == '\n' {
                *line += 1;
                *column = 1;
            } else {
                *column += 1;
            }
        };
        advance(&mut line, &mut column, character);

        if character.is_whitespace() {
            continue;
        }

        if character.is_ascii_alphabetic() || character == '_' {
            let mut ident = character.to_string();
            while let Some(&(_, next)) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    ident.push(next);
                    advance(&mut line, &mut column, next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(ident),
                location: SourceLocation {
                    line: start_line,
                    column: start_column,
                    end_line: line,
                    end_column: column - 1,
                },
            });
            continue;
        }

        if character == '"' {
            let mut escaped = false;
            let mut end = None;
            while let Some((next_index, next)) = chars.next() {
                advance(&mut line, &mut column, next);
                if escaped {
                    escaped = false;
                } else if next == '\\' {
                    escaped = true;
                } else if next == '"' {
                    end = Some(next_index);
                    break;
                } else if next == '\n' {
                    break;
                }
            }
            let location = SourceLocation {
                line: start_line,
                column: start_column,
                end_line: line,
                end_column: column.saturating_sub(1).max(1),
            };
            let Some(end) = end else {
                return Err(syntax_error(structure_name, source, "unterminated string literal", location));
            };
            let literal: String = serde_json::from_str(&source[index..=end])
                .map_err(|error| syntax_error(structure_name, source, &format!("invalid string literal: {error}"), location))?;
            tokens.push(Token {
                kind: TokenKind::Str(literal),
                location,
            });
            continue;
        }

        let location = SourceLocation {
            line: start_line,
            column: start_column,
            end_line: start_line,
            end_column: start_column,
        };
        if matches!(character, '{' | '}' | ':' | '?' | '<' | '>' | ',' | '[' | ']') {
            tokens.push(Token {
                kind: TokenKind::Punct(character),
                location,
            });
        } else {
            return Err(syntax_error(
                structure_name,
                source,
                &format!("unexpected character '{character}'"),
                location,
            ));
        }
    }
    Ok(tokens)
}

fn syntax_error(structure_name: &str, source: &str, message: &str, location: SourceLocation) -> StructureError {
    StructureError::Syntax {
        structure_name: structure_name.to_string(),
        message: message.to_string(),
        location,
        source_text: source.to_string(),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    position: usize,
    structure_name: &'a str,
    source: &'a str,
}

impl Parser<'_> {
    fn parse_file(&mut self) -> Result<Vec<StructureDefinition>, StructureError> {
        let mut structures = Vec::new();
        while self.peek().is_some() {
            structures.push(self.parse_structure()?);
        }
        Ok(structures)
    }

    fn parse_structure(&mut self) -> Result<StructureDefinition, StructureError> {
        self.expect_keyword("structure")?;
        let (name, _) = self.expect_ident("structure name")?;
        let extends = if self.eat_keyword("extends") {
            Some(self.expect_ident("parent structure name")?.0)
        } else {
            None
        };
        self.expect_punct('{')?;

        let mut fields = IndexMap::new();
        while !self.eat_punct('}') {
            let (field_name, location) = self.expect_ident("field name")?;
            let field = self.parse_field(field_name.clone())?;
            if fields.insert(field_name.clone(), field).is_some() {
                return Err(self.error_at(&format!("duplicate field '{field_name}'"), location));
            }
        }
        Ok(StructureDefinition {
            name,
            extends,
            fields,
            native: false,
        })
    }

    fn parse_field(&mut self, name: String) -> Result<FieldDefinition, StructureError> {
        let required = !self.eat_punct('?');
        self.expect_punct(':')?;
        let field_type = self.parse_type()?;

        let mut choices = Vec::new();
        if self.eat_keyword("in") {
            self.expect_punct('[')?;
            loop {
                choices.push(self.expect_string("choice")?.0);
                if !self.eat_punct(',') {
                    break;
                }
            }
            self.expect_punct(']')?;
        }

        let default = if self.eat_keyword("default") {
            let (raw, location) = self.expect_string("default value")?;
            let value = serde_json::from_str::<Value>(&raw)
                .map_err(|error| self.error_at(&format!("default is not valid JSON: {error}"), location))?;
            Some(value)
        } else {
            None
        };

        let description = if self.eat_keyword("doc") {
            Some(self.expect_string("description")?.0)
        } else {
            None
        };

        Ok(FieldDefinition {
            name,
            field_type,
            required,
            default,
            choices,
            description,
        })
    }

    fn parse_type(&mut self) -> Result<FieldType, StructureError> {
        let (keyword, _) = self.expect_ident("field type")?;
        let field_type = match keyword.as_str() {
            "text" => FieldType::Text,
            "integer" => FieldType::Integer,
            "boolean" => FieldType::Boolean,
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "list" => {
                if self.eat_punct('<') {
                    let item = self.parse_type()?;
                    self.expect_punct('>')?;
                    FieldType::List(Some(Box::new(item)))
                } else {
                    FieldType::List(None)
                }
            }
            "dict" => {
                if self.eat_punct('<') {
                    let key = self.parse_type()?;
                    let value = if self.eat_punct(',') { Some(Box::new(self.parse_type()?)) } else { None };
                    self.expect_punct('>')?;
                    FieldType::Dict { key: Box::new(key), value }
                } else {
                    FieldType::Dict {
                        key: Box::new(FieldType::Text),
                        value: None,
                    }
                }
            }
            _ => FieldType::Nested(keyword),
        };
        Ok(field_type)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self, expected: &str) -> Result<Token, StructureError> {
        match self.tokens.get(self.position).cloned() {
            Some(token) => {
                self.position += 1;
                Ok(token)
            }
            None => Err(self.error_at(&format!("unexpected end of input, expected {expected}"), self.end_location())),
        }
    }

    fn eat_punct(&mut self, punct: char) -> bool {
        if self.peek().is_some_and(|token| token.kind == TokenKind::Punct(punct)) {
            self.position += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self
            .peek()
            .is_some_and(|token| matches!(&token.kind, TokenKind::Ident(ident) if ident == keyword))
        {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect_punct(&mut self, punct: char) -> Result<(), StructureError> {
        let token = self.next(&format!("'{punct}'"))?;
        if token.kind == TokenKind::Punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&token, &format!("'{punct}'")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), StructureError> {
        let token = self.next(&format!("'{keyword}'"))?;
        match &token.kind {
            TokenKind::Ident(ident) if ident == keyword => Ok(()),
            _ => Err(self.unexpected(&token, &format!("'{keyword}'"))),
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<(String, SourceLocation), StructureError> {
        let token = self.next(expected)?;
        match token.kind {
            TokenKind::Ident(ident) => Ok((ident, token.location)),
            _ => Err(self.unexpected(&token, expected)),
        }
    }

    fn expect_string(&mut self, expected: &str) -> Result<(String, SourceLocation), StructureError> {
        let token = self.next(expected)?;
        match token.kind {
            TokenKind::Str(text) => Ok((text, token.location)),
            _ => Err(self.unexpected(&token, expected)),
        }
    }

    fn unexpected(&self, token: &Token, expected: &str) -> StructureError {
        let found = match &token.kind {
            TokenKind::Ident(ident) => format!("'{ident}'"),
            TokenKind::Str(text) => format!("string {}", quote(text)),
            TokenKind::Punct(punct) => format!("'{punct}'"),
        };
        self.error_at(&format!("expected {expected}, found {found}"), token.location)
    }

    fn end_location(&self) -> SourceLocation {
        let line = self.source.lines().count().max(1);
        let column = self.source.lines().last().map(|text| text.chars().count() + 1).unwrap_or(1);
        SourceLocation {
            line,
            column,
            end_line: line,
            end_column: column,
        }
    }

    fn error_at(&self, message: &str, location: SourceLocation) -> StructureError {
        syntax_error(self.structure_name, self.source, message, location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipewright_types::FieldDefinitionBlueprint;
    use serde_json::json;

    fn schema(entries: Vec<(&str, FieldBlueprint)>) -> IndexMap<String, FieldBlueprint> {
        entries.into_iter().map(|(name, field)| (name.to_string(), field)).collect()
    }

    #[test]
    fn synthesizes_fields_with_defaults_and_choices() {
        let registry = StructureRegistry::new();
        let schema = schema(vec![
            ("summary", FieldBlueprint::Description("Short summary".to_string())),
            (
                "score",
                FieldBlueprint::Definition(FieldDefinitionBlueprint {
                    field_type: FieldTypeBlueprint::Integer,
                    required: false,
                    default: Some(json!(0)),
                    ..Default::default()
                }),
            ),
            (
                "label",
                FieldBlueprint::Definition(FieldDefinitionBlueprint {
                    choices: vec!["good".to_string(), "bad \"quoted\"".to_string()],
                    ..Default::default()
                }),
            ),
            (
                "tags",
                FieldBlueprint::Definition(FieldDefinitionBlueprint {
                    field_type: FieldTypeBlueprint::List,
                    item_type: Some(FieldTypeBlueprint::Text),
                    ..Default::default()
                }),
            ),
        ]);

        let definition = synthesize("Verdict", &schema, &registry).expect("synthesize");
        assert_eq!(definition.extends.as_deref(), Some(STRUCTURED_CONTENT));
        assert_eq!(definition.fields["summary"].description.as_deref(), Some("Short summary"));
        assert!(!definition.fields["score"].required);
        assert_eq!(definition.fields["score"].default, Some(json!(0)));
        assert_eq!(definition.fields["label"].choices[1], "bad \"quoted\"");
        assert_eq!(definition.fields["tags"].field_type, FieldType::List(Some(Box::new(FieldType::Text))));
    }

    #[test]
    fn invalid_field_name_reports_a_location() {
        let registry = StructureRegistry::new();
        let schema = schema(vec![("first name", FieldBlueprint::Description("Name".to_string()))]);
        let error = synthesize("Person", &schema, &registry).unwrap_err();
        let location = error.location().expect("syntax errors carry a location");
        assert_eq!(location.line, 2);
        assert_eq!(location.column, 11);
        assert!(error.source_text().contains("first name"));
    }

    #[test]
    fn rejects_sources_that_do_not_define_the_expected_structure() {
        let registry = StructureRegistry::new();
        let error = compile_source("Person", "structure Other extends StructuredContent { name: text }", &registry).unwrap_err();
        assert!(matches!(error, StructureError::Definition { .. }));

        let error = compile_source("Person", "structure Person { name: text }", &registry).unwrap_err();
        assert!(matches!(error, StructureError::Definition { .. }));
        assert!(error.location().is_none());
    }

    #[test]
    fn default_must_match_field_type() {
        let registry = StructureRegistry::new();
        let schema = schema(vec![(
            "count",
            FieldBlueprint::Definition(FieldDefinitionBlueprint {
                field_type: FieldTypeBlueprint::Integer,
                default: Some(json!("many")),
                ..Default::default()
            }),
        )]);
        let error = synthesize("Counter", &schema, &registry).unwrap_err();
        assert!(error.to_string().contains("default of field 'count'"));
    }
}
