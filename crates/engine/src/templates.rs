//! Template rendering capability.
//!
//! Templates interpolate `${{ expression }}` segments into text. The engine only depends on the
//! [`TemplateEngine`] trait: input resolution needs the static variable extraction as much as
//! the rendering itself.

use std::fmt;

use crate::error::TemplatingError;
use crate::field_paths::parse_path;
use crate::memory::WorkingMemory;
use crate::resolve::{Expression, format_value, normalize_expression, parse_expression};

/// Rendering and static analysis of prompt templates and condition expressions.
pub trait TemplateEngine: Send + Sync + fmt::Debug {
    /// Renders `source`, substituting every `${{ }}` segment.
    fn render(&self, source: &str, memory: &WorkingMemory) -> Result<String, TemplatingError>;

    /// Evaluates a bare expression (optionally wrapped in `${{ }}`) to its text form.
    fn evaluate_expression(&self, expression: &str, memory: &WorkingMemory) -> Result<String, TemplatingError>;

    /// Root variables referenced by a template.
    fn required_variables(&self, source: &str) -> Result<Vec<String>, TemplatingError>;

    /// Root variables referenced by a bare expression.
    fn expression_variables(&self, expression: &str) -> Result<Vec<String>, TemplatingError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    Literal(String),
    Expression(String),
}

/// Splits a template into literal and expression segments.
///
/// Expressions do not include the `${{` / `}}` delimiters.
pub fn parse_template(source: &str) -> Result<Vec<TemplateSegment>, TemplatingError> {
    let mut segments = Vec::new();
    let mut remainder = source;

    while let Some(start) = remainder.find("${{") {
        if start > 0 {
            segments.push(TemplateSegment::Literal(remainder[..start].to_string()));
        }
        let after_start = &remainder[start + 3..];
        let Some(end) = after_start.find("}}") else {
            return Err(TemplatingError::syntax(source, "unclosed '${{' delimiter"));
        };
        let expression = after_start[..end].trim();
        if expression.is_empty() {
            return Err(TemplatingError::syntax(source, "empty '${{ }}' expression"));
        }
        segments.push(TemplateSegment::Expression(expression.to_string()));
        remainder = &after_start[end + 2..];
    }
    if !remainder.is_empty() {
        segments.push(TemplateSegment::Literal(remainder.to_string()));
    }
    Ok(segments)
}

/// Default engine for the `${{ path }}` template syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct DollarBraceTemplates;

impl DollarBraceTemplates {
    fn render_expression(&self, expression: &str, memory: &WorkingMemory, source: &str) -> Result<String, TemplatingError> {
        let parsed = parse_expression(expression)?;
        // A bare variable renders through its content so lists and records read naturally.
        if let Expression::Path(path) = &parsed
            && parse_path(path).is_some_and(|segments| segments.len() == 1)
        {
            let stuff = memory.get_stuff(path).map_err(|error| TemplatingError::Undefined {
                source_text: source.to_string(),
                variable: path.clone(),
                detail: error.to_string(),
            })?;
            return Ok(stuff.content.render_text());
        }
        Ok(format_value(&parsed.evaluate(memory, source)?))
    }
}

impl TemplateEngine for DollarBraceTemplates {
    fn render(&self, source: &str, memory: &WorkingMemory) -> Result<String, TemplatingError> {
        let mut rendered = String::with_capacity(source.len());
        for segment in parse_template(source)? {
            match segment {
                TemplateSegment::Literal(text) => rendered.push_str(&text),
                TemplateSegment::Expression(expression) => rendered.push_str(&self.render_expression(&expression, memory, source)?),
            }
        }
        Ok(rendered)
    }

    fn evaluate_expression(&self, expression: &str, memory: &WorkingMemory) -> Result<String, TemplatingError> {
        let normalized = normalize_expression(expression);
        let parsed = parse_expression(&normalized)?;
        Ok(format_value(&parsed.evaluate(memory, expression)?))
    }

    fn required_variables(&self, source: &str) -> Result<Vec<String>, TemplatingError> {
        let mut variables: Vec<String> = Vec::new();
        for segment in parse_template(source)? {
            if let TemplateSegment::Expression(expression) = segment {
                for variable in parse_expression(&expression)?.variables() {
                    if !variables.contains(&variable) {
                        variables.push(variable);
                    }
                }
            }
        }
        Ok(variables)
    }

    fn expression_variables(&self, expression: &str) -> Result<Vec<String>, TemplatingError> {
        Ok(parse_expression(&normalize_expression(expression))?.variables())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{ConceptLibrary, NativeConceptCode};
    use crate::content::StuffContent;
    use crate::stuff::Stuff;

    fn memory() -> WorkingMemory {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        memory.set_stuff(
            "topic",
            Stuff::new("topic", library.native(NativeConceptCode::Text), StuffContent::text("rust")),
        );
        memory.set_stuff(
            "facts",
            Stuff::new(
                "facts",
                library.native(NativeConceptCode::Text),
                StuffContent::list(vec![StuffContent::text("fast"), StuffContent::text("safe")]),
            ),
        );
        memory
    }

    #[test]
    fn renders_variables_and_paths() {
        let rendered = DollarBraceTemplates
            .render("Write about ${{ topic }}:\n${{ facts }}\n(${{ topic.text }})", &memory())
            .expect("render");
        assert_eq!(rendered, "Write about rust:\nfast\nsafe\n(rust)");
    }

    #[test]
    fn required_variables_are_roots_in_order() {
        let variables = DollarBraceTemplates
            .required_variables("${{ b.x }} and ${{ a }} then ${{ b.y == a }}")
            .expect("variables");
        assert_eq!(variables, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn syntax_errors_carry_the_template_source() {
        let Err(TemplatingError::Syntax { source_text, .. }) = DollarBraceTemplates.required_variables("Hello ${{ name") else {
            panic!("expected syntax error");
        };
        assert_eq!(source_text, "Hello ${{ name");
        assert!(DollarBraceTemplates.required_variables("${{ }}").is_err());
    }

    #[test]
    fn expressions_render_booleans_as_text() {
        let value = DollarBraceTemplates
            .evaluate_expression("${{ topic == 'rust' }}", &memory())
            .expect("evaluate");
        assert_eq!(value, "true");
    }

    #[test]
    fn undefined_variables_fail_rendering() {
        let error = DollarBraceTemplates.render("${{ nope }}", &memory()).unwrap_err();
        assert!(matches!(error, TemplatingError::Undefined { .. }));
    }
}
