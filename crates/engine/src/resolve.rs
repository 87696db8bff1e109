//! Condition expression parsing and evaluation against working memory.
//!
//! Supported syntax: attribute paths (`question.category`, `items[0].id`), JSON literals,
//! single-quoted strings, `==`, `!=`, `&&`, `||`, leading `!` and parentheses. Comparison
//! operators other than equality are rejected at parse time.

use serde_json::Value;

use crate::error::TemplatingError;
use crate::field_paths::{is_valid_path, root_variable};
use crate::memory::WorkingMemory;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Path(String),
    Not(Box<Expression>),
    Equals(Box<Expression>, Box<Expression>),
    NotEquals(Box<Expression>, Box<Expression>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
}

/// Trims whitespace and strips an outer `${{ ... }}` wrapper when present.
pub fn normalize_expression(raw_expression: &str) -> String {
    let trimmed = raw_expression.trim();
    if let Some(stripped) = trimmed.strip_prefix("${{") {
        let inner = stripped.trim();
        let inner = inner.strip_suffix("}}").unwrap_or(inner);
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn parse_expression(source: &str) -> Result<Expression, TemplatingError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(TemplatingError::syntax(source, "expression cannot be empty"));
    }
    if contains_operator(trimmed, "===") || contains_operator(trimmed, "!==") {
        return Err(TemplatingError::syntax(
            source,
            "strict equality operators are unsupported; use '==' or '!='",
        ));
    }
    if contains_operator(trimmed, ">=")
        || contains_operator(trimmed, "<=")
        || contains_operator(trimmed, ">")
        || contains_operator(trimmed, "<")
    {
        return Err(TemplatingError::syntax(
            source,
            "unsupported comparison operator; only '==', '!=', '&&', '||' and '!' are supported",
        ));
    }
    parse_node(trimmed, source)
}

fn parse_node(expression: &str, source: &str) -> Result<Expression, TemplatingError> {
    let expression = expression.trim();
    if let Some(parts) = split_expression(expression, "||") {
        return Ok(Expression::Or(
            parts.into_iter().map(|part| parse_node(part, source)).collect::<Result<_, _>>()?,
        ));
    }
    if let Some(parts) = split_expression(expression, "&&") {
        return Ok(Expression::And(
            parts.into_iter().map(|part| parse_node(part, source)).collect::<Result<_, _>>()?,
        ));
    }

    let (negations, inner) = strip_leading_negations(expression);
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(TemplatingError::syntax(source, "expression cannot end with negation operator"));
    }
    if negations > 0 {
        let mut node = parse_node(inner, source)?;
        for _ in 0..negations {
            node = Expression::Not(Box::new(node));
        }
        return Ok(node);
    }

    if let Some(unwrapped) = strip_enclosing_parentheses(inner) {
        return parse_node(unwrapped, source);
    }

    if let Some(position) = find_top_level_operator(inner, "!=") {
        let (left, right) = comparison_operands(inner, position, source)?;
        return Ok(Expression::NotEquals(Box::new(left), Box::new(right)));
    }
    if let Some(position) = find_top_level_operator(inner, "==") {
        let (left, right) = comparison_operands(inner, position, source)?;
        return Ok(Expression::Equals(Box::new(left), Box::new(right)));
    }

    parse_operand(inner, source)
}

fn comparison_operands(expression: &str, position: usize, source: &str) -> Result<(Expression, Expression), TemplatingError> {
    let left_expression = expression[..position].trim();
    let right_expression = expression[position + 2..].trim();
    if left_expression.is_empty() || right_expression.is_empty() {
        return Err(TemplatingError::syntax(
            source,
            "comparison expression must include both left and right operands",
        ));
    }
    Ok((parse_node(left_expression, source)?, parse_node(right_expression, source)?))
}

fn parse_operand(expression: &str, source: &str) -> Result<Expression, TemplatingError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(TemplatingError::syntax(source, "operand cannot be empty"));
    }
    if let Some(text) = trimmed.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
        return Ok(Expression::Literal(Value::String(text.to_string())));
    }
    if looks_like_json_literal(trimmed) {
        return serde_json::from_str::<Value>(trimmed)
            .map(Expression::Literal)
            .map_err(|error| TemplatingError::syntax(source, format!("invalid literal '{trimmed}': {error}")));
    }
    if !is_valid_path(trimmed) {
        return Err(TemplatingError::syntax(source, format!("unsupported expression '{trimmed}'")));
    }
    Ok(Expression::Path(trimmed.to_string()))
}

impl Expression {
    /// Root variable names referenced by the expression, in first-use order.
    pub fn variables(&self) -> Vec<String> {
        let mut variables = Vec::new();
        self.collect_variables(&mut variables);
        variables
    }

    fn collect_variables(&self, variables: &mut Vec<String>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Path(path) => {
                let root = root_variable(path).to_string();
                if !variables.contains(&root) {
                    variables.push(root);
                }
            }
            Expression::Not(inner) => inner.collect_variables(variables),
            Expression::Equals(left, right) | Expression::NotEquals(left, right) => {
                left.collect_variables(variables);
                right.collect_variables(variables);
            }
            Expression::And(parts) | Expression::Or(parts) => {
                for part in parts {
                    part.collect_variables(variables);
                }
            }
        }
    }

    /// Evaluates against working memory. `source` is only used for error reporting.
    pub fn evaluate(&self, memory: &WorkingMemory, source: &str) -> Result<Value, TemplatingError> {
        match self {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Path(path) => memory.resolve_path_value(path).map_err(|error| TemplatingError::Undefined {
                source_text: source.to_string(),
                variable: root_variable(path).to_string(),
                detail: error.to_string(),
            }),
            Expression::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(memory, source)?))),
            Expression::Equals(left, right) => Ok(Value::Bool(values_equal(
                &left.evaluate(memory, source)?,
                &right.evaluate(memory, source)?,
            ))),
            Expression::NotEquals(left, right) => Ok(Value::Bool(!values_equal(
                &left.evaluate(memory, source)?,
                &right.evaluate(memory, source)?,
            ))),
            Expression::And(parts) => {
                for part in parts {
                    if !is_truthy(&part.evaluate(memory, source)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expression::Or(parts) => {
                for part in parts {
                    if is_truthy(&part.evaluate(memory, source)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
        }
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    left == right || format_value(left) == format_value(right)
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty() && text != "false",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text form of a value: strings unquoted, null empty, everything else as JSON.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(string_value) => string_value.clone(),
        Value::Number(number_value) => number_value.to_string(),
        Value::Bool(boolean_value) => boolean_value.to_string(),
        Value::Null => String::new(),
        other_value => other_value.to_string(),
    }
}

fn looks_like_json_literal(expression: &str) -> bool {
    let starts_like_number = expression
        .chars()
        .next()
        .map(|character| character == '-' || character.is_ascii_digit())
        .unwrap_or(false);
    expression.starts_with('[')
        || expression.starts_with('{')
        || expression.starts_with('"')
        || expression == "null"
        || expression == "true"
        || expression == "false"
        || starts_like_number
}

fn strip_enclosing_parentheses(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    // `(a) == (b)` starts and ends with parentheses without being enclosed by one pair.
    let mut depth = 0i32;
    for character in inner.chars() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    Some(inner)
}

fn split_expression<'a>(expression: &'a str, operator: &str) -> Option<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let length = expression.len();

    while start < length {
        if let Some(relative_index) = find_top_level_operator(&expression[start..], operator) {
            let absolute_index = start + relative_index;
            parts.push(expression[start..absolute_index].trim());
            start = absolute_index + operator.len();
        } else {
            parts.push(expression[start..].trim());
            break;
        }
    }

    if parts.len() > 1 { Some(parts) } else { None }
}

fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

fn contains_operator(expression: &str, operator: &str) -> bool {
    find_top_level_operator(expression, operator).is_some()
}

fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            '(' if !in_single_quote && !in_double_quote => {
                depth += 1;
                continue;
            }
            ')' if !in_single_quote && !in_double_quote => {
                if depth > 0 {
                    depth -= 1;
                }
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concept::{ConceptLibrary, NativeConceptCode};
    use crate::content::StuffContent;
    use crate::stuff::Stuff;
    use serde_json::json;

    fn memory() -> WorkingMemory {
        let library = ConceptLibrary::new();
        let mut memory = WorkingMemory::new();
        memory.set_stuff(
            "ticket",
            Stuff::new(
                "ticket",
                library.native(NativeConceptCode::Anything),
                StuffContent::Dynamic {
                    value: json!({ "category": "billing", "urgent": false, "tags": [] }),
                },
            ),
        );
        memory
    }

    #[test]
    fn evaluates_equality_and_boolean_operators() {
        let memory = memory();
        let cases = [
            ("ticket.category == 'billing'", true),
            ("ticket.category != \"billing\"", false),
            ("!ticket.urgent && ticket.category == 'billing'", true),
            ("ticket.urgent || ticket.tags", false),
            ("!(ticket.urgent || ticket.category == 'sales')", true),
        ];
        for (source, expected) in cases {
            let expression = parse_expression(source).expect(source);
            assert_eq!(expression.evaluate(&memory, source).expect(source), Value::Bool(expected), "{source}");
        }
    }

    #[test]
    fn collects_root_variables_once() {
        let expression = parse_expression("a.b == c || a.d").expect("parse");
        assert_eq!(expression.variables(), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn rejects_unsupported_syntax() {
        assert!(parse_expression("a > 1").is_err());
        assert!(parse_expression("a === b").is_err());
        assert!(parse_expression("a ==").is_err());
        assert!(parse_expression("!").is_err());
        assert!(parse_expression("call(x)").is_err());
    }

    #[test]
    fn undefined_variables_name_the_root() {
        let memory = memory();
        let expression = parse_expression("missing.value").expect("parse");
        let Err(TemplatingError::Undefined { variable, .. }) = expression.evaluate(&memory, "missing.value") else {
            panic!("expected undefined");
        };
        assert_eq!(variable, "missing");
    }

    #[test]
    fn handles_utf8_string_literals() {
        let expression = parse_expression("ticket.category == \"café\" && ticket.category != 'thé'").expect("parse");
        assert_eq!(expression.evaluate(&memory(), "").expect("eval"), Value::Bool(false));
    }
}
