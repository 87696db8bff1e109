//! Attribute path parsing and navigation.
//!
//! Paths look like `variable.field.sub`, with optional array indices written either as
//! `items[0]` or `items.0`. The first segment always names a working-memory variable.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits a path into segments. Returns `None` for malformed paths.
pub fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        let (key, indices) = split_indices(part)?;
        if key.is_empty() && indices.is_empty() {
            return None;
        }
        if !key.is_empty() {
            if !key.chars().all(is_identifier_character) {
                return None;
            }
            segments.push(PathSegment::Key(key.to_string()));
        }
        segments.extend(indices.into_iter().map(PathSegment::Index));
    }

    match segments.first() {
        Some(PathSegment::Key(root)) if root.chars().next().is_some_and(|c| !c.is_ascii_digit()) => Some(segments),
        _ => None,
    }
}

/// Name of the variable a path starts from.
pub fn root_variable(path: &str) -> &str {
    let trimmed = path.trim();
    let end = trimmed.find(['.', '[']).unwrap_or(trimmed.len());
    &trimmed[..end]
}

pub fn is_valid_path(path: &str) -> bool {
    parse_path(path).is_some()
}

/// Follows `segments` inside a JSON value. Numeric keys index into arrays.
pub fn navigate(value: &Value, segments: &[PathSegment]) -> Option<Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let key_end = segment.find('[').unwrap_or(segment.len());
    let key = &segment[..key_end];
    let mut indices = Vec::new();
    let mut rest = &segment[key_end..];
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let close = inner.find(']')?;
        indices.push(inner[..close].trim().parse::<usize>().ok()?);
        rest = &inner[close + 1..];
    }
    Some((key, indices))
}

fn is_identifier_character(character: char) -> bool {
    character.is_ascii_alphanumeric() || character == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_path_supports_dot_and_bracket_indices() {
        assert_eq!(
            parse_path("doc.pages[1].title"),
            Some(vec![
                PathSegment::Key("doc".to_string()),
                PathSegment::Key("pages".to_string()),
                PathSegment::Index(1),
                PathSegment::Key("title".to_string()),
            ])
        );
        assert!(parse_path("doc..title").is_none());
        assert!(parse_path("0.title").is_none());
        assert!(parse_path("doc.pages[x]").is_none());
    }

    #[test]
    fn navigate_indexes_arrays_with_numeric_keys() {
        let value = json!({ "pages": [{ "title": "a" }, { "title": "b" }] });
        let segments = parse_path("pages.1.title").expect("path");
        assert_eq!(navigate(&value, &segments), Some(json!("b")));
        assert_eq!(navigate(&value, &parse_path("pages.5").expect("path")), None);
    }

    #[test]
    fn root_variable_stops_at_first_separator() {
        assert_eq!(root_variable("question.text"), "question");
        assert_eq!(root_variable("items[0]"), "items");
        assert_eq!(root_variable("plain"), "plain");
    }
}
