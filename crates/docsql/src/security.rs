//! Injection guards for generated SQL.
//!
//! Provides:
//! - Identifier validation for table names derived from collection names
//! - Field-path validation for dotted document paths embedded in JSON paths
//! - String literal escaping for SQL string contexts
//!
//! Document values always travel as bound parameters. Only identifiers and
//! JSON path literals are interpolated, and both pass through this module
//! first.

use crate::error::Error;

/// Validate a SQL identifier (table and index names).
///
/// - Must not be empty
/// - At most `max_len` characters
/// - Must start with ASCII letter or underscore
/// - May only contain ASCII alphanumeric characters and underscores
///
/// # Examples
///
/// ```
/// use docsql::security::validate_sql_identifier;
///
/// assert!(validate_sql_identifier("users", 64).is_ok());
/// assert!(validate_sql_identifier("_private", 64).is_ok());
///
/// assert!(validate_sql_identifier("x; DROP TABLE users--", 64).is_err());
/// assert!(validate_sql_identifier("", 64).is_err());
/// assert!(validate_sql_identifier("123abc", 64).is_err());
/// ```
pub fn validate_sql_identifier(name: &str, max_len: usize) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::config("SQL identifier cannot be empty"));
    }

    if name.len() > max_len {
        return Err(Error::config(format!(
            "SQL identifier too long: {} chars (max {})",
            name.len(),
            max_len
        )));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': must start with a letter or underscore",
                name
            )));
        }
    }

    for c in chars {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(Error::config(format!(
                "Invalid SQL identifier '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// One segment of a dotted document path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member
    Key(String),
    /// Array element
    Index(usize),
}

/// Split and validate a dotted document path such as `author.tags.0`.
///
/// Purely numeric segments address array elements. Segments may not be empty,
/// may not start with `$`, and may not contain quotes, backslashes or control
/// characters, so that the rendered JSON path literal never needs escaping.
///
/// ```
/// use docsql::security::{parse_field_path, PathSegment};
///
/// let path = parse_field_path("a.b.0").unwrap();
/// assert_eq!(path[2], PathSegment::Index(0));
/// assert!(parse_field_path("a..b").is_err());
/// assert!(parse_field_path("a\"b").is_err());
/// ```
pub fn parse_field_path(path: &str) -> crate::Result<Vec<PathSegment>> {
    if path.is_empty() {
        return Err(Error::unsupported_query("empty field path"));
    }

    path.split('.')
        .map(|segment| {
            if segment.is_empty() {
                return Err(Error::unsupported_query(format!(
                    "field path '{}' has an empty segment",
                    path
                )));
            }
            if segment.starts_with('$') {
                return Err(Error::unsupported_query(format!(
                    "unknown operator '{}' in field path '{}'",
                    segment, path
                )));
            }
            if let Some(c) = segment
                .chars()
                .find(|c| matches!(c, '"' | '\'' | '\\' | '`') || c.is_control())
            {
                return Err(Error::unsupported_query(format!(
                    "field path '{}' contains unsupported character {:?}",
                    path, c
                )));
            }
            if segment.bytes().all(|b| b.is_ascii_digit()) {
                let index = segment.parse().map_err(|_| {
                    Error::unsupported_query(format!("array index '{}' out of range", segment))
                })?;
                return Ok(PathSegment::Index(index));
            }
            Ok(PathSegment::Key(segment.to_string()))
        })
        .collect()
}

/// Render validated path segments as a JSON path (`$."a"."b"[0]`).
pub fn json_path(segments: &[PathSegment]) -> String {
    let mut out = String::from("$");
    for segment in segments {
        match segment {
            PathSegment::Key(key) => {
                out.push_str(".\"");
                out.push_str(key);
                out.push('"');
            }
            PathSegment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Escape a string value for safe interpolation into a SQL string literal context.
///
/// Replaces `'` with `''`. Used for JSON path literals and `information_schema`
/// lookups; **prefer bound parameters whenever possible.**
///
/// ```
/// use docsql::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("users"), "users");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
