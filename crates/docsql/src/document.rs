//! Documents and document identifiers
//!
//! A document is a JSON object. Its identifier lives under `_id` and is either
//! a caller-supplied string/integer or a generated 24-hex-character id
//! (4-byte seconds timestamp followed by 8 random bytes).

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// Schemaless document
pub type Document = serde_json::Map<String, JsonValue>;

/// Identifier key
pub const ID_FIELD: &str = "_id";

/// Longest accepted identifier, matching the generated identifier column
pub const MAX_ID_LENGTH: usize = 128;

/// Generate a new 24-hex-character identifier.
///
/// Ids generated within the same second share a prefix, so insertion order
/// roughly follows lexical order.
pub fn generate_object_id() -> String {
    let secs = chrono::Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32;
    let random = uuid::Uuid::new_v4();

    let mut id = format!("{:08x}", secs);
    for byte in &random.as_bytes()[..8] {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

/// Identifier as the string stored in the identifier column.
///
/// Strings (non-empty, at most [`MAX_ID_LENGTH`]) and integers are accepted.
pub fn id_to_string(id: &JsonValue) -> Result<String> {
    let text = match id {
        JsonValue::String(s) if s.is_empty() => {
            return Err(Error::invalid_document("_id must not be empty"))
        }
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => n.to_string(),
        other => {
            return Err(Error::invalid_document(format!(
                "_id must be a string or an integer, got {}",
                other
            )))
        }
    };

    if text.chars().count() > MAX_ID_LENGTH {
        return Err(Error::invalid_document(format!(
            "_id longer than {} characters",
            MAX_ID_LENGTH
        )));
    }
    Ok(text)
}

/// Assign a generated `_id` when absent (or null), validate it otherwise.
///
/// Returns the identifier string.
pub fn ensure_id(doc: &mut Document) -> Result<String> {
    match doc.get(ID_FIELD) {
        None | Some(JsonValue::Null) => {
            let id = generate_object_id();
            doc.insert(ID_FIELD.to_string(), JsonValue::String(id.clone()));
            Ok(id)
        }
        Some(id) => id_to_string(id),
    }
}

/// Interpret a JSON value as a document
pub fn into_document(value: JsonValue) -> Result<Document> {
    match value {
        JsonValue::Object(map) => Ok(map),
        other => Err(Error::invalid_document(format!(
            "document must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generated_id_shape() {
        let a = generate_object_id();
        let b = generate_object_id();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_ensure_id_assigns_when_missing() {
        let mut doc = into_document(json!({"title": "x", "_id": null})).unwrap();
        let id = ensure_id(&mut doc).unwrap();
        assert_eq!(doc.get(ID_FIELD), Some(&json!(id)));
    }

    #[test]
    fn test_caller_ids() {
        assert_eq!(id_to_string(&json!("abc")).unwrap(), "abc");
        assert_eq!(id_to_string(&json!(42)).unwrap(), "42");
        assert!(id_to_string(&json!(1.5)).is_err());
        assert!(id_to_string(&json!("")).is_err());
        assert!(id_to_string(&json!({"a": 1})).is_err());
        assert!(id_to_string(&json!("x".repeat(129))).is_err());
    }

    #[test]
    fn test_into_document_rejects_scalars() {
        let err = into_document(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }
}
