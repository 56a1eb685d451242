//! Value types for docsql
//!
//! The SQL-side vocabulary exchanged with backends: statement parameters and
//! result cells. Document payloads travel as [`Value::Json`] on the way in and
//! come back as text or bytes, depending on the engine.

use serde::{Deserialize, Serialize};

/// SQL value used as statement parameter or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// Text string
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// JSON value, bound as its serialized text
    Json(serde_json::Value),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float64(n) if n.is_finite() => Some(*n as i64),
            Self::String(s) => s.parse().ok(),
            Self::Bytes(b) => std::str::from_utf8(b).ok().and_then(|s| s.parse().ok()),
            _ => None,
        }
    }

    /// Try to borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Convert to owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bytes(b) => String::from_utf8(b.clone()).ok(),
            Self::Int64(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Json(j) => Some(j.to_string()),
            Self::Null => None,
        }
    }

    /// Decode a JSON payload cell.
    ///
    /// MySQL returns JSON columns as bytes, SQLite as text; both are parsed.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        match self {
            Self::Json(j) => Ok(j.clone()),
            Self::String(s) => Ok(serde_json::from_str(s)?),
            Self::Bytes(b) => Ok(serde_json::from_slice(b)?),
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::Int64(n) => Ok(serde_json::Value::from(*n)),
            Self::Float64(n) => Ok(serde_json::Value::from(*n)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Self::Null,
        }
    }
}

/// Database row as ordered column values
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Get column count
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if row is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get column names
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get value by column index
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Get value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_cell_decoding() {
        let text = Value::String(r#"{"a":1}"#.into());
        assert_eq!(text.to_json().unwrap(), json!({"a": 1}));

        let bytes = Value::Bytes(br#"{"b":[true]}"#.to_vec());
        assert_eq!(bytes.to_json().unwrap(), json!({"b": [true]}));

        assert!(Value::String("not json".into()).to_json().is_err());
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let row = Row::new(
            vec!["id".into(), "DOCUMENT".into()],
            vec![Value::Int64(7), Value::from("{}")],
        );
        assert_eq!(row.len(), 2);
        assert_eq!(row.get_by_name("document").and_then(|v| v.as_str()), Some("{}"));
        assert_eq!(row.get(0).and_then(|v| v.as_i64()), Some(7));
        assert!(row.get_by_name("missing").is_none());
    }
}
