//! Field projection, applied to decoded documents

use serde_json::Value as JsonValue;

use crate::document::{Document, ID_FIELD};
use crate::error::{Error, Result};
use crate::security::{parse_field_path, PathSegment};

/// Which fields a read returns
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Whole documents
    #[default]
    All,
    /// Only the listed dotted paths
    Include {
        /// Paths split into segments
        paths: Vec<Vec<String>>,
        /// Whether `_id` is returned
        id: bool,
    },
    /// Everything but the listed dotted paths
    Exclude {
        /// Paths split into segments
        paths: Vec<Vec<String>>,
        /// Whether `_id` is returned
        id: bool,
    },
}

fn flag(path: &str, value: &JsonValue) -> Result<bool> {
    match value {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::Number(n) if n.as_f64() == Some(0.0) => Ok(false),
        JsonValue::Number(n) if n.as_f64() == Some(1.0) => Ok(true),
        other => Err(Error::unsupported_query(format!(
            "projection of '{}' must be 0/1 or a boolean, got {}",
            path, other
        ))),
    }
}

/// Numeric segments address array elements everywhere else; projecting a
/// single element is not supported.
fn split_path(path: &str) -> Result<Vec<String>> {
    parse_field_path(path)?
        .into_iter()
        .map(|segment| match segment {
            PathSegment::Key(key) => Ok(key),
            PathSegment::Index(i) => Err(Error::unsupported_query(format!(
                "projection of array element {} in '{}' is not supported",
                i, path
            ))),
        })
        .collect()
}

impl Projection {
    /// Parse a projection document; `null` and `{}` select whole documents.
    pub fn parse(spec: &JsonValue) -> Result<Self> {
        let map = match spec {
            JsonValue::Null => return Ok(Self::All),
            JsonValue::Object(map) if map.is_empty() => return Ok(Self::All),
            JsonValue::Object(map) => map,
            other => {
                return Err(Error::unsupported_query(format!(
                    "projection must be an object, got {}",
                    other
                )))
            }
        };

        let mut id = true;
        let mut included = Vec::new();
        let mut excluded = Vec::new();

        for (path, value) in map {
            let keep = flag(path, value)?;
            if path == ID_FIELD {
                id = keep;
                continue;
            }
            if keep {
                included.push(split_path(path)?);
            } else {
                excluded.push(split_path(path)?);
            }
        }

        match (included.is_empty(), excluded.is_empty()) {
            (false, false) => Err(Error::unsupported_query(
                "projection cannot mix inclusion and exclusion",
            )),
            (false, true) => Ok(Self::Include {
                paths: included,
                id,
            }),
            (true, false) => Ok(Self::Exclude {
                paths: excluded,
                id,
            }),
            // Only `_id` was named
            (true, true) if id => Ok(Self::Include {
                paths: Vec::new(),
                id: true,
            }),
            (true, true) => Ok(Self::Exclude {
                paths: Vec::new(),
                id: false,
            }),
        }
    }

    /// Apply to a document
    pub fn apply(&self, mut doc: Document) -> Document {
        match self {
            Self::All => doc,
            Self::Include { paths, id } => {
                let mut out = Document::new();
                if *id {
                    if let Some(v) = doc.remove(ID_FIELD) {
                        out.insert(ID_FIELD.to_string(), v);
                    }
                }
                for path in paths {
                    if let Some(value) = lookup(&doc, path) {
                        insert_path(&mut out, path, value.clone());
                    }
                }
                out
            }
            Self::Exclude { paths, id } => {
                if !*id {
                    doc.remove(ID_FIELD);
                }
                for path in paths {
                    remove_path(&mut doc, path);
                }
                doc
            }
        }
    }
}

fn lookup<'a>(doc: &'a Document, path: &[String]) -> Option<&'a JsonValue> {
    let (first, rest) = path.split_first()?;
    let mut current = doc.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn insert_path(doc: &mut Document, path: &[String], value: JsonValue) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = doc;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| JsonValue::Object(Document::new()));
        match entry {
            JsonValue::Object(map) => current = map,
            _ => return,
        }
    }
    current.insert(last.clone(), value);
}

fn remove_path(doc: &mut Document, path: &[String]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = doc;
    for segment in parents {
        match current.get_mut(segment) {
            Some(JsonValue::Object(map)) => current = map,
            _ => return,
        }
    }
    current.remove(last);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_inclusion_keeps_id() {
        let p = Projection::parse(&json!({"b.c": 1})).unwrap();
        let out = p.apply(doc(json!({"_id": "x", "a": 1, "b": {"c": 2, "d": 3}})));
        assert_eq!(JsonValue::Object(out), json!({"_id": "x", "b": {"c": 2}}));
    }

    #[test]
    fn test_exclusion_and_id_suppression() {
        let p = Projection::parse(&json!({"a": 0, "_id": 0})).unwrap();
        let out = p.apply(doc(json!({"_id": "x", "a": 1, "b": 2})));
        assert_eq!(JsonValue::Object(out), json!({"b": 2}));
    }

    #[test]
    fn test_only_id_suppressed() {
        let p = Projection::parse(&json!({"_id": false})).unwrap();
        let out = p.apply(doc(json!({"_id": "x", "a": 1})));
        assert_eq!(JsonValue::Object(out), json!({"a": 1}));
    }

    #[test]
    fn test_mixed_projection_rejected() {
        assert!(Projection::parse(&json!({"a": 1, "b": 0})).is_err());
        assert!(Projection::parse(&json!({"a": "yes"})).is_err());
        assert!(Projection::parse(&json!({"a..b": 1})).is_err());
    }

    #[test]
    fn test_only_id_included() {
        let p = Projection::parse(&json!({"_id": 1})).unwrap();
        assert_eq!(
            p,
            Projection::Include {
                paths: Vec::new(),
                id: true
            }
        );
        let out = p.apply(doc(json!({"_id": "x", "a": 1, "secret": 2})));
        assert_eq!(JsonValue::Object(out), json!({"_id": "x"}));
    }

    #[test]
    fn test_array_element_paths_rejected() {
        for spec in [json!({"tags.0": 1}), json!({"meta.tags.1": 0})] {
            assert!(matches!(
                Projection::parse(&spec),
                Err(Error::UnsupportedQuery { .. })
            ));
        }
    }
}
