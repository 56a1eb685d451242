//! Update specifications, applied to decoded documents before write-back

use serde_json::{Map, Number, Value as JsonValue};

use crate::document::{Document, ID_FIELD};
use crate::error::{Error, Result};
use crate::security::{parse_field_path, PathSegment};

/// How matched documents are modified
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Replace the whole document, keeping its `_id`
    Replace(Document),
    /// Merge top-level fields, or apply `$set` / `$unset` / `$inc`
    Patch(Document),
}

const OPERATORS: [&str; 3] = ["$set", "$unset", "$inc"];

impl UpdateSpec {
    /// Reject malformed specifications before anything is read
    pub fn validate(&self) -> Result<()> {
        let Self::Patch(patch) = self else {
            return Ok(());
        };

        let operators = patch.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            return Ok(());
        }
        if operators != patch.len() {
            return Err(Error::unsupported_query(
                "update cannot mix operators and plain fields",
            ));
        }

        for (op, operand) in patch {
            if !OPERATORS.contains(&op.as_str()) {
                return Err(Error::unsupported_query(format!(
                    "unsupported update operator '{}'",
                    op
                )));
            }
            let JsonValue::Object(fields) = operand else {
                return Err(Error::unsupported_query(format!(
                    "{} requires an object, got {}",
                    op, operand
                )));
            };
            for (path, value) in fields {
                split_path(path)?;
                if op == "$inc" && !value.is_number() {
                    return Err(Error::unsupported_query(format!(
                        "$inc of '{}' requires a number, got {}",
                        path, value
                    )));
                }
            }
        }
        Ok(())
    }

    /// Compute the updated document
    pub fn apply(&self, current: &Document) -> Result<Document> {
        self.validate()?;
        let id = current.get(ID_FIELD);

        let updated = match self {
            Self::Replace(replacement) => {
                let mut doc = replacement.clone();
                check_id(id, doc.get(ID_FIELD))?;
                if let Some(id) = id {
                    doc.insert(ID_FIELD.to_string(), id.clone());
                }
                doc
            }
            Self::Patch(patch) if patch.keys().all(|k| !k.starts_with('$')) => {
                check_id(id, patch.get(ID_FIELD))?;
                let mut doc = current.clone();
                for (k, v) in patch {
                    doc.insert(k.clone(), v.clone());
                }
                doc
            }
            Self::Patch(patch) => {
                let mut doc = current.clone();
                for (op, operand) in patch {
                    let Some(fields) = operand.as_object() else {
                        continue;
                    };
                    for (path, value) in fields {
                        let segments = split_path(path)?;
                        if is_id_path(&segments) {
                            if op == "$set" && segments.len() == 1 {
                                check_id(id, Some(value))?;
                                continue;
                            }
                            return Err(Error::invalid_document(format!(
                                "{} cannot modify _id",
                                op
                            )));
                        }
                        match op.as_str() {
                            "$set" => set_path(&mut doc, &segments, value.clone())?,
                            "$unset" => unset_path(&mut doc, &segments),
                            "$inc" => inc_path(&mut doc, &segments, value)?,
                            _ => {}
                        }
                    }
                }
                doc
            }
        };

        Ok(updated)
    }
}

/// `_id` may be restated but never changed
fn check_id(current: Option<&JsonValue>, requested: Option<&JsonValue>) -> Result<()> {
    match (current, requested) {
        (_, None) => Ok(()),
        (Some(a), Some(b)) if a == b => Ok(()),
        (_, Some(b)) => Err(Error::invalid_document(format!(
            "_id cannot be changed (got {})",
            b
        ))),
    }
}

fn split_path(path: &str) -> Result<Vec<PathSegment>> {
    let segments = parse_field_path(path)?;
    if !matches!(segments.first(), Some(PathSegment::Key(_))) {
        return Err(Error::unsupported_query(format!(
            "update path '{}' must start with a field name",
            path
        )));
    }
    Ok(segments)
}

fn is_id_path(segments: &[PathSegment]) -> bool {
    matches!(segments.first(), Some(PathSegment::Key(key)) if key == ID_FIELD)
}

fn describe(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Key(key) => key.clone(),
        PathSegment::Index(i) => i.to_string(),
    }
}

/// Step into `node`, creating the child when it is missing. Arrays may grow
/// by one element at a time.
fn child_slot<'a>(node: &'a mut JsonValue, segment: &PathSegment) -> Result<&'a mut JsonValue> {
    if node.is_null() {
        *node = JsonValue::Object(Map::new());
    }
    match (node, segment) {
        (JsonValue::Object(map), segment) => {
            Ok(map.entry(describe(segment)).or_insert(JsonValue::Null))
        }
        (JsonValue::Array(items), PathSegment::Index(i)) => {
            if *i > items.len() {
                return Err(Error::invalid_document(format!(
                    "array index {} is past the end of an array of length {}",
                    i,
                    items.len()
                )));
            }
            if *i == items.len() {
                items.push(JsonValue::Null);
            }
            Ok(&mut items[*i])
        }
        (other, segment) => Err(Error::invalid_document(format!(
            "cannot create field '{}' in non-object value {}",
            describe(segment),
            other
        ))),
    }
}

/// The value slot addressed by `segments`, created on demand
fn slot_mut<'a>(doc: &'a mut Document, segments: &[PathSegment]) -> Result<&'a mut JsonValue> {
    let Some((PathSegment::Key(first), rest)) = segments.split_first() else {
        return Err(Error::unsupported_query("update path must start with a field name"));
    };
    let mut current = doc.entry(first.clone()).or_insert(JsonValue::Null);
    for segment in rest {
        current = child_slot(current, segment)?;
    }
    Ok(current)
}

/// The existing value addressed by `segments`, without creating anything
fn existing_mut<'a>(doc: &'a mut Document, segments: &[PathSegment]) -> Option<&'a mut JsonValue> {
    let (PathSegment::Key(first), rest) = segments.split_first()? else {
        return None;
    };
    let mut current = doc.get_mut(first)?;
    for segment in rest {
        current = match (current, segment) {
            (JsonValue::Object(map), segment) => map.get_mut(&describe(segment))?,
            (JsonValue::Array(items), PathSegment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(doc: &mut Document, segments: &[PathSegment], value: JsonValue) -> Result<()> {
    *slot_mut(doc, segments)? = value;
    Ok(())
}

/// Removes object fields. Array elements are nulled so positions stay stable.
fn unset_path(doc: &mut Document, segments: &[PathSegment]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    if parents.is_empty() {
        doc.remove(&describe(last));
        return;
    }
    match (existing_mut(doc, parents), last) {
        (Some(JsonValue::Object(map)), last) => {
            map.remove(&describe(last));
        }
        (Some(JsonValue::Array(items)), PathSegment::Index(i)) => {
            if let Some(item) = items.get_mut(*i) {
                *item = JsonValue::Null;
            }
        }
        _ => {}
    }
}

fn inc_path(doc: &mut Document, segments: &[PathSegment], delta: &JsonValue) -> Result<()> {
    let slot = slot_mut(doc, segments)?;
    let next = match &*slot {
        JsonValue::Null => delta.clone(),
        JsonValue::Number(n) => add_numbers(n, delta)?,
        other => {
            let field = segments.iter().map(describe).collect::<Vec<_>>().join(".");
            return Err(Error::invalid_document(format!(
                "cannot $inc non-numeric field '{}' ({})",
                field, other
            )));
        }
    };
    *slot = next;
    Ok(())
}

fn add_numbers(current: &Number, delta: &JsonValue) -> Result<JsonValue> {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(JsonValue::from(sum));
        }
    }
    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(JsonValue::Number)
        .ok_or_else(|| Error::invalid_document("$inc produced a non-finite number"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: JsonValue) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_replace_keeps_id() {
        let spec = UpdateSpec::Replace(doc(json!({"title": "new"})));
        let out = spec.apply(&doc(json!({"_id": "a", "title": "old", "x": 1}))).unwrap();
        assert_eq!(JsonValue::Object(out), json!({"_id": "a", "title": "new"}));
    }

    #[test]
    fn test_merge_patch() {
        let spec = UpdateSpec::Patch(doc(json!({"b": 2})));
        let out = spec.apply(&doc(json!({"_id": "a", "a": 1}))).unwrap();
        assert_eq!(JsonValue::Object(out), json!({"_id": "a", "a": 1, "b": 2}));
    }

    #[test]
    fn test_operators() {
        let spec = UpdateSpec::Patch(doc(json!({
            "$set": {"meta.views": 1, "title": "t"},
            "$unset": {"draft": ""},
            "$inc": {"count": 2, "score": 0.5}
        })));
        let out = spec
            .apply(&doc(json!({"_id": 1, "draft": true, "count": 3, "score": 1})))
            .unwrap();
        assert_eq!(
            JsonValue::Object(out),
            json!({"_id": 1, "meta": {"views": 1}, "title": "t", "count": 5, "score": 1.5})
        );
    }

    #[test]
    fn test_id_change_rejected() {
        let current = doc(json!({"_id": "a"}));
        for spec in [
            UpdateSpec::Replace(doc(json!({"_id": "b"}))),
            UpdateSpec::Patch(doc(json!({"_id": "b"}))),
            UpdateSpec::Patch(doc(json!({"$set": {"_id": "b"}}))),
            UpdateSpec::Patch(doc(json!({"$unset": {"_id": 1}}))),
        ] {
            assert!(matches!(
                spec.apply(&current),
                Err(Error::InvalidDocument { .. })
            ));
        }
        // Restating the same id is fine
        assert!(UpdateSpec::Patch(doc(json!({"_id": "a", "x": 1})))
            .apply(&current)
            .is_ok());
    }

    #[test]
    fn test_invalid_specs() {
        for spec in [
            UpdateSpec::Patch(doc(json!({"$push": {"a": 1}}))),
            UpdateSpec::Patch(doc(json!({"$set": {"a": 1}, "b": 2}))),
            UpdateSpec::Patch(doc(json!({"$inc": {"a": "x"}}))),
            UpdateSpec::Patch(doc(json!({"$set": 5}))),
        ] {
            assert!(matches!(
                spec.validate(),
                Err(Error::UnsupportedQuery { .. })
            ));
        }
    }

    #[test]
    fn test_numeric_segments_address_array_elements() {
        let current = doc(json!({"_id": "x", "tags": ["a", "b"], "scores": [1, 2]}));

        let spec = UpdateSpec::Patch(doc(json!({
            "$set": {"tags.0": "z"},
            "$inc": {"scores.1": 3}
        })));
        let out = spec.apply(&current).unwrap();
        assert_eq!(out["tags"], json!(["z", "b"]));
        assert_eq!(out["scores"], json!([1, 5]));

        // Unset keeps the array length
        let spec = UpdateSpec::Patch(doc(json!({"$unset": {"tags.1": ""}})));
        let out = spec.apply(&current).unwrap();
        assert_eq!(out["tags"], json!(["a", null]));

        // Setting one past the end appends
        let spec = UpdateSpec::Patch(doc(json!({"$set": {"tags.2": "c"}})));
        let out = spec.apply(&current).unwrap();
        assert_eq!(out["tags"], json!(["a", "b", "c"]));
    }

    #[test]
    fn test_array_index_out_of_bounds() {
        let current = doc(json!({"tags": ["a"]}));
        for spec in [
            UpdateSpec::Patch(doc(json!({"$set": {"tags.5": "z"}}))),
            UpdateSpec::Patch(doc(json!({"$set": {"tags.name": "z"}}))),
        ] {
            assert!(matches!(
                spec.apply(&current),
                Err(Error::InvalidDocument { .. })
            ));
        }
        // Missing elements are left alone by $unset
        let spec = UpdateSpec::Patch(doc(json!({"$unset": {"tags.3": ""}})));
        assert_eq!(spec.apply(&current).unwrap(), current);
    }

    #[test]
    fn test_inc_on_string_fails() {
        let spec = UpdateSpec::Patch(doc(json!({"$inc": {"a": 1}})));
        assert!(spec.apply(&doc(json!({"a": "x"}))).is_err());
    }
}
