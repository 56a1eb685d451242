//! Filter compilation
//!
//! Translates a MongoDB-style filter document into a SQL predicate over the
//! payload column. Compilation is pure: an unsupported construct fails here,
//! before any statement reaches the engine.

use serde_json::{Map, Value as JsonValue};

use crate::dialect::{Comparison, Predicate, SqlDialect, ID_COLUMN};
use crate::document::{id_to_string, ID_FIELD};
use crate::error::{Error, Result};
use crate::security::{json_path, parse_field_path};
use crate::types::Value;

/// Compile a filter document. `null` and `{}` match everything.
pub fn compile_filter(dialect: &dyn SqlDialect, filter: &JsonValue) -> Result<Predicate> {
    match filter {
        JsonValue::Null => Ok(Predicate::always()),
        JsonValue::Object(map) => compile_object(dialect, map),
        other => Err(Error::unsupported_query(format!(
            "filter must be an object, got {}",
            other
        ))),
    }
}

fn compile_object(dialect: &dyn SqlDialect, map: &Map<String, JsonValue>) -> Result<Predicate> {
    let mut parts = Vec::with_capacity(map.len());

    for (key, value) in map {
        let part = match key.as_str() {
            "$and" => {
                let subs = sub_filters(dialect, key, value)?;
                Predicate::join(subs, "AND", Predicate::always())
            }
            "$or" => Predicate::join(sub_filters(dialect, key, value)?, "OR", Predicate::never()),
            "$nor" => {
                let subs = sub_filters(dialect, key, value)?;
                Predicate::join(subs, "OR", Predicate::never()).negate()
            }
            op if op.starts_with('$') => {
                return Err(Error::unsupported_query(format!(
                    "unsupported top-level operator '{}'",
                    op
                )))
            }
            field => compile_field(dialect, field, value)?,
        };
        parts.push(part);
    }

    Ok(Predicate::join(parts, "AND", Predicate::always()))
}

fn sub_filters(dialect: &dyn SqlDialect, op: &str, value: &JsonValue) -> Result<Vec<Predicate>> {
    match value {
        JsonValue::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                JsonValue::Object(map) => compile_object(dialect, map),
                other => Err(Error::unsupported_query(format!(
                    "{} entries must be objects, got {}",
                    op, other
                ))),
            })
            .collect(),
        _ => Err(Error::unsupported_query(format!(
            "{} requires a non-empty array",
            op
        ))),
    }
}

/// Whether a value is an operator object (`{$gt: 1}`) rather than a literal
fn is_operator_object(value: &JsonValue) -> Result<bool> {
    let JsonValue::Object(map) = value else {
        return Ok(false);
    };
    let operators = map.keys().filter(|k| k.starts_with('$')).count();
    if operators == 0 {
        Ok(false)
    } else if operators == map.len() {
        Ok(true)
    } else {
        Err(Error::unsupported_query(
            "cannot mix operators and literal fields in one condition",
        ))
    }
}

/// A resolved field reference
struct Field<'a> {
    name: &'a str,
    path: String,
}

impl Field<'_> {
    fn is_id(&self) -> bool {
        self.name == ID_FIELD
    }
}

fn compile_field(dialect: &dyn SqlDialect, name: &str, value: &JsonValue) -> Result<Predicate> {
    let field = Field {
        name,
        path: json_path(&parse_field_path(name)?),
    };

    if is_operator_object(value)? {
        let JsonValue::Object(ops) = value else {
            return Err(Error::internal("operator object is not an object"));
        };
        compile_operators(dialect, &field, ops)
    } else {
        equality(dialect, &field, value)
    }
}

fn compile_operators(
    dialect: &dyn SqlDialect,
    field: &Field<'_>,
    ops: &Map<String, JsonValue>,
) -> Result<Predicate> {
    let mut parts = Vec::with_capacity(ops.len());

    for (op, operand) in ops {
        let part = match op.as_str() {
            "$eq" => equality(dialect, field, operand)?,
            "$ne" => equality(dialect, field, operand)?.negate(),
            "$gt" => dialect.json_compare(&field.path, Comparison::Gt, operand)?,
            "$gte" => dialect.json_compare(&field.path, Comparison::Gte, operand)?,
            "$lt" => dialect.json_compare(&field.path, Comparison::Lt, operand)?,
            "$lte" => dialect.json_compare(&field.path, Comparison::Lte, operand)?,
            "$in" => any_of(dialect, field, op, operand)?,
            "$nin" => any_of(dialect, field, op, operand)?.negate(),
            "$exists" => {
                let exists = match operand {
                    JsonValue::Bool(b) => *b,
                    JsonValue::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
                    other => {
                        return Err(Error::unsupported_query(format!(
                            "$exists requires a boolean, got {}",
                            other
                        )))
                    }
                };
                let p = dialect.json_exists(&field.path);
                if exists {
                    p
                } else {
                    p.negate()
                }
            }
            "$size" => {
                let size = operand.as_u64().ok_or_else(|| {
                    Error::unsupported_query(format!(
                        "$size requires a non-negative integer, got {}",
                        operand
                    ))
                })?;
                dialect.json_array_size(&field.path, size)
            }
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    Error::unsupported_query(format!("$regex requires a string, got {}", operand))
                })?;
                let case_insensitive = regex_options(ops.get("$options"))?;
                check_regex(pattern)?;
                dialect.json_regex(&field.path, pattern, case_insensitive)
            }
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(Error::unsupported_query("$options without $regex"));
                }
                continue;
            }
            "$not" => {
                let inner = match operand {
                    JsonValue::Object(inner) if !inner.is_empty() => inner,
                    _ => return Err(not_operand_error(operand)),
                };
                if !is_operator_object(operand)? {
                    return Err(not_operand_error(operand));
                }
                compile_operators(dialect, field, inner)?.negate()
            }
            other => {
                return Err(Error::unsupported_query(format!(
                    "unsupported operator '{}' on field '{}'",
                    other, field.name
                )))
            }
        };
        parts.push(part);
    }

    Ok(Predicate::join(parts, "AND", Predicate::always()))
}

fn not_operand_error(operand: &JsonValue) -> Error {
    Error::unsupported_query(format!(
        "$not requires an operator object, got {}",
        operand
    ))
}

fn regex_options(options: Option<&JsonValue>) -> Result<bool> {
    match options {
        None => Ok(false),
        Some(JsonValue::String(s)) if s.is_empty() => Ok(false),
        Some(JsonValue::String(s)) if s == "i" => Ok(true),
        Some(other) => Err(Error::unsupported_query(format!(
            "unsupported $options {}; only \"i\" is supported",
            other
        ))),
    }
}

/// Patterns that do not compile are rejected before the engine sees them
fn check_regex(pattern: &str) -> Result<()> {
    regex::Regex::new(pattern).map(|_| ()).map_err(|e| {
        Error::unsupported_query(format!("invalid $regex pattern '{}': {}", pattern, e))
    })
}

fn any_of(
    dialect: &dyn SqlDialect,
    field: &Field<'_>,
    op: &str,
    operand: &JsonValue,
) -> Result<Predicate> {
    let JsonValue::Array(values) = operand else {
        return Err(Error::unsupported_query(format!(
            "{} requires an array, got {}",
            op, operand
        )));
    };

    let parts = values
        .iter()
        .map(|v| equality(dialect, field, v))
        .collect::<Result<Vec<_>>>()?;
    Ok(Predicate::join(parts, "OR", Predicate::never()))
}

/// Typed equality; `_id` with a string/integer value goes through the
/// generated identifier column.
fn equality(dialect: &dyn SqlDialect, field: &Field<'_>, value: &JsonValue) -> Result<Predicate> {
    if field.is_id() && matches!(value, JsonValue::String(_) | JsonValue::Number(_)) {
        if let Ok(id) = id_to_string(value) {
            return Ok(Predicate::new(
                format!("{} = ?", dialect.quote_identifier(ID_COLUMN)),
                vec![Value::String(id)],
            ));
        }
    }
    dialect.json_eq(&field.path, value)
}
