//! Bridge between `serde_json::Value` and the interpreter's values.
//!
//! Host data enters through [`value_from_json`], which keeps arrays and objects behind
//! `Rc` and converts their elements only when a builtin touches them, or through
//! [`value_from_json_eager`], which builds plain arrays and objects up front. Results leave
//! through [`OutputValue::to_json`].

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::EvalError;
use crate::value::{EvalResult, HostValue, Member, OutputValue, Value};

/// Convert a JSON number, preferring an integer representation.
fn number_from_json(number: &serde_json::Number) -> EvalResult {
    if let Some(i) = number.as_i64() {
        Ok(Value::Integer(i))
    } else if let Some(d) = number.as_f64() {
        Ok(Value::Double(d))
    } else {
        Err(EvalError::UnrecognizedNativeType(format!("number {}", number)))
    }
}

/// One-level conversion; nested collections become host arrays and host maps.
pub fn value_from_json(json: &serde_json::Value) -> EvalResult {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => number_from_json(n),
        serde_json::Value::String(s) => Ok(Value::String(s.clone())),
        serde_json::Value::Array(elements) => Ok(Value::HostArray(Rc::new(
            elements.iter().cloned().map(HostValue::Json).collect(),
        ))),
        serde_json::Value::Object(map) => Ok(Value::HostMap(Rc::new(
            map.iter()
                .map(|(name, value)| (name.clone(), HostValue::Json(value.clone())))
                .collect::<BTreeMap<_, _>>(),
        ))),
    }
}

/// Full conversion into plain arrays and objects, keeping member order.
pub fn value_from_json_eager(json: &serde_json::Value) -> EvalResult {
    match json {
        serde_json::Value::Array(elements) => elements
            .iter()
            .map(value_from_json_eager)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(name, value)| Ok(Member::new(name.clone(), value_from_json_eager(value)?)))
            .collect::<Result<Vec<_>, EvalError>>()
            .map(Value::Object),
        scalar => value_from_json(scalar),
    }
}

/// What to do with object members whose value is null when producing JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullFields {
    #[default]
    Keep,
    Drop,
}

impl OutputValue {
    /// Render as JSON. Numbers are always doubles; a non-finite double becomes null.
    /// When an object repeats a member name the last occurrence wins.
    pub fn to_json(&self, null_fields: NullFields) -> serde_json::Value {
        match self {
            OutputValue::String(s) => serde_json::Value::String(s.clone()),
            OutputValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            OutputValue::Boolean(b) => serde_json::Value::Bool(*b),
            OutputValue::Null => serde_json::Value::Null,
            OutputValue::Array(elements) => serde_json::Value::Array(
                elements.iter().map(|e| e.to_json(null_fields)).collect(),
            ),
            OutputValue::Object(members) => {
                let mut map = serde_json::Map::new();
                for member in members {
                    if null_fields == NullFields::Drop && member.value.is_null() {
                        // An earlier non-null duplicate is superseded by this null.
                        map.shift_remove(&member.name);
                        continue;
                    }
                    // Remove first so the surviving entry takes the later position.
                    map.shift_remove(&member.name);
                    map.insert(member.name.clone(), member.value.to_json(null_fields));
                }
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Recursively order every object's members by name.
pub fn sort_keys(json: serde_json::Value) -> serde_json::Value {
    match json {
        serde_json::Value::Array(elements) => {
            serde_json::Value::Array(elements.into_iter().map(sort_keys).collect())
        }
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(name, value)| (name, sort_keys(value)))
                    .collect(),
            )
        }
        other => other,
    }
}
