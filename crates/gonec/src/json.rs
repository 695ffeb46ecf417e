//! JSON codec for values.
//!
//! Converting a sequence or mapping to `Строка` serializes it to JSON with
//! insertion order preserved; converting a string to `Массив`/`Структура`
//! parses JSON back. Numbers keep exact decimal precision in both directions.
//! Self-referential containers are rejected with `NotBinaryConverted`.

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::{
    error::{RunResult, RuntimeError},
    types::{decimal::Decimal, map::VmMap, slice::VmSlice},
    value::Value,
};

/// Serializes a value to its JSON text form.
pub fn to_json_string(v: &Value) -> RunResult<String> {
    let json = to_json(v, &mut Vec::new())?;
    serde_json::to_string(&json).map_err(|e| RuntimeError::new(crate::error::ErrKind::NotConverted, e.to_string()))
}

/// Parses JSON text into a value tree.
pub fn from_json_str(s: &str) -> RunResult<Value> {
    let json: Json =
        serde_json::from_str(s).map_err(|e| RuntimeError::new(crate::error::ErrKind::NotConverted, e.to_string()))?;
    Ok(from_json(&json))
}

/// Container identity on the current conversion path, for cycle detection.
fn container_id(v: &Value) -> Option<usize> {
    match v {
        Value::Slice(s) => Some(s.addr()),
        Value::Map(m) => Some(m.addr()),
        _ => None,
    }
}

fn to_json(v: &Value, path: &mut Vec<usize>) -> RunResult<Json> {
    if let Some(id) = container_id(v) {
        if path.contains(&id) {
            return Err(RuntimeError::not_binary_converted());
        }
        path.push(id);
    }
    let json = match v {
        Value::Nil => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Decimal(d) => Json::Number(Number::from_string_unchecked(d.to_string())),
        Value::String(s) => Json::String(s.to_string()),
        Value::Time(t) => Json::String(t.to_string()),
        Value::Duration(d) => Json::Number(Number::from(d.nanos())),
        Value::Slice(s) => {
            let items = s.snapshot();
            let mut arr = Vec::with_capacity(items.len());
            for item in &items {
                arr.push(to_json(item, path)?);
            }
            Json::Array(arr)
        }
        Value::Map(m) => {
            let mut obj = JsonMap::new();
            for (k, val) in m.snapshot() {
                obj.insert(k, to_json(&val, path)?);
            }
            Json::Object(obj)
        }
        _ => return Err(RuntimeError::not_converted()),
    };
    if container_id(v).is_some() {
        path.pop();
    }
    Ok(json)
}

fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Nil,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => number_to_value(n),
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::Slice(VmSlice::from_values(items.iter().map(from_json).collect())),
        Json::Object(obj) => {
            let entries = obj.iter().map(|(k, v)| (k.clone(), from_json(v))).collect();
            Value::Map(VmMap::from_entries(entries))
        }
    }
}

/// Integers that fit i64 stay Int; everything else becomes an exact Decimal.
fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        return Value::Int(i);
    }
    n.to_string()
        .parse::<Decimal>()
        .map_or(Value::Nil, Value::Decimal)
}
