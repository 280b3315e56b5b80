// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dynamic script values.
//!
//! Everything that crosses the engine seam is a [`Value`]: arguments to
//! script callbacks, results of script calls, and the inputs to the
//! marshalling bridge. Host-side resources (service objects, reply
//! contexts, widgets) appear in script as opaque [`Value::Ref`] handles
//! resolved through side tables in the runtime, so no magic property names
//! leak into user code.

use bytes::Bytes;
use indexmap::IndexMap;

/// Opaque handle into a runtime side table.
pub type Handle = u32;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Num(f64),
    Str(String),
    Buf(Bytes),
    Arr(Vec<Value>),
    /// Keyed object; iteration order is declaration order, which matters
    /// when an object is marshalled as a wire struct.
    Obj(IndexMap<String, Value>),
    Ref(Handle),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::Buf(_) => "buffer",
            Self::Arr(_) => "array",
            Self::Obj(_) => "object",
            Self::Ref(_) => "reference",
        }
    }

    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn obj(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Self::Obj(entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view with lossless widening from both signed and unsigned.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(u) => Some(*u),
            Self::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Int(i) => Some(*i as f64),
            Self::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Obj(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_arr(&self) -> Option<&[Value]> {
        match self {
            Self::Arr(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_ref_handle(&self) -> Option<Handle> {
        match self {
            Self::Ref(h) => Some(*h),
            _ => None,
        }
    }

    /// Field lookup on object values.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_obj().and_then(|map| map.get(key))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Render the value the way a console `print` would.
    pub fn display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_owned(),
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::UInt(u) => u.to_string(),
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s.clone(),
            Self::Buf(b) => format!("[buffer {} bytes]", b.len()),
            Self::Arr(_) | Self::Obj(_) => to_json(self).to_string(),
            Self::Ref(h) => format!("[ref {h}]"),
        }
    }
}

/// Lossy conversion into JSON, used by the property store's localized maps
/// and the default engine JSON hooks. Buffers and refs have no JSON shape
/// and become null.
pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undefined | Value::Null | Value::Buf(_) | Value::Ref(_) => {
            serde_json::Value::Null
        }
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Num(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::Arr(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Obj(map) => serde_json::Value::Object(
            map.iter().map(|(k, v)| (k.clone(), to_json(v))).collect(),
        ),
    }
}

pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Num(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::Arr(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::Obj(map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect())
        }
    }
}

#[cfg(test)]
#[path = "value_tests.rs"]
mod tests;
