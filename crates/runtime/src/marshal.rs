// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script-value ↔ wire-type coercion.
//!
//! Outbound arguments are coerced one signature fragment at a time;
//! numeric narrowing is range-checked and fails with `Invalid` rather than
//! truncating. Inbound arguments map back onto plain script values, with
//! dictionary arrays becoming keyed objects.

use bytes::Bytes;
use tracing::warn;

use crate::bus::WireArg;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

/// Split a signature string into complete types: `"ba{sv}(ii)"` →
/// `["b", "a{sv}", "(ii)"]`.
pub fn split_signature(sig: &str) -> CoreResult<Vec<&str>> {
    let bytes = sig.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let len = complete_type_len(bytes, pos)?;
        let fragment = sig.get(pos..pos + len).ok_or(CoreError::Invalid)?;
        out.push(fragment);
        pos += len;
    }
    Ok(out)
}

/// Length in bytes of the complete type starting at `pos`.
fn complete_type_len(sig: &[u8], pos: usize) -> CoreResult<usize> {
    let first = *sig.get(pos).ok_or(CoreError::Invalid)?;
    match first {
        b'b' | b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
        | b'v' | b'h' => Ok(1),
        b'a' => Ok(1 + complete_type_len(sig, pos + 1)?),
        b'(' => {
            let mut inner = pos + 1;
            while *sig.get(inner).ok_or(CoreError::Invalid)? != b')' {
                inner += complete_type_len(sig, inner)?;
            }
            Ok(inner - pos + 1)
        }
        b'{' => {
            let key_len = complete_type_len(sig, pos + 1)?;
            let val_len = complete_type_len(sig, pos + 1 + key_len)?;
            if *sig.get(pos + 1 + key_len + val_len).ok_or(CoreError::Invalid)? != b'}' {
                return Err(CoreError::Invalid);
            }
            Ok(key_len + val_len + 3)
        }
        _ => {
            warn!(byte = first, "bad signature character");
            Err(CoreError::Invalid)
        }
    }
}

fn int_in_range(value: i64, sig: u8) -> bool {
    match sig {
        b'y' => (0..=u8::MAX as i64).contains(&value),
        b'n' => (i16::MIN as i64..=i16::MAX as i64).contains(&value),
        b'q' => (0..=u16::MAX as i64).contains(&value),
        b'i' => (i32::MIN as i64..=i32::MAX as i64).contains(&value),
        b'u' => (0..=u32::MAX as i64).contains(&value),
        _ => true,
    }
}

fn int_to_wire(value: i64, sig: u8) -> CoreResult<WireArg> {
    if !int_in_range(value, sig) {
        warn!(value, sig = %(sig as char), "integer out of range for signature");
        return Err(CoreError::Invalid);
    }
    Ok(match sig {
        b'y' => WireArg::Byte(value as u8),
        b'n' => WireArg::Int16(value as i16),
        b'q' => WireArg::Uint16(value as u16),
        b'i' => WireArg::Int32(value as i32),
        b'u' => WireArg::Uint32(value as u32),
        b'x' => WireArg::Int64(value),
        b't' if value >= 0 => WireArg::Uint64(value as u64),
        b't' => return Err(CoreError::Invalid),
        _ => return Err(CoreError::Invalid),
    })
}

/// Value the script sees for one wire argument.
pub fn wire_to_value(arg: &WireArg) -> Value {
    match arg {
        WireArg::Bool(b) => Value::Bool(*b),
        WireArg::Byte(v) => Value::UInt(*v as u64),
        WireArg::Int16(v) => Value::Int(*v as i64),
        WireArg::Uint16(v) => Value::UInt(*v as u64),
        WireArg::Int32(v) => Value::Int(*v as i64),
        WireArg::Uint32(v) => Value::UInt(*v as u64),
        WireArg::Int64(v) => Value::Int(*v),
        WireArg::Uint64(v) => Value::UInt(*v),
        WireArg::Double(v) => Value::Num(*v),
        WireArg::Str(s) | WireArg::ObjPath(s) | WireArg::Sig(s) => Value::Str(s.clone()),
        WireArg::Bytes(raw) => Value::Buf(raw.clone()),
        WireArg::Array(elem, items) => {
            if elem.starts_with('{') {
                // Dictionary: return a keyed object.
                let mut map = indexmap::IndexMap::new();
                for item in items {
                    if let WireArg::DictEntry(k, v) = item {
                        map.insert(wire_to_value(k).display_string(), wire_to_value(v));
                    }
                }
                Value::Obj(map)
            } else {
                Value::Arr(items.iter().map(wire_to_value).collect())
            }
        }
        WireArg::Struct(fields) => Value::Arr(fields.iter().map(wire_to_value).collect()),
        WireArg::DictEntry(k, v) => {
            Value::Arr(vec![wire_to_value(k), wire_to_value(v)])
        }
        WireArg::Variant(_, inner) => wire_to_value(inner),
    }
}

/// Infer a variant signature from a value's own shape.
pub fn infer_signature(value: &Value) -> CoreResult<String> {
    Ok(match value {
        Value::Bool(_) => "b".to_owned(),
        Value::Int(_) => "x".to_owned(),
        Value::UInt(_) => "t".to_owned(),
        Value::Num(_) => "d".to_owned(),
        Value::Str(_) => "s".to_owned(),
        Value::Buf(_) => "ay".to_owned(),
        Value::Arr(_) => "av".to_owned(),
        Value::Obj(_) => "a{sv}".to_owned(),
        Value::Undefined | Value::Null | Value::Ref(_) => return Err(CoreError::Invalid),
    })
}

/// Coerce one script value to one complete wire type.
pub fn value_to_wire(value: &Value, sig: &str) -> CoreResult<WireArg> {
    let bytes = sig.as_bytes();
    let first = *bytes.first().ok_or(CoreError::Invalid)?;
    match first {
        b'b' => match value {
            Value::Bool(b) => Ok(WireArg::Bool(*b)),
            _ => mismatch(value, sig),
        },
        b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' => match value {
            Value::Int(v) => int_to_wire(*v, first),
            Value::UInt(v) => {
                if first == b't' {
                    return Ok(WireArg::Uint64(*v));
                }
                if first == b'x' {
                    return i64::try_from(*v)
                        .map(WireArg::Int64)
                        .map_err(|_| CoreError::Invalid);
                }
                let as_i64 = i64::try_from(*v).map_err(|_| CoreError::Invalid)?;
                int_to_wire(as_i64, first)
            }
            // Script numbers are doubles; integral ones narrow.
            Value::Num(n) if n.fract() == 0.0 && n.is_finite() => {
                int_to_wire(*n as i64, first)
            }
            _ => mismatch(value, sig),
        },
        b'd' => value.as_f64().map(WireArg::Double).ok_or(CoreError::Invalid),
        b's' => match value {
            Value::Str(s) => Ok(WireArg::Str(s.clone())),
            _ => mismatch(value, sig),
        },
        b'o' => match value {
            Value::Str(s) => Ok(WireArg::ObjPath(s.clone())),
            _ => mismatch(value, sig),
        },
        b'g' => match value {
            Value::Str(s) => Ok(WireArg::Sig(s.clone())),
            _ => mismatch(value, sig),
        },
        b'v' => {
            // Explicit hint form: { signature, value }.
            if let Some(map) = value.as_obj() {
                if let (Some(Value::Str(hint)), Some(inner)) =
                    (map.get("signature"), map.get("value"))
                {
                    let wire = if inner.is_nullish() {
                        empty_of(hint)?
                    } else {
                        value_to_wire(inner, hint)?
                    };
                    return Ok(WireArg::Variant(hint.clone(), Box::new(wire)));
                }
            }
            if value.is_nullish() {
                warn!("null/undefined needs an explicit variant hint");
                return Err(CoreError::Invalid);
            }
            let inferred = infer_signature(value)?;
            let wire = value_to_wire(value, &inferred)?;
            Ok(WireArg::Variant(inferred, Box::new(wire)))
        }
        b'a' => {
            let elem = sig.get(1..).ok_or(CoreError::Invalid)?;
            if elem.is_empty() {
                return Err(CoreError::Invalid);
            }
            if elem == "y" {
                return match value {
                    Value::Buf(raw) => Ok(WireArg::Bytes(raw.clone())),
                    Value::Arr(items) => {
                        let mut raw = Vec::with_capacity(items.len());
                        for item in items {
                            let v = item.as_i64().ok_or(CoreError::Invalid)?;
                            if !int_in_range(v, b'y') {
                                return Err(CoreError::Invalid);
                            }
                            raw.push(v as u8);
                        }
                        Ok(WireArg::Bytes(Bytes::from(raw)))
                    }
                    Value::Str(s) => Ok(WireArg::Bytes(Bytes::copy_from_slice(s.as_bytes()))),
                    _ => mismatch(value, sig),
                };
            }
            if elem.starts_with('{') {
                return dict_to_wire(value, elem);
            }
            match value {
                Value::Arr(items) => {
                    let converted = items
                        .iter()
                        .map(|item| value_to_wire(item, elem))
                        .collect::<CoreResult<Vec<_>>>()?;
                    Ok(WireArg::Array(elem.to_owned(), converted))
                }
                // A buffer marshals element-wise when the element type is
                // numeric.
                Value::Buf(raw) => {
                    let converted = raw
                        .iter()
                        .map(|b| int_to_wire(*b as i64, elem.as_bytes()[0]))
                        .collect::<CoreResult<Vec<_>>>()?;
                    Ok(WireArg::Array(elem.to_owned(), converted))
                }
                _ => mismatch(value, sig),
            }
        }
        b'(' => {
            let inner = sig.get(1..sig.len() - 1).ok_or(CoreError::Invalid)?;
            let fields = split_signature(inner)?;
            let values: Vec<&Value> = match value {
                // Keyed object: fields in declaration order.
                Value::Obj(map) => map.values().collect(),
                Value::Arr(items) => items.iter().collect(),
                _ => return mismatch(value, sig),
            };
            if values.len() != fields.len() {
                warn!(want = fields.len(), got = values.len(), "struct arity mismatch");
                return Err(CoreError::Invalid);
            }
            let converted = values
                .iter()
                .zip(&fields)
                .map(|(v, f)| value_to_wire(v, f))
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(WireArg::Struct(converted))
        }
        _ => mismatch(value, sig),
    }
}

fn dict_to_wire(value: &Value, entry_sig: &str) -> CoreResult<WireArg> {
    // entry_sig is "{kv...}".
    let inner = entry_sig.get(1..entry_sig.len() - 1).ok_or(CoreError::Invalid)?;
    let parts = split_signature(inner)?;
    let [key_sig, val_sig] = parts.as_slice() else {
        return Err(CoreError::Invalid);
    };
    let map = value.as_obj().ok_or(CoreError::Invalid)?;
    let mut entries = Vec::with_capacity(map.len());
    for (key, val) in map {
        let key_value = coerce_key(key, key_sig)?;
        let wire_key = value_to_wire(&key_value, key_sig)?;
        let wire_val = value_to_wire(val, val_sig)?;
        entries.push(WireArg::DictEntry(Box::new(wire_key), Box::new(wire_val)));
    }
    Ok(WireArg::Array(entry_sig.to_owned(), entries))
}

/// Object keys are strings script-side; integer-keyed dictionaries parse
/// the key text.
fn coerce_key(key: &str, key_sig: &str) -> CoreResult<Value> {
    match key_sig.as_bytes().first() {
        Some(b's') | Some(b'o') | Some(b'g') => Ok(Value::str(key)),
        Some(b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't') => key
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| CoreError::Invalid),
        _ => Err(CoreError::Invalid),
    }
}

/// Marshal `values` against a member's full in-signature; the argument
/// count must match the signature exactly.
pub fn marshal_args(sig: &str, values: &[Value]) -> CoreResult<Vec<WireArg>> {
    let fragments = split_signature(sig)?;
    if fragments.len() != values.len() {
        warn!(want = fragments.len(), got = values.len(), sig, "argument count mismatch");
        return Err(CoreError::Invalid);
    }
    values
        .iter()
        .zip(&fragments)
        .map(|(v, f)| value_to_wire(v, f))
        .collect()
}

/// Script view of an inbound argument list.
pub fn unmarshal_args(args: &[WireArg]) -> Vec<Value> {
    args.iter().map(wire_to_value).collect()
}

fn mismatch(value: &Value, sig: &str) -> CoreResult<WireArg> {
    warn!(kind = value.kind(), sig, "cannot marshal value as signature");
    Err(CoreError::Invalid)
}

/// The empty wire value of a basic signature, used for null/undefined
/// under an explicit variant hint.
fn empty_of(sig: &str) -> CoreResult<WireArg> {
    match sig.as_bytes().first() {
        Some(b's') => Ok(WireArg::Str(String::new())),
        Some(b'o') => Ok(WireArg::ObjPath(String::new())),
        Some(b'g') => Ok(WireArg::Sig(String::new())),
        Some(b'a') => {
            if sig == "ay" {
                Ok(WireArg::Bytes(Bytes::new()))
            } else {
                Ok(WireArg::Array(sig[1..].to_owned(), Vec::new()))
            }
        }
        Some(b'b') => Ok(WireArg::Bool(false)),
        Some(b'y' | b'n' | b'q' | b'i' | b'u' | b'x' | b't') => {
            int_to_wire(0, sig.as_bytes()[0])
        }
        Some(b'd') => Ok(WireArg::Double(0.0)),
        _ => Err(CoreError::Invalid),
    }
}

#[cfg(test)]
#[path = "marshal_tests.rs"]
mod tests;
