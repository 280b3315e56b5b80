// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn integer_views_widen_both_ways() {
    assert_eq!(Value::Int(-4).as_i64(), Some(-4));
    assert_eq!(Value::UInt(4).as_i64(), Some(4));
    assert_eq!(Value::Int(4).as_u64(), Some(4));
    assert_eq!(Value::Int(-4).as_u64(), None);
    assert_eq!(Value::UInt(u64::MAX).as_i64(), None);
}

#[test]
fn object_field_lookup() {
    let v = Value::obj([("dest", Value::str(":1.42")), ("session", Value::UInt(7))]);
    assert_eq!(v.get("dest").and_then(Value::as_str), Some(":1.42"));
    assert_eq!(v.get("session").and_then(Value::as_u64), Some(7));
    assert!(v.get("missing").is_none());
}

#[test]
fn json_round_trip_preserves_structure() {
    let v = Value::obj([
        ("en", Value::str("Hello")),
        ("de", Value::str("Hallo")),
        ("count", Value::Int(3)),
        ("flags", Value::Arr(vec![Value::Bool(true), Value::Null])),
    ]);
    let back = from_json(&to_json(&v));
    assert_eq!(back, v);
}

#[yare::parameterized(
    undefined = { Value::Undefined, "undefined" },
    boolean = { Value::Bool(true), "true" },
    signed = { Value::Int(-9), "-9" },
    string = { Value::str("abc"), "abc" },
)]
fn display_strings(v: Value, expected: &str) {
    assert_eq!(v.display_string(), expected);
}

#[test]
fn object_order_is_declaration_order() {
    let v = Value::obj([("b", Value::Int(1)), ("a", Value::Int(2))]);
    let keys: Vec<_> = v.as_obj().unwrap().keys().cloned().collect();
    assert_eq!(keys, vec!["b", "a"]);
}
