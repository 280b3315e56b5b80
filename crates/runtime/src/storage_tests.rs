// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::nvram::MemNvram;

#[test]
fn install_then_load_round_trip() {
    let mut nv = MemNvram::default();
    install(&mut nv, "app.js", b"print('hi');").unwrap();
    let (name, body) = load(&nv).unwrap();
    assert_eq!(name, "app.js");
    assert_eq!(body.as_ref(), b"print('hi');");
    assert_eq!(script_name(&nv).as_deref(), Some("app.js"));
}

#[test]
fn load_requires_both_body_and_size() {
    let mut nv = MemNvram::default();
    nv.write(SCRIPT_ID, b"orphan body").unwrap();
    assert!(load(&nv).is_none());
}

#[test]
fn streamed_install_is_invisible_until_finished() {
    let mut nv = MemNvram::default();
    let mut writer = begin_install(&mut nv, "app.js", 8).unwrap();
    writer.write(&mut nv, b"1234").unwrap();
    assert!(load(&nv).is_none());
    writer.write(&mut nv, b"5678").unwrap();
    writer.finish(&mut nv).unwrap();
    assert_eq!(load(&nv).unwrap().1.as_ref(), b"12345678");
}

#[test]
fn short_install_cannot_finish() {
    let mut nv = MemNvram::default();
    let mut writer = begin_install(&mut nv, "app.js", 8).unwrap();
    writer.write(&mut nv, b"1234").unwrap();
    assert_eq!(writer.finish(&mut nv), Err(CoreError::Invalid));
}

#[test]
fn abort_removes_all_three_slots() {
    let mut nv = MemNvram::default();
    let mut writer = begin_install(&mut nv, "app.js", 8).unwrap();
    writer.write(&mut nv, b"1234").unwrap();
    abort_install(&mut nv);
    assert!(!nv.exist(SCRIPT_ID));
    assert!(!nv.exist(SCRIPT_SIZE_ID));
    assert!(!nv.exist(SCRIPT_NAME_ID));
}

#[test]
fn oversized_install_rejected_and_name_cleared() {
    let mut nv = MemNvram::new(100);
    let too_big = max_script_len(&nv) as u32 + 1;
    assert_eq!(
        begin_install(&mut nv, "big.js", too_big).err(),
        Some(CoreError::Resources)
    );
    assert!(!nv.exist(SCRIPT_NAME_ID));
    assert!(!nv.exist(SCRIPT_ID));
}

#[test]
fn delete_script_keeps_name() {
    let mut nv = MemNvram::default();
    install(&mut nv, "app.js", b"x").unwrap();
    delete_script(&mut nv).unwrap();
    assert!(load(&nv).is_none());
    assert_eq!(script_name(&nv).as_deref(), Some("app.js"));
}

#[test]
fn lockdown_defaults_clear_and_sticks() {
    let mut nv = MemNvram::default();
    assert!(!lockdown_state(&nv));
    set_lockdown(&mut nv).unwrap();
    assert!(lockdown_state(&nv));
}
