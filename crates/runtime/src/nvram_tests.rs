// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn write_peek_round_trip() {
    let mut nv = MemNvram::default();
    nv.write(SCRIPT_ID, b"var x = 1;").unwrap();
    assert!(nv.exist(SCRIPT_ID));
    assert_eq!(nv.peek(SCRIPT_ID).unwrap().as_ref(), b"var x = 1;");
}

#[test]
fn missing_slot_reads_none() {
    let nv = MemNvram::default();
    assert!(!nv.exist(LOCKDOWN_ID));
    assert!(nv.peek(LOCKDOWN_ID).is_none());
}

#[test]
fn delete_removes_slot() {
    let mut nv = MemNvram::default();
    nv.write(SCRIPT_NAME_ID, b"app.js").unwrap();
    nv.delete(SCRIPT_NAME_ID).unwrap();
    assert!(!nv.exist(SCRIPT_NAME_ID));
}

#[test]
fn streamed_append_respects_reservation() {
    let mut nv = MemNvram::default();
    nv.create(SCRIPT_ID, 8).unwrap();
    nv.append(SCRIPT_ID, b"1234").unwrap();
    nv.append(SCRIPT_ID, b"5678").unwrap();
    assert_eq!(nv.append(SCRIPT_ID, b"9"), Err(CoreError::Resources));
    nv.commit().unwrap();
    assert_eq!(nv.peek(SCRIPT_ID).unwrap().as_ref(), b"12345678");
}

#[test]
fn reservation_counts_against_remaining() {
    let mut nv = MemNvram::new(100);
    nv.create(SCRIPT_ID, 60).unwrap();
    assert_eq!(nv.remaining(), 40);
    assert_eq!(nv.create(SCRIPT_NAME_ID, 50), Err(CoreError::Resources));
}

#[test]
fn rewrite_replaces_previous_blob() {
    let mut nv = MemNvram::new(64);
    nv.write(SCRIPT_ID, &[0u8; 40]).unwrap();
    // A second write of the same slot reuses its budget.
    nv.write(SCRIPT_ID, &[1u8; 50]).unwrap();
    assert_eq!(nv.peek(SCRIPT_ID).unwrap().len(), 50);
}

#[test]
fn u32_helpers_round_trip() {
    let mut nv = MemNvram::default();
    write_u32(&mut nv, SCRIPT_SIZE_ID, 0xDEAD_BEEF).unwrap();
    assert_eq!(read_u32(&nv, SCRIPT_SIZE_ID), Some(0xDEAD_BEEF));
}

#[test]
fn hex_codec_round_trips() {
    assert_eq!(from_hex(&to_hex(&[0x00, 0x7f, 0xff])).unwrap(), vec![0x00, 0x7f, 0xff]);
    assert!(from_hex("abc").is_none());
    assert!(from_hex("zz").is_none());
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nvram.json");
    {
        let mut nv = FileNvram::open(&path).unwrap();
        nv.write(SCRIPT_NAME_ID, b"blinky.js").unwrap();
        write_u32(&mut nv, SCRIPT_SIZE_ID, 42).unwrap();
    }
    let nv = FileNvram::open(&path).unwrap();
    assert_eq!(nv.peek(SCRIPT_NAME_ID).unwrap().as_ref(), b"blinky.js");
    assert_eq!(read_u32(&nv, SCRIPT_SIZE_ID), Some(42));
}

#[test]
fn file_store_delete_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nvram.json");
    {
        let mut nv = FileNvram::open(&path).unwrap();
        nv.write(LOCKDOWN_ID, &[1]).unwrap();
        nv.delete(LOCKDOWN_ID).unwrap();
    }
    let nv = FileNvram::open(&path).unwrap();
    assert!(!nv.exist(LOCKDOWN_ID));
}
