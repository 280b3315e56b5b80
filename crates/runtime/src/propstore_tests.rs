// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::nvram::MemNvram;
use crate::translations::Translations;

fn fixture() -> (PropStore, MemNvram, Translations) {
    let store = PropStore::new(Uuid::from_u128(0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10));
    let mut nv = MemNvram::default();
    let mut t = Translations::default();
    t.register_languages(vec!["en".into(), "de".into()]);
    store.init(&mut nv, None, false);
    (store, nv, t)
}

#[test]
fn defaults_are_written_once() {
    let (store, mut nv, t) = fixture();
    assert_eq!(store.get(&nv, &t, Field::AppName).as_deref(), Some("hutch"));
    assert_eq!(store.get(&nv, &t, Field::DefaultLanguage).as_deref(), Some("en"));
    // A second init must not clobber user changes.
    store.set(&mut nv, &t, Field::AppName, "renamed").unwrap();
    store.init(&mut nv, None, false);
    assert_eq!(store.get(&nv, &t, Field::AppName).as_deref(), Some("renamed"));
}

#[test]
fn identity_fields_default_to_guid() {
    let (store, nv, t) = fixture();
    let device_id = store.get(&nv, &t, Field::DeviceId).unwrap();
    let app_id = store.get(&nv, &t, Field::AppId).unwrap();
    assert_eq!(device_id, app_id);
    assert_eq!(device_id.len(), 32);
    assert!(device_id.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn device_name_defaults_to_manufacturer_model_guid_tail() {
    let (store, nv, t) = fixture();
    let name = store.get(&nv, &t, Field::DeviceName).unwrap();
    assert_eq!(name, "Alfred Jean 0.0.1 0d0e0f10");
}

#[test]
fn private_fields_never_read_back() {
    let (store, nv, t) = fixture();
    assert_eq!(store.get(&nv, &t, Field::Passcode), None);
    let about = store.read_all(&nv, &t, ReadFilter::About, 0);
    assert!(about.iter().all(|(k, _)| k != "Passcode" && k != "RealmName"));
}

#[test]
fn localized_round_trip_per_language() {
    let (store, mut nv, t) = fixture();
    store.set_for_lang(&mut nv, &t, Field::Description, 0, "a lamp").unwrap();
    store.set_for_lang(&mut nv, &t, Field::Description, 1, "eine Lampe").unwrap();
    assert_eq!(
        store.get_for_lang(&nv, &t, Field::Description, 0).as_deref(),
        Some("a lamp")
    );
    assert_eq!(
        store.get_for_lang(&nv, &t, Field::Description, 1).as_deref(),
        Some("eine Lampe")
    );
    // Overwrite one language, the other survives.
    store.set_for_lang(&mut nv, &t, Field::Description, 1, "die Lampe").unwrap();
    assert_eq!(
        store.get_for_lang(&nv, &t, Field::Description, 1).as_deref(),
        Some("die Lampe")
    );
    assert_eq!(
        store.get_for_lang(&nv, &t, Field::Description, 0).as_deref(),
        Some("a lamp")
    );
}

#[test]
fn missing_language_falls_back_to_default() {
    let (store, mut nv, t) = fixture();
    store.set_for_lang(&mut nv, &t, Field::SupportUrl, 0, "https://en.example").unwrap();
    assert_eq!(
        store.get_for_lang(&nv, &t, Field::SupportUrl, 1).as_deref(),
        Some("https://en.example")
    );
}

#[test]
fn update_rejects_read_only_and_unknown_keys() {
    let (store, mut nv, t) = fixture();
    assert_eq!(
        store.update(&mut nv, &t, "DeviceId", 0, "nope"),
        Err(CoreError::Invalid)
    );
    assert_eq!(store.update(&mut nv, &t, "Bogus", 0, "x"), Err(CoreError::Invalid));
    store.update(&mut nv, &t, "DeviceName", 0, "kitchen").unwrap();
    assert_eq!(store.get_for_lang(&nv, &t, Field::DeviceName, 0).as_deref(), Some("kitchen"));
}

#[test]
fn reset_restores_default() {
    let (store, mut nv, t) = fixture();
    store.set(&mut nv, &t, Field::AppName, "changed").unwrap();
    store.reset(&mut nv, "AppName").unwrap();
    assert_eq!(store.get(&nv, &t, Field::AppName).as_deref(), Some("hutch"));
}

#[test]
fn reset_all_forces_every_default_back() {
    let (store, mut nv, t) = fixture();
    store.set(&mut nv, &t, Field::AppName, "changed").unwrap();
    store.update(&mut nv, &t, "DeviceName", 0, "kitchen").unwrap();
    store.reset_all(&mut nv);
    assert_eq!(store.get(&nv, &t, Field::AppName).as_deref(), Some("hutch"));
    assert_eq!(
        store.get(&nv, &t, Field::DeviceName).unwrap(),
        "Alfred Jean 0.0.1 0d0e0f10"
    );
}

#[test]
fn announce_filter_selects_announced_fields_only() {
    let (store, nv, t) = fixture();
    let announce = store.read_all(&nv, &t, ReadFilter::Announce, 0);
    let keys: Vec<_> = announce.iter().map(|(k, _)| k.as_str()).collect();
    assert!(keys.contains(&"DeviceId"));
    assert!(keys.contains(&"AppName"));
    assert!(!keys.contains(&"Description"));
    assert!(!keys.contains(&"SupportedLanguages"));
}

#[test]
fn about_filter_synthesizes_supported_languages() {
    let (store, nv, t) = fixture();
    let about = store.read_all(&nv, &t, ReadFilter::About, 0);
    let langs = about.iter().find(|(k, _)| k == "SupportedLanguages").unwrap();
    let WireArg::Array(elem, items) = &langs.1 else { panic!("expected array") };
    assert_eq!(elem, "s");
    assert_eq!(items.len(), 2);
}

#[test]
fn about_marshals_app_id_as_raw_guid_bytes() {
    let (store, nv, t) = fixture();
    let about = store.read_all(&nv, &t, ReadFilter::About, 0);
    let app_id = about.iter().find(|(k, _)| k == "AppId").unwrap();
    match &app_id.1 {
        WireArg::Bytes(raw) => assert_eq!(raw.len(), 16),
        other => panic!("expected bytes, got {other:?}"),
    }
}

#[test]
fn config_filter_excludes_read_only() {
    let (store, nv, t) = fixture();
    let config = store.read_all(&nv, &t, ReadFilter::Config, 0);
    let keys: Vec<_> = config.iter().map(|(k, _)| k.as_str()).collect();
    assert!(keys.contains(&"DeviceName"));
    assert!(!keys.contains(&"DeviceId"));
    assert!(!keys.contains(&"MaxLength"));
}

#[test]
fn script_overrides_replace_initial_values() {
    let mut store = PropStore::new(Uuid::new_v4());
    store.override_field("Manufacturer", Some("Acme".into()), None);
    let mut nv = MemNvram::default();
    let t = Translations::default();
    store.init(&mut nv, None, false);
    assert_eq!(
        store.get_for_lang(&nv, &t, Field::Manufacturer, 0).as_deref(),
        Some("Acme")
    );
}
