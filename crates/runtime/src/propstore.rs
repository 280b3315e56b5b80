// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent property store feeding About and Config.
//!
//! A fixed catalogue of typed fields lives in NVRAM as UTF-8 blobs, one
//! slot per field. Localized fields hold a serialized language→string map;
//! private fields never cross the About or Config boundaries. The store is
//! the About property getter: About queries translate into [`PropStore::read_all`]
//! with the appropriate filter.

use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::bus::WireArg;
use crate::error::{CoreError, CoreResult};
use crate::nvram::{NvId, Nvram, PROPSTORE_BASE};
use crate::translations::Translations;

pub const FLAG_READ_ONLY: u8 = 0x01;
pub const FLAG_ANNOUNCED: u8 = 0x02;
pub const FLAG_LOCALIZED: u8 = 0x04;
pub const FLAG_PRIVATE: u8 = 0x08;

/// Longest predefined property value.
pub const MAX_PROP_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    // Config keys.
    DeviceId,
    AppId,
    DeviceName,
    DefaultLanguage,
    Passcode,
    RealmName,
    // Regular keys.
    AppName,
    Description,
    Manufacturer,
    ModelNumber,
    DateOfManufacture,
    SoftwareVersion,
    RuntimeVersion,
    MaxLength,
    // Optional keys.
    HardwareVersion,
    SupportUrl,
}

pub const ALL_FIELDS: [Field; 16] = [
    Field::DeviceId,
    Field::AppId,
    Field::DeviceName,
    Field::DefaultLanguage,
    Field::Passcode,
    Field::RealmName,
    Field::AppName,
    Field::Description,
    Field::Manufacturer,
    Field::ModelNumber,
    Field::DateOfManufacture,
    Field::SoftwareVersion,
    Field::RuntimeVersion,
    Field::MaxLength,
    Field::HardwareVersion,
    Field::SupportUrl,
];

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Self::DeviceId => "DeviceId",
            Self::AppId => "AppId",
            Self::DeviceName => "DeviceName",
            Self::DefaultLanguage => "DefaultLanguage",
            Self::Passcode => "Passcode",
            Self::RealmName => "RealmName",
            Self::AppName => "AppName",
            Self::Description => "Description",
            Self::Manufacturer => "Manufacturer",
            Self::ModelNumber => "ModelNumber",
            Self::DateOfManufacture => "DateOfManufacture",
            Self::SoftwareVersion => "SoftwareVersion",
            Self::RuntimeVersion => "RuntimeVersion",
            Self::MaxLength => "MaxLength",
            Self::HardwareVersion => "HardwareVersion",
            Self::SupportUrl => "SupportUrl",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        ALL_FIELDS.iter().copied().find(|f| f.key() == key)
    }

    fn index(&self) -> usize {
        ALL_FIELDS
            .iter()
            .position(|f| f == self)
            .unwrap_or_default()
    }

    fn nv_id(&self) -> NvId {
        PROPSTORE_BASE + self.index() as NvId
    }

    fn default_flags(&self) -> u8 {
        match self {
            Self::DeviceId | Self::AppId => FLAG_READ_ONLY | FLAG_ANNOUNCED,
            Self::DeviceName => FLAG_ANNOUNCED | FLAG_LOCALIZED,
            Self::DefaultLanguage => FLAG_ANNOUNCED,
            Self::Passcode | Self::RealmName => FLAG_PRIVATE,
            Self::AppName => FLAG_ANNOUNCED,
            Self::Description => FLAG_LOCALIZED,
            Self::Manufacturer => FLAG_ANNOUNCED | FLAG_LOCALIZED,
            Self::ModelNumber => FLAG_ANNOUNCED,
            Self::DateOfManufacture | Self::SoftwareVersion | Self::RuntimeVersion => {
                FLAG_READ_ONLY
            }
            Self::MaxLength => FLAG_READ_ONLY | FLAG_ANNOUNCED,
            Self::HardwareVersion => FLAG_READ_ONLY,
            Self::SupportUrl => FLAG_LOCALIZED,
        }
    }

    fn default_initial(&self) -> Option<&'static str> {
        match self {
            Self::DefaultLanguage => Some("en"),
            Self::Passcode => Some("303030303030"),
            Self::AppName => Some("hutch"),
            Self::Description => Some("hutch scripted device"),
            Self::Manufacturer => Some("Alfred Jean"),
            Self::ModelNumber => Some("0.0.1"),
            Self::DateOfManufacture => Some("2025-09-03"),
            Self::SoftwareVersion | Self::HardwareVersion => Some("0.0.1"),
            Self::SupportUrl => Some("https://example.com/hutch"),
            _ => None,
        }
    }
}

/// Which consumer a [`PropStore::read_all`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFilter {
    About,
    Config,
    Announce,
}

#[derive(Debug, Clone)]
struct EntryDef {
    field: Field,
    flags: u8,
    initial: Option<String>,
}

/// The property store. Values live in NVRAM; this struct only carries the
/// catalogue (with any script-supplied overrides) and the local GUID used
/// for identity defaults.
#[derive(Debug)]
pub struct PropStore {
    defs: Vec<EntryDef>,
    guid: Uuid,
}

impl PropStore {
    pub fn new(guid: Uuid) -> Self {
        let defs = ALL_FIELDS
            .iter()
            .map(|f| EntryDef {
                field: *f,
                flags: f.default_flags(),
                initial: f.default_initial().map(str::to_owned),
            })
            .collect();
        Self { defs, guid }
    }

    /// Apply a script-supplied `{ key: value }` or
    /// `{ key: { value, access } }` override map before initialization.
    pub fn override_field(&mut self, key: &str, value: Option<String>, flags: Option<u8>) {
        let Some(field) = Field::from_key(key) else {
            warn!(key, "unknown property override");
            return;
        };
        let def = &mut self.defs[field.index()];
        if let Some(value) = value {
            def.initial = Some(value);
        }
        if let Some(flags) = flags {
            def.flags = flags;
        }
    }

    fn def(&self, field: Field) -> &EntryDef {
        &self.defs[field.index()]
    }

    pub fn flags(&self, field: Field) -> u8 {
        self.def(field).flags
    }

    pub fn is_read_only(&self, field: Field) -> bool {
        self.def(field).flags & (FLAG_READ_ONLY | FLAG_PRIVATE) != 0
    }

    /// Write defaults for any field that has no stored value yet. With
    /// `force`, existing values are overwritten too (factory reset).
    pub fn init(&self, nv: &mut dyn Nvram, device_name: Option<&str>, force: bool) {
        let guid_hex = self.guid.simple().to_string();
        if let Some(name) = device_name {
            let _ = self.set_raw(nv, Field::DeviceName, name);
        }
        for def in &self.defs {
            if !force && nv.exist(def.field.nv_id()) {
                continue;
            }
            let value = match def.field {
                Field::AppId | Field::DeviceId => Some(guid_hex.clone()),
                Field::DeviceName => Some(self.default_device_name(nv)),
                _ => def.initial.clone(),
            };
            if let Some(value) = value {
                if self.set_raw(nv, def.field, &value).is_err() {
                    warn!(key = def.field.key(), "failed to initialize property");
                }
            }
        }
    }

    /// `"<manufacturer> <model> <last-8-hex-of-guid>"`.
    fn default_device_name(&self, nv: &dyn Nvram) -> String {
        let manufacturer = self
            .peek(nv, Field::Manufacturer)
            .or_else(|| self.def(Field::Manufacturer).initial.clone())
            .unwrap_or_default();
        let model = self
            .peek(nv, Field::ModelNumber)
            .or_else(|| self.def(Field::ModelNumber).initial.clone())
            .unwrap_or_default();
        let hex = self.guid.simple().to_string();
        let tail = &hex[hex.len() - 8..];
        format!("{manufacturer} {model} {tail}")
    }

    /// Raw stored blob as UTF-8, no localization.
    fn peek(&self, nv: &dyn Nvram, field: Field) -> Option<String> {
        let raw = nv.peek(field.nv_id())?;
        String::from_utf8(raw.to_vec()).ok()
    }

    /// Write the raw blob, skipping the write when the value is unchanged.
    fn set_raw(&self, nv: &mut dyn Nvram, field: Field, value: &str) -> CoreResult<()> {
        if self.peek(nv, field).as_deref() == Some(value) {
            return Ok(());
        }
        nv.write(field.nv_id(), value.as_bytes())
    }

    /// Index of the current default language.
    pub fn current_language(&self, nv: &dyn Nvram, translations: &Translations) -> u8 {
        self.peek(nv, Field::DefaultLanguage)
            .map(|lang| translations.language_index(&lang))
            .unwrap_or(0)
    }

    pub fn get(
        &self,
        nv: &dyn Nvram,
        translations: &Translations,
        field: Field,
    ) -> Option<String> {
        self.get_for_lang(nv, translations, field, self.current_language(nv, translations))
    }

    /// Read a field in the given language.
    ///
    /// Localized fields try the requested language, then the stored
    /// default language, then the compile-time default. Private fields
    /// read as `None`.
    pub fn get_for_lang(
        &self,
        nv: &dyn Nvram,
        translations: &Translations,
        field: Field,
        lang: u8,
    ) -> Option<String> {
        let def = self.def(field);
        if def.flags & FLAG_PRIVATE != 0 {
            return None;
        }
        if def.flags & FLAG_LOCALIZED == 0 {
            return self.peek(nv, field);
        }
        let raw = self.peek(nv, field)?;
        let map: serde_json::Value = match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(map) if map.is_object() => map,
            // A localized field set before any language map existed is
            // stored as the bare string.
            _ => return Some(raw),
        };
        let mut candidates = vec![translations.language_name(lang).to_owned()];
        if let Some(stored_default) = self.peek(nv, Field::DefaultLanguage) {
            candidates.push(stored_default);
        }
        candidates.push(crate::translations::DEFAULT_LANGUAGE.to_owned());
        for lang_name in candidates {
            if let Some(s) = map.get(&lang_name).and_then(|v| v.as_str()) {
                return Some(s.to_owned());
            }
        }
        None
    }

    pub fn set(
        &self,
        nv: &mut dyn Nvram,
        translations: &Translations,
        field: Field,
        value: &str,
    ) -> CoreResult<()> {
        let lang = self.current_language(nv, translations);
        self.set_for_lang(nv, translations, field, lang, value)
    }

    /// Write a field. For a localized field the stored language map is
    /// read, the one language updated, and the whole map written back.
    pub fn set_for_lang(
        &self,
        nv: &mut dyn Nvram,
        translations: &Translations,
        field: Field,
        lang: u8,
        value: &str,
    ) -> CoreResult<()> {
        let def = self.def(field);
        if def.flags & FLAG_LOCALIZED == 0 {
            return self.set_raw(nv, field, value);
        }
        let mut map = self
            .peek(nv, field)
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .and_then(|v| match v {
                serde_json::Value::Object(m) => Some(m),
                _ => None,
            })
            .unwrap_or_default();
        map.insert(
            translations.language_name(lang).to_owned(),
            serde_json::Value::String(value.to_owned()),
        );
        let encoded = serde_json::Value::Object(map).to_string();
        self.set_raw(nv, field, &encoded)
    }

    /// Config-surface update by key name.
    pub fn update(
        &self,
        nv: &mut dyn Nvram,
        translations: &Translations,
        key: &str,
        lang: u8,
        value: &str,
    ) -> CoreResult<()> {
        let field = Field::from_key(key).ok_or(CoreError::Invalid)?;
        if self.is_read_only(field) {
            return Err(CoreError::Invalid);
        }
        self.set_for_lang(nv, translations, field, lang, value)
    }

    /// Reset one key to its default.
    pub fn reset(&self, nv: &mut dyn Nvram, key: &str) -> CoreResult<()> {
        let field = Field::from_key(key).ok_or(CoreError::Invalid)?;
        nv.delete(field.nv_id())?;
        self.init(nv, None, false);
        Ok(())
    }

    /// Factory reset of every field. The console lockdown bit is not a
    /// property and survives this.
    pub fn reset_all(&self, nv: &mut dyn Nvram) {
        self.init(nv, None, true);
    }

    /// Marshal every visible field for the given consumer.
    pub fn read_all(
        &self,
        nv: &dyn Nvram,
        translations: &Translations,
        filter: ReadFilter,
        lang: u8,
    ) -> Vec<(String, WireArg)> {
        let mut out = Vec::new();
        for def in &self.defs {
            if def.flags & FLAG_PRIVATE != 0 {
                continue;
            }
            let wanted = match filter {
                ReadFilter::About => true,
                ReadFilter::Config => def.flags & FLAG_READ_ONLY == 0,
                ReadFilter::Announce => def.flags & FLAG_ANNOUNCED != 0,
            };
            if !wanted {
                continue;
            }
            let arg = match def.field {
                Field::AppId => WireArg::Bytes(Bytes::copy_from_slice(self.guid.as_bytes())),
                Field::MaxLength => WireArg::Uint16(MAX_PROP_LENGTH as u16),
                Field::RuntimeVersion => WireArg::Str(env!("CARGO_PKG_VERSION").to_owned()),
                _ => match self.get_for_lang(nv, translations, def.field, lang) {
                    Some(value) => WireArg::Str(value),
                    None => {
                        warn!(key = def.field.key(), "no value for field");
                        continue;
                    }
                },
            };
            out.push((def.field.key().to_owned(), arg));
        }
        if filter == ReadFilter::About {
            out.push((
                "SupportedLanguages".to_owned(),
                WireArg::Array(
                    "s".into(),
                    translations.language_names().into_iter().map(WireArg::Str).collect(),
                ),
            ));
        }
        out
    }
}

#[cfg(test)]
#[path = "propstore_tests.rs"]
mod tests;
