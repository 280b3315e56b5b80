// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script-registered language table and string translations.
//!
//! Localized property-store fields and object descriptions resolve through
//! this table. Language index 0 is the compile-time default; a script may
//! register more languages and per-language translation maps.

use indexmap::IndexMap;

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Default)]
pub struct Translations {
    /// Registered language names; empty means "just the default".
    languages: Vec<String>,
    /// lang → (source string → translated string).
    tables: IndexMap<String, IndexMap<String, String>>,
}

impl Translations {
    /// Replace the language table. The first entry becomes language 0.
    pub fn register_languages(&mut self, languages: Vec<String>) {
        self.languages = languages;
    }

    pub fn add_translation(
        &mut self,
        lang: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) {
        self.tables.entry(lang.into()).or_default().insert(from.into(), to.into());
    }

    /// Never less than 1.
    pub fn num_languages(&self) -> u8 {
        self.languages.len().max(1) as u8
    }

    pub fn language_name(&self, index: u8) -> &str {
        self.languages
            .get(index as usize)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LANGUAGE)
    }

    /// Index of `name`, or 0 when the language is unknown.
    pub fn language_index(&self, name: &str) -> u8 {
        self.languages
            .iter()
            .position(|l| l == name)
            .map(|i| i as u8)
            .unwrap_or(0)
    }

    pub fn language_names(&self) -> Vec<String> {
        if self.languages.is_empty() {
            vec![DEFAULT_LANGUAGE.to_owned()]
        } else {
            self.languages.clone()
        }
    }

    /// Translate `text` into the language at `index`; falls back to the
    /// original text when no translation is registered.
    pub fn translate<'a>(&'a self, text: &'a str, index: u8) -> &'a str {
        let lang = self.language_name(index);
        self.tables
            .get(lang)
            .and_then(|table| table.get(text))
            .map(String::as_str)
            .unwrap_or(text)
    }
}

#[cfg(test)]
#[path = "translations_tests.rs"]
mod tests;
