//! Module enable map.
//!
//! Values come from configuration files or the settings repository. Input is
//! read leniently: booleans are taken as-is, numbers are truthy when non-zero
//! and every other JSON value is treated as absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persisted `module name -> enabled` map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, bool>")]
pub struct ModuleSettings {
    entries: BTreeMap<String, bool>,
}

impl ModuleSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds settings from a JSON object, ignoring malformed values.
    ///
    /// Anything other than an object yields empty settings.
    pub fn from_json_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => map
                .iter()
                .filter_map(|(name, raw)| enabled_from_json(raw).map(|on| (name.clone(), on)))
                .collect(),
            _ => Self::default(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.entries.insert(name.into(), enabled);
    }

    pub fn remove(&mut self, name: &str) -> Option<bool> {
        self.entries.remove(name)
    }

    /// Explicit setting for one module, `None` when unset.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(name, on)| (name.as_str(), *on))
    }

    /// Returns a copy where entries of `self` win over `fallback`.
    pub fn layered_over(&self, fallback: &ModuleSettings) -> ModuleSettings {
        let mut merged = fallback.clone();
        merged.entries.extend(self.entries.clone());
        merged
    }
}

impl FromIterator<(String, bool)> for ModuleSettings {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for ModuleSettings {
    fn from(value: BTreeMap<String, Value>) -> Self {
        value
            .into_iter()
            .filter_map(|(name, raw)| enabled_from_json(&raw).map(|on| (name, on)))
            .collect()
    }
}

impl From<ModuleSettings> for BTreeMap<String, bool> {
    fn from(value: ModuleSettings) -> Self {
        value.entries
    }
}

fn enabled_from_json(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(on) => Some(*on),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        _ => None,
    }
}
