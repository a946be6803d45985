//! Flat settings maps handed to component managers.

use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Number(value)
    }
}

impl From<f32> for SettingValue {
    fn from(value: f32) -> Self {
        SettingValue::Number(value as f64)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Flag(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

/// Named parameter values. Accessors take the documented default, so a
/// missing key and a key of the wrong type behave the same.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings(BTreeMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn number(&self, key: &str, default: f32) -> f32 {
        match self.0.get(key) {
            Some(SettingValue::Number(n)) => *n as f32,
            _ => default,
        }
    }

    /// Number if present; `None` for a missing or non-numeric key.
    pub fn try_number(&self, key: &str) -> Option<f32> {
        match self.0.get(key) {
            Some(SettingValue::Number(n)) => Some(*n as f32),
            _ => None,
        }
    }

    pub fn text<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.0.get(key) {
            Some(SettingValue::Text(s)) => s.as_str(),
            _ => default,
        }
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(SettingValue::Flag(b)) => *b,
            _ => default,
        }
    }

    /// `self` with every key of `patch` written over it.
    pub fn merged(&self, patch: &Settings) -> Settings {
        let mut merged = self.clone();
        for (key, value) in &patch.0 {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One component's entry in a voice preset.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentPreset {
    #[cfg_attr(feature = "serde", serde(default = "enabled_by_default"))]
    pub enabled: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: Settings,
}

#[cfg(feature = "serde")]
fn enabled_by_default() -> bool {
    true
}

impl ComponentPreset {
    pub fn enabled(params: Settings) -> Self {
        Self {
            enabled: true,
            params,
        }
    }

    pub fn disabled(params: Settings) -> Self {
        Self {
            enabled: false,
            params,
        }
    }
}

impl Default for ComponentPreset {
    fn default() -> Self {
        Self::enabled(Settings::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_fall_back_on_type_mismatch() {
        let s = Settings::new()
            .with("frequency", 1200.0)
            .with("type", "highpass")
            .with("retrigger", true);

        assert_eq!(s.number("frequency", 0.0), 1200.0);
        assert_eq!(s.number("type", 5000.0), 5000.0);
        assert_eq!(s.text("type", "lowpass"), "highpass");
        assert_eq!(s.text("frequency", "lowpass"), "lowpass");
        assert!(s.flag("retrigger", false));
        assert_eq!(s.try_number("missing"), None);
    }

    #[test]
    fn merged_patch_wins() {
        let base = Settings::new().with("attack", 0.01).with("release", 0.5);
        let patch = Settings::new().with("release", 1.5);
        let merged = base.merged(&patch);

        assert_eq!(merged.number("attack", 0.0), 0.01);
        assert_eq!(merged.number("release", 0.0), 1.5);
        assert_eq!(base.number("release", 0.0), 0.5);
    }

    #[test]
    fn collects_from_pairs() {
        let s: Settings = [("gain", 0.5), ("wet", 0.2)].into_iter().collect();
        assert_eq!(s.len(), 2);
        assert_eq!(s.number("wet", 0.0), 0.2);
    }
}
