//! Raw option input as handed over by the host.

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::flags::{FlagKind, find_flag};

/// Typed access to raw option values by flag name.
///
/// Unset options yield the flag's declared default.
pub trait DriverOptions {
    fn string(&self, key: &str) -> String;

    fn string_slice(&self, key: &str) -> Vec<String>;

    fn bool(&self, key: &str) -> bool;

    /// Fails when the raw value is not an integer.
    fn int(&self, key: &str) -> Result<i64, ConfigError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Parse an integer option the way every [`DriverOptions`] implementation
/// should: empty means the default, anything else must be a number.
pub fn parse_int(key: &str, raw: &str) -> Result<i64, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(default_int(key));
    }
    raw.parse::<i64>()
        .map_err(|_| ConfigError::new(format!("--{key} expects an integer, got {raw:?}")))
}

pub(crate) fn default_string(key: &str) -> String {
    match find_flag(key).map(|f| &f.kind) {
        Some(FlagKind::String(default)) => (*default).to_string(),
        Some(FlagKind::Int(default)) => default.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn default_int(key: &str) -> i64 {
    match find_flag(key).map(|f| &f.kind) {
        Some(FlagKind::Int(default)) => *default,
        _ => 0,
    }
}

/// Map-backed options, used by tests and by hosts that collect values
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    values: HashMap<String, OptionValue>,
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<OptionValue>) {
        self.values.insert(key.to_string(), value.into());
    }
}

impl FromIterator<(String, OptionValue)> for MapOptions {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl DriverOptions for MapOptions {
    fn string(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(OptionValue::Str(s)) => s.clone(),
            Some(OptionValue::Int(i)) => i.to_string(),
            Some(OptionValue::Bool(b)) => b.to_string(),
            Some(OptionValue::List(items)) => items.join(","),
            None => default_string(key),
        }
    }

    fn string_slice(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(OptionValue::List(items)) => items.clone(),
            Some(OptionValue::Str(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    fn bool(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(OptionValue::Bool(b)) => *b,
            Some(OptionValue::Str(s)) => matches!(s.as_str(), "1" | "true" | "TRUE" | "True"),
            _ => false,
        }
    }

    fn int(&self, key: &str) -> Result<i64, ConfigError> {
        match self.values.get(key) {
            Some(OptionValue::Int(i)) => Ok(*i),
            Some(OptionValue::Str(s)) => parse_int(key, s),
            Some(other) => Err(ConfigError::new(format!(
                "--{key} expects an integer, got {other:?}"
            ))),
            None => Ok(default_int(key)),
        }
    }
}
