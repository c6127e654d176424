//! Macro table
//!
//! Holds the externally supplied macro definitions that drive conditional
//! compilation. Definitions come from the configuration or from `-D` style
//! command line arguments; `#define` lines inside parsed sources never
//! feed this table.

use indexmap::IndexMap;
use thiserror::Error;

/// Errors from reading macro definitions
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MacroError {
    #[error("Empty macro definition")]
    Empty,

    #[error("Invalid macro name: {0}")]
    InvalidName(String),
}

/// A macro definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition {
    pub name: String,
    pub value: String,
}

impl MacroDefinition {
    /// Create a macro that is simply defined, with the conventional value `1`
    pub fn defined(name: &str) -> Self {
        Self::with_value(name, "1")
    }

    /// Create a macro with a specific value
    pub fn with_value(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Parse a `NAME` or `NAME=VALUE` argument as given to `-D`
    pub fn parse_arg(arg: &str) -> Result<Self, MacroError> {
        let arg = arg.trim();
        if arg.is_empty() {
            return Err(MacroError::Empty);
        }
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (arg, "1"),
        };
        if !is_identifier(name) {
            return Err(MacroError::InvalidName(name.to_string()));
        }
        Ok(Self::with_value(name, value))
    }

    /// Format as a `NAME=VALUE` argument
    pub fn to_arg(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Name to value mapping, in definition order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacroTable {
    defines: IndexMap<String, String>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.defines.insert(name.into(), value.into());
    }

    pub fn insert(&mut self, definition: MacroDefinition) {
        self.define(definition.name, definition.value);
    }

    pub fn undefine(&mut self, name: &str) {
        self.defines.shift_remove(name);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.defines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<&IndexMap<String, String>> for MacroTable {
    fn from(defines: &IndexMap<String, String>) -> Self {
        Self {
            defines: defines.clone(),
        }
    }
}

impl FromIterator<MacroDefinition> for MacroTable {
    fn from_iter<I: IntoIterator<Item = MacroDefinition>>(iter: I) -> Self {
        let mut table = Self::new();
        for definition in iter {
            table.insert(definition);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg() {
        assert_eq!(
            MacroDefinition::parse_arg("DEBUG").unwrap(),
            MacroDefinition::defined("DEBUG")
        );
        assert_eq!(
            MacroDefinition::parse_arg("LEVEL=3").unwrap(),
            MacroDefinition::with_value("LEVEL", "3")
        );
        assert_eq!(MacroDefinition::parse_arg(" "), Err(MacroError::Empty));
        assert!(matches!(
            MacroDefinition::parse_arg("1BAD=2"),
            Err(MacroError::InvalidName(_))
        ));
    }

    #[test]
    fn test_table_operations() {
        let mut table: MacroTable = vec![
            MacroDefinition::defined("A"),
            MacroDefinition::with_value("B", "2"),
        ]
        .into_iter()
        .collect();
        assert!(table.is_defined("A"));
        assert_eq!(table.value("B"), Some("2"));

        table.undefine("A");
        assert!(!table.is_defined("A"));
        assert_eq!(table.len(), 1);
        assert_eq!(MacroDefinition::with_value("B", "2").to_arg(), "B=2");
    }
}
