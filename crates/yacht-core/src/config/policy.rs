//! Virtual sharding policy file.
//!
//! ```yaml
//! default_posture: deny
//! mooring: false
//! tables:
//!   wp_users: immutable
//!   wp_options: immutable
//!   wp_comments: writable
//! ```
//!
//! The `immutable:` and `writable:` list forms are accepted as well and are
//! merged with `tables`. Names are case-insensitive and may be qualified with a
//! database (`shop.orders`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use super::ConfigError;

/// Classification of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableClass {
    /// No write may ever reach this table.
    Immutable,
    /// Content table; writes are allowed unless the agent is moored.
    Writable,
}

impl fmt::Display for TableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immutable => write!(f, "immutable"),
            Self::Writable => write!(f, "writable"),
        }
    }
}

/// How writes to unclassified tables are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPosture {
    #[default]
    Deny,
    Allow,
}

/// Policy file contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Posture for tables not listed anywhere.
    #[serde(default)]
    pub default_posture: DefaultPosture,

    /// Initial value of the mooring flag when the agent starts.
    #[serde(default)]
    pub mooring: bool,

    /// Let DDL through, evaluated like a write. Denied outright when false.
    #[serde(default)]
    pub allow_ddl: bool,

    /// `{table_name: classification}` map.
    #[serde(default)]
    pub tables: BTreeMap<String, TableClass>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub immutable: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writable: Vec<String>,
}

impl PolicyConfig {
    /// Load a policy from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a policy from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let policy: Self = serde_yaml::from_str(content)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.classifications().map(|_| ())
    }

    /// Merge every classification source into one map keyed by normalized name.
    ///
    /// A name that normalizes to two different classifications is an error.
    pub fn classifications(&self) -> Result<BTreeMap<String, TableClass>, ConfigError> {
        let entries = self
            .tables
            .iter()
            .map(|(name, class)| (name.as_str(), *class))
            .chain(self.immutable.iter().map(|n| (n.as_str(), TableClass::Immutable)))
            .chain(self.writable.iter().map(|n| (n.as_str(), TableClass::Writable)));

        let mut merged = BTreeMap::new();
        for (raw, class) in entries {
            let name = normalize_table_name(raw)?;
            match merged.get(&name) {
                Some(existing) if *existing != class => {
                    return Err(ConfigError::Config(format!(
                        "table '{name}' is classified both {existing} and {class}"
                    )));
                }
                _ => {
                    merged.insert(name, class);
                }
            }
        }
        Ok(merged)
    }
}

/// Normalize a configured table name: strip identifier quotes, lowercase,
/// keep an optional `database.` qualifier.
pub fn normalize_table_name(raw: &str) -> Result<String, ConfigError> {
    let parts: Vec<String> = raw
        .split('.')
        .map(|p| p.trim().trim_matches(|c| c == '`' || c == '"').to_lowercase())
        .collect();

    if parts.len() > 2 || parts.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::Config(format!("invalid table name '{raw}'")));
    }
    Ok(parts.join("."))
}
