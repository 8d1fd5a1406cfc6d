//! Immutable policy snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use yacht_core::{DefaultPosture, PolicyConfig, TableClass};
use yacht_sql::TableRef;

use crate::error::PolicyError;

/// Schemas whose tables are always immutable, whatever the policy says.
pub const SYSTEM_SCHEMAS: &[&str] = &["mysql", "information_schema", "performance_schema", "sys"];

/// How a single table resolves against a ruleset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Immutable,
    Writable,
    Unclassified,
}

impl From<TableClass> for Classification {
    fn from(class: TableClass) -> Self {
        match class {
            TableClass::Immutable => Self::Immutable,
            TableClass::Writable => Self::Writable,
        }
    }
}

/// A complete, self-consistent policy. Never mutated after construction;
/// reloads build a new one.
#[derive(Debug, Clone)]
pub struct Ruleset {
    tables: HashMap<String, TableClass>,
    default_posture: DefaultPosture,
    allow_ddl: bool,
    version: u64,
    loaded_at: DateTime<Utc>,
}

impl Ruleset {
    /// Build a ruleset from a validated policy configuration.
    pub fn from_config(config: &PolicyConfig, version: u64) -> Result<Self, PolicyError> {
        Ok(Self {
            tables: config.classifications()?.into_iter().collect(),
            default_posture: config.default_posture,
            allow_ddl: config.allow_ddl,
            version,
            loaded_at: Utc::now(),
        })
    }

    /// Resolve a table reference.
    ///
    /// Unqualified references take the session's current database, if any.
    /// A qualified policy entry is matched before an unqualified one.
    pub fn classify(&self, table: &TableRef, database: Option<&str>) -> Classification {
        let schema = table
            .schema
            .as_deref()
            .or(database)
            .map(str::to_lowercase);

        if let Some(schema) = &schema {
            if SYSTEM_SCHEMAS.contains(&schema.as_str()) {
                return Classification::Immutable;
            }
            if let Some(class) = self.tables.get(&format!("{schema}.{}", table.name)) {
                return (*class).into();
            }
        }

        self.tables
            .get(&table.name)
            .map(|class| (*class).into())
            .unwrap_or(Classification::Unclassified)
    }

    pub fn default_posture(&self) -> DefaultPosture {
        self.default_posture
    }

    pub fn allow_ddl(&self) -> bool {
        self.allow_ddl
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Number of classified tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Classified table names, sorted, for reporting.
    pub fn entries(&self) -> Vec<(String, TableClass)> {
        let mut entries: Vec<_> = self
            .tables
            .iter()
            .map(|(name, class)| (name.clone(), *class))
            .collect();
        entries.sort();
        entries
    }
}
