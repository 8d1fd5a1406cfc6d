//! Audit sink configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit records are written at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// JSON Lines file that records are appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Also print records to stdout.
    #[serde(default)]
    pub stdout: bool,

    /// Include the (truncated) statement text in records. Off by default so
    /// literal values never reach the audit trail.
    #[serde(default)]
    pub log_statements: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            file: None,
            stdout: false,
            log_statements: false,
        }
    }
}

fn default_enabled() -> bool {
    true
}
