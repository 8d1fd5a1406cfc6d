//! Configuration types for the Yacht agent.
//!
//! # Configuration Files
//!
//! - **yacht.yaml**: listener, backend, client credentials, audit and control settings
//! - **policy.yaml**: table classifications, default posture and initial mooring state
//!
//! The policy can also be given inline under a `policy:` key. When both are
//! present, `policy_file` wins.

pub mod audit;
pub mod backend;
pub mod client;
pub mod control;
pub mod policy;
pub mod proxy;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use audit::AuditConfig;
pub use backend::{BackendConfig, IsolationLevel};
pub use client::{ClientCredential, ClientSecret};
pub use control::ControlConfig;
pub use policy::{DefaultPosture, PolicyConfig, TableClass, normalize_table_name};
pub use proxy::ProxyConfig;

/// Complete agent configuration loaded from `yacht.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YachtConfig {
    /// Client-facing listener settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Backend MySQL server.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Credentials accepted from clients.
    #[serde(default)]
    pub clients: Vec<ClientCredential>,

    /// Path to the policy file (relative paths resolve against the config file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,

    /// Inline policy, used when `policy_file` is not set.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Audit sink settings.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Operational control endpoint.
    #[serde(default)]
    pub control: ControlConfig,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl YachtConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration and resolve external references.
    ///
    /// Relative `policy_file` and `audit.file` paths are resolved against the
    /// directory containing the configuration file. The policy file is read
    /// and replaces any inline policy.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if let Some(policy_file) = config.policy_file.take() {
            let policy_path = resolve(&base_dir, &policy_file);
            config.policy = PolicyConfig::from_file(&policy_path)?;
            config.policy_file = Some(policy_path);
        }

        if let Some(audit_file) = config.audit.file.take() {
            config.audit.file = Some(resolve(&base_dir, &audit_file));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for problems serde cannot catch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clients.is_empty() {
            return Err(ConfigError::Config(
                "at least one client credential must be configured".to_string(),
            ));
        }

        for (idx, client) in self.clients.iter().enumerate() {
            client.validate().map_err(|e| match e {
                ConfigError::Config(msg) => ConfigError::Config(format!("clients[{idx}]: {msg}")),
                other => other,
            })?;
            if self.clients[..idx].iter().any(|c| c.username == client.username) {
                return Err(ConfigError::Config(format!(
                    "duplicate client username '{}'",
                    client.username
                )));
            }
        }

        if self.backend.password.is_some() && self.backend.password_env.is_some() {
            return Err(ConfigError::Config(
                "backend: set either password or password_env, not both".to_string(),
            ));
        }

        if self.proxy.close_grace_secs == 0 {
            return Err(ConfigError::Config(
                "proxy.close_grace_secs must be at least 1".to_string(),
            ));
        }
        if self.proxy.handshake_timeout_secs == 0 {
            return Err(ConfigError::Config(
                "proxy.handshake_timeout_secs must be at least 1".to_string(),
            ));
        }

        self.policy.validate()?;
        Ok(())
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
