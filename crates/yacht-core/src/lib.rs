//! # yacht-core
//!
//! Configuration types shared across the Yacht crates.
//!
//! The agent is configured by a single YAML file (`yacht.yaml`) that names the
//! client-facing listener, the backend MySQL server, the accepted client
//! credentials, the audit destination and the virtual sharding policy. The
//! policy may be inline or live in its own file so it can be reloaded without
//! touching the rest of the configuration.

pub mod config;

pub use config::{
    AuditConfig, BackendConfig, ClientCredential, ClientSecret, ConfigError, ControlConfig,
    DefaultPosture, IsolationLevel, PolicyConfig, ProxyConfig, TableClass, YachtConfig,
};
