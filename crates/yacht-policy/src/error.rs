//! Error types for the policy crate.

use thiserror::Error;
use yacht_core::ConfigError;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy source could not be read or is invalid.
    #[error("invalid policy: {0}")]
    InvalidPolicy(#[from] ConfigError),

    /// Reload was requested but the policy was configured inline.
    #[error("policy has no file source to reload from")]
    NoSource,
}
