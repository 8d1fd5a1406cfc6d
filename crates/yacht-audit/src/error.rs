//! Error types for the audit crate.

use thiserror::Error;

/// Errors that can occur while writing audit records.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open the audit destination.
    #[error("failed to initialize audit sink: {0}")]
    InitializationFailed(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
