//! Error types for statement parsing.

use thiserror::Error;

/// Errors produced while turning submitted SQL into classified statements.
///
/// Every variant is treated as a denial by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlError {
    /// Nothing but whitespace and comments was submitted.
    #[error("query was empty")]
    Empty,

    /// A `/*! ... */` comment, which the server would execute.
    #[error("executable comments are not accepted")]
    ExecutableComment,

    /// A quote or block comment was never closed.
    #[error("unterminated {0}")]
    Unterminated(&'static str),

    /// The statement could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Text that was expected to hold one statement held several.
    #[error("expected a single statement, found {0}")]
    MultipleStatements(usize),
}
