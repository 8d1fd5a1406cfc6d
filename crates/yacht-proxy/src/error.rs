//! Error types for the proxy crate.

use thiserror::Error;
use yacht_audit::AuditError;
use yacht_core::ConfigError;
use yacht_policy::{PolicyError, Reason};

use crate::protocol::ErrPacket;

/// Errors that can occur in the MySQL proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind to the listen address.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        source: std::io::Error,
    },

    /// Socket I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected wire data. Fatal for the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Statement could not be classified. Treated as a denial.
    #[error("parse error: {0}")]
    Parse(String),

    /// Statement denied by policy.
    #[error("denied by policy: {0}")]
    PolicyDenied(Reason),

    /// The backend could not be reached, failed mid-session, or rejected the
    /// proxy's own credentials.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Client credentials were rejected.
    #[error("authentication failed for user '{user}'")]
    AuthFailure { user: String, host: String, password_used: bool },

    /// Command the proxy never forwards.
    #[error("unsupported command 0x{0:02X}")]
    UnsupportedCommand(u8),

    /// Prepared statement id the session never saw prepared.
    #[error("unknown prepared statement {statement_id} given to {command}")]
    UnknownStatement { statement_id: u32, command: &'static str },

    /// The client asked for a character set the proxy cannot lex safely.
    #[error("unsupported client character set (collation {0})")]
    UnsupportedCharset(u8),

    /// The client did not finish its login in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// `max_connections` reached.
    #[error("too many connections")]
    TooManyConnections,

    /// Client closed its socket.
    #[error("client disconnected")]
    ClientDisconnected,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl ProxyError {
    /// The ERR packet a client sees for this error, or `None` when there is no
    /// client left to tell.
    ///
    /// Messages follow the server's own wording and never carry table
    /// classifications or backend details.
    pub fn to_err_packet(&self) -> Option<ErrPacket> {
        let packet = match self {
            Self::AuthFailure {
                user,
                host,
                password_used,
            } => ErrPacket::new(
                1045,
                "28000",
                format!(
                    "Access denied for user '{user}'@'{host}' (using password: {})",
                    if *password_used { "YES" } else { "NO" }
                ),
            ),
            Self::Parse(_) => ErrPacket::new(1064, "42000", Reason::Unparseable.client_message()),
            Self::PolicyDenied(reason) => ErrPacket::new(1142, "42000", reason.client_message()),
            Self::BackendUnavailable(_) => {
                ErrPacket::new(2003, "HY000", "Can't connect to MySQL server")
            }
            Self::UnsupportedCommand(_) => ErrPacket::new(1047, "08S01", "Unknown command"),
            Self::UnknownStatement {
                statement_id,
                command,
            } => ErrPacket::new(
                1243,
                "HY000",
                format!("Unknown prepared statement handler ({statement_id}) given to {command}"),
            ),
            Self::UnsupportedCharset(collation) => ErrPacket::new(
                1115,
                "42000",
                format!("Unknown character set: '{collation}'"),
            ),
            Self::TooManyConnections => ErrPacket::new(1040, "08004", "Too many connections"),
            Self::Protocol(_) => ErrPacket::new(1047, "08S01", "Bad handshake"),
            Self::BindFailed { .. }
            | Self::HandshakeTimeout
            | Self::Io(_)
            | Self::ClientDisconnected
            | Self::Config(_)
            | Self::Policy(_)
            | Self::Audit(_) => return None,
        };
        Some(packet)
    }

    /// Whether the connection pair must be torn down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Parse(_)
                | Self::PolicyDenied(_)
                | Self::UnsupportedCommand(_)
                | Self::UnknownStatement { .. }
        )
    }
}
