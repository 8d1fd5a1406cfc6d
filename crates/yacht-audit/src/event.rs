//! Audit event types.
//!
//! Every policy decision produces one record carrying
//! `{timestamp, identity, fingerprint, verdict, reason}`. Connection
//! lifecycle and operator actions are recorded alongside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use yacht_policy::{Reason, Verdict};

/// Longest statement text kept in a record.
pub const MAX_SQL_LEN: usize = 500;

/// Type of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // ===== Statement decisions =====
    /// Statement (or batch) was forwarded.
    StatementAllowed,
    /// Statement (or batch) was refused.
    StatementDenied,

    // ===== Connection lifecycle =====
    SessionOpened,
    SessionClosed,
    /// Client presented bad credentials.
    AuthenticationFailed,
    /// The backend could not be reached or refused our credentials.
    BackendUnavailable,

    // ===== Operator actions =====
    PolicyReloaded,
    PolicyReloadFailed,
    MooringChanged,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatementAllowed => write!(f, "ALLOWED"),
            Self::StatementDenied => write!(f, "DENIED"),
            Self::SessionOpened => write!(f, "SESSION_OPENED"),
            Self::SessionClosed => write!(f, "SESSION_CLOSED"),
            Self::AuthenticationFailed => write!(f, "AUTH_FAILED"),
            Self::BackendUnavailable => write!(f, "BACKEND_UNAVAILABLE"),
            Self::PolicyReloaded => write!(f, "POLICY_RELOADED"),
            Self::PolicyReloadFailed => write!(f, "POLICY_RELOAD_FAILED"),
            Self::MooringChanged => write!(f, "MOORING_CHANGED"),
        }
    }
}

/// An audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: Uuid,

    /// When the event occurred.
    pub occurred_at: DateTime<Utc>,

    pub event_type: AuditEventType,

    /// Authenticated user, or the claimed user for auth failures. Operator
    /// events use `"operator"`.
    pub identity: String,

    // ===== Decision fields =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,

    /// Statement kinds in the batch, e.g. `["write"]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<String>>,

    /// Tables referenced by the statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<String>>,

    /// Statement text, only when statement logging is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    // ===== Context =====
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Error or detail message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, identity: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type,
            identity: identity.into(),
            fingerprint: None,
            verdict: None,
            reason: None,
            kinds: None,
            tables: None,
            sql: None,
            connection_id: None,
            client_ip: None,
            error: None,
            meta: serde_json::Value::Null,
        }
    }

    pub fn builder(event_type: AuditEventType, identity: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder {
            event: Self::new(event_type, identity),
        }
    }

    /// Format the event as a human-readable log line.
    ///
    /// Format: `[timestamp] EVENT_TYPE identity=... [conn=...] [reason=...]`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} identity={}",
            self.occurred_at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.event_type,
            self.identity,
        );

        if let Some(id) = self.connection_id {
            line.push_str(&format!(" conn={id}"));
        }
        if let Some(ref ip) = self.client_ip {
            line.push_str(&format!(" client={ip}"));
        }
        if let Some(ref fingerprint) = self.fingerprint {
            line.push_str(&format!(" fingerprint={fingerprint}"));
        }
        if let Some(reason) = self.reason {
            line.push_str(&format!(" reason={reason}"));
        }
        if let Some(ref tables) = self.tables {
            line.push_str(&format!(" tables=[{}]", tables.join(",")));
        }
        if let Some(ref sql) = self.sql {
            line.push_str(&format!(" sql=\"{}\"", sql.replace('\n', " ").replace('"', "'")));
        }
        if let Some(ref error) = self.error {
            line.push_str(&format!(" error=\"{}\"", error.replace('"', "'")));
        }

        line
    }
}

/// Builder for audit events.
#[derive(Debug)]
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.event.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn verdict(mut self, verdict: Verdict) -> Self {
        self.event.verdict = Some(verdict);
        self
    }

    pub fn reason(mut self, reason: Reason) -> Self {
        self.event.reason = Some(reason);
        self
    }

    pub fn kinds(mut self, kinds: Vec<String>) -> Self {
        self.event.kinds = Some(kinds);
        self
    }

    pub fn tables(mut self, tables: Vec<String>) -> Self {
        self.event.tables = Some(tables);
        self
    }

    /// Set the statement text, truncated to [`MAX_SQL_LEN`] bytes.
    pub fn sql(mut self, sql: &str) -> Self {
        self.event.sql = Some(truncate_sql(sql, MAX_SQL_LEN));
        self
    }

    pub fn connection_id(mut self, id: u64) -> Self {
        self.event.connection_id = Some(id);
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.event.client_ip = Some(ip.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.event.error = Some(error.into());
        self
    }

    pub fn meta(mut self, meta: serde_json::Value) -> Self {
        self.event.meta = meta;
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

/// Cut `sql` to at most `max` bytes on a char boundary, marking the cut.
pub fn truncate_sql(sql: &str, max: usize) -> String {
    if sql.len() <= max {
        return sql.to_string();
    }
    let mut end = max;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &sql[..end])
}
