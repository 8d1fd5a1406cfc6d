//! Audit logger implementation.
//!
//! `AuditLogger` turns decisions and lifecycle events into records and hands
//! them to a storage backend. Helper methods never fail: an audit write error
//! is reported through `tracing` and the request carries on.

use std::sync::Arc;
use yacht_core::AuditConfig;
use yacht_policy::{BatchDecision, Reason, Verdict};
use yacht_sql::{Batch, fingerprint};

use crate::error::AuditError;
use crate::event::{AuditEvent, AuditEventType};
use crate::storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};

/// Identity used for operator-initiated events.
pub const OPERATOR: &str = "operator";

/// Who a record is about.
#[derive(Debug, Clone)]
pub struct AuditContext {
    pub identity: String,
    pub connection_id: u64,
    pub client_ip: String,
}

/// The main audit logger.
pub struct AuditLogger {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
}

impl AuditLogger {
    /// Create a logger from configuration.
    ///
    /// With a file configured, records go to the file (and stdout if
    /// `stdout` is set). Without one, an enabled logger writes to stdout.
    pub fn new(config: AuditConfig) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = match (&config.file, config.enabled) {
            (_, false) => Arc::new(NullStorage::new()),
            (Some(path), true) if config.stdout => Arc::new(DualStorage::new(path)?),
            (Some(path), true) => Arc::new(FileStorage::new(path)?),
            (None, true) => Arc::new(ConsoleStorage::new()),
        };

        Ok(Self { config, storage })
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(config: AuditConfig, storage: Arc<dyn AuditStorage>) -> Self {
        Self { config, storage }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self {
            config: AuditConfig {
                enabled: false,
                ..Default::default()
            },
            storage: Arc::new(NullStorage::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Write an audit event.
    pub async fn log(&self, event: AuditEvent) -> Result<(), AuditError> {
        if !self.config.enabled {
            return Ok(());
        }

        tracing::debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            identity = %event.identity,
            "Audit event"
        );

        self.storage.store(event).await
    }

    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!(error = %e, "Failed to write audit record");
        }
    }

    fn session_event(&self, event_type: AuditEventType, ctx: &AuditContext) -> crate::event::AuditEventBuilder {
        AuditEvent::builder(event_type, ctx.identity.clone())
            .connection_id(ctx.connection_id)
            .client_ip(ctx.client_ip.clone())
    }

    /// Record the decision for a parsed batch.
    pub async fn log_decision(&self, ctx: &AuditContext, batch: &Batch, sql: &str, decision: &BatchDecision) {
        let event_type = match decision.verdict() {
            Verdict::Allow => AuditEventType::StatementAllowed,
            Verdict::Deny => AuditEventType::StatementDenied,
        };

        let mut builder = self
            .session_event(event_type, ctx)
            .fingerprint(batch.fingerprint())
            .verdict(decision.verdict())
            .reason(decision.reason())
            .kinds(batch.statements.iter().map(|s| s.kind.to_string()).collect())
            .tables(batch.tables().iter().map(ToString::to_string).collect());

        if self.config.log_statements {
            builder = builder.sql(sql);
        }

        self.record(builder.build()).await;
    }

    /// Record a submission that could not be parsed. The fingerprint is a
    /// hash of the raw text.
    pub async fn log_unparseable(&self, ctx: &AuditContext, sql: &str, error: &str) {
        let mut builder = self
            .session_event(AuditEventType::StatementDenied, ctx)
            .fingerprint(fingerprint::hash(sql))
            .verdict(Verdict::Deny)
            .reason(Reason::Unparseable)
            .error(error);

        if self.config.log_statements {
            builder = builder.sql(sql);
        }

        self.record(builder.build()).await;
    }

    pub async fn log_session_opened(&self, ctx: &AuditContext) {
        self.record(self.session_event(AuditEventType::SessionOpened, ctx).build())
            .await;
    }

    pub async fn log_session_closed(&self, ctx: &AuditContext, reason: &str) {
        self.record(
            self.session_event(AuditEventType::SessionClosed, ctx)
                .error(reason)
                .build(),
        )
        .await;
    }

    /// Record a failed client login. `user` is the name the client claimed.
    pub async fn log_authentication_failed(&self, user: &str, connection_id: u64, client_ip: &str) {
        let event = AuditEvent::builder(AuditEventType::AuthenticationFailed, user)
            .connection_id(connection_id)
            .client_ip(client_ip)
            .error("invalid credentials")
            .build();
        self.record(event).await;
    }

    pub async fn log_backend_unavailable(&self, ctx: &AuditContext, error: &str) {
        self.record(
            self.session_event(AuditEventType::BackendUnavailable, ctx)
                .error(error)
                .build(),
        )
        .await;
    }

    pub async fn log_policy_reloaded(&self, version: u64, tables: usize) {
        let event = AuditEvent::builder(AuditEventType::PolicyReloaded, OPERATOR)
            .meta(serde_json::json!({ "version": version, "tables": tables }))
            .build();
        self.record(event).await;
    }

    pub async fn log_policy_reload_failed(&self, error: &str) {
        let event = AuditEvent::builder(AuditEventType::PolicyReloadFailed, OPERATOR)
            .error(error)
            .build();
        self.record(event).await;
    }

    pub async fn log_mooring_changed(&self, moored: bool, previous: bool) {
        let event = AuditEvent::builder(AuditEventType::MooringChanged, OPERATOR)
            .meta(serde_json::json!({ "moored": moored, "previous": previous }))
            .build();
        self.record(event).await;
    }
}
