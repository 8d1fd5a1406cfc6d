//! Per-connection session state.

use std::collections::HashMap;
use std::fmt;
use yacht_core::IsolationLevel;
use yacht_sql::{IsolationScope, LexOptions, Statement, StatementKind, TransactionControl};

use crate::protocol::status::{SERVER_STATUS_IN_TRANS, SERVER_STATUS_NO_BACKSLASH_ESCAPES};

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Authenticated,
    Idle,
    InTransaction,
    Closing,
    Closed,
}

impl SessionPhase {
    fn can_enter(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Connecting, Authenticated) => true,
            (Authenticated, Idle) => true,
            (Idle, InTransaction) | (InTransaction, Idle) => true,
            (Closing, Closed) => true,
            (Closed, _) => false,
            (_, Closing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Idle => "idle",
            Self::InTransaction => "in_transaction",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Who is on the other end of the client socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub peer: String,
    pub connection_id: u32,
}

/// A statement prepared on the backend, kept so every execution can be
/// decided again against the current policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTemplate {
    pub sql: String,
    pub num_params: u16,
}

/// Mutable state of one session. Owned by the session task alone.
#[derive(Debug)]
pub struct SessionState {
    phase: SessionPhase,
    pub identity: Identity,
    /// Session isolation level; starts at the backend's configured level.
    pub isolation: IsolationLevel,
    /// One-shot level for the next transaction only.
    pub next_isolation: Option<IsolationLevel>,
    /// Current default database, used to qualify bare table names.
    pub database: Option<String>,
    /// Whether the backend currently honours backslash escapes.
    pub backslash_escapes: bool,
    prepared: HashMap<u32, PreparedTemplate>,
}

impl SessionState {
    pub fn new(identity: Identity, isolation: IsolationLevel, database: Option<String>) -> Self {
        Self {
            phase: SessionPhase::Connecting,
            identity,
            isolation,
            next_isolation: None,
            database,
            backslash_escapes: true,
            prepared: HashMap::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn in_transaction(&self) -> bool {
        self.phase == SessionPhase::InTransaction
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, SessionPhase::Idle | SessionPhase::InTransaction)
    }

    /// Move to `next`. Illegal transitions are refused and logged; the phase is
    /// left unchanged.
    pub fn transition(&mut self, next: SessionPhase) -> bool {
        if self.phase == next {
            return true;
        }
        if !self.phase.can_enter(next) {
            tracing::debug!(
                connection_id = self.identity.connection_id,
                from = %self.phase,
                to = %next,
                "Ignoring invalid session transition"
            );
            return false;
        }
        tracing::debug!(
            connection_id = self.identity.connection_id,
            from = %self.phase,
            to = %next,
            "Session transition"
        );
        if next == SessionPhase::Idle && self.phase == SessionPhase::InTransaction {
            self.next_isolation = None;
        }
        self.phase = next;
        true
    }

    pub fn lex_options(&self) -> LexOptions {
        LexOptions {
            backslash_escapes: self.backslash_escapes,
        }
    }

    /// Apply the effects of a statement the backend executed successfully.
    pub fn observe(&mut self, statement: &Statement) {
        match statement.kind {
            StatementKind::Transaction(TransactionControl::Begin) => {
                self.transition(SessionPhase::InTransaction);
            }
            StatementKind::Transaction(TransactionControl::Commit | TransactionControl::Rollback) => {
                self.transition(SessionPhase::Idle);
            }
            _ => {}
        }
        if let Some(change) = statement.isolation {
            match change.scope {
                IsolationScope::Session => self.isolation = change.level,
                IsolationScope::NextTransaction => self.next_isolation = Some(change.level),
            }
        }
        if let Some(database) = &statement.database {
            self.database = Some(database.clone());
        }
    }

    /// Reconcile with the status flags of a completed response. The server is
    /// authoritative about the open transaction.
    pub fn sync_status(&mut self, status: u16) {
        self.backslash_escapes = status & SERVER_STATUS_NO_BACKSLASH_ESCAPES == 0;

        let server_in_trans = status & SERVER_STATUS_IN_TRANS != 0;
        if server_in_trans != self.in_transaction() && self.is_open() {
            tracing::debug!(
                connection_id = self.identity.connection_id,
                tracked = self.in_transaction(),
                server = server_in_trans,
                "Transaction state corrected from server status"
            );
            self.transition(if server_in_trans {
                SessionPhase::InTransaction
            } else {
                SessionPhase::Idle
            });
        }
    }

    /// Back to the post-login defaults, as after `COM_RESET_CONNECTION`.
    pub fn reset(&mut self, isolation: IsolationLevel) {
        self.transition(SessionPhase::Idle);
        self.isolation = isolation;
        self.next_isolation = None;
        self.prepared.clear();
    }

    pub fn add_prepared(&mut self, statement_id: u32, template: PreparedTemplate) {
        self.prepared.insert(statement_id, template);
    }

    pub fn prepared(&self, statement_id: u32) -> Option<&PreparedTemplate> {
        self.prepared.get(&statement_id)
    }

    pub fn remove_prepared(&mut self, statement_id: u32) -> Option<PreparedTemplate> {
        self.prepared.remove(&statement_id)
    }

    pub fn prepared_count(&self) -> usize {
        self.prepared.len()
    }
}
