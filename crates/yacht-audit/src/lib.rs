//! # yacht-audit
//!
//! Append-only audit trail for the Yacht proxy.
//!
//! Every policy decision is recorded as
//! `{timestamp, identity, fingerprint, verdict, reason}` together with the
//! referenced tables and connection details. Statement text is only
//! included when `audit.log_statements` is enabled, and is truncated.
//!
//! - **File output**: JSON Lines (one JSON object per line)
//! - **Console output**: human-readable log lines
//!
//! | Event Type | Description |
//! |------------|-------------|
//! | `StatementAllowed` | Statement or batch forwarded to the backend |
//! | `StatementDenied` | Statement or batch refused by policy or the parser |
//! | `SessionOpened` / `SessionClosed` | Client connection lifecycle |
//! | `AuthenticationFailed` | Client presented bad credentials |
//! | `BackendUnavailable` | Backend connection failed |
//! | `PolicyReloaded` / `PolicyReloadFailed` | Operator reload |
//! | `MooringChanged` | Operator toggled the maintenance lock |

pub mod error;
pub mod event;
pub mod logger;
pub mod storage;

pub use error::AuditError;
pub use event::{AuditEvent, AuditEventBuilder, AuditEventType, MAX_SQL_LEN, truncate_sql};
pub use logger::{AuditContext, AuditLogger, OPERATOR};
pub use storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, MemoryStorage, NullStorage};
