//! # yacht-proxy
//!
//! MySQL wire protocol proxy for the Yacht agent.
//!
//! This crate implements the policy-enforcing proxy that sits between a CMS
//! (or any MySQL client) and the real database:
//! - Accepts MySQL protocol connections and authenticates the client
//! - Opens one backend connection per client with the proxy's own credentials
//! - Parses every statement via `yacht-sql`
//! - Decides it against the shared ruleset via `yacht-policy`
//! - Forwards allowed commands byte for byte, answers denied ones with an ERR
//! - Audits every decision via `yacht-audit`
//!
//! ## Architecture
//!
//! ```text
//! CMS / App
//!       │
//!       │ MySQL protocol, client credentials
//!       ▼
//! ┌──────────────────┐
//! │  Yacht Proxy     │
//! │  1. Handshake    │  ← protocol
//! │  2. Parse SQL    │  ← yacht-sql
//! │  3. Decide       │  ← yacht-policy
//! │  4. Forward      │  ← backend
//! │  5. Audit log    │  ← yacht-audit
//! └────────┬─────────┘
//!          │ proxy credentials
//!          ▼
//!     Backend MySQL
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use yacht_audit::AuditLogger;
//! use yacht_core::YachtConfig;
//! use yacht_policy::PolicyStore;
//! use yacht_proxy::YachtProxy;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = YachtConfig::load_with_context("yacht.yaml")?;
//!     let policy = Arc::new(PolicyStore::new(&config.policy, config.policy_file.clone())?);
//!     let audit = Arc::new(AuditLogger::new(config.audit.clone())?);
//!     let proxy = Arc::new(YachtProxy::new(&config, policy, audit)?);
//!     proxy.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod control;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod session;

pub use backend::{BackendConnection, BackendConnector, ClientParams};
pub use error::ProxyError;
pub use proxy::{DRAIN_TIMEOUT, YachtProxy};
pub use session::{Identity, Session, SessionEnv, SessionPhase, SessionState};
