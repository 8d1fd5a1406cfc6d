//! Virtual sharding policy engine.
//!
//! Tables are classified `immutable` or `writable`; anything else falls back
//! to a configured default posture. A process-wide mooring flag turns every
//! write into a denial while leaving reads untouched.
//!
//! ```
//! use yacht_core::PolicyConfig;
//! use yacht_policy::{DecisionContext, PolicyStore, Reason, decide};
//! use yacht_sql::{LexOptions, StatementParser};
//!
//! let policy = PolicyConfig::from_yaml("tables:\n  wp_users: immutable\n").unwrap();
//! let store = PolicyStore::new(&policy, None).unwrap();
//! let statement = StatementParser::new()
//!     .parse_statement("UPDATE wp_users SET user_pass = ''", LexOptions::default())
//!     .unwrap();
//!
//! let decision = decide(&statement, DecisionContext::default(), &store.snapshot());
//! assert_eq!(decision.reason, Reason::ImmutableTable);
//! ```

pub mod decision;
pub mod error;
pub mod ruleset;
pub mod store;

pub use decision::{BatchDecision, Decision, DecisionContext, Reason, Verdict, decide, decide_batch};
pub use error::PolicyError;
pub use ruleset::{Classification, Ruleset, SYSTEM_SCHEMAS};
pub use store::{PolicySnapshot, PolicyStore, ReloadSummary};
