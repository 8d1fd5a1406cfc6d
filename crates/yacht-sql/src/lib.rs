//! # yacht-sql
//!
//! Structural classification of MySQL statements.
//!
//! A submitted command is split into statements lexically (quotes, comments
//! and backslash escapes honoured), each piece is parsed into an AST with
//! `sqlparser`, and the AST is reduced to what policy needs:
//!
//! - the statement kind (read, write, DDL, transaction control, session, other)
//! - every referenced table, including those in joins, subqueries and unions
//! - column references
//! - a literal-free fingerprint for audit records
//!
//! Text that does not parse is an error, never a guess.
//!
//! ```rust
//! use yacht_sql::{LexOptions, StatementKind, StatementParser};
//!
//! let parser = StatementParser::new();
//! let batch = parser
//!     .parse_batch("SELECT * FROM wp_posts; UPDATE wp_users SET user_pass = 'x'", LexOptions::default())
//!     .unwrap();
//! assert_eq!(batch.statements[1].kind, StatementKind::Write);
//! assert_eq!(batch.statements[1].tables[0].name, "wp_users");
//! ```

pub mod error;
pub mod fingerprint;
pub mod parser;
pub mod split;
pub mod statement;

pub use error::SqlError;
pub use parser::{ASCII_SAFE_CHARSETS, StatementParser};
pub use split::{LexOptions, split_statements};
pub use statement::{
    Batch, IsolationChange, IsolationScope, Statement, StatementKind, TableRef, TransactionControl,
};
