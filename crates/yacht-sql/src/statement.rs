//! Classified statement types.

use serde::Serialize;
use std::fmt;
use yacht_core::IsolationLevel;

/// What a statement does, as far as policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT-family, SHOW, DESCRIBE, plain EXPLAIN.
    Read,
    /// INSERT, REPLACE, UPDATE, DELETE, LOAD DATA.
    Write,
    /// Schema-changing or privilege-changing statements.
    Ddl,
    /// BEGIN / COMMIT / ROLLBACK / SAVEPOINT.
    Transaction(TransactionControl),
    /// Session-scoped settings with no data effect (`SET NAMES`, `USE`, ...).
    Session,
    /// Anything not recognized.
    Other,
}

impl StatementKind {
    /// Whether the statement changes data or schema.
    pub fn mutates(&self) -> bool {
        matches!(self, Self::Write | Self::Ddl)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Ddl => write!(f, "ddl"),
            Self::Transaction(control) => write!(f, "transaction:{control}"),
            Self::Session => write!(f, "session"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionControl {
    Begin,
    Commit,
    Rollback,
    /// SAVEPOINT, RELEASE SAVEPOINT and ROLLBACK TO SAVEPOINT; none of them end
    /// the transaction.
    Savepoint,
}

impl fmt::Display for TransactionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin => write!(f, "begin"),
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
            Self::Savepoint => write!(f, "savepoint"),
        }
    }
}

/// A normalized table reference: identifier quotes removed, lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableRef {
    /// Database qualifier, when written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Scope of an isolation level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationScope {
    /// `SET SESSION TRANSACTION ...`: every later transaction.
    Session,
    /// `SET TRANSACTION ...`: only the next transaction.
    NextTransaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IsolationChange {
    pub scope: IsolationScope,
    #[serde(serialize_with = "serialize_display")]
    pub level: IsolationLevel,
}

fn serialize_display<T, S>(value: &T, s: S) -> Result<S::Ok, S::Error>
where
    T: fmt::Display,
    S: serde::Serializer,
{
    s.collect_str(value)
}

/// One parsed and classified statement.
///
/// Produced fresh for every submitted command and never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// The statement text as submitted (one piece of a batch).
    #[serde(skip)]
    pub text: String,
    #[serde(serialize_with = "serialize_display")]
    pub kind: StatementKind,
    /// Every referenced table, deduplicated, in order of appearance.
    pub tables: Vec<TableRef>,
    /// Column references, deduplicated.
    pub columns: Vec<String>,
    /// Present for `SET ... TRANSACTION ISOLATION LEVEL` statements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationChange>,
    /// Target of a `USE` statement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Set for `SET` statements that change how the server reads later text
    /// (`sql_mode`, the client character set).
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub changes_lexing: bool,
    /// Literal-free fingerprint for audit records.
    pub fingerprint: String,
}

impl Statement {
    pub fn mutates(&self) -> bool {
        self.kind.mutates()
    }
}

/// The statements of one submitted command, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub statements: Vec<Statement>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn mutates(&self) -> bool {
        self.statements.iter().any(Statement::mutates)
    }

    /// Fingerprint of the whole batch: the member fingerprints joined by `;`.
    pub fn fingerprint(&self) -> String {
        self.statements
            .iter()
            .map(|s| s.fingerprint.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// All tables referenced anywhere in the batch, deduplicated.
    pub fn tables(&self) -> Vec<TableRef> {
        let mut tables: Vec<TableRef> = Vec::new();
        for table in self.statements.iter().flat_map(|s| s.tables.iter()) {
            if !tables.contains(table) {
                tables.push(table.clone());
            }
        }
        tables
    }
}
