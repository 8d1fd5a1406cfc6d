//! The decision function.
//!
//! [`decide`] is pure: it reads a [`PolicySnapshot`] and a statement and
//! performs no I/O. It runs on every statement the proxy sees.

use serde::{Deserialize, Serialize};
use std::fmt;
use yacht_core::DefaultPosture;
use yacht_sql::{Batch, Statement, StatementKind, TableRef};

use crate::ruleset::Classification;
use crate::store::PolicySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// Why a verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// Read-only statement.
    ReadOnly,
    /// Every target is classified writable.
    WritableTables,
    /// At least one target is unclassified and the posture is allow.
    DefaultPostureAllow,
    TransactionControl,
    SessionSetting,

    MaintenanceLock,
    ImmutableTable,
    /// An unclassified target under a deny posture.
    DefaultPosture,
    DdlForbidden,
    UnresolvedTarget,
    UnsupportedStatement,
    Unparseable,
}

impl Reason {
    /// Snake-case code used in audit records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::WritableTables => "writable_tables",
            Self::DefaultPostureAllow => "default_posture_allow",
            Self::TransactionControl => "transaction_control",
            Self::SessionSetting => "session_setting",
            Self::MaintenanceLock => "maintenance_lock",
            Self::ImmutableTable => "immutable_table",
            Self::DefaultPosture => "default_posture",
            Self::DdlForbidden => "ddl_forbidden",
            Self::UnresolvedTarget => "unresolved_target",
            Self::UnsupportedStatement => "unsupported_statement",
            Self::Unparseable => "unparseable",
        }
    }

    /// Message safe to show a client. Never names tables or classifications.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MaintenanceLock => "Writes are disabled while the site is in maintenance mode",
            Self::DdlForbidden => "Schema changes are not permitted through this proxy",
            Self::UnsupportedStatement => "Statement type is not permitted through this proxy",
            Self::Unparseable => "Statement could not be parsed by the proxy",
            Self::ImmutableTable | Self::DefaultPosture | Self::UnresolvedTarget => {
                "Write denied by access policy"
            }
            _ => "Statement permitted",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The outcome for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Position of the statement within its batch.
    pub statement_index: usize,
    pub verdict: Verdict,
    pub reason: Reason,
    /// The table that triggered a table-scoped denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<TableRef>,
}

impl Decision {
    fn allow(statement_index: usize, reason: Reason) -> Self {
        Self {
            statement_index,
            verdict: Verdict::Allow,
            reason,
            table: None,
        }
    }

    fn deny(statement_index: usize, reason: Reason, table: Option<TableRef>) -> Self {
        Self {
            statement_index,
            verdict: Verdict::Deny,
            reason,
            table,
        }
    }

    /// The denial recorded when a submission cannot be parsed.
    pub fn unparseable() -> Self {
        Self::deny(0, Reason::Unparseable, None)
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Session facts the decision depends on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionContext<'a> {
    /// Current default database, used to qualify bare table names.
    pub database: Option<&'a str>,
}

/// Decide one statement.
///
/// Most restrictive rule wins: a single immutable target denies the whole
/// statement.
pub fn decide(statement: &Statement, context: DecisionContext<'_>, snapshot: &PolicySnapshot) -> Decision {
    decide_at(0, statement, context, snapshot)
}

fn decide_at(
    index: usize,
    statement: &Statement,
    context: DecisionContext<'_>,
    snapshot: &PolicySnapshot,
) -> Decision {
    let ruleset = &snapshot.ruleset;

    match statement.kind {
        StatementKind::Read => return Decision::allow(index, Reason::ReadOnly),
        StatementKind::Transaction(_) => return Decision::allow(index, Reason::TransactionControl),
        StatementKind::Session => return Decision::allow(index, Reason::SessionSetting),
        StatementKind::Other => return Decision::deny(index, Reason::UnsupportedStatement, None),
        StatementKind::Write | StatementKind::Ddl => {}
    }

    if snapshot.moored {
        return Decision::deny(index, Reason::MaintenanceLock, None);
    }
    if statement.kind == StatementKind::Ddl && !ruleset.allow_ddl() {
        return Decision::deny(index, Reason::DdlForbidden, None);
    }
    if statement.tables.is_empty() {
        return Decision::deny(index, Reason::UnresolvedTarget, None);
    }

    let classified: Vec<(&TableRef, Classification)> = statement
        .tables
        .iter()
        .map(|table| (table, ruleset.classify(table, context.database)))
        .collect();

    if let Some((table, _)) = classified
        .iter()
        .find(|(_, class)| *class == Classification::Immutable)
    {
        return Decision::deny(index, Reason::ImmutableTable, Some((*table).clone()));
    }

    match classified
        .iter()
        .find(|(_, class)| *class == Classification::Unclassified)
    {
        None => Decision::allow(index, Reason::WritableTables),
        Some((table, _)) => match ruleset.default_posture() {
            DefaultPosture::Allow => Decision::allow(index, Reason::DefaultPostureAllow),
            DefaultPosture::Deny => {
                Decision::deny(index, Reason::DefaultPosture, Some((*table).clone()))
            }
        },
    }
}

/// Decisions for a whole batch, evaluated against one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDecision {
    pub decisions: Vec<Decision>,
}

impl BatchDecision {
    /// The first denial, if any statement was denied.
    pub fn first_denial(&self) -> Option<&Decision> {
        self.decisions.iter().find(|d| !d.is_allowed())
    }

    pub fn is_allowed(&self) -> bool {
        self.first_denial().is_none()
    }

    pub fn verdict(&self) -> Verdict {
        if self.is_allowed() {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }

    /// Reason reported for the batch as a whole: the first denying reason, or
    /// the reason of the last statement when everything was allowed.
    pub fn reason(&self) -> Reason {
        self.first_denial()
            .or_else(|| self.decisions.last())
            .map(|d| d.reason)
            .unwrap_or(Reason::Unparseable)
    }
}

/// Decide every statement of a batch. The batch is denied if any member is.
///
/// Members run in order on the server, so a `USE` changes the database later
/// members are qualified with. Text after a statement that changes
/// `sql_mode` or the client character set would be lexed by rules the parser
/// did not apply, so those members are denied as unparseable.
pub fn decide_batch(batch: &Batch, context: DecisionContext<'_>, snapshot: &PolicySnapshot) -> BatchDecision {
    let mut database = context.database;
    let mut relexed = false;
    let mut decisions = Vec::with_capacity(batch.len());

    for (index, statement) in batch.statements.iter().enumerate() {
        let decision = if relexed {
            Decision::deny(index, Reason::Unparseable, None)
        } else {
            decide_at(index, statement, DecisionContext { database }, snapshot)
        };
        decisions.push(decision);

        if statement.kind == StatementKind::Session {
            if let Some(next) = statement.database.as_deref() {
                database = Some(next);
            }
        }
        relexed |= statement.changes_lexing;
    }

    BatchDecision { decisions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::Ruleset;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use yacht_core::PolicyConfig;
    use yacht_sql::{LexOptions, StatementParser};

    const POLICY: &str = r#"
default_posture: deny
tables:
  users: immutable
  options: immutable
  comments: writable
  posts: writable
"#;

    fn snapshot(yaml: &str, moored: bool) -> PolicySnapshot {
        let config = PolicyConfig::from_yaml(yaml).unwrap();
        PolicySnapshot {
            ruleset: Arc::new(Ruleset::from_config(&config, 1).unwrap()),
            moored,
        }
    }

    fn run(sql: &str, snap: &PolicySnapshot) -> Decision {
        let statement = StatementParser::new()
            .parse_statement(sql, LexOptions::default())
            .unwrap();
        decide(&statement, DecisionContext::default(), snap)
    }

    #[test]
    fn test_write_to_immutable_table_is_denied() {
        let snap = snapshot(POLICY, false);
        let decision = run("UPDATE users SET user_pass = 'x' WHERE user_id = 1", &snap);
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.reason, Reason::ImmutableTable);
        assert_eq!(decision.table, Some(TableRef::new("users")));
    }

    #[test]
    fn test_write_to_writable_table_is_allowed() {
        let snap = snapshot(POLICY, false);
        let decision = run("INSERT INTO comments (comment_content) VALUES ('hi')", &snap);
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.reason, Reason::WritableTables);
    }

    #[test]
    fn test_reads_are_allowed_even_on_immutable_tables() {
        let snap = snapshot(POLICY, true);
        let decision = run("SELECT * FROM users", &snap);
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.reason, Reason::ReadOnly);
    }

    #[test]
    fn test_default_posture() {
        let deny = snapshot(POLICY, false);
        let decision = run("UPDATE unknown_table SET x = 1", &deny);
        assert_eq!(decision.reason, Reason::DefaultPosture);
        assert_eq!(decision.verdict, Verdict::Deny);

        let allow = snapshot(&POLICY.replace("deny", "allow"), false);
        let decision = run("UPDATE unknown_table SET x = 1", &allow);
        assert_eq!(decision.reason, Reason::DefaultPostureAllow);
        assert_eq!(decision.verdict, Verdict::Allow);
    }

    #[test]
    fn test_mooring_denies_every_write() {
        let snap = snapshot(POLICY, true);
        let decision = run("INSERT INTO comments (comment_content) VALUES ('hi')", &snap);
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.reason, Reason::MaintenanceLock);
    }

    #[test]
    fn test_one_immutable_table_denies_multi_table_write() {
        let snap = snapshot(POLICY, false);
        let decision = run(
            "UPDATE comments c JOIN users u ON c.user_id = u.user_id SET c.comment_approved = 1",
            &snap,
        );
        assert_eq!(decision.reason, Reason::ImmutableTable);

        let decision = run("INSERT INTO comments SELECT * FROM posts WHERE 1 = 0", &snap);
        assert_eq!(decision.verdict, Verdict::Allow);

        let decision = run("DELETE FROM comments WHERE user_id IN (SELECT user_id FROM users)", &snap);
        assert_eq!(decision.reason, Reason::ImmutableTable);
    }

    #[test]
    fn test_ddl_forbidden_unless_enabled() {
        let snap = snapshot(POLICY, false);
        assert_eq!(run("DROP TABLE comments", &snap).reason, Reason::DdlForbidden);

        let lenient = snapshot(&format!("allow_ddl: true\n{POLICY}"), false);
        assert_eq!(run("DROP TABLE comments", &lenient).verdict, Verdict::Allow);
        assert_eq!(run("DROP TABLE users", &lenient).reason, Reason::ImmutableTable);
    }

    #[test]
    fn test_transaction_session_and_other() {
        let snap = snapshot(POLICY, true);
        assert_eq!(run("COMMIT", &snap).reason, Reason::TransactionControl);
        assert_eq!(run("SET NAMES utf8mb4", &snap).reason, Reason::SessionSetting);
        assert_eq!(run("SET GLOBAL read_only = 0", &snap).reason, Reason::UnsupportedStatement);
    }

    #[test]
    fn test_session_database_qualifies_bare_names() {
        let snap = snapshot("tables:\n  shop.orders: immutable\n  orders: writable\n", false);
        let statement = StatementParser::new()
            .parse_statement("DELETE FROM orders WHERE id = 1", LexOptions::default())
            .unwrap();

        let bare = decide(&statement, DecisionContext::default(), &snap);
        assert_eq!(bare.verdict, Verdict::Allow);

        let in_shop = decide(&statement, DecisionContext { database: Some("shop") }, &snap);
        assert_eq!(in_shop.reason, Reason::ImmutableTable);
    }

    #[test]
    fn test_batch_is_denied_if_any_member_is() {
        let snap = snapshot(POLICY, false);
        let batch = StatementParser::new()
            .parse_batch(
                "INSERT INTO comments (comment_content) VALUES ('a'); UPDATE users SET user_pass = 'x'",
                LexOptions::default(),
            )
            .unwrap();
        let decision = decide_batch(&batch, DecisionContext::default(), &snap);

        assert_eq!(decision.verdict(), Verdict::Deny);
        assert_eq!(decision.reason(), Reason::ImmutableTable);
        assert_eq!(decision.decisions[0].verdict, Verdict::Allow);
        assert_eq!(decision.first_denial().map(|d| d.statement_index), Some(1));
    }

    #[test]
    fn test_dml_behind_common_table_expression() {
        let snap = snapshot(POLICY, false);
        let decision = run("WITH x AS (SELECT 1) UPDATE users SET user_pass = 'x'", &snap);
        assert_eq!(decision.reason, Reason::ImmutableTable);
        assert_eq!(decision.table, Some(TableRef::new("users")));

        let moored = snapshot(POLICY, true);
        let decision = run("WITH x AS (SELECT 1) DELETE FROM comments", &moored);
        assert_eq!(decision.reason, Reason::MaintenanceLock);
    }

    #[test]
    fn test_use_inside_a_batch_qualifies_later_members() {
        let snap = snapshot("tables:\n  shop.orders: immutable\n  orders: writable\n", false);
        let batch = StatementParser::new()
            .parse_batch("USE shop; DELETE FROM orders WHERE id = 1", LexOptions::default())
            .unwrap();

        let decision = decide_batch(&batch, DecisionContext { database: Some("blog") }, &snap);
        assert_eq!(decision.decisions[0].reason, Reason::SessionSetting);
        assert_eq!(decision.reason(), Reason::ImmutableTable);
        assert_eq!(decision.first_denial().map(|d| d.statement_index), Some(1));
    }

    #[test]
    fn test_members_after_a_lexing_change_are_denied() {
        let snap = snapshot(POLICY, false);
        let parser = StatementParser::new();

        let batch = parser
            .parse_batch(
                r"SET SESSION sql_mode = 'NO_BACKSLASH_ESCAPES'; SELECT 'a\'; DELETE FROM users; -- '",
                LexOptions::default(),
            )
            .unwrap();
        assert_eq!(batch.len(), 2);
        let decision = decide_batch(&batch, DecisionContext::default(), &snap);
        assert_eq!(decision.decisions[0].verdict, Verdict::Allow);
        assert_eq!(decision.reason(), Reason::Unparseable);

        let batch = parser
            .parse_batch("SET NAMES latin1; SELECT 1", LexOptions::default())
            .unwrap();
        assert_eq!(decide_batch(&batch, DecisionContext::default(), &snap).verdict(), Verdict::Deny);

        let batch = parser
            .parse_batch("SELECT 1; SET sql_mode = ''", LexOptions::default())
            .unwrap();
        assert_eq!(decide_batch(&batch, DecisionContext::default(), &snap).verdict(), Verdict::Allow);
    }

    #[test]
    fn test_client_message_hides_policy_details() {
        for reason in [Reason::ImmutableTable, Reason::DefaultPosture, Reason::UnresolvedTarget] {
            assert_eq!(reason.client_message(), "Write denied by access policy");
        }
        assert_eq!(Reason::MaintenanceLock.to_string(), "maintenance_lock");
    }
}
