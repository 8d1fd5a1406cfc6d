//! Structural statement classification.

use std::ops::ControlFlow;

use sqlparser::ast::{
    self, Expr, FromTable, ObjectName, ObjectNamePart, SetExpr, TableFactor, TableObject,
    visit_expressions, visit_relations,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};
use yacht_core::IsolationLevel;

use crate::error::SqlError;
use crate::fingerprint;
use crate::split::{LexOptions, split_statements};
use crate::statement::{
    Batch, IsolationChange, IsolationScope, Statement, StatementKind, TableRef, TransactionControl,
};

/// Leading keywords that classify a statement once it has parsed but its AST
/// variant is not matched explicitly.
const READ_KEYWORDS: &[&str] = &["SHOW", "DESCRIBE", "DESC", "EXPLAIN"];
const WRITE_KEYWORDS: &[&str] = &["LOAD"];
const DDL_KEYWORDS: &[&str] = &[
    "CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "GRANT", "REVOKE", "ANALYZE", "OPTIMIZE",
    "REPAIR",
];

/// `SET` forms that reach beyond the session.
const SET_DENIED_SCOPES: &[&str] = &["GLOBAL", "PERSIST", "PERSIST_ONLY"];
const SET_DENIED_TARGETS: &[&str] = &["PASSWORD", "ROLE", "DEFAULT", "RESOURCE"];

/// Client character sets in which no multibyte sequence contains an ASCII
/// byte, so quotes and backslashes always mean what they appear to mean.
pub const ASCII_SAFE_CHARSETS: &[&str] =
    &["utf8mb4", "utf8mb3", "utf8", "latin1", "ascii", "binary"];

/// System variables that change how the server lexes later statements.
const LEXING_VARIABLES: &[&str] = &[
    "SQL_MODE",
    "CHARACTER_SET_CLIENT",
    "CHARACTER_SET_CONNECTION",
];

/// Parses and classifies MySQL statements.
#[derive(Debug)]
pub struct StatementParser {
    dialect: MySqlDialect,
}

impl Default for StatementParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementParser {
    pub fn new() -> Self {
        Self {
            dialect: MySqlDialect {},
        }
    }

    /// Parse a (possibly multi-statement) submission.
    ///
    /// Any piece that fails to parse fails the whole batch.
    pub fn parse_batch(&self, sql: &str, options: LexOptions) -> Result<Batch, SqlError> {
        let statements = split_statements(sql, options)?
            .into_iter()
            .map(|piece| self.classify(piece))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Batch { statements })
    }

    /// Parse text that must hold exactly one statement, such as a prepared
    /// statement template.
    pub fn parse_statement(&self, sql: &str, options: LexOptions) -> Result<Statement, SqlError> {
        let mut pieces = split_statements(sql, options)?;
        if pieces.len() != 1 {
            return Err(SqlError::MultipleStatements(pieces.len()));
        }
        self.classify(pieces.remove(0))
    }

    fn classify(&self, text: &str) -> Result<Statement, SqlError> {
        let tokens = Tokenizer::new(&self.dialect, text)
            .tokenize()
            .map_err(|e| SqlError::Syntax(e.to_string()))?;
        let significant: Vec<&Token> = tokens
            .iter()
            .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
            .collect();
        let leading = leading_keyword(&significant).unwrap_or_default();

        let mut statement = Statement {
            text: text.to_string(),
            kind: StatementKind::Other,
            tables: Vec::new(),
            columns: Vec::new(),
            isolation: None,
            database: None,
            changes_lexing: false,
            fingerprint: fingerprint::fingerprint(&tokens),
        };

        match leading.as_str() {
            "SET" => {
                let (kind, isolation) = classify_set(&significant)?;
                statement.kind = kind;
                statement.isolation = isolation;
                statement.changes_lexing = changes_lexing(&significant);
                return Ok(statement);
            }
            "USE" => {
                statement.kind = StatementKind::Session;
                statement.database = match significant.get(1..) {
                    Some([Token::Word(word)]) => Some(word.value.clone()),
                    _ => return Err(SqlError::Syntax("USE expects a database name".into())),
                };
                return Ok(statement);
            }
            _ => {}
        }

        let mut parsed = Parser::parse_sql(&self.dialect, text)
            .map_err(|e| SqlError::Syntax(e.to_string()))?;
        if parsed.len() != 1 {
            return Err(SqlError::MultipleStatements(parsed.len()));
        }
        let ast = parsed.remove(0);

        statement.kind = statement_kind(&ast, Some(&leading));
        statement.tables = extract_tables(&ast);
        statement.columns = extract_columns(&ast);
        Ok(statement)
    }
}

fn leading_keyword(significant: &[&Token]) -> Option<String> {
    match significant.first() {
        Some(Token::Word(word)) if word.quote_style.is_none() => Some(word.value.to_uppercase()),
        _ => None,
    }
}

fn statement_kind(stmt: &ast::Statement, leading: Option<&str>) -> StatementKind {
    match stmt {
        // WITH ... UPDATE / DELETE / INSERT parses as a query around the DML.
        ast::Statement::Query(query) => body_kind(&query.body),
        ast::Statement::Insert(_) | ast::Statement::Update(_) | ast::Statement::Delete(_) => {
            StatementKind::Write
        }
        ast::Statement::StartTransaction { .. } => {
            StatementKind::Transaction(TransactionControl::Begin)
        }
        ast::Statement::Commit { .. } => StatementKind::Transaction(TransactionControl::Commit),
        ast::Statement::Rollback {
            savepoint: Some(_), ..
        } => StatementKind::Transaction(TransactionControl::Savepoint),
        ast::Statement::Rollback { .. } => StatementKind::Transaction(TransactionControl::Rollback),
        ast::Statement::Savepoint { .. } | ast::Statement::ReleaseSavepoint { .. } => {
            StatementKind::Transaction(TransactionControl::Savepoint)
        }
        // EXPLAIN ANALYZE executes its statement.
        ast::Statement::Explain {
            statement, analyze, ..
        } => {
            if *analyze {
                statement_kind(statement, None)
            } else {
                StatementKind::Read
            }
        }
        _ => {
            let Some(leading) = leading else {
                return StatementKind::Other;
            };
            if READ_KEYWORDS.contains(&leading) {
                StatementKind::Read
            } else if WRITE_KEYWORDS.contains(&leading) {
                StatementKind::Write
            } else if DDL_KEYWORDS.contains(&leading) {
                StatementKind::Ddl
            } else {
                StatementKind::Other
            }
        }
    }
}

/// Kind of a query body. Reads unless a DML statement sits inside it.
fn body_kind(body: &SetExpr) -> StatementKind {
    match body {
        SetExpr::Select(_) | SetExpr::Values(_) | SetExpr::Table(_) => StatementKind::Read,
        SetExpr::Query(query) => body_kind(&query.body),
        SetExpr::SetOperation { left, right, .. } => match body_kind(left) {
            StatementKind::Read => body_kind(right),
            kind => kind,
        },
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) | SetExpr::Delete(stmt) => {
            statement_kind(stmt, None)
        }
        _ => StatementKind::Other,
    }
}

/// Every table the statement touches: relations anywhere in the tree
/// (joins, subqueries, derived tables, set operations) plus explicit write
/// targets.
pub(crate) fn extract_tables(stmt: &ast::Statement) -> Vec<TableRef> {
    let mut tables = Vec::new();

    let _ = visit_relations(stmt, |name| {
        push_object_name(&mut tables, name);
        ControlFlow::<()>::Continue(())
    });
    push_write_targets(&mut tables, stmt);

    tables
}

fn push_write_targets(tables: &mut Vec<TableRef>, stmt: &ast::Statement) {
    match stmt {
        ast::Statement::Query(query) => push_body_targets(tables, &query.body),
        ast::Statement::Insert(insert) => {
            if let TableObject::TableName(name) = &insert.table {
                push_object_name(tables, name);
            }
        }
        ast::Statement::Update(update) => {
            push_factor(tables, &update.table.relation);
            for join in &update.table.joins {
                push_factor(tables, &join.relation);
            }
        }
        ast::Statement::Drop { names, .. } => {
            for name in names {
                push_object_name(tables, name);
            }
        }
        ast::Statement::Delete(delete) => {
            for name in &delete.tables {
                push_object_name(tables, name);
            }
            match &delete.from {
                FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from) => {
                    for twj in from {
                        push_factor(tables, &twj.relation);
                        for join in &twj.joins {
                            push_factor(tables, &join.relation);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn push_body_targets(tables: &mut Vec<TableRef>, body: &SetExpr) {
    match body {
        SetExpr::Query(query) => push_body_targets(tables, &query.body),
        SetExpr::SetOperation { left, right, .. } => {
            push_body_targets(tables, left);
            push_body_targets(tables, right);
        }
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) | SetExpr::Delete(stmt) => {
            push_write_targets(tables, stmt)
        }
        _ => {}
    }
}

fn push_factor(tables: &mut Vec<TableRef>, factor: &TableFactor) {
    if let TableFactor::Table { name, .. } = factor {
        push_object_name(tables, name);
    }
}

fn push_object_name(tables: &mut Vec<TableRef>, name: &ObjectName) {
    if let Some(table) = table_ref(name) {
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
}

fn table_ref(name: &ObjectName) -> Option<TableRef> {
    let parts: Vec<String> = name
        .0
        .iter()
        .filter_map(|part| match part {
            ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
            _ => None,
        })
        .collect();

    match parts.as_slice() {
        [] => None,
        [table] => Some(TableRef::new(table.clone())),
        [.., schema, table] => Some(TableRef::qualified(schema.clone(), table.clone())),
    }
}

fn extract_columns(stmt: &ast::Statement) -> Vec<String> {
    let mut columns = Vec::new();
    let mut push = |name: &str| {
        let name = unquote(name).to_lowercase();
        if !name.is_empty() && !columns.contains(&name) {
            columns.push(name);
        }
    };

    let _ = visit_expressions(stmt, |expr| {
        match expr {
            Expr::Identifier(ident) => push(&ident.value),
            Expr::CompoundIdentifier(parts) => {
                if let Some(last) = parts.last() {
                    push(&last.value);
                }
            }
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });

    match stmt {
        ast::Statement::Insert(insert) => {
            for column in &insert.columns {
                push(&column.to_string());
            }
        }
        ast::Statement::Update(update) => {
            for assignment in &update.assignments {
                let target = assignment.target.to_string();
                for column in target.trim_matches(|c| c == '(' || c == ')').split(',') {
                    let column = column.trim();
                    push(column.rsplit('.').next().unwrap_or(column));
                }
            }
        }
        _ => {}
    }

    columns
}

fn unquote(name: &str) -> &str {
    name.trim().trim_matches(|c| c == '`' || c == '"')
}

/// Classify a `SET` statement from its tokens.
///
/// Session-scoped assignments are benign. Anything that reaches global or
/// persisted state, passwords or roles is `Other` and therefore denied, as is
/// a client character set outside [`ASCII_SAFE_CHARSETS`].
fn classify_set(
    significant: &[&Token],
) -> Result<(StatementKind, Option<IsolationChange>), SqlError> {
    let words: Vec<String> = significant.iter().map(|t| token_word(t)).collect();
    let joined: String = words.concat();

    let reaches_beyond_session = words
        .iter()
        .any(|w| SET_DENIED_SCOPES.contains(&w.as_str()))
        || joined.contains("@@GLOBAL")
        || joined.contains("@@PERSIST");
    let second = words.get(1).map(String::as_str).unwrap_or_default();
    if reaches_beyond_session
        || SET_DENIED_TARGETS.contains(&second)
        || !charsets_are_ascii_safe(significant, &words)
    {
        return Ok((StatementKind::Other, None));
    }

    // SET [SESSION | LOCAL] TRANSACTION ...
    let (scope, rest) = match second {
        "SESSION" | "LOCAL" => (IsolationScope::Session, &words[2..]),
        _ => (IsolationScope::NextTransaction, &words[1..]),
    };
    if rest.first().map(String::as_str) == Some("TRANSACTION") {
        let isolation = match rest.iter().position(|w| w == "LEVEL") {
            Some(idx) => Some(IsolationChange {
                scope,
                level: parse_level(&rest[idx + 1..])?,
            }),
            None => None,
        };
        return Ok((StatementKind::Session, isolation));
    }

    // SET [@@session.]transaction_isolation = 'READ-COMMITTED'
    if let Some(idx) = words
        .iter()
        .position(|w| w.ends_with("TRANSACTION_ISOLATION") || w.ends_with("TX_ISOLATION"))
    {
        let value = significant[idx..].iter().find_map(|t| match t {
            Token::SingleQuotedString(s) | Token::DoubleQuotedString(s) => Some(s.as_str()),
            _ => None,
        });
        if let Some(value) = value {
            let level = value
                .parse::<IsolationLevel>()
                .map_err(|e| SqlError::Syntax(e.to_string()))?;
            return Ok((
                StatementKind::Session,
                Some(IsolationChange {
                    scope: IsolationScope::Session,
                    level,
                }),
            ));
        }
    }

    Ok((StatementKind::Session, None))
}

/// Every character set named by `SET NAMES`, `SET CHARACTER SET`,
/// `SET CHARSET` or a `character_set_client` / `character_set_connection`
/// assignment is one of [`ASCII_SAFE_CHARSETS`].
fn charsets_are_ascii_safe(significant: &[&Token], words: &[String]) -> bool {
    let mut named = Vec::new();
    match words.get(1).map(String::as_str) {
        Some("NAMES") | Some("CHARSET") => named.push(significant.get(2)),
        Some("CHARACTER") if words.get(2).map(String::as_str) == Some("SET") => {
            named.push(significant.get(3))
        }
        _ => {}
    }
    for (idx, word) in words.iter().enumerate() {
        if word.ends_with("CHARACTER_SET_CLIENT") || word.ends_with("CHARACTER_SET_CONNECTION") {
            // skip the `=` or `:=`
            named.push(
                significant[idx + 1..]
                    .iter()
                    .find(|t| !matches!(t, Token::Eq | Token::Assignment)),
            );
        }
    }

    named.into_iter().all(|token| {
        token
            .and_then(|t| charset_name(t))
            .is_some_and(|name| ASCII_SAFE_CHARSETS.contains(&name.as_str()))
    })
}

fn charset_name(token: &Token) -> Option<String> {
    match token {
        Token::Word(word) => Some(word.value.to_lowercase()),
        Token::SingleQuotedString(s) | Token::DoubleQuotedString(s) => Some(s.to_lowercase()),
        _ => None,
    }
}

/// Whether a `SET` touches `sql_mode` or the client character set.
fn changes_lexing(significant: &[&Token]) -> bool {
    let words: Vec<String> = significant.iter().map(|t| token_word(t)).collect();
    let second = words.get(1).map(String::as_str);
    matches!(second, Some("NAMES") | Some("CHARSET"))
        || (second == Some("CHARACTER") && words.get(2).map(String::as_str) == Some("SET"))
        || words
            .iter()
            .any(|w| LEXING_VARIABLES.iter().any(|v| w.ends_with(v)))
}

/// Uppercased token text with string contents hidden.
fn token_word(token: &Token) -> String {
    match token {
        Token::Word(word) => word.value.to_uppercase(),
        Token::SingleQuotedString(_) | Token::DoubleQuotedString(_) => "?".to_string(),
        other => other.to_string().to_uppercase(),
    }
}

fn parse_level(words: &[String]) -> Result<IsolationLevel, SqlError> {
    let level: Vec<&str> = words
        .iter()
        .map(String::as_str)
        .take_while(|w| *w != ",")
        .collect();
    level
        .join(" ")
        .parse()
        .map_err(|e: yacht_core::ConfigError| SqlError::Syntax(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(sql: &str) -> Statement {
        StatementParser::new()
            .parse_statement(sql, LexOptions::default())
            .unwrap()
    }

    fn names(stmt: &Statement) -> Vec<String> {
        stmt.tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_simple_select() {
        let stmt = parse("SELECT * FROM users");
        assert_eq!(stmt.kind, StatementKind::Read);
        assert_eq!(names(&stmt), vec!["users"]);
    }

    #[test]
    fn test_join_and_subquery_tables() {
        let stmt = parse(
            "SELECT o.id FROM orders o JOIN customers c ON o.customer_id = c.id \
             WHERE o.id IN (SELECT order_id FROM refunds WHERE amount > (SELECT AVG(x) FROM audit_log))",
        );
        let mut tables = names(&stmt);
        tables.sort();
        assert_eq!(tables, vec!["audit_log", "customers", "orders", "refunds"]);
    }

    #[test]
    fn test_derived_table_and_union() {
        let stmt = parse("SELECT * FROM (SELECT id FROM a) AS d UNION SELECT id FROM b");
        let mut tables = names(&stmt);
        tables.sort();
        assert_eq!(tables, vec!["a", "b"]);
    }

    #[test]
    fn test_write_kinds_and_targets() {
        let insert = parse("INSERT INTO wp_comments (comment_content) VALUES ('hi')");
        assert_eq!(insert.kind, StatementKind::Write);
        assert_eq!(names(&insert), vec!["wp_comments"]);
        assert_eq!(insert.columns, vec!["comment_content"]);

        let replace = parse("REPLACE INTO wp_options (option_name) VALUES ('x')");
        assert_eq!(replace.kind, StatementKind::Write);
        assert_eq!(names(&replace), vec!["wp_options"]);

        let update = parse("UPDATE `WP_Users` SET user_pass = 'x' WHERE ID = 1");
        assert_eq!(update.kind, StatementKind::Write);
        assert_eq!(names(&update), vec!["wp_users"]);
        assert!(update.columns.contains(&"user_pass".to_string()));

        let delete = parse("DELETE FROM shop.Orders WHERE id = 3");
        assert_eq!(delete.kind, StatementKind::Write);
        assert_eq!(delete.tables, vec![TableRef::qualified("shop", "orders")]);
    }

    #[test]
    fn test_write_with_select_source_reports_both_tables() {
        let stmt = parse("INSERT INTO comments (body) SELECT user_login FROM users");
        let mut tables = names(&stmt);
        tables.sort();
        assert_eq!(tables, vec!["comments", "users"]);
    }

    #[test]
    fn test_multi_table_update() {
        let stmt = parse("UPDATE comments c JOIN users u ON c.user_id = u.id SET c.flag = 1");
        let mut tables = names(&stmt);
        tables.sort();
        assert_eq!(tables, vec!["comments", "users"]);
    }

    #[test]
    fn test_dml_behind_common_table_expression_is_a_write() {
        let update = parse("WITH x AS (SELECT 1) UPDATE users SET user_pass = 'x' WHERE ID = 1");
        assert_eq!(update.kind, StatementKind::Write);
        assert!(names(&update).contains(&"users".to_string()));

        let delete = parse("WITH x AS (SELECT 1) DELETE FROM shop.users WHERE ID = 1");
        assert_eq!(delete.kind, StatementKind::Write);
        assert!(delete.tables.contains(&TableRef::qualified("shop", "users")));

        let insert = parse("WITH src AS (SELECT id FROM drafts) INSERT INTO posts (id) SELECT id FROM src");
        assert_eq!(insert.kind, StatementKind::Write);
        assert!(names(&insert).contains(&"posts".to_string()));

        let read = parse("WITH recent AS (SELECT id FROM posts) SELECT * FROM recent");
        assert_eq!(read.kind, StatementKind::Read);
    }

    #[test]
    fn test_ddl() {
        assert_eq!(parse("CREATE TABLE t (id INT)").kind, StatementKind::Ddl);
        assert_eq!(parse("DROP TABLE wp_users").kind, StatementKind::Ddl);
        assert_eq!(parse("ALTER TABLE t ADD COLUMN c INT").kind, StatementKind::Ddl);
        assert_eq!(parse("TRUNCATE TABLE wp_comments").kind, StatementKind::Ddl);
        let drop = parse("DROP TABLE wp_users");
        assert!(drop.mutates());
        assert_eq!(names(&drop), vec!["wp_users"]);
    }

    #[test]
    fn test_transaction_control() {
        assert_eq!(
            parse("BEGIN").kind,
            StatementKind::Transaction(TransactionControl::Begin)
        );
        assert_eq!(
            parse("START TRANSACTION").kind,
            StatementKind::Transaction(TransactionControl::Begin)
        );
        assert_eq!(
            parse("commit").kind,
            StatementKind::Transaction(TransactionControl::Commit)
        );
        assert_eq!(
            parse("ROLLBACK").kind,
            StatementKind::Transaction(TransactionControl::Rollback)
        );
        assert_eq!(
            parse("SAVEPOINT sp1").kind,
            StatementKind::Transaction(TransactionControl::Savepoint)
        );
        assert_eq!(
            parse("ROLLBACK TO SAVEPOINT sp1").kind,
            StatementKind::Transaction(TransactionControl::Savepoint)
        );
    }

    #[test]
    fn test_show_and_describe_are_reads() {
        assert_eq!(parse("SHOW TABLES").kind, StatementKind::Read);
        assert_eq!(parse("EXPLAIN SELECT * FROM users").kind, StatementKind::Read);
    }

    #[test]
    fn test_comments_and_casing_do_not_hide_writes() {
        let stmt = parse("/* harmless */ uPdAtE -- really\n users SET x = 1");
        assert_eq!(stmt.kind, StatementKind::Write);
        assert_eq!(names(&stmt), vec!["users"]);

        let stmt = parse("SELECT 'UPDATE users SET x = 1' FROM comments");
        assert_eq!(stmt.kind, StatementKind::Read);
        assert_eq!(names(&stmt), vec!["comments"]);
    }

    #[test]
    fn test_set_statements() {
        let stmt = parse("SET NAMES utf8mb4");
        assert_eq!(stmt.kind, StatementKind::Session);
        assert_eq!(stmt.isolation, None);

        let stmt = parse("SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED");
        assert_eq!(stmt.kind, StatementKind::Session);
        assert_eq!(
            stmt.isolation,
            Some(IsolationChange {
                scope: IsolationScope::Session,
                level: IsolationLevel::ReadCommitted,
            })
        );

        let stmt = parse("set transaction isolation level serializable");
        assert_eq!(
            stmt.isolation,
            Some(IsolationChange {
                scope: IsolationScope::NextTransaction,
                level: IsolationLevel::Serializable,
            })
        );

        let stmt = parse("SET @@session.transaction_isolation = 'REPEATABLE-READ'");
        assert_eq!(
            stmt.isolation.map(|i| i.level),
            Some(IsolationLevel::RepeatableRead)
        );
    }

    #[test]
    fn test_set_beyond_session_is_other() {
        assert_eq!(parse("SET GLOBAL read_only = 0").kind, StatementKind::Other);
        assert_eq!(parse("SET @@global.read_only = 0").kind, StatementKind::Other);
        assert_eq!(parse("SET PERSIST max_connections = 10").kind, StatementKind::Other);
        assert_eq!(
            parse("SET PASSWORD FOR 'root' = 'x'").kind,
            StatementKind::Other
        );
    }

    #[test]
    fn test_client_charset_must_be_ascii_safe() {
        for sql in [
            "SET NAMES utf8mb4",
            "SET NAMES 'latin1' COLLATE 'latin1_swedish_ci'",
            "SET CHARACTER SET utf8",
            "SET character_set_client = binary",
        ] {
            assert_eq!(parse(sql).kind, StatementKind::Session, "{sql}");
        }
        for sql in [
            "SET NAMES gbk",
            "SET NAMES 'sjis'",
            "SET CHARACTER SET big5",
            "SET CHARSET cp932",
            "SET @@session.character_set_client = 'gb18030'",
            "SET autocommit = 1, character_set_connection = gbk",
            "SET NAMES DEFAULT",
        ] {
            assert_eq!(parse(sql).kind, StatementKind::Other, "{sql}");
        }
    }

    #[test]
    fn test_lexing_changes_are_flagged() {
        assert!(parse("SET NAMES utf8mb4").changes_lexing);
        assert!(parse("SET CHARACTER SET latin1").changes_lexing);
        assert!(parse("SET SESSION sql_mode = 'NO_BACKSLASH_ESCAPES'").changes_lexing);
        assert!(parse("SET @@sql_mode = ''").changes_lexing);
        assert!(!parse("SET autocommit = 0").changes_lexing);
        assert!(!parse("SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED").changes_lexing);
        assert!(!parse("SELECT @@sql_mode").changes_lexing);
    }

    #[test]
    fn test_use_is_session() {
        let stmt = parse("USE `WordPress`");
        assert_eq!(stmt.kind, StatementKind::Session);
        assert_eq!(stmt.database.as_deref(), Some("WordPress"));
        assert!(
            StatementParser::new()
                .parse_statement("USE a b", LexOptions::default())
                .is_err()
        );
    }

    #[test]
    fn test_batch_keeps_order() {
        let batch = StatementParser::new()
            .parse_batch(
                "INSERT INTO comments VALUES (1); UPDATE users SET x=1;",
                LexOptions::default(),
            )
            .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(names(&batch.statements[0]), vec!["comments"]);
        assert_eq!(names(&batch.statements[1]), vec!["users"]);
        assert!(batch.mutates());
    }

    #[test]
    fn test_parse_failures() {
        let parser = StatementParser::new();
        assert!(matches!(
            parser.parse_batch("SELEKT * FROM users", LexOptions::default()),
            Err(SqlError::Syntax(_))
        ));
        // One bad piece fails the batch.
        assert!(
            parser
                .parse_batch("SELECT 1; UPDATE", LexOptions::default())
                .is_err()
        );
        assert_eq!(
            parser.parse_statement("SELECT 1; SELECT 2", LexOptions::default()),
            Err(SqlError::MultipleStatements(2))
        );
    }
}
