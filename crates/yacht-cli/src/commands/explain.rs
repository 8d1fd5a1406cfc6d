//! `yacht explain` - decide a statement offline.
//!
//! Runs the same parser and decision function the proxy uses, against a
//! policy file, without a database or a running agent.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use yacht_policy::{
    Classification, Decision, DecisionContext, PolicySnapshot, PolicyStore, Reason, Verdict,
    decide_batch,
};
use yacht_sql::{LexOptions, Statement, StatementParser, fingerprint};

/// How one referenced table resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableExplanation {
    pub table: String,
    pub classification: Classification,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementExplanation {
    pub kind: String,
    pub fingerprint: String,
    pub tables: Vec<TableExplanation>,
    pub decision: Decision,
}

/// Everything `explain` reports about one submission.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub verdict: Verdict,
    pub reason: Reason,
    /// What a client would be told on denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub fingerprint: String,
    pub moored: bool,
    pub ruleset_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub statements: Vec<StatementExplanation>,
}

/// Parse and decide `sql` against `snapshot`.
pub fn explain(
    parser: &StatementParser,
    snapshot: &PolicySnapshot,
    database: Option<&str>,
    sql: &str,
) -> Explanation {
    let base = |verdict: Verdict, reason: Reason, fingerprint: String| Explanation {
        verdict,
        reason,
        message: (verdict == Verdict::Deny).then(|| reason.client_message()),
        fingerprint,
        moored: snapshot.moored,
        ruleset_version: snapshot.ruleset.version(),
        database: database.map(str::to_string),
        parse_error: None,
        statements: Vec::new(),
    };

    let batch = match parser.parse_batch(sql, LexOptions::default()) {
        Ok(batch) => batch,
        Err(e) => {
            return Explanation {
                parse_error: Some(e.to_string()),
                ..base(Verdict::Deny, Reason::Unparseable, fingerprint::hash(sql))
            };
        }
    };

    let decision = decide_batch(&batch, DecisionContext { database }, snapshot);
    let mut current = database;
    let mut statements = Vec::with_capacity(batch.len());
    for (statement, decision) in batch.statements.iter().zip(decision.decisions.iter()) {
        statements.push(explain_statement(statement, decision, snapshot, current));
        if let Some(next) = statement.database.as_deref() {
            current = Some(next);
        }
    }

    Explanation {
        statements,
        ..base(decision.verdict(), decision.reason(), batch.fingerprint())
    }
}

fn explain_statement(
    statement: &Statement,
    decision: &Decision,
    snapshot: &PolicySnapshot,
    database: Option<&str>,
) -> StatementExplanation {
    StatementExplanation {
        kind: statement.kind.to_string(),
        fingerprint: statement.fingerprint.clone(),
        tables: statement
            .tables
            .iter()
            .map(|table| TableExplanation {
                table: table.to_string(),
                classification: snapshot.ruleset.classify(table, database),
            })
            .collect(),
        decision: decision.clone(),
    }
}

pub fn run(
    policy_path: &Path,
    moored: bool,
    database: Option<&str>,
    json: bool,
    sql: &str,
) -> Result<()> {
    let store = PolicyStore::from_file(policy_path)
        .with_context(|| format!("Failed to load policy from {}", policy_path.display()))?;
    if moored {
        store.set_moored(true);
    }

    let explanation = explain(&StatementParser::new(), &store.snapshot(), database, sql);

    if json {
        println!("{}", serde_json::to_string_pretty(&explanation)?);
    } else {
        print_explanation(&explanation);
    }
    Ok(())
}

fn print_explanation(explanation: &Explanation) {
    println!(
        "Verdict: {} ({})",
        explanation.verdict.to_string().to_uppercase(),
        explanation.reason
    );
    if let Some(message) = explanation.message {
        println!("Client sees: {message}");
    }
    println!(
        "Ruleset v{}, {}",
        explanation.ruleset_version,
        if explanation.moored { "moored" } else { "not moored" }
    );
    println!("Fingerprint: {}", explanation.fingerprint);

    if let Some(error) = &explanation.parse_error {
        println!("Parse error: {error}");
    }

    for (idx, statement) in explanation.statements.iter().enumerate() {
        println!();
        println!(
            "  [{}] {} -> {} ({})",
            idx + 1,
            statement.kind,
            statement.decision.verdict,
            statement.decision.reason
        );
        for table in &statement.tables {
            println!("      {:<32} {:?}", table.table, table.classification);
        }
    }
}
