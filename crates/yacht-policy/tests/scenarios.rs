//! End-to-end decisions: SQL text through the parser into the policy store.

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use yacht_core::PolicyConfig;
use yacht_policy::{DecisionContext, PolicyStore, Reason, Verdict, decide_batch};
use yacht_sql::{LexOptions, StatementParser};

const SITE_POLICY: &str = r#"
default_posture: deny
immutable: [users, options]
writable: [comments]
"#;

fn store(yaml: &str) -> PolicyStore {
    PolicyStore::new(&PolicyConfig::from_yaml(yaml).unwrap(), None).unwrap()
}

fn verdict(store: &PolicyStore, sql: &str) -> (Verdict, Reason) {
    let batch = StatementParser::new()
        .parse_batch(sql, LexOptions::default())
        .unwrap();
    let decision = decide_batch(&batch, DecisionContext::default(), &store.snapshot());
    (decision.verdict(), decision.reason())
}

#[test]
fn site_policy_unmoored() {
    let store = store(SITE_POLICY);

    assert_eq!(
        verdict(&store, "UPDATE users SET pass = 'x' WHERE id = 1"),
        (Verdict::Deny, Reason::ImmutableTable)
    );
    assert_eq!(
        verdict(&store, "INSERT INTO comments (body) VALUES ('hello')"),
        (Verdict::Allow, Reason::WritableTables)
    );
    assert_eq!(
        verdict(&store, "SELECT * FROM users"),
        (Verdict::Allow, Reason::ReadOnly)
    );
    assert_eq!(
        verdict(&store, "UPDATE unknown_table SET x = 1"),
        (Verdict::Deny, Reason::DefaultPosture)
    );
}

#[test]
fn site_policy_moored() {
    let store = store(SITE_POLICY);
    store.set_moored(true);

    assert_eq!(
        verdict(&store, "INSERT INTO comments (body) VALUES ('hello')"),
        (Verdict::Deny, Reason::MaintenanceLock)
    );
    assert_eq!(
        verdict(&store, "SELECT * FROM comments"),
        (Verdict::Allow, Reason::ReadOnly)
    );
}

#[test]
fn batch_with_one_immutable_target_is_denied() {
    let store = store(SITE_POLICY);
    assert_eq!(
        verdict(&store, "INSERT INTO comments (body) VALUES ('a'); UPDATE users SET x = 1;"),
        (Verdict::Deny, Reason::ImmutableTable)
    );
}

#[test]
fn immutable_target_wins_over_writable_ones() {
    let store = store(SITE_POLICY);
    assert_eq!(
        verdict(
            &store,
            "UPDATE comments c JOIN users u ON c.user_id = u.id SET c.flag = 1"
        ),
        (Verdict::Deny, Reason::ImmutableTable)
    );
}

#[test]
fn common_table_expression_does_not_hide_a_write() {
    let store = store(SITE_POLICY);
    assert_eq!(
        verdict(&store, "WITH x AS (SELECT 1) UPDATE users SET user_pass = 'x'"),
        (Verdict::Deny, Reason::ImmutableTable)
    );

    store.set_moored(true);
    assert_eq!(
        verdict(&store, "WITH x AS (SELECT 1) INSERT INTO comments (body) SELECT 1"),
        (Verdict::Deny, Reason::MaintenanceLock)
    );
}

#[test]
fn use_in_a_batch_moves_later_members_to_that_database() {
    let store = store("default_posture: allow\nimmutable: [shop.orders]\n");
    let batch = StatementParser::new()
        .parse_batch("USE shop; DELETE FROM orders", LexOptions::default())
        .unwrap();
    let decision = decide_batch(
        &batch,
        DecisionContext { database: Some("wordpress") },
        &store.snapshot(),
    );
    assert_eq!(decision.verdict(), Verdict::Deny);
    assert_eq!(decision.reason(), Reason::ImmutableTable);
}

#[test]
fn statements_after_sql_mode_change_are_not_trusted() {
    let store = store(SITE_POLICY);
    assert_eq!(
        verdict(
            &store,
            r"SET sql_mode = 'NO_BACKSLASH_ESCAPES'; SELECT 'a\'; DELETE FROM users; -- '"
        ),
        (Verdict::Deny, Reason::Unparseable)
    );
    assert_eq!(
        verdict(&store, "SET sql_mode = 'NO_BACKSLASH_ESCAPES'"),
        (Verdict::Allow, Reason::SessionSetting)
    );
}

/// Readers racing a stream of reloads only ever see one whole ruleset.
#[test]
fn concurrent_reloads_never_split_a_batch() {
    let locked = PolicyConfig::from_yaml("immutable: [alpha, beta]\n").unwrap();
    let open = PolicyConfig::from_yaml("writable: [alpha, beta]\n").unwrap();
    let store = PolicyStore::new(&locked, None).unwrap();

    let batch = StatementParser::new()
        .parse_batch(
            "INSERT INTO alpha VALUES (1); INSERT INTO beta VALUES (1)",
            LexOptions::default(),
        )
        .unwrap();
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..500 {
                let next = if round % 2 == 0 { &open } else { &locked };
                store.replace(next).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        for _ in 0..4 {
            scope.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let decision =
                        decide_batch(&batch, DecisionContext::default(), &store.snapshot());
                    let first = decision.decisions[0].verdict;
                    let second = decision.decisions[1].verdict;
                    assert_eq!(first, second, "batch observed two rulesets");
                }
            });
        }
    });

    assert_eq!(store.ruleset().version(), 501);
}
