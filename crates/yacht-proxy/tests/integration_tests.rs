//! Integration tests for the Yacht MySQL proxy.
//!
//! Each test starts the proxy in-process against a fake MySQL backend on
//! loopback and talks to it with a raw protocol client.
//!
//! Run with: cargo test --package yacht-proxy --test integration_tests

use futures::{SinkExt, StreamExt};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use yacht_audit::{AuditEventType, AuditLogger, MemoryStorage};
use yacht_core::{AuditConfig, ClientSecret, YachtConfig};
use yacht_policy::{PolicyStore, Reason};
use yacht_proxy::YachtProxy;
use yacht_proxy::protocol::auth::{NATIVE_PASSWORD, native_token, verify_native};
use yacht_proxy::protocol::capabilities::PROXY_CAPABILITIES;
use yacht_proxy::protocol::commands::{COM_PING, COM_QUERY, COM_STMT_EXECUTE, COM_STMT_PREPARE};
use yacht_proxy::protocol::status::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};
use yacht_proxy::protocol::{
    ClientCommand, ErrPacket, HandshakeResponse, InitialHandshake, OkPacket, Packet, PacketCodec,
    ResponseKind, ResponseTracker,
};

const BACKEND_USER: &str = "yacht";
const BACKEND_PASSWORD: &str = "backend-secret";

const POLICY: &str = r#"
default_posture: deny
tables:
  wp_users: immutable
  wp_options: immutable
  wp_comments: writable
  wp_posts: writable
"#;

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// A MySQL server that accepts the proxy's credentials, records every command
/// and answers with canned responses.
struct FakeBackend {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeBackend {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_log = log.clone();
        let accept_count = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_backend(stream, accept_log.clone()));
            }
        });

        Self {
            addr,
            log,
            connections,
        }
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Statements from clients, without the session init commands.
    fn queries(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| !e.starts_with("SET SESSION TRANSACTION"))
            .filter(|e| e != "QUIT" && e != "CLOSED" && !e.starts_with("COM_"))
            .collect()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn wait_for(&self, entry: &str) -> bool {
        for _ in 0..100 {
            if self.entries().iter().any(|e| e == entry) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

async fn serve_backend(stream: TcpStream, log: Arc<Mutex<Vec<String>>>) {
    let mut framed = Framed::new(stream, PacketCodec);
    let scramble = *b"abcdefghij0123456789";
    let greeting = InitialHandshake::for_client(42, "8.0.36-fake", scramble);
    if framed.send(greeting.encode()).await.is_err() {
        return;
    }

    let Some(Ok(packet)) = framed.next().await else {
        return;
    };
    let response = HandshakeResponse::parse(&packet.payload).unwrap();
    let secret = ClientSecret::Password(BACKEND_PASSWORD.into());
    if response.username != BACKEND_USER
        || !verify_native(&secret, &scramble, &response.auth_response)
    {
        let err = ErrPacket::new(1045, "28000", "Access denied for user 'yacht'");
        let _ = framed.send(err.encode(packet.seq + 1)).await;
        return;
    }
    let _ = framed
        .send(OkPacket::with_status(SERVER_STATUS_AUTOCOMMIT).encode(packet.seq + 1))
        .await;

    let mut status = SERVER_STATUS_AUTOCOMMIT;
    let mut next_statement_id = 1u32;
    while let Some(Ok(packet)) = framed.next().await {
        let replies = match ClientCommand::parse(&packet.payload) {
            ClientCommand::Quit => {
                log.lock().unwrap().push("QUIT".into());
                break;
            }
            ClientCommand::Query(sql) => {
                log.lock().unwrap().push(sql.clone());
                let upper = sql.trim().to_uppercase();
                if upper.starts_with("BEGIN") || upper.starts_with("START TRANSACTION") {
                    status |= SERVER_STATUS_IN_TRANS;
                } else if upper.starts_with("COMMIT") || upper.starts_with("ROLLBACK") {
                    status &= !SERVER_STATUS_IN_TRANS;
                }
                if upper.starts_with("SELECT") {
                    result_set(status)
                } else {
                    vec![OkPacket::with_status(status).encode(1).payload.to_vec()]
                }
            }
            ClientCommand::StmtPrepare(sql) => {
                log.lock().unwrap().push(format!("PREPARE {sql}"));
                let id = next_statement_id;
                next_statement_id += 1;
                let params = sql.matches('?').count() as u16;
                let mut payload = vec![0x00];
                payload.extend_from_slice(&id.to_le_bytes());
                payload.extend_from_slice(&[0, 0]);
                payload.extend_from_slice(&params.to_le_bytes());
                payload.extend_from_slice(&[0, 0, 0]);
                let mut replies = vec![payload];
                if params > 0 {
                    replies.extend((0..params).map(|_| column_definition()));
                    replies.push(eof(status));
                }
                replies
            }
            ClientCommand::StmtExecute { statement_id } => {
                log.lock().unwrap().push(format!("EXECUTE {statement_id}"));
                vec![OkPacket::with_status(status).encode(1).payload.to_vec()]
            }
            ClientCommand::StmtClose { statement_id } => {
                log.lock().unwrap().push(format!("CLOSE {statement_id}"));
                Vec::new()
            }
            other => {
                log.lock().unwrap().push(other.name().to_string());
                vec![OkPacket::with_status(status).encode(1).payload.to_vec()]
            }
        };

        for (i, payload) in replies.into_iter().enumerate() {
            if framed.send(Packet::new(i as u8 + 1, payload)).await.is_err() {
                return;
            }
        }
    }
    log.lock().unwrap().push("CLOSED".into());
}

fn column_definition() -> Vec<u8> {
    let mut column = Vec::new();
    for field in ["def", "", "", "", "c", "c"] {
        column.push(field.len() as u8);
        column.extend_from_slice(field.as_bytes());
    }
    column.extend_from_slice(&[0x0c, 45, 0, 11, 0, 0, 0, 0x08, 0, 0, 0, 0, 0]);
    column
}

fn eof(status: u16) -> Vec<u8> {
    let mut p = vec![0xFE, 0, 0];
    p.extend_from_slice(&status.to_le_bytes());
    p
}

/// One column, one row.
fn result_set(status: u16) -> Vec<Vec<u8>> {
    vec![vec![0x01], column_definition(), eof(status), vec![0x01, b'1'], eof(status)]
}

// ---------------------------------------------------------------------------
// Raw client
// ---------------------------------------------------------------------------

struct Client {
    framed: Framed<TcpStream, PacketCodec>,
}

enum Reply {
    Ok(u16),
    Err(ErrPacket),
}

impl Client {
    async fn connect(addr: SocketAddr, user: &str, password: &str) -> Result<Self, ErrPacket> {
        Self::connect_with_charset(addr, user, password, 45).await
    }

    async fn connect_with_charset(
        addr: SocketAddr,
        user: &str,
        password: &str,
        charset: u8,
    ) -> Result<Self, ErrPacket> {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, PacketCodec);

        let first = framed.next().await.unwrap().unwrap();
        if first.payload[0] == 0xFF {
            return Err(ErrPacket::parse(&first.payload).unwrap());
        }
        let greeting = InitialHandshake::parse(&first.payload).unwrap();
        assert_eq!(greeting.scramble.len(), 20);

        let response = HandshakeResponse {
            capabilities: PROXY_CAPABILITIES,
            max_packet_size: 16 * 1024 * 1024,
            charset,
            username: user.to_string(),
            auth_response: native_token(password.as_bytes(), &greeting.scramble),
            database: None,
            auth_plugin: Some(NATIVE_PASSWORD.to_string()),
        };
        framed.send(response.encode(first.seq + 1)).await.unwrap();

        let reply = framed.next().await.unwrap().unwrap();
        assert_eq!(reply.seq, first.seq + 2);
        if reply.payload[0] == 0xFF {
            return Err(ErrPacket::parse(&reply.payload).unwrap());
        }
        assert_eq!(reply.payload[0], 0x00);
        Ok(Self { framed })
    }

    async fn command(&mut self, payload: Vec<u8>, kind: ResponseKind) -> ResponseTracker {
        self.framed.send(Packet::new(0, payload)).await.unwrap();
        let mut tracker = ResponseTracker::new(kind);
        loop {
            let packet = tokio::time::timeout(Duration::from_secs(5), self.framed.next())
                .await
                .expect("response timed out")
                .unwrap()
                .unwrap();
            if tracker.feed(&packet.payload).unwrap() {
                return tracker;
            }
        }
    }

    async fn query(&mut self, sql: &str) -> Reply {
        let mut payload = vec![COM_QUERY];
        payload.extend_from_slice(sql.as_bytes());
        let tracker = self.command(payload, ResponseKind::Query).await;
        reply(&tracker)
    }

    async fn prepare(&mut self, sql: &str) -> Result<u32, ErrPacket> {
        let mut payload = vec![COM_STMT_PREPARE];
        payload.extend_from_slice(sql.as_bytes());
        let tracker = self.command(payload, ResponseKind::Prepare).await;
        match tracker.error() {
            Some(err) => Err(err.clone()),
            None => Ok(tracker.prepared().unwrap().statement_id),
        }
    }

    async fn execute(&mut self, statement_id: u32) -> Reply {
        let mut payload = vec![COM_STMT_EXECUTE];
        payload.extend_from_slice(&statement_id.to_le_bytes());
        payload.extend_from_slice(&[0, 1, 0, 0, 0]);
        let tracker = self.command(payload, ResponseKind::Execute).await;
        reply(&tracker)
    }

    async fn ping(&mut self) -> Reply {
        let tracker = self.command(vec![COM_PING], ResponseKind::Single).await;
        reply(&tracker)
    }
}

fn reply(tracker: &ResponseTracker) -> Reply {
    match tracker.error() {
        Some(err) => Reply::Err(err.clone()),
        None => Reply::Ok(tracker.status().unwrap_or_default()),
    }
}

impl Reply {
    fn expect_err(self, code: u16) -> ErrPacket {
        match self {
            Reply::Err(err) => {
                assert_eq!(err.code, code, "unexpected error: {}", err.message);
                err
            }
            Reply::Ok(_) => panic!("expected ERR {code}, got OK"),
        }
    }

    fn expect_success(self) {
        if let Reply::Err(err) = self {
            panic!("unexpected error {}: {}", err.code, err.message);
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    proxy: Arc<YachtProxy>,
    addr: SocketAddr,
    backend: FakeBackend,
    audit: Arc<MemoryStorage>,
    policy_file: tempfile::NamedTempFile,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(4, None).await
    }

    async fn start_with(max_connections: u32, backend_port: Option<u16>) -> Self {
        let backend = FakeBackend::start().await;
        let port = backend_port.unwrap_or(backend.addr.port());

        let mut policy_file = tempfile::NamedTempFile::new().unwrap();
        policy_file.write_all(POLICY.as_bytes()).unwrap();

        let config = YachtConfig::from_yaml(&format!(
            r#"
proxy:
  listen_addr: 127.0.0.1
  listen_port: 0
  max_connections: {max_connections}
  close_grace_secs: 1
  handshake_timeout_secs: 1
clients:
  - username: wordpress
    password: secret
backend:
  host: 127.0.0.1
  port: {port}
  username: {BACKEND_USER}
  password: {BACKEND_PASSWORD}
  connect_timeout_secs: 2
"#
        ))
        .unwrap();

        let policy = Arc::new(PolicyStore::from_file(policy_file.path()).unwrap());
        let audit = Arc::new(MemoryStorage::new());
        let logger = AuditLogger::with_storage(AuditConfig::default(), audit.clone());
        let proxy = Arc::new(YachtProxy::new(&config, policy, Arc::new(logger)).unwrap());

        let listener = proxy.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = proxy.clone();
        tokio::spawn(async move { server.serve(listener, std::future::pending()).await });

        Self {
            proxy,
            addr,
            backend,
            audit,
            policy_file,
        }
    }

    async fn wait_until_idle(&self) {
        for _ in 0..100 {
            if self.proxy.active_sessions() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn client(&self) -> Client {
        Client::connect(self.addr, "wordpress", "secret")
            .await
            .unwrap_or_else(|e| panic!("login failed: {}", e.message))
    }

    fn denials(&self) -> Vec<Reason> {
        self.audit
            .events()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::StatementDenied)
            .filter_map(|e| e.reason)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_allowed_statements_reach_backend_in_order() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    client.query("SELECT * FROM wp_posts").await.expect_success();
    client
        .query("INSERT INTO wp_comments (comment_content) VALUES ('hi')")
        .await
        .expect_success();
    client
        .query("UPDATE wp_posts SET post_title = 'x' WHERE ID = 1")
        .await
        .expect_success();

    assert_eq!(
        harness.backend.queries(),
        vec![
            "SELECT * FROM wp_posts",
            "INSERT INTO wp_comments (comment_content) VALUES ('hi')",
            "UPDATE wp_posts SET post_title = 'x' WHERE ID = 1",
        ]
    );
    assert_eq!(
        harness.backend.entries()[0],
        "SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED"
    );
}

#[tokio::test]
async fn test_bad_password_never_opens_backend() {
    let harness = Harness::start().await;

    let err = Client::connect(harness.addr, "wordpress", "wrong")
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, 1045);
    assert_eq!(err.sql_state, "28000");

    let err = Client::connect(harness.addr, "nobody", "secret")
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, 1045);

    assert_eq!(harness.backend.connections(), 0);
    let failures = harness
        .audit
        .events()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::AuthenticationFailed)
        .count();
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn test_immutable_write_denied_and_connection_survives() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    let err = client
        .query("UPDATE wp_users SET user_pass = 'x' WHERE ID = 1")
        .await
        .expect_err(1142);
    assert_eq!(err.sql_state, "42000");
    assert!(!err.message.contains("wp_users"));
    assert!(!err.message.contains("immutable"));

    let err = client
        .query("UPDATE unknown_table SET x = 1")
        .await
        .expect_err(1142);
    assert_eq!(err.sql_state, "42000");

    client.query("SELECT * FROM wp_users").await.expect_success();

    assert_eq!(harness.backend.queries(), vec!["SELECT * FROM wp_users"]);
    assert_eq!(
        harness.denials(),
        vec![Reason::ImmutableTable, Reason::DefaultPosture]
    );
}

#[tokio::test]
async fn test_batch_with_one_denied_statement_is_not_forwarded() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    client
        .query("INSERT INTO wp_comments (comment_content) VALUES ('a'); UPDATE wp_users SET x = 1;")
        .await
        .expect_err(1142);

    assert!(harness.backend.queries().is_empty());
}

#[tokio::test]
async fn test_mooring_blocks_writes_but_not_reads() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    assert!(!harness.proxy.set_moored(true).await);

    let err = client
        .query("INSERT INTO wp_comments (comment_content) VALUES ('hi')")
        .await
        .expect_err(1142);
    assert!(err.message.contains("maintenance"));
    client.query("SELECT * FROM wp_comments").await.expect_success();

    harness.proxy.set_moored(false).await;
    client
        .query("INSERT INTO wp_comments (comment_content) VALUES ('hi')")
        .await
        .expect_success();

    assert_eq!(
        harness.backend.queries(),
        vec![
            "SELECT * FROM wp_comments",
            "INSERT INTO wp_comments (comment_content) VALUES ('hi')",
        ]
    );
    assert_eq!(harness.denials(), vec![Reason::MaintenanceLock]);
}

#[tokio::test]
async fn test_unparseable_statement_is_denied() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    client.query("UPDATE wp_posts SET").await.expect_err(1064);
    client
        .query("SELECT 1 /*!50000 ; DROP TABLE wp_users */")
        .await
        .expect_err(1064);
    client.ping().await.expect_success();

    assert!(harness.backend.queries().is_empty());
}

#[tokio::test]
async fn test_transaction_statements_are_forwarded() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    match client.query("BEGIN").await {
        Reply::Ok(status) => assert_ne!(status & SERVER_STATUS_IN_TRANS, 0),
        Reply::Err(err) => panic!("BEGIN failed: {}", err.message),
    }
    client
        .query("INSERT INTO wp_posts (post_title) VALUES ('draft')")
        .await
        .expect_success();
    client.query("COMMIT").await.expect_success();

    assert_eq!(
        harness.backend.queries(),
        vec![
            "BEGIN",
            "INSERT INTO wp_posts (post_title) VALUES ('draft')",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn test_prepared_statements_are_decided_on_every_execute() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    let err = client
        .prepare("UPDATE wp_options SET option_value = ? WHERE option_name = 'siteurl'")
        .await
        .unwrap_err();
    assert_eq!(err.code, 1142);

    let id = client
        .prepare("INSERT INTO wp_comments (comment_content) VALUES ('ok')")
        .await
        .unwrap();
    client.execute(id).await.expect_success();

    harness.proxy.set_moored(true).await;
    client.execute(id).await.expect_err(1142);
    harness.proxy.set_moored(false).await;

    let err = client.execute(99).await.expect_err(1243);
    assert!(err.message.contains("99"));

    assert_eq!(
        harness.backend.queries(),
        vec![
            "PREPARE INSERT INTO wp_comments (comment_content) VALUES ('ok')".to_string(),
            format!("EXECUTE {id}"),
        ]
    );
}

#[tokio::test]
async fn test_reload_applies_to_open_sessions() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    client
        .query("INSERT INTO wp_comments (comment_content) VALUES ('a')")
        .await
        .expect_success();

    std::fs::write(
        harness.policy_file.path(),
        "default_posture: deny\ntables:\n  wp_comments: immutable\n",
    )
    .unwrap();
    let summary = harness.proxy.reload().await.unwrap();
    assert_eq!(summary.version, 2);

    client
        .query("INSERT INTO wp_comments (comment_content) VALUES ('b')")
        .await
        .expect_err(1142);
    assert_eq!(harness.denials(), vec![Reason::ImmutableTable]);
}

#[tokio::test]
async fn test_unsupported_command_is_refused() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    // COM_PROCESS_KILL
    let tracker = client
        .command(vec![0x0C, 1, 0, 0, 0], ResponseKind::Single)
        .await;
    assert_eq!(tracker.error().map(|e| e.code), Some(1047));

    client.ping().await.expect_success();
    assert!(!harness.backend.entries().iter().any(|e| e == "unsupported"));
}

#[tokio::test]
async fn test_client_close_tears_down_backend() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;
    client.ping().await.expect_success();

    drop(client);

    assert!(harness.backend.wait_for("QUIT").await);
    assert!(harness.backend.wait_for("CLOSED").await);
    for _ in 0..50 {
        if harness.proxy.active_sessions() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.proxy.active_sessions(), 0);
}

#[tokio::test]
async fn test_unreachable_backend_is_reported() {
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let harness = Harness::start_with(4, Some(closed_port)).await;

    let err = Client::connect(harness.addr, "wordpress", "secret")
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, 2003);
    assert_eq!(err.sql_state, "HY000");
}

#[tokio::test]
async fn test_connection_limit() {
    let harness = Harness::start_with(1, None).await;
    let _first = harness.client().await;

    let err = Client::connect(harness.addr, "wordpress", "secret")
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, 1040);
    assert_eq!(harness.backend.connections(), 1);
}

#[tokio::test]
async fn test_silent_client_is_dropped_and_its_slot_released() {
    let harness = Harness::start_with(1, None).await;

    let stream = TcpStream::connect(harness.addr).await.unwrap();
    let mut silent = Framed::new(stream, PacketCodec);
    let greeting = silent.next().await.unwrap().unwrap();
    assert_eq!(greeting.payload[0], 10);
    assert_eq!(harness.proxy.active_sessions(), 1);

    let closed = tokio::time::timeout(Duration::from_secs(5), silent.next())
        .await
        .expect("proxy kept the silent connection open");
    assert!(!matches!(closed, Some(Ok(_))));

    harness.wait_until_idle().await;
    assert_eq!(harness.proxy.active_sessions(), 0);
    let mut client = harness.client().await;
    client.ping().await.expect_success();
    assert_eq!(harness.backend.connections(), 1);
}

#[tokio::test]
async fn test_multibyte_client_charset_is_refused() {
    let harness = Harness::start().await;

    // gbk_chinese_ci
    let err = Client::connect_with_charset(harness.addr, "wordpress", "secret", 28)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, 1115);
    assert_eq!(harness.backend.connections(), 0);

    // latin1_swedish_ci
    let mut client = Client::connect_with_charset(harness.addr, "wordpress", "secret", 8)
        .await
        .unwrap_or_else(|e| panic!("login failed: {}", e.message));
    client.ping().await.expect_success();
}

#[tokio::test]
async fn test_hidden_writes_never_reach_backend() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    client
        .query("WITH x AS (SELECT 1) UPDATE wp_users SET user_pass = 'x' WHERE ID = 1")
        .await
        .expect_err(1142);
    client
        .query("USE mysql; DELETE FROM tables_priv WHERE User = 'root'")
        .await
        .expect_err(1142);
    let err = client
        .query(r"SET sql_mode = 'NO_BACKSLASH_ESCAPES'; SELECT 'a\'; DELETE FROM wp_users; -- '")
        .await
        .expect_err(1142);
    assert_eq!(err.message, Reason::Unparseable.client_message());
    client
        .query("SET NAMES gbk; SELECT 1")
        .await
        .expect_err(1142);

    let mut payload = vec![COM_QUERY];
    payload.extend_from_slice(b"SELECT '\xBF\\'; DELETE FROM wp_users; -- '");
    let tracker = client.command(payload, ResponseKind::Query).await;
    assert_eq!(tracker.error().map(|e| e.code), Some(1064));

    client.ping().await.expect_success();
    assert!(harness.backend.queries().is_empty());
    assert!(!harness.backend.entries().iter().any(|e| e.contains("DELETE")));
    assert_eq!(
        harness.denials(),
        vec![
            Reason::ImmutableTable,
            Reason::ImmutableTable,
            Reason::Unparseable,
            Reason::UnsupportedStatement,
            Reason::Unparseable,
        ]
    );
}

#[tokio::test]
async fn test_prepare_with_parameters_inside_a_transaction() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    match client.query("BEGIN").await {
        Reply::Ok(status) => assert_ne!(status & SERVER_STATUS_IN_TRANS, 0),
        Reply::Err(err) => panic!("BEGIN failed: {}", err.message),
    }
    let id = client
        .prepare("INSERT INTO wp_comments (comment_content, comment_author) VALUES (?, ?)")
        .await
        .unwrap();
    match client.execute(id).await {
        Reply::Ok(status) => assert_ne!(status & SERVER_STATUS_IN_TRANS, 0),
        Reply::Err(err) => panic!("execute failed: {}", err.message),
    }
}
