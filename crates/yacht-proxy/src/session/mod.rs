//! Client sessions.
//!
//! A [`Session`] owns one client socket and, once the client has logged in,
//! exactly one backend connection. Every command the client sends goes
//! through the statement parser and the policy engine before any byte of it
//! reaches the backend; allowed commands are forwarded as received and the
//! backend's response is relayed back packet by packet.

mod state;

pub use state::{Identity, PreparedTemplate, SessionPhase, SessionState};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use yacht_audit::{AuditContext, AuditLogger};
use yacht_core::{ClientSecret, IsolationLevel, ProxyConfig};
use yacht_policy::{DecisionContext, PolicyStore, Reason, Verdict, decide_batch};
use yacht_sql::{Batch, StatementParser};

use crate::backend::{BackendConnection, BackendConnector, ClientParams};
use crate::error::ProxyError;
use crate::protocol::auth::{self, NATIVE_PASSWORD};
use crate::protocol::capabilities::PROXY_CAPABILITIES;
use crate::protocol::charset;
use crate::protocol::{
    AuthSwitchRequest, ClientCommand, HandshakeResponse, InitialHandshake, OkPacket, Packet,
    PacketCodec, ResponseKind, ResponseTracker,
};

/// Everything a session needs from the proxy. Shared by all sessions.
pub struct SessionEnv {
    pub proxy: ProxyConfig,
    pub clients: HashMap<String, ClientSecret>,
    pub backend: BackendConnector,
    pub policy: Arc<PolicyStore>,
    pub audit: Arc<AuditLogger>,
    pub parser: StatementParser,
    /// Isolation level every backend session starts with.
    pub isolation: IsolationLevel,
}

impl SessionEnv {
    fn grace(&self) -> Duration {
        Duration::from_secs(self.proxy.close_grace_secs)
    }

    fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.handshake_timeout_secs)
    }
}

/// One client command, reassembled from one or more packets.
struct Command {
    packets: Vec<Packet>,
    command: ClientCommand,
}

impl Command {
    /// Sequence id for a locally generated reply.
    fn reply_seq(&self) -> u8 {
        self.packets
            .last()
            .map(|p| p.seq.wrapping_add(1))
            .unwrap_or(1)
    }
}

enum Flow {
    Continue,
    Quit,
}

/// A client connection and its paired backend connection.
pub struct Session {
    env: Arc<SessionEnv>,
    client: Framed<TcpStream, PacketCodec>,
    state: SessionState,
    audit: AuditContext,
    /// Client packets that arrived while a response was still in flight.
    pending: VecDeque<Packet>,
}

impl Session {
    pub fn new(env: Arc<SessionEnv>, stream: TcpStream, peer: SocketAddr, connection_id: u32) -> Self {
        let identity = Identity {
            username: String::new(),
            peer: peer.to_string(),
            connection_id,
        };
        let isolation = env.isolation;
        Self {
            env,
            client: Framed::new(stream, PacketCodec),
            state: SessionState::new(identity, isolation, None),
            audit: AuditContext {
                identity: String::new(),
                connection_id: u64::from(connection_id),
                client_ip: peer.ip().to_string(),
            },
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the session to completion. Errors are reported to the client
    /// where possible and never escape past this connection.
    pub async fn run(mut self) {
        let connection_id = self.state.identity.connection_id;
        let mut backend = match self.open().await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::info!(connection_id, error = %e, "Session rejected");
                self.state.transition(SessionPhase::Closing);
                self.shutdown_client().await;
                self.state.transition(SessionPhase::Closed);
                return;
            }
        };

        let reason = match self.serve(&mut backend).await {
            Ok(()) => "client quit".to_string(),
            Err(ProxyError::ClientDisconnected) => "client disconnected".to_string(),
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "Session terminated");
                if let ProxyError::BackendUnavailable(message) = &e {
                    self.env
                        .audit
                        .log_backend_unavailable(&self.audit, message)
                        .await;
                }
                if let Some(err) = e.to_err_packet() {
                    let _ = self.client.send(err.encode(1)).await;
                }
                e.to_string()
            }
        };

        self.state.transition(SessionPhase::Closing);
        let grace = self.env.grace();
        tokio::join!(backend.close(grace), self.shutdown_client());
        self.state.transition(SessionPhase::Closed);

        tracing::info!(
            connection_id,
            user = %self.state.identity.username,
            reason = %reason,
            "Session closed"
        );
        self.env.audit.log_session_closed(&self.audit, &reason).await;
    }

    /// Handshake and authenticate the client, then open its backend
    /// connection. Failures are answered on the client socket before
    /// returning.
    ///
    /// The client has `handshake_timeout_secs` to finish logging in.
    async fn open(&mut self) -> Result<BackendConnection, ProxyError> {
        let connection_id = self.state.identity.connection_id;
        let deadline = Instant::now() + self.env.handshake_timeout();
        let scramble = auth::generate_scramble();
        let greeting =
            InitialHandshake::for_client(connection_id, &self.env.proxy.server_version, scramble);
        self.client.send(greeting.encode()).await?;

        let packet = self.read_login(deadline).await?;
        let mut seq = packet.seq;
        let response = match HandshakeResponse::parse(&packet.payload) {
            Ok(response) => response,
            Err(e) => return Err(self.reject(e, seq.wrapping_add(1)).await),
        };
        self.state.identity.username = response.username.clone();
        self.audit.identity = response.username.clone();

        if !charset::is_ascii_safe(response.charset) {
            tracing::info!(
                connection_id,
                user = %response.username,
                collation = response.charset,
                "Login refused: unsupported client character set"
            );
            let error = ProxyError::UnsupportedCharset(response.charset);
            return Err(self.reject(error, seq.wrapping_add(1)).await);
        }

        let mut token = response.auth_response.clone();
        if response.auth_plugin.as_deref().is_some_and(|p| p != NATIVE_PASSWORD) {
            let switch = AuthSwitchRequest {
                plugin: NATIVE_PASSWORD.to_string(),
                data: scramble.to_vec(),
            };
            seq = seq.wrapping_add(1);
            self.client.send(switch.encode(seq)).await?;
            let reply = self.read_login(deadline).await?;
            seq = reply.seq;
            token = reply.payload.to_vec();
        }

        let verified = self
            .env
            .clients
            .get(&response.username)
            .is_some_and(|secret| auth::verify_native(secret, &scramble, &token));
        if !verified {
            self.env
                .audit
                .log_authentication_failed(
                    &response.username,
                    self.audit.connection_id,
                    &self.audit.client_ip,
                )
                .await;
            let error = ProxyError::AuthFailure {
                user: response.username.clone(),
                host: self.audit.client_ip.clone(),
                password_used: !token.is_empty(),
            };
            return Err(self.reject(error, seq.wrapping_add(1)).await);
        }
        self.state.transition(SessionPhase::Authenticated);

        let params = ClientParams {
            capabilities: response.capabilities & PROXY_CAPABILITIES,
            charset: response.charset,
            max_packet_size: response.max_packet_size,
            database: response.database.clone(),
        };
        let backend = match self.env.backend.connect(&params).await {
            Ok(backend) => backend,
            Err(e) => {
                self.env
                    .audit
                    .log_backend_unavailable(&self.audit, &e.to_string())
                    .await;
                return Err(self.reject(e, seq.wrapping_add(1)).await);
            }
        };

        self.state.database = response.database.or_else(|| self.env.backend.database());
        self.state.sync_status(backend.status());
        let ok = OkPacket::with_status(backend.status());
        self.client.send(ok.encode(seq.wrapping_add(1))).await?;
        self.state.transition(SessionPhase::Idle);

        tracing::info!(
            connection_id,
            user = %self.state.identity.username,
            peer = %self.state.identity.peer,
            database = ?self.state.database,
            "Session opened"
        );
        self.env.audit.log_session_opened(&self.audit).await;
        Ok(backend)
    }

    /// Answer a failed login and hand the error back.
    async fn reject(&mut self, error: ProxyError, seq: u8) -> ProxyError {
        if let Some(err) = error.to_err_packet() {
            let _ = self.client.send(err.encode(seq)).await;
        }
        error
    }

    /// The command loop.
    async fn serve(&mut self, backend: &mut BackendConnection) -> Result<(), ProxyError> {
        loop {
            let command = if self.pending.is_empty() {
                tokio::select! {
                    command = self.next_command() => command?,
                    packet = backend.recv() => {
                        let reason = match packet {
                            Ok(_) => "backend sent an unsolicited packet".to_string(),
                            Err(e) => e.to_string(),
                        };
                        return Err(ProxyError::BackendUnavailable(reason));
                    }
                }
            } else {
                self.next_command().await?
            };

            let reply_seq = command.reply_seq();
            match self.handle(backend, command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => return Ok(()),
                Err(e) if !e.is_fatal() => {
                    if let Some(err) = e.to_err_packet() {
                        self.client.send(err.encode(reply_seq)).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle(
        &mut self,
        backend: &mut BackendConnection,
        command: Command,
    ) -> Result<Flow, ProxyError> {
        tracing::trace!(
            connection_id = self.state.identity.connection_id,
            command = command.command.name(),
            "Client command"
        );

        match &command.command {
            ClientCommand::Quit => return Ok(Flow::Quit),
            ClientCommand::Query(sql) => {
                let batch = self.decide_text(sql).await?;
                let tracker = self.forward(backend, &command).await?;
                if tracker.succeeded() {
                    for statement in &batch.statements {
                        self.state.observe(statement);
                    }
                }
                self.settle(backend, &tracker);
            }
            ClientCommand::InitDb(database) => {
                let tracker = self.forward(backend, &command).await?;
                if tracker.succeeded() {
                    self.state.database = Some(database.clone());
                }
                self.settle(backend, &tracker);
            }
            ClientCommand::Ping
            | ClientCommand::Statistics
            | ClientCommand::FieldList
            | ClientCommand::SetOption => {
                let tracker = self.forward(backend, &command).await?;
                self.settle(backend, &tracker);
            }
            ClientCommand::ResetConnection => {
                let tracker = self.forward(backend, &command).await?;
                if tracker.succeeded() {
                    self.state.reset(self.env.isolation);
                    backend.run_init(self.env.backend.init_statements()).await?;
                }
                self.settle(backend, &tracker);
            }
            ClientCommand::StmtPrepare(sql) => {
                self.decide_template(sql).await?;
                let tracker = self.forward(backend, &command).await?;
                if let Some(prepared) = tracker.prepared() {
                    self.state.add_prepared(
                        prepared.statement_id,
                        PreparedTemplate {
                            sql: sql.clone(),
                            num_params: prepared.num_params,
                        },
                    );
                }
                self.settle(backend, &tracker);
            }
            ClientCommand::StmtExecute { statement_id } => {
                let template = self.known_template(*statement_id, "mysqld_stmt_execute")?;
                self.decide_template(&template.sql).await?;
                let tracker = self.forward(backend, &command).await?;
                self.settle(backend, &tracker);
            }
            ClientCommand::StmtFetch { statement_id } => {
                self.known_template(*statement_id, "mysqld_stmt_fetch")?;
                let tracker = self.forward(backend, &command).await?;
                self.settle(backend, &tracker);
            }
            ClientCommand::StmtReset { statement_id } => {
                self.known_template(*statement_id, "mysqld_stmt_reset")?;
                let tracker = self.forward(backend, &command).await?;
                self.settle(backend, &tracker);
            }
            ClientCommand::StmtSendLongData { statement_id } => {
                // No response either way; unknown ids surface at execute time.
                if self.state.prepared(*statement_id).is_some() {
                    self.send_to_backend(backend, &command).await?;
                }
            }
            ClientCommand::StmtClose { statement_id } => {
                if self.state.remove_prepared(*statement_id).is_some() {
                    self.send_to_backend(backend, &command).await?;
                }
            }
            ClientCommand::InvalidText { text, .. } => {
                let error = "statement text is not valid UTF-8".to_string();
                return Err(self.unparseable(text, error).await);
            }
            ClientCommand::Unsupported(code) => {
                tracing::info!(
                    connection_id = self.state.identity.connection_id,
                    code = *code,
                    "Refusing unsupported command"
                );
                return Err(ProxyError::UnsupportedCommand(*code));
            }
        }
        Ok(Flow::Continue)
    }

    fn known_template(
        &self,
        statement_id: u32,
        command: &'static str,
    ) -> Result<PreparedTemplate, ProxyError> {
        self.state
            .prepared(statement_id)
            .cloned()
            .ok_or(ProxyError::UnknownStatement {
                statement_id,
                command,
            })
    }

    /// Parse and decide a `COM_QUERY` text against one policy snapshot.
    async fn decide_text(&self, sql: &str) -> Result<Batch, ProxyError> {
        let batch = match self.env.parser.parse_batch(sql, self.state.lex_options()) {
            Ok(batch) => batch,
            Err(e) => return Err(self.unparseable(sql, e.to_string()).await),
        };

        self.decide_parsed(&batch, sql).await?;
        Ok(batch)
    }

    /// Decide every statement against one policy snapshot and record the
    /// outcome.
    async fn decide_parsed(&self, batch: &Batch, sql: &str) -> Result<(), ProxyError> {
        let snapshot = self.env.policy.snapshot();
        let context = DecisionContext {
            database: self.state.database.as_deref(),
        };
        let decision = decide_batch(batch, context, &snapshot);
        self.env
            .audit
            .log_decision(&self.audit, batch, sql, &decision)
            .await;
        self.log_verdict(batch, decision.verdict(), decision.reason());

        if decision.is_allowed() {
            Ok(())
        } else {
            Err(ProxyError::PolicyDenied(decision.reason()))
        }
    }

    /// Parse and decide a prepared statement template. Runs at prepare time
    /// and again on every execution.
    async fn decide_template(&self, sql: &str) -> Result<(), ProxyError> {
        let statement = match self.env.parser.parse_statement(sql, self.state.lex_options()) {
            Ok(statement) => statement,
            Err(e) => return Err(self.unparseable(sql, e.to_string()).await),
        };

        let batch = Batch {
            statements: vec![statement],
        };
        self.decide_parsed(&batch, sql).await
    }

    async fn unparseable(&self, sql: &str, error: String) -> ProxyError {
        tracing::info!(
            connection_id = self.state.identity.connection_id,
            user = %self.state.identity.username,
            error = %error,
            "Statement rejected: could not be parsed"
        );
        self.env.audit.log_unparseable(&self.audit, sql, &error).await;
        ProxyError::Parse(error)
    }

    fn log_verdict(&self, batch: &Batch, verdict: Verdict, reason: Reason) {
        let connection_id = self.state.identity.connection_id;
        let fingerprint = batch.fingerprint();
        match verdict {
            Verdict::Allow => tracing::debug!(
                connection_id,
                user = %self.state.identity.username,
                verdict = "allow",
                reason = %reason,
                fingerprint = %fingerprint,
                "Statement allowed"
            ),
            Verdict::Deny => tracing::info!(
                connection_id,
                user = %self.state.identity.username,
                verdict = "deny",
                reason = %reason,
                fingerprint = %fingerprint,
                "Statement denied"
            ),
        }
    }

    /// Apply the status flags of a completed response.
    fn settle(&mut self, backend: &mut BackendConnection, tracker: &ResponseTracker) {
        if let Some(status) = tracker.status() {
            backend.set_status(status);
            self.state.sync_status(status);
        }
    }

    async fn send_to_backend(
        &mut self,
        backend: &mut BackendConnection,
        command: &Command,
    ) -> Result<(), ProxyError> {
        for packet in &command.packets {
            backend.send(packet.clone()).await?;
        }
        Ok(())
    }

    /// Forward the command as received and relay the response until it is
    /// complete. The client socket is watched meanwhile: anything it sends is
    /// queued, and a close ends the session at once.
    async fn forward(
        &mut self,
        backend: &mut BackendConnection,
        command: &Command,
    ) -> Result<ResponseTracker, ProxyError> {
        let kind = command
            .command
            .response_kind()
            .unwrap_or(ResponseKind::Single);
        self.send_to_backend(backend, command).await?;

        let mut tracker = ResponseTracker::new(kind);
        let mut continuation = false;
        loop {
            tokio::select! {
                biased;
                packet = backend.recv() => {
                    let packet = packet?;
                    let fragment = continuation;
                    continuation = packet.continues();
                    let done = !fragment && tracker.feed(&packet.payload)?;
                    self.client.send(packet).await?;
                    if done && !continuation {
                        return Ok(tracker);
                    }
                }
                packet = self.client.next() => match packet {
                    Some(Ok(packet)) => self.pending.push_back(packet),
                    Some(Err(e)) => return Err(ProxyError::Io(e)),
                    None => return Err(ProxyError::ClientDisconnected),
                },
            }
        }
    }

    /// Read a login packet, giving up at `deadline`.
    async fn read_login(&mut self, deadline: Instant) -> Result<Packet, ProxyError> {
        tokio::time::timeout_at(deadline, self.read_client())
            .await
            .map_err(|_| ProxyError::HandshakeTimeout)?
    }

    async fn read_client(&mut self) -> Result<Packet, ProxyError> {
        if let Some(packet) = self.pending.pop_front() {
            return Ok(packet);
        }
        match self.client.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => Err(ProxyError::Io(e)),
            None => Err(ProxyError::ClientDisconnected),
        }
    }

    /// Read one command, joining continuation packets.
    async fn next_command(&mut self) -> Result<Command, ProxyError> {
        let first = self.read_client().await?;
        let mut packets = vec![first];
        let mut payload: Option<BytesMut> = None;

        while packets.last().is_some_and(Packet::continues) {
            let next = self.read_client().await?;
            let joined = payload.get_or_insert_with(|| BytesMut::from(&packets[0].payload[..]));
            if joined.len() + next.payload.len() > self.env.proxy.max_packet_size {
                return Err(ProxyError::Protocol("command exceeds max_packet_size".into()));
            }
            joined.extend_from_slice(&next.payload);
            packets.push(next);
        }

        let payload: Bytes = match payload {
            Some(joined) => joined.freeze(),
            None => packets[0].payload.clone(),
        };
        Ok(Command {
            command: ClientCommand::parse(&payload),
            packets,
        })
    }

    async fn shutdown_client(&mut self) {
        let grace = self.env.grace();
        let _ = tokio::time::timeout(grace, self.client.get_mut().shutdown()).await;
    }
}
