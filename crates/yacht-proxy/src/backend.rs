//! Backend connections.
//!
//! Each client session owns exactly one backend connection, opened with the
//! proxy's own credentials. Connections are never pooled or shared.

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use yacht_core::BackendConfig;

use crate::error::ProxyError;
use crate::protocol::auth::{self, FAST_AUTH_SUCCESS, PERFORM_FULL_AUTH};
use crate::protocol::capabilities::*;
use crate::protocol::commands::{COM_QUERY, COM_QUIT};
use crate::protocol::{
    AUTH_MORE_DATA_HEADER, AuthSwitchRequest, EOF_HEADER, ERR_HEADER, ErrPacket, HandshakeResponse,
    InitialHandshake, OK_HEADER, OkPacket, Packet, PacketCodec, ResponseKind, ResponseTracker,
};

/// What the client negotiated, carried over to the backend handshake.
#[derive(Debug, Clone)]
pub struct ClientParams {
    pub capabilities: u32,
    pub charset: u8,
    pub max_packet_size: u32,
    pub database: Option<String>,
}

/// Opens backend connections. Built once at startup with the resolved
/// backend password.
#[derive(Clone)]
pub struct BackendConnector {
    config: BackendConfig,
    password: String,
    init_statements: Vec<String>,
}

impl BackendConnector {
    pub fn new(config: BackendConfig, password: String) -> Self {
        let init_statements = config.session_init_statements();
        Self {
            config,
            password,
            init_statements,
        }
    }

    pub fn address(&self) -> String {
        self.config.address()
    }

    /// Connect, authenticate and run the session initialization commands,
    /// all within the configured connect timeout.
    pub async fn connect(&self, client: &ClientParams) -> Result<BackendConnection, ProxyError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, self.establish(client)).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::BackendUnavailable(format!(
                "timed out after {}s connecting to {}",
                timeout.as_secs(),
                self.address()
            ))),
        }
    }

    async fn establish(&self, client: &ClientParams) -> Result<BackendConnection, ProxyError> {
        let address = self.address();
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|e| ProxyError::BackendUnavailable(format!("connect to {address}: {e}")))?;
        stream.set_nodelay(true)?;

        let mut conn = BackendConnection {
            framed: Framed::new(stream, PacketCodec),
            capabilities: 0,
            connection_id: 0,
            status: 0,
        };

        let greeting_packet = conn.recv().await?;
        let greeting = InitialHandshake::parse(&greeting_packet.payload)?;

        if greeting.capabilities & REQUIRED_BACKEND != REQUIRED_BACKEND {
            return Err(ProxyError::BackendUnavailable(
                "backend does not support protocol 41 authentication".into(),
            ));
        }
        let wanted =
            client.capabilities & !(CLIENT_PLUGIN_AUTH_LENENC_DATA | CLIENT_CONNECT_WITH_DB);
        let missing = wanted & !greeting.capabilities;
        if missing != 0 {
            return Err(ProxyError::BackendUnavailable(format!(
                "backend lacks client capabilities 0x{missing:08X}"
            )));
        }

        let database = client
            .database
            .clone()
            .or_else(|| self.config.database.clone());
        let mut capabilities = (client.capabilities | REQUIRED_BACKEND) & greeting.capabilities;
        capabilities &= !(CLIENT_CONNECT_WITH_DB | CLIENT_DEPRECATE_EOF);
        if database.is_some() {
            capabilities |= CLIENT_CONNECT_WITH_DB;
        }

        let plugin = if greeting.auth_plugin.is_empty() {
            auth::NATIVE_PASSWORD.to_string()
        } else {
            greeting.auth_plugin.clone()
        };
        let response = HandshakeResponse {
            capabilities,
            max_packet_size: client.max_packet_size,
            charset: client.charset,
            username: self.config.username.clone(),
            auth_response: auth::token_for_plugin(
                &plugin,
                self.password.as_bytes(),
                &greeting.scramble,
            ),
            database,
            auth_plugin: Some(plugin),
        };
        conn.send(response.encode(greeting_packet.seq.wrapping_add(1)))
            .await?;

        conn.authenticate(self.password.as_bytes()).await?;
        conn.capabilities = capabilities;
        conn.connection_id = greeting.connection_id;

        tracing::debug!(
            backend = %address,
            backend_connection_id = greeting.connection_id,
            server_version = %greeting.server_version,
            "Backend authenticated"
        );

        conn.run_init(&self.init_statements).await?;
        Ok(conn)
    }

    /// Default database from the backend configuration.
    pub fn database(&self) -> Option<String> {
        self.config.database.clone()
    }

    pub fn init_statements(&self) -> &[String] {
        &self.init_statements
    }
}

/// One authenticated backend connection.
pub struct BackendConnection {
    framed: Framed<TcpStream, PacketCodec>,
    capabilities: u32,
    connection_id: u32,
    status: u16,
}

impl BackendConnection {
    pub async fn send(&mut self, packet: Packet) -> Result<(), ProxyError> {
        self.framed
            .send(packet)
            .await
            .map_err(|e| ProxyError::BackendUnavailable(format!("write failed: {e}")))
    }

    /// Next packet from the backend. End of stream is an error: the backend
    /// never closes a healthy session on its own.
    pub async fn recv(&mut self) -> Result<Packet, ProxyError> {
        match self.framed.next().await {
            Some(Ok(packet)) => Ok(packet),
            Some(Err(e)) => Err(ProxyError::BackendUnavailable(format!("read failed: {e}"))),
            None => Err(ProxyError::BackendUnavailable(
                "backend closed the connection".into(),
            )),
        }
    }

    pub fn capabilities(&self) -> u32 {
        self.capabilities
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Server status flags from the most recent OK or EOF.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Drive the rest of the authentication exchange after the handshake
    /// response has been sent.
    async fn authenticate(&mut self, password: &[u8]) -> Result<(), ProxyError> {
        loop {
            let packet = self.recv().await?;
            match packet.header() {
                Some(OK_HEADER) => {
                    if let Some(ok) = OkPacket::parse(&packet.payload) {
                        self.status = ok.status;
                    }
                    return Ok(());
                }
                Some(ERR_HEADER) => {
                    let err = ErrPacket::parse(&packet.payload)?;
                    return Err(ProxyError::BackendUnavailable(format!(
                        "backend rejected proxy credentials: {}",
                        err.message
                    )));
                }
                Some(EOF_HEADER) => {
                    let switch = AuthSwitchRequest::parse(&packet.payload)?;
                    tracing::debug!(plugin = %switch.plugin, "Backend requested auth switch");
                    let token = auth::token_for_plugin(&switch.plugin, password, &switch.data);
                    self.send(Packet::new(packet.seq.wrapping_add(1), token))
                        .await?;
                }
                Some(AUTH_MORE_DATA_HEADER) => match packet.payload.get(1) {
                    Some(&FAST_AUTH_SUCCESS) => continue,
                    Some(&PERFORM_FULL_AUTH) => {
                        return Err(ProxyError::BackendUnavailable(
                            "caching_sha2_password full authentication requires TLS".into(),
                        ));
                    }
                    _ => {
                        return Err(ProxyError::Protocol(
                            "unexpected auth-more-data from backend".into(),
                        ));
                    }
                },
                _ => {
                    return Err(ProxyError::Protocol(
                        "unexpected packet during backend authentication".into(),
                    ));
                }
            }
        }
    }

    /// Run statements one by one, discarding their results.
    pub async fn run_init(&mut self, statements: &[String]) -> Result<(), ProxyError> {
        for sql in statements {
            let mut payload = BytesMut::with_capacity(sql.len() + 1);
            payload.put_u8(COM_QUERY);
            payload.put_slice(sql.as_bytes());
            self.send(Packet::new(0, payload.freeze())).await?;

            let mut tracker = ResponseTracker::new(ResponseKind::Query);
            loop {
                let packet = self.recv().await?;
                if tracker.feed(&packet.payload)? {
                    break;
                }
            }
            if let Some(err) = tracker.error() {
                return Err(ProxyError::BackendUnavailable(format!(
                    "session init command failed: {}",
                    err.message
                )));
            }
            if let Some(status) = tracker.status() {
                self.status = status;
            }
        }
        Ok(())
    }

    /// Send `COM_QUIT` and close, bounded by `grace`.
    pub async fn close(mut self, grace: Duration) {
        let result = tokio::time::timeout(grace, async {
            let _ = self.framed.send(Packet::new(0, vec![COM_QUIT])).await;
            let _ = self.framed.get_mut().shutdown().await;
        })
        .await;
        if result.is_err() {
            tracing::debug!(
                backend_connection_id = self.connection_id,
                "Backend close exceeded grace period"
            );
        }
    }
}
