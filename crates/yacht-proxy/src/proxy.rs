//! Main proxy server implementation.
//!
//! Implements a MySQL wire protocol proxy that:
//! - Accepts connections on a configurable port
//! - Authenticates clients against the configured credentials
//! - Pairs every client with its own backend connection
//! - Classifies each statement and enforces the table policy
//! - Logs every decision for audit
//!
//! The policy ruleset and the mooring flag are the only state shared between
//! connections. Both can be changed while the proxy runs.

use futures::SinkExt;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use yacht_audit::AuditLogger;
use yacht_core::YachtConfig;
use yacht_policy::{PolicyStore, ReloadSummary};
use yacht_sql::StatementParser;

use crate::backend::BackendConnector;
use crate::error::ProxyError;
use crate::protocol::PacketCodec;
use crate::session::{Session, SessionEnv};

/// How long a stopping proxy waits for open sessions to finish.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The Yacht proxy server.
pub struct YachtProxy {
    env: Arc<SessionEnv>,
    limiter: Arc<Semaphore>,
    max_connections: usize,
    next_connection_id: AtomicU32,
}

impl YachtProxy {
    /// Build a proxy from a validated configuration. Client secrets and the
    /// backend password are resolved here, once.
    pub fn new(
        config: &YachtConfig,
        policy: Arc<PolicyStore>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, ProxyError> {
        let clients = config
            .clients
            .iter()
            .map(|c| -> Result<_, ProxyError> { Ok((c.username.clone(), c.secret()?)) })
            .collect::<Result<HashMap<_, _>, _>>()?;
        let password = config.backend.resolve_password()?;
        let max_connections = config.proxy.max_connections as usize;

        let env = SessionEnv {
            proxy: config.proxy.clone(),
            clients,
            backend: BackendConnector::new(config.backend.clone(), password),
            policy,
            audit,
            parser: StatementParser::new(),
            isolation: config.backend.isolation_level,
        };

        Ok(Self {
            env: Arc::new(env),
            limiter: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            next_connection_id: AtomicU32::new(1),
        })
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.env.policy
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.env.audit
    }

    /// Sessions currently holding a connection slot.
    pub fn active_sessions(&self) -> usize {
        self.max_connections - self.limiter.available_permits()
    }

    /// Re-read the policy file and swap the ruleset in. Sessions keep
    /// running; their next statement sees the new rules.
    pub async fn reload(&self) -> Result<ReloadSummary, ProxyError> {
        match self.env.policy.reload() {
            Ok(summary) => {
                self.env
                    .audit
                    .log_policy_reloaded(summary.version, summary.tables)
                    .await;
                Ok(summary)
            }
            Err(e) => {
                self.env
                    .audit
                    .log_policy_reload_failed(&e.to_string())
                    .await;
                Err(e.into())
            }
        }
    }

    /// Set the mooring flag. Returns the previous value.
    pub async fn set_moored(&self, moored: bool) -> bool {
        let previous = self.env.policy.set_moored(moored);
        self.env.audit.log_mooring_changed(moored, previous).await;
        previous
    }

    /// Bind the client-facing listener.
    pub async fn bind(&self) -> Result<TcpListener, ProxyError> {
        let listen_addr = self.env.proxy.bind_address();
        let listener = TcpListener::bind(&listen_addr).await.map_err(|e| {
            ProxyError::BindFailed {
                address: listen_addr.clone(),
                source: e,
            }
        })?;
        tracing::info!(address = %listen_addr, "Proxy server listening");
        Ok(listener)
    }

    /// Run the proxy server until `shutdown` completes, then give open
    /// sessions up to [`DRAIN_TIMEOUT`] to finish.
    pub async fn run(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), ProxyError> {
        tracing::info!(
            backend = %self.env.backend.address(),
            max_connections = self.max_connections,
            moored = self.env.policy.is_moored(),
            "Starting Yacht proxy server"
        );

        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        self.drain(DRAIN_TIMEOUT).await;
        Ok(())
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            let (socket, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Proxy server stopping");
                    return;
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            tracing::debug!(peer = %peer_addr, "New connection");
            self.spawn_session(socket, peer_addr);
        }
    }

    fn spawn_session(self: &Arc<Self>, socket: TcpStream, peer_addr: SocketAddr) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        let Ok(permit) = self.limiter.clone().try_acquire_owned() else {
            tracing::warn!(
                peer = %peer_addr,
                max_connections = self.max_connections,
                "Connection refused: too many connections"
            );
            tokio::spawn(refuse(socket, ProxyError::TooManyConnections));
            return;
        };

        if let Err(e) = socket.set_nodelay(true) {
            tracing::debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let env = self.env.clone();
        tokio::spawn(async move {
            Session::new(env, socket, peer_addr, connection_id).run().await;
            drop(permit);
        });
    }

    /// Wait for open sessions to end, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) {
        let active = self.active_sessions();
        if active == 0 {
            return;
        }
        tracing::info!(active, "Waiting for open sessions to finish");
        let all = u32::try_from(self.max_connections).unwrap_or(u32::MAX);
        match tokio::time::timeout(timeout, self.limiter.acquire_many(all)).await {
            Ok(_) => tracing::info!("All sessions closed"),
            Err(_) => tracing::warn!(
                active = self.active_sessions(),
                "Sessions still open after drain timeout"
            ),
        }
    }

    /// Reload the policy whenever the process receives `SIGHUP`.
    #[cfg(unix)]
    pub fn reload_on_hangup(self: &Arc<Self>) -> Result<(), ProxyError> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        let proxy = self.clone();
        tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                tracing::info!("Received SIGHUP, reloading policy");
                if let Err(e) = proxy.reload().await {
                    tracing::error!(error = %e, "Policy reload failed; keeping current ruleset");
                }
            }
        });
        Ok(())
    }
}

/// Answer a connection the proxy will not serve, before any handshake.
async fn refuse(socket: TcpStream, error: ProxyError) {
    if let Some(err) = error.to_err_packet() {
        let mut framed = Framed::new(socket, PacketCodec);
        let _ = framed.send(err.encode(0)).await;
    }
}
