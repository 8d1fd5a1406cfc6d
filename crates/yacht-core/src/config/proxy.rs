//! Client-facing listener configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the MySQL wire protocol listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port to listen on for incoming MySQL connections.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Maximum number of concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Upper bound, in seconds, for releasing the backend after a client leaves.
    #[serde(default = "default_close_grace_secs")]
    pub close_grace_secs: u64,

    /// Seconds a new connection gets to complete its login before it is
    /// dropped and its slot released.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Version string announced in the initial handshake.
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Largest logical packet accepted from either side, in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            max_connections: default_max_connections(),
            close_grace_secs: default_close_grace_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            server_version: default_server_version(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl ProxyConfig {
    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    3307
}

fn default_max_connections() -> u32 {
    200
}

fn default_close_grace_secs() -> u64 {
    3
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_server_version() -> String {
    "8.0.36-yacht".to_string()
}

fn default_max_packet_size() -> usize {
    64 * 1024 * 1024
}
