//! Connection phase messages.

use bytes::{BufMut, BytesMut};

use super::capabilities::*;
use super::packet::{Packet, read_lenenc_int, read_null_str, write_lenenc_int};
use super::status::SERVER_STATUS_AUTOCOMMIT;
use super::{DEFAULT_CHARSET, EOF_HEADER, ERR_HEADER};
use crate::error::ProxyError;

const PROTOCOL_VERSION: u8 = 10;

/// Length of a native/caching_sha2 scramble.
pub const SCRAMBLE_LEN: usize = 20;

/// Initial handshake (protocol v10), sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    pub server_version: String,
    pub connection_id: u32,
    pub scramble: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status: u16,
    pub auth_plugin: String,
}

impl InitialHandshake {
    /// The handshake the proxy presents to its clients.
    pub fn for_client(connection_id: u32, server_version: &str, scramble: [u8; SCRAMBLE_LEN]) -> Self {
        Self {
            server_version: server_version.to_string(),
            connection_id,
            scramble: scramble.to_vec(),
            capabilities: PROXY_CAPABILITIES,
            charset: DEFAULT_CHARSET,
            status: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin: super::auth::NATIVE_PASSWORD.to_string(),
        }
    }

    pub fn encode(&self) -> Packet {
        let mut buf = BytesMut::with_capacity(128);

        buf.put_u8(PROTOCOL_VERSION);
        buf.put_slice(self.server_version.as_bytes());
        buf.put_u8(0);
        buf.put_u32_le(self.connection_id);

        // Auth-plugin-data-part-1, then filler
        buf.put_slice(&self.scramble[..8]);
        buf.put_u8(0);

        buf.put_u16_le((self.capabilities & 0xFFFF) as u16);
        buf.put_u8(self.charset);
        buf.put_u16_le(self.status);
        buf.put_u16_le((self.capabilities >> 16) as u16);

        buf.put_u8(self.scramble.len() as u8 + 1);
        buf.put_slice(&[0u8; 10]);

        // Auth-plugin-data-part-2, NUL terminated
        buf.put_slice(&self.scramble[8..]);
        buf.put_u8(0);

        buf.put_slice(self.auth_plugin.as_bytes());
        buf.put_u8(0);

        Packet::new(0, buf.freeze())
    }

    /// Parse a server greeting. An ERR greeting (too many connections, host
    /// blocked) is reported with the server's message.
    pub fn parse(payload: &[u8]) -> Result<Self, ProxyError> {
        let malformed = || ProxyError::Protocol("malformed server handshake".into());

        match payload.first() {
            Some(&PROTOCOL_VERSION) => {}
            Some(&ERR_HEADER) => {
                let err = super::response::ErrPacket::parse(payload)?;
                return Err(ProxyError::BackendUnavailable(err.message));
            }
            Some(other) => {
                return Err(ProxyError::Protocol(format!(
                    "unsupported protocol version {other}"
                )));
            }
            None => return Err(malformed()),
        }

        let mut pos = 1;
        let (version, used) = read_null_str(&payload[pos..]);
        let server_version = String::from_utf8_lossy(version).into_owned();
        pos += used;

        if payload.len() < pos + 4 + 8 + 1 + 2 {
            return Err(malformed());
        }
        let connection_id = u32::from_le_bytes([
            payload[pos],
            payload[pos + 1],
            payload[pos + 2],
            payload[pos + 3],
        ]);
        pos += 4;

        let mut scramble = payload[pos..pos + 8].to_vec();
        pos += 9;

        let mut capabilities = u16::from_le_bytes([payload[pos], payload[pos + 1]]) as u32;
        pos += 2;

        let mut charset = DEFAULT_CHARSET;
        let mut status = 0;
        let mut auth_plugin = String::new();

        if payload.len() >= pos + 1 + 2 + 2 + 1 + 10 {
            charset = payload[pos];
            status = u16::from_le_bytes([payload[pos + 1], payload[pos + 2]]);
            capabilities |= (u16::from_le_bytes([payload[pos + 3], payload[pos + 4]]) as u32) << 16;
            let data_len = payload[pos + 5] as usize;
            pos += 6 + 10;

            if capabilities & CLIENT_SECURE_CONNECTION != 0 {
                let part2_len = data_len.saturating_sub(8).max(13);
                let end = (pos + part2_len).min(payload.len());
                let part2 = &payload[pos..end];
                // Part 2 carries a trailing NUL.
                let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
                scramble.extend_from_slice(part2);
                pos = end;
            }

            if capabilities & CLIENT_PLUGIN_AUTH != 0 && pos < payload.len() {
                let (name, _) = read_null_str(&payload[pos..]);
                auth_plugin = String::from_utf8_lossy(name).into_owned();
            }
        }

        Ok(Self {
            server_version,
            connection_id,
            scramble,
            capabilities,
            charset,
            status,
            auth_plugin,
        })
    }
}

/// Handshake response 41, sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin: Option<String>,
}

impl HandshakeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, ProxyError> {
        let malformed = || ProxyError::Protocol("malformed handshake response".into());

        if payload.len() < 32 {
            return Err(malformed());
        }

        let capabilities = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        if capabilities & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProxyError::Protocol("client does not speak protocol 41".into()));
        }
        if capabilities & CLIENT_SSL != 0 {
            return Err(ProxyError::Protocol("TLS is not supported".into()));
        }

        let max_packet_size = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let charset = payload[8];
        let mut pos = 32;

        if pos >= payload.len() {
            return Err(malformed());
        }
        let (name, used) = read_null_str(&payload[pos..]);
        let username = String::from_utf8_lossy(name).into_owned();
        pos += used;

        let auth_response = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_DATA != 0 {
            let (len, used) = read_lenenc_int(payload.get(pos..).unwrap_or_default()).ok_or_else(malformed)?;
            pos += used;
            take(payload, &mut pos, len as usize).ok_or_else(malformed)?
        } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let len = *payload.get(pos).ok_or_else(malformed)? as usize;
            pos += 1;
            take(payload, &mut pos, len).ok_or_else(malformed)?
        } else {
            let (data, used) = read_null_str(payload.get(pos..).unwrap_or_default());
            pos += used;
            data.to_vec()
        };

        let mut database = None;
        if capabilities & CLIENT_CONNECT_WITH_DB != 0 && pos < payload.len() {
            let (db, used) = read_null_str(&payload[pos..]);
            pos += used;
            if !db.is_empty() {
                database = Some(String::from_utf8_lossy(db).into_owned());
            }
        }

        let mut auth_plugin = None;
        if capabilities & CLIENT_PLUGIN_AUTH != 0 && pos < payload.len() {
            let (plugin, _) = read_null_str(&payload[pos..]);
            auth_plugin = Some(String::from_utf8_lossy(plugin).into_owned());
        }

        Ok(Self {
            capabilities,
            max_packet_size,
            charset,
            username,
            auth_response,
            database,
            auth_plugin,
        })
    }

    pub fn encode(&self, seq: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(128);

        buf.put_u32_le(self.capabilities);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.charset);
        buf.put_slice(&[0u8; 23]);

        buf.put_slice(self.username.as_bytes());
        buf.put_u8(0);

        if self.capabilities & CLIENT_PLUGIN_AUTH_LENENC_DATA != 0 {
            write_lenenc_int(&mut buf, self.auth_response.len() as u64);
        } else {
            buf.put_u8(self.auth_response.len() as u8);
        }
        buf.put_slice(&self.auth_response);

        if self.capabilities & CLIENT_CONNECT_WITH_DB != 0 {
            buf.put_slice(self.database.as_deref().unwrap_or_default().as_bytes());
            buf.put_u8(0);
        }

        if let Some(plugin) = &self.auth_plugin {
            buf.put_slice(plugin.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(seq, buf.freeze())
    }
}

fn take(payload: &[u8], pos: &mut usize, len: usize) -> Option<Vec<u8>> {
    let data = payload.get(*pos..*pos + len)?.to_vec();
    *pos += len;
    Some(data)
}

/// Auth switch request (`0xFE`), asking the peer to answer with another
/// plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequest {
    pub plugin: String,
    pub data: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, ProxyError> {
        if payload.first() != Some(&EOF_HEADER) {
            return Err(ProxyError::Protocol("expected auth switch request".into()));
        }
        let (plugin, used) = read_null_str(&payload[1..]);
        let data = &payload[1 + used..];
        let data = data.strip_suffix(&[0]).unwrap_or(data);
        Ok(Self {
            plugin: String::from_utf8_lossy(plugin).into_owned(),
            data: data.to_vec(),
        })
    }

    pub fn encode(&self, seq: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(self.plugin.len() + self.data.len() + 3);
        buf.put_u8(EOF_HEADER);
        buf.put_slice(self.plugin.as_bytes());
        buf.put_u8(0);
        buf.put_slice(&self.data);
        buf.put_u8(0);
        Packet::new(seq, buf.freeze())
    }
}
