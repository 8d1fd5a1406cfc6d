//! Server responses.
//!
//! Result sets are forwarded opaque. [`ResponseTracker`] reads just enough of
//! each packet to know when a response is complete and what status the server
//! finished with.

use bytes::{BufMut, BytesMut};

use super::packet::{Packet, read_lenenc_int, write_lenenc_int};
use super::status::{SERVER_MORE_RESULTS_EXISTS, SERVER_STATUS_CURSOR_EXISTS};
use super::{EOF_HEADER, ERR_HEADER, LOCAL_INFILE_HEADER, OK_HEADER};
use crate::error::ProxyError;

/// OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn encode(&self, seq: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(11);
        buf.put_u8(OK_HEADER);
        write_lenenc_int(&mut buf, self.affected_rows);
        write_lenenc_int(&mut buf, self.last_insert_id);
        buf.put_u16_le(self.status);
        buf.put_u16_le(self.warnings);
        Packet::new(seq, buf.freeze())
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.first() != Some(&OK_HEADER) {
            return None;
        }
        let mut pos = 1;
        let (affected_rows, used) = read_lenenc_int(&payload[pos..])?;
        pos += used;
        let (last_insert_id, used) = read_lenenc_int(&payload[pos..])?;
        pos += used;
        let status = read_u16(payload, pos).unwrap_or(0);
        let warnings = read_u16(payload, pos + 2).unwrap_or(0);
        Some(Self {
            affected_rows,
            last_insert_id,
            status,
            warnings,
        })
    }
}

/// ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ErrPacket {
    pub fn new(code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }

    pub fn encode(&self, seq: u8) -> Packet {
        let mut buf = BytesMut::with_capacity(9 + self.message.len());
        buf.put_u8(ERR_HEADER);
        buf.put_u16_le(self.code);
        buf.put_u8(b'#');
        buf.put_slice(self.sql_state.as_bytes());
        buf.put_slice(self.message.as_bytes());
        Packet::new(seq, buf.freeze())
    }

    pub fn parse(payload: &[u8]) -> Result<Self, ProxyError> {
        if payload.first() != Some(&ERR_HEADER) || payload.len() < 3 {
            return Err(ProxyError::Protocol("malformed ERR packet".into()));
        }
        let code = u16::from_le_bytes([payload[1], payload[2]]);
        let (sql_state, message) = match payload.get(3) {
            Some(b'#') if payload.len() >= 9 => (
                String::from_utf8_lossy(&payload[4..9]).into_owned(),
                &payload[9..],
            ),
            _ => ("HY000".to_string(), &payload[3..]),
        };
        Ok(Self {
            code,
            sql_state,
            message: String::from_utf8_lossy(message).into_owned(),
        })
    }
}

/// `COM_STMT_PREPARE` OK response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
}

impl PrepareOk {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.first() != Some(&OK_HEADER) || payload.len() < 9 {
            return None;
        }
        Some(Self {
            statement_id: u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]),
            num_columns: u16::from_le_bytes([payload[5], payload[6]]),
            num_params: u16::from_le_bytes([payload[7], payload[8]]),
        })
    }
}

pub fn is_ok_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&OK_HEADER)
}

pub fn is_err_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// EOF packets start with `0xFE` and are shorter than 9 bytes, which tells
/// them apart from a row starting with an 8-byte length prefix.
pub fn is_eof_packet(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

fn eof_status(payload: &[u8]) -> u16 {
    read_u16(payload, 3).unwrap_or(0)
}

fn read_u16(payload: &[u8], pos: usize) -> Option<u16> {
    Some(u16::from_le_bytes([*payload.get(pos)?, *payload.get(pos + 1)?]))
}

/// Shape of the response a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `COM_QUERY`: OK, ERR or text result sets, possibly several.
    Query,
    /// `COM_STMT_EXECUTE`: like `Query` with binary rows, or a cursor.
    Execute,
    /// `COM_STMT_FETCH`: rows then EOF.
    Fetch,
    /// `COM_STMT_PREPARE`: prepare OK followed by parameter and column
    /// definitions.
    Prepare,
    /// `COM_FIELD_LIST`: column definitions then EOF.
    FieldList,
    /// A single packet of any shape (ping, init-db, statistics, ...).
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Columns(u64),
    ColumnsEof,
    Rows,
    PrepareParams(u16),
    PrepareParamsEof,
    PrepareColumns(u16),
    PrepareColumnsEof,
    Done,
}

/// Follows one response packet by packet.
#[derive(Debug, Clone)]
pub struct ResponseTracker {
    kind: ResponseKind,
    phase: Phase,
    status: Option<u16>,
    error: Option<ErrPacket>,
    prepared: Option<PrepareOk>,
}

impl ResponseTracker {
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            phase: match kind {
                ResponseKind::Fetch | ResponseKind::FieldList => Phase::Rows,
                _ => Phase::Start,
            },
            status: None,
            error: None,
            prepared: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Status flags from the last OK or EOF seen.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// The ERR that ended the response, if any.
    pub fn error(&self) -> Option<&ErrPacket> {
        self.error.as_ref()
    }

    pub fn prepared(&self) -> Option<PrepareOk> {
        self.prepared
    }

    /// Whether the response ended without an error.
    pub fn succeeded(&self) -> bool {
        self.is_complete() && self.error.is_none()
    }

    /// Account for the next packet. Returns `true` once the response is
    /// complete.
    pub fn feed(&mut self, payload: &[u8]) -> Result<bool, ProxyError> {
        let header = *payload
            .first()
            .ok_or_else(|| ProxyError::Protocol("empty response packet".into()))?;

        if header == ERR_HEADER && self.phase != Phase::Done && !self.in_definitions() {
            self.error = Some(ErrPacket::parse(payload)?);
            self.phase = Phase::Done;
            return Ok(true);
        }

        self.phase = match self.phase {
            Phase::Done => {
                return Err(ProxyError::Protocol("packet after end of response".into()));
            }
            Phase::Start => self.start(header, payload)?,
            Phase::Columns(remaining) if remaining > 1 => Phase::Columns(remaining - 1),
            Phase::Columns(_) => Phase::ColumnsEof,
            Phase::ColumnsEof => {
                let status = self.expect_eof(payload)?;
                if self.kind == ResponseKind::Execute && status & SERVER_STATUS_CURSOR_EXISTS != 0 {
                    Phase::Done
                } else {
                    Phase::Rows
                }
            }
            Phase::Rows if is_eof_packet(payload) => {
                let status = eof_status(payload);
                self.status = Some(status);
                self.after_result(status)
            }
            Phase::Rows => Phase::Rows,
            Phase::PrepareParams(remaining) if remaining > 1 => Phase::PrepareParams(remaining - 1),
            Phase::PrepareParams(_) => Phase::PrepareParamsEof,
            Phase::PrepareParamsEof => {
                self.expect_eof(payload)?;
                self.prepare_columns()
            }
            Phase::PrepareColumns(remaining) if remaining > 1 => Phase::PrepareColumns(remaining - 1),
            Phase::PrepareColumns(_) => Phase::PrepareColumnsEof,
            Phase::PrepareColumnsEof => {
                self.expect_eof(payload)?;
                Phase::Done
            }
        };

        Ok(self.is_complete())
    }

    /// Column definitions never start with `0xFF`, but an ERR cannot
    /// interrupt them either, so definitions are counted blindly.
    fn in_definitions(&self) -> bool {
        matches!(
            self.phase,
            Phase::Columns(_) | Phase::PrepareParams(_) | Phase::PrepareColumns(_)
        )
    }

    fn start(&mut self, header: u8, payload: &[u8]) -> Result<Phase, ProxyError> {
        if self.kind == ResponseKind::Single {
            if let Some(ok) = OkPacket::parse(payload) {
                self.status = Some(ok.status);
            } else if is_eof_packet(payload) {
                self.status = Some(eof_status(payload));
            }
            return Ok(Phase::Done);
        }

        match header {
            OK_HEADER if self.kind == ResponseKind::Prepare => {
                let prepared = PrepareOk::parse(payload)
                    .ok_or_else(|| ProxyError::Protocol("malformed prepare response".into()))?;
                self.prepared = Some(prepared);
                Ok(match prepared.num_params {
                    0 => self.prepare_columns(),
                    n => Phase::PrepareParams(n),
                })
            }
            OK_HEADER => {
                let ok = OkPacket::parse(payload)
                    .ok_or_else(|| ProxyError::Protocol("malformed OK packet".into()))?;
                self.status = Some(ok.status);
                Ok(self.after_result(ok.status))
            }
            LOCAL_INFILE_HEADER => Err(ProxyError::Protocol(
                "LOCAL INFILE requests are not supported".into(),
            )),
            _ if matches!(self.kind, ResponseKind::Query | ResponseKind::Execute) => {
                match read_lenenc_int(payload) {
                    Some((count, _)) if count > 0 => Ok(Phase::Columns(count)),
                    _ => Err(ProxyError::Protocol("malformed column count".into())),
                }
            }
            _ => Err(ProxyError::Protocol(format!(
                "unexpected packet 0x{header:02X} in {:?} response",
                self.kind
            ))),
        }
    }

    fn after_result(&self, status: u16) -> Phase {
        if status & SERVER_MORE_RESULTS_EXISTS != 0 {
            Phase::Start
        } else {
            Phase::Done
        }
    }

    fn prepare_columns(&self) -> Phase {
        match self.prepared.map(|p| p.num_columns).unwrap_or(0) {
            0 => Phase::Done,
            n => Phase::PrepareColumns(n),
        }
    }

    fn expect_eof(&mut self, payload: &[u8]) -> Result<u16, ProxyError> {
        if !is_eof_packet(payload) {
            return Err(ProxyError::Protocol("expected EOF packet".into()));
        }
        let status = eof_status(payload);
        self.status = Some(status);
        Ok(status)
    }
}
