//! Physical packet framing.
//!
//! Every MySQL packet is a 3-byte little-endian payload length, a 1-byte
//! sequence id and the payload. Payloads of exactly [`MAX_PAYLOAD`] bytes are
//! continued in the next packet.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Largest payload a single physical packet carries.
pub const MAX_PAYLOAD: usize = 0x00FF_FFFF;

const HEADER_LEN: usize = 4;

/// One physical packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(seq: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// First payload byte, if any.
    pub fn header(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Whether another physical packet continues this payload.
    pub fn continues(&self) -> bool {
        self.payload.len() == MAX_PAYLOAD
    }
}

/// Frames packets over a byte stream. Payload bytes are never interpreted,
/// so forwarding a decoded packet re-encodes it byte for byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_le_bytes([src[0], src[1], src[2], 0]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        let seq = src[3];
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Packet { seq, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), io::Error> {
        let len = packet.payload.len();
        if len > MAX_PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("payload of {len} bytes does not fit one packet"),
            ));
        }
        dst.reserve(HEADER_LEN + len);
        dst.put_uint_le(len as u64, 3);
        dst.put_u8(packet.seq);
        dst.put_slice(&packet.payload);
        Ok(())
    }
}

// ============================================================================
// Length-encoded values
// ============================================================================

/// Read a length-encoded integer, returning the value and bytes consumed.
pub fn read_lenenc_int(data: &[u8]) -> Option<(u64, usize)> {
    match *data.first()? {
        value @ 0..=0xFA => Some((value as u64, 1)),
        0xFC if data.len() >= 3 => Some((u16::from_le_bytes([data[1], data[2]]) as u64, 3)),
        0xFD if data.len() >= 4 => Some((u32::from_le_bytes([data[1], data[2], data[3], 0]) as u64, 4)),
        0xFE if data.len() >= 9 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[1..9]);
            Some((u64::from_le_bytes(bytes), 9))
        }
        _ => None,
    }
}

pub fn write_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 65_536 {
        buf.put_u8(0xFC);
        buf.put_u16_le(value as u16);
    } else if value < 16_777_216 {
        buf.put_u8(0xFD);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xFE);
        buf.put_u64_le(value);
    }
}

/// Read a NUL-terminated string, returning it and the bytes consumed
/// (terminator included). A missing terminator takes the rest of the input.
pub fn read_null_str(data: &[u8]) -> (&[u8], usize) {
    match data.iter().position(|&b| b == 0) {
        Some(end) => (&data[..end], end + 1),
        None => (data, data.len()),
    }
}
