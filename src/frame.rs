//! EISCP wire framing.
//!
//! Every message travels inside a fixed 16-byte header:
//!
//! ```text
//! "ISCP" | header size (u32 BE) | data size (u32 BE) | version | 3 reserved
//! ```
//!
//! followed by `data size` bytes of payload: `!`, a unit type character and the
//! ASCII message, terminated by `\r` on send. Receivers terminate with some mix
//! of EOF (0x1A), CR and LF.

use crate::error::{DecodeError, EiscpError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Magic signature opening every frame
pub const MAGIC: [u8; 4] = *b"ISCP";

/// Size of the fixed header
pub const HEADER_SIZE: usize = 16;

/// Protocol version written into outgoing frames
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Unit type for receiver commands
pub const UNIT_RECEIVER: u8 = b'1';

/// Largest header size we accept from a peer
const MAX_HEADER_SIZE: u32 = 64;

/// Largest data size we accept from a peer
const MAX_DATA_SIZE: u32 = 1024 * 1024;

const START: u8 = b'!';
const EOF: u8 = 0x1a;

/// One complete unit of protocol data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Version byte from the header
    pub version: u8,
    /// Unit type character (`1` receiver, `x`/`p` discovery)
    pub unit: u8,
    /// ASCII message, e.g. `PWR01`
    pub message: String,
}

impl Frame {
    /// Create a receiver command frame
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            unit: UNIT_RECEIVER,
            message: message.into(),
        }
    }

    /// Create a frame for an explicit unit type
    pub fn with_unit(unit: u8, message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            unit,
            message: message.into(),
        }
    }

    /// Encode this frame into a fresh buffer
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.message.len() + 3);
        write_frame(self, &mut buf);
        buf
    }
}

fn write_frame(frame: &Frame, dst: &mut BytesMut) {
    // "!" + unit + message + "\r"
    let data_size = frame.message.len() + 3;

    dst.reserve(HEADER_SIZE + data_size);
    dst.put_slice(&MAGIC);
    dst.put_u32(HEADER_SIZE as u32);
    dst.put_u32(data_size as u32);
    dst.put_u8(frame.version);
    dst.put_slice(&[0, 0, 0]);
    dst.put_u8(START);
    dst.put_u8(frame.unit);
    dst.put_slice(frame.message.as_bytes());
    dst.put_u8(b'\r');
}

/// Stream codec for EISCP frames
///
/// Decoding never consumes bytes until a complete frame is buffered. A bad
/// header is reported as an error; the connection treats that as fatal and
/// reconnects rather than trying to resynchronize.
#[derive(Debug, Clone, Copy, Default)]
pub struct EiscpCodec;

impl EiscpCodec {
    pub fn new() -> Self {
        EiscpCodec
    }
}

impl Decoder for EiscpCodec {
    type Item = Frame;
    type Error = EiscpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MAGIC.len() {
            // Check what we have of the signature so garbage fails early
            if !MAGIC.starts_with(&src[..]) {
                let mut magic = [0u8; 4];
                magic[..src.len()].copy_from_slice(&src[..]);
                return Err(DecodeError::BadMagic(magic).into());
            }
            return Ok(None);
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&src[..4]);
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic).into());
        }

        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header_size = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        if header_size < HEADER_SIZE as u32 || header_size > MAX_HEADER_SIZE {
            return Err(DecodeError::InvalidHeader(header_size).into());
        }

        let data_size = u32::from_be_bytes([src[8], src[9], src[10], src[11]]);
        if data_size > MAX_DATA_SIZE {
            return Err(DecodeError::Oversized(data_size).into());
        }

        let total = header_size as usize + data_size as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let version = src[12];
        src.advance(header_size as usize);
        let data = src.split_to(data_size as usize);

        let body = trim_terminators(&data);
        if body.len() < 2 || body[0] != START {
            return Err(DecodeError::MissingStart.into());
        }

        Ok(Some(Frame {
            version,
            unit: body[1],
            message: String::from_utf8_lossy(&body[2..]).into_owned(),
        }))
    }
}

impl Encoder<Frame> for EiscpCodec {
    type Error = EiscpError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_frame(&item, dst);
        Ok(())
    }
}

fn trim_terminators(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|b| !matches!(*b, EOF | b'\r' | b'\n' | 0))
        .map_or(0, |i| i + 1);
    &data[..end]
}

/// Decode a single datagram, as received during discovery
pub fn decode_datagram(datagram: &[u8]) -> Result<Frame, EiscpError> {
    let mut buf = BytesMut::from(datagram);
    EiscpCodec
        .decode(&mut buf)?
        .ok_or_else(|| EiscpError::InvalidResponse("truncated datagram".to_string()))
}
