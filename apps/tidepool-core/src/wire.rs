//! Tagged binary frames carried over a terminal stream.
//!
//! Every stream message is exactly one frame. The first byte packs the
//! protocol version into the top three bits and the frame kind into the low
//! five; the body layout depends on the kind. Data bodies are not length
//! prefixed because the transport already delimits messages.

use crate::geometry::ViewportGeometry;

pub const PROTOCOL_VERSION: u8 = 1;

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const TYPE_MASK: u8 = 0b0001_1111;

const KIND_DATA: u8 = 0;
const KIND_RESIZE: u8 = 1;
const KIND_CLOSE: u8 = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
}

/// Why a stream is being closed. Sent in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientRequested,
    ProcessExited,
    SessionNotFound,
    Shutdown,
}

impl CloseReason {
    fn as_u8(self) -> u8 {
        match self {
            CloseReason::ClientRequested => 0,
            CloseReason::ProcessExited => 1,
            CloseReason::SessionNotFound => 2,
            CloseReason::Shutdown => 3,
        }
    }

    fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(CloseReason::ClientRequested),
            1 => Ok(CloseReason::ProcessExited),
            2 => Ok(CloseReason::SessionNotFound),
            3 => Ok(CloseReason::Shutdown),
            _ => Err(WireError::InvalidData("invalid close reason")),
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CloseReason::ClientRequested => "client requested",
            CloseReason::ProcessExited => "process exited",
            CloseReason::SessionNotFound => "session not found",
            CloseReason::Shutdown => "server shutdown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw terminal bytes: keystrokes towards the backend, output towards the client.
    Data(Vec<u8>),
    /// Viewport geometry announcement, client to backend.
    Resize(ViewportGeometry),
    /// Orderly end of the stream.
    Close(CloseReason),
}

impl Frame {
    pub fn is_control(&self) -> bool {
        !matches!(self, Frame::Data(_))
    }
}

pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    match frame {
        Frame::Data(data) => {
            let mut buf = Vec::with_capacity(1 + data.len());
            write_header(&mut buf, KIND_DATA);
            buf.extend_from_slice(data);
            buf
        }
        Frame::Resize(geometry) => {
            let mut buf = Vec::with_capacity(8);
            write_header(&mut buf, KIND_RESIZE);
            write_var_u32(&mut buf, geometry.cols() as u32);
            write_var_u32(&mut buf, geometry.rows() as u32);
            buf
        }
        Frame::Close(reason) => {
            let mut buf = Vec::with_capacity(2);
            write_header(&mut buf, KIND_CLOSE);
            buf.push(reason.as_u8());
            buf
        }
    }
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let kind = read_header(&mut cursor)?;
    match kind {
        KIND_DATA => Ok(Frame::Data(cursor.rest().to_vec())),
        KIND_RESIZE => {
            let cols = cursor.read_var_u32()?;
            let rows = cursor.read_var_u32()?;
            Ok(Frame::Resize(ViewportGeometry::clamped(
                cols as i64,
                rows as i64,
            )))
        }
        KIND_CLOSE => {
            let reason = CloseReason::from_u8(cursor.read_u8()?)?;
            Ok(Frame::Close(reason))
        }
        other => Err(WireError::UnknownFrameType(other)),
    }
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & TYPE_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<u8, WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::InvalidVersion(version));
    }
    Ok(byte & TYPE_MASK)
}

fn write_var_u32(buf: &mut Vec<u8>, value: u32) {
    let mut value = value as u64;
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let value = *self.bytes.get(self.pos).ok_or(WireError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        let value = self.read_var_u64()?;
        if value > u32::MAX as u64 {
            return Err(WireError::InvalidData("u32 overflow"));
        }
        Ok(value as u32)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos.min(self.bytes.len())..];
        self.pos = self.bytes.len();
        slice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn data_frames_carry_json_looking_bytes_verbatim() {
        // The old transport guessed that text starting with '{' was a resize
        // request; a tagged data frame must never be reinterpreted.
        let payload = br#"{"type":"resize","cols":1,"rows":1}"#.to_vec();
        let encoded = encode_frame(&Frame::Data(payload.clone()));
        assert_eq!(decode_frame(&encoded), Ok(Frame::Data(payload)));
    }

    #[test_timeout::timeout]
    fn resize_uses_multi_byte_varints() {
        let frame = Frame::Resize(ViewportGeometry::new(300, 30));
        let encoded = encode_frame(&frame);
        assert_eq!(encoded, vec![0b0010_0001, 0xAC, 0x02, 30]);
        assert_eq!(decode_frame(&encoded), Ok(frame));
    }

    #[test_timeout::timeout]
    fn decoded_zero_geometry_is_clamped() {
        let bytes = [0b0010_0001, 0, 0];
        assert_eq!(
            decode_frame(&bytes),
            Ok(Frame::Resize(ViewportGeometry::new(1, 1)))
        );
    }

    #[test_timeout::timeout]
    fn close_reasons_survive_the_wire() {
        for reason in [
            CloseReason::ClientRequested,
            CloseReason::ProcessExited,
            CloseReason::SessionNotFound,
            CloseReason::Shutdown,
        ] {
            let encoded = encode_frame(&Frame::Close(reason));
            assert_eq!(decode_frame(&encoded), Ok(Frame::Close(reason)));
        }
    }

    #[test_timeout::timeout]
    fn rejects_malformed_input() {
        assert_eq!(decode_frame(&[]), Err(WireError::UnexpectedEof));
        assert_eq!(
            decode_frame(&[0b0100_0000]),
            Err(WireError::InvalidVersion(2))
        );
        assert_eq!(
            decode_frame(&[0b0010_0111]),
            Err(WireError::UnknownFrameType(7))
        );
        assert_eq!(
            decode_frame(&[0b0010_0001, 0x80]),
            Err(WireError::UnexpectedEof)
        );
        assert_eq!(
            decode_frame(&[0b0010_0010, 9]),
            Err(WireError::InvalidData("invalid close reason"))
        );
        let overflow = [0b0010_0001, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 1];
        assert_eq!(
            decode_frame(&overflow),
            Err(WireError::InvalidData("u32 overflow"))
        );
    }

    #[test_timeout::timeout]
    fn only_data_is_not_control() {
        assert!(!Frame::Data(vec![]).is_control());
        assert!(Frame::Resize(ViewportGeometry::default()).is_control());
        assert!(Frame::Close(CloseReason::Shutdown).is_control());
    }
}
