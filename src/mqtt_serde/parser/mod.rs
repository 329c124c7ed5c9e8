use super::control_packet::MqttPacket;
use crate::mqtt_serde::base_data::{BinaryData, TwoByteInteger, Utf8String, VariableByteInteger};

pub type ParserResult = Result<ParseOk, ParseError>;

// First byte of Fixed header
pub const FIXED_HDR_LEN: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Not enough data yet; carries a hint of how many more bytes are needed.
    #[error("More data needed ({0} bytes): {1}")]
    More(usize, String),
    #[error("Parse Error: {0}")]
    ParseError(String),
    #[error("UTF-8 Error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("String Too Long")]
    StringTooLong,
    #[error("Buffer Too Short")]
    BufferTooShort,
    #[error("Invalid Length")]
    InvalidLength,
    #[error("Invalid Packet Type")]
    InvalidPacketType,
    #[error("Invalid Variable Byte Integer")]
    InvalidVariableByteInteger,
}

impl ParseError {
    /// True when the input is merely truncated, not malformed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::More(_, _))
    }
}

#[derive(Debug, PartialEq)]
pub enum ParseOk {
    Continue(usize, usize),    // (hint, consumed)
    Packet(MqttPacket, usize), // (packet, consumed)
}

/// A complete frame split off the head of a buffer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub packet_type: u8,
    pub flags: u8,
    pub body: &'a [u8],
    pub total_len: usize,
}

/// Splits one frame off `buffer`.
///
/// `Ok(Err(hint))` means the frame is not complete yet and `hint` more bytes
/// are needed at least.
pub fn split_frame(buffer: &[u8]) -> Result<Result<Frame<'_>, usize>, ParseError> {
    let first = match buffer.first() {
        Some(b) => *b,
        None => return Ok(Err(2)),
    };
    let (size, vbi_len) = match parse_remaining_length(&buffer[FIXED_HDR_LEN..]) {
        Ok(v) => v,
        Err(ParseError::More(hint, _)) => return Ok(Err(hint)),
        Err(e) => return Err(e),
    };
    let offset = FIXED_HDR_LEN + vbi_len;
    let total_len = offset + size;
    if total_len > buffer.len() {
        return Ok(Err(total_len - buffer.len()));
    }
    Ok(Ok(Frame {
        packet_type: first >> 4,
        flags: first & 0x0F,
        body: &buffer[offset..total_len],
        total_len,
    }))
}

pub fn packet_type(buffer: &[u8]) -> Result<u8, ParseError> {
    buffer
        .first()
        .map(|b| b >> 4)
        .ok_or(ParseError::BufferTooShort)
}

pub fn parse_remaining_length(buffer: &[u8]) -> Result<(usize, usize), ParseError> {
    VariableByteInteger::decode(buffer)
}

// 1.5.3 UTF-8 encoded strings
pub fn parse_utf8_string(buffer: &[u8]) -> Result<(String, usize), ParseError> {
    Utf8String::decode(buffer)
}

pub fn parse_packet_id(buffer: &[u8]) -> Result<(u16, usize), ParseError> {
    let (id, used) = TwoByteInteger::decode(buffer)?;
    if id == 0 {
        return Err(ParseError::ParseError(
            "packet identifier must be non-zero".to_string(),
        ));
    }
    Ok((id, used))
}

pub fn parse_binary_data(buffer: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    BinaryData::decode(buffer)
}

/// Checks the reserved fixed-header flag bits of packets that have them fixed.
pub(crate) fn expect_flags(frame: &Frame<'_>, expected: u8, name: &str) -> Result<(), ParseError> {
    if frame.flags != expected {
        return Err(ParseError::ParseError(format!(
            "{} packet has invalid fixed header flags {:#04x}",
            name, frame.flags
        )));
    }
    Ok(())
}

/// Sequential reader over the body of a frame.
pub(crate) struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub(crate) fn u8(&mut self) -> Result<u8, ParseError> {
        let b = *self.remaining().first().ok_or(ParseError::BufferTooShort)?;
        self.pos += 1;
        Ok(b)
    }

    pub(crate) fn u16(&mut self) -> Result<u16, ParseError> {
        let (v, used) = TwoByteInteger::decode(self.remaining())?;
        self.pos += used;
        Ok(v)
    }

    pub(crate) fn packet_id(&mut self) -> Result<u16, ParseError> {
        let (v, used) = parse_packet_id(self.remaining())?;
        self.pos += used;
        Ok(v)
    }

    pub(crate) fn utf8(&mut self) -> Result<String, ParseError> {
        let (v, used) = parse_utf8_string(self.remaining())?;
        self.pos += used;
        Ok(v)
    }

    pub(crate) fn binary(&mut self) -> Result<Vec<u8>, ParseError> {
        let (v, used) = parse_binary_data(self.remaining())?;
        self.pos += used;
        Ok(v)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.remaining();
        self.pos = self.buf.len();
        rest
    }

    /// Fails if any byte of the body was left unread.
    pub(crate) fn finish(&self, name: &str) -> Result<(), ParseError> {
        if !self.is_empty() {
            return Err(ParseError::ParseError(format!(
                "{} packet has {} trailing bytes",
                name,
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

pub mod stream;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frame_waits_for_body() {
        // PUBACK header promising two bytes, only one present
        match split_frame(&[0x40, 0x02, 0x00]).unwrap() {
            Err(hint) => assert_eq!(hint, 1),
            Ok(frame) => panic!("Expected incomplete frame, got {:?}", frame),
        }
        match split_frame(&[0x40]).unwrap() {
            Err(hint) => assert_eq!(hint, 1),
            Ok(frame) => panic!("Expected incomplete frame, got {:?}", frame),
        }
    }

    #[test]
    fn test_split_frame_complete() {
        let frame = split_frame(&[0x62, 0x02, 0x00, 0x07, 0xFF]).unwrap().unwrap();
        assert_eq!(frame.packet_type, 6);
        assert_eq!(frame.flags, 0x02);
        assert_eq!(frame.body, &[0x00, 0x07]);
        assert_eq!(frame.total_len, 4);
    }

    #[test]
    fn test_packet_id_zero_rejected() {
        assert!(parse_packet_id(&[0x00, 0x00]).is_err());
        assert_eq!(parse_packet_id(&[0x01, 0x00]).unwrap(), (256, 2));
    }
}
