use crate::mqtt_serde::parser::ParseError;

/// Largest value a remaining-length field may carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

pub struct TwoByteInteger;

impl TwoByteInteger {
    pub fn encode(val: u16) -> [u8; 2] {
        val.to_be_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<(u16, usize), ParseError> {
        match bytes {
            [hi, lo, ..] => Ok((u16::from_be_bytes([*hi, *lo]), 2)),
            _ => Err(ParseError::BufferTooShort),
        }
    }
}

pub struct VariableByteInteger;

impl VariableByteInteger {
    pub fn encode(val: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4);
        let mut num = val;
        loop {
            let mut byte = (num % 128) as u8;
            num /= 128;
            if num > 0 {
                byte |= 128;
            }
            bytes.push(byte);
            if num == 0 {
                break;
            }
        }
        bytes
    }

    /// Decodes a remaining-length field.
    ///
    /// Returns [`ParseError::More`] while the field itself is still incomplete,
    /// so stream readers can tell "wait" apart from "malformed".
    pub fn decode(buffer: &[u8]) -> Result<(usize, usize), ParseError> {
        let mut multiplier = 1usize;
        let mut value = 0usize;

        for (i, byte) in buffer.iter().take(4).enumerate() {
            value += (byte & 127) as usize * multiplier;
            if byte & 128 == 0 {
                #[cfg(feature = "strict-protocol-compliance")]
                if VariableByteInteger::encode(value as u32).len() != i + 1 {
                    return Err(ParseError::ParseError(
                        "remaining length encoding is not minimal".to_string(),
                    ));
                }
                return Ok((value, i + 1));
            }
            if i == 3 {
                return Err(ParseError::InvalidVariableByteInteger);
            }
            multiplier *= 128;
        }

        Err(ParseError::More(
            1,
            "remaining length not complete".to_string(),
        ))
    }
}

pub struct BinaryData;

impl BinaryData {
    pub fn encode(data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + data.len());
        bytes.extend_from_slice(&(data.len() as u16).to_be_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
        let (len, start) = TwoByteInteger::decode(bytes)?;
        let end = start + len as usize;
        if bytes.len() < end {
            return Err(ParseError::BufferTooShort);
        }
        Ok((bytes[start..end].to_vec(), end))
    }
}

pub struct Utf8String;

impl Utf8String {
    pub fn encode(s: &str) -> Vec<u8> {
        BinaryData::encode(s.as_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<(String, usize), ParseError> {
        let (data, len) = BinaryData::decode(bytes)?;
        let s = String::from_utf8(data).map_err(|e| ParseError::Utf8Error(e.utf8_error()))?;
        Ok((s, len))
    }
}
