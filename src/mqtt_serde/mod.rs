// SPDX-License-Identifier: MPL-2.0

pub mod base_data;
pub mod codec;
pub mod control_packet;
pub mod mqttv3;
pub mod parser;

use crate::mqtt_serde::base_data::{BinaryData, Utf8String, VariableByteInteger};
use crate::mqtt_serde::parser::ParseError;

pub use crate::mqtt_serde::codec::{FrameCodec, Mqtt311Codec};
pub use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
pub use crate::mqtt_serde::parser::stream::MqttParser;

// MQTT 3.1.1, 1.5.3
pub(crate) fn encode_binary_data(data: &[u8]) -> Result<Vec<u8>, ParseError> {
    if data.len() > u16::MAX as usize {
        return Err(ParseError::StringTooLong);
    }
    Ok(BinaryData::encode(data))
}

pub(crate) fn encode_utf8_string(s: &str) -> Result<Vec<u8>, ParseError> {
    if s.len() > u16::MAX as usize {
        return Err(ParseError::StringTooLong);
    }

    #[cfg(feature = "strict-protocol-compliance")]
    validate_mqtt_utf8_string(s)?;

    Ok(Utf8String::encode(s))
}

#[cfg(feature = "strict-protocol-compliance")]
fn validate_mqtt_utf8_string(s: &str) -> Result<(), ParseError> {
    // [MQTT-1.5.3-2] no null character; [MQTT-1.5.3-3] BOM only stripped, never leading
    for (i, ch) in s.char_indices() {
        match ch {
            '\u{0000}' => {
                return Err(ParseError::ParseError(
                    "UTF-8 string contains null character (U+0000)".to_string(),
                ));
            }
            '\u{FEFF}' if i == 0 => {
                return Err(ParseError::ParseError(
                    "UTF-8 string starts with BOM (U+FEFF)".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}

pub(crate) fn encode_variable_length(len: usize) -> Vec<u8> {
    VariableByteInteger::encode(len as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_utf8_string_length_limit() {
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            encode_utf8_string(&long),
            Err(ParseError::StringTooLong)
        ));
        assert_eq!(encode_utf8_string("ab").unwrap(), vec![0x00, 0x02, b'a', b'b']);
    }

    #[cfg(feature = "strict-protocol-compliance")]
    #[test]
    fn test_utf8_string_validation_null_character() {
        assert!(encode_utf8_string("hello\u{0000}world").is_err());
        assert!(encode_utf8_string("\u{FEFF}hello").is_err());
        assert!(encode_utf8_string("hello_world_åäö").is_ok());
    }
}
