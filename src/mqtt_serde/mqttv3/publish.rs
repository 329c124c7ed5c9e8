use serde::{Deserialize, Serialize};

use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
use crate::mqtt_serde::encode_utf8_string;
use crate::mqtt_serde::parser::{BodyReader, Frame, ParseError};

/// PUBLISH packet, MQTT v3.1.1 section 3.3.
///
/// Travels in both directions. The packet identifier is present only for
/// QoS 1 and 2.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttPublish {
    pub dup: bool,
    pub qos: u8,
    pub retain: bool,
    pub topic_name: String,
    pub message_id: Option<u16>,
    pub payload: Vec<u8>,
}

impl MqttPublish {
    pub fn new(
        topic_name: String,
        qos: u8,
        payload: Vec<u8>,
        message_id: Option<u16>,
        retain: bool,
        dup: bool,
    ) -> Self {
        Self {
            dup,
            qos,
            retain,
            topic_name,
            message_id,
            payload,
        }
    }
}

impl From<MqttPublish> for MqttPacket {
    fn from(p: MqttPublish) -> Self {
        MqttPacket::Publish(p)
    }
}

impl MqttControlPacket for MqttPublish {
    const PACKET_TYPE: ControlPacketType = ControlPacketType::PUBLISH;

    fn flags(&self) -> u8 {
        ((self.dup as u8) << 3) | (self.qos << 1) | (self.retain as u8)
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        if self.qos > 2 {
            return Err(ParseError::ParseError("Invalid QoS level".to_string()));
        }
        let mut vh = encode_utf8_string(&self.topic_name)?;
        if self.qos > 0 {
            let msg_id = self.message_id.ok_or_else(|| {
                ParseError::ParseError("Message ID is required for QoS > 0".to_string())
            })?;
            vh.extend_from_slice(&TwoByteInteger::encode(msg_id));
        }
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        Ok(self.payload.clone())
    }

    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
        let dup = frame.flags & 0x08 != 0;
        let qos = (frame.flags & 0x06) >> 1;
        let retain = frame.flags & 0x01 != 0;
        if qos > 2 {
            return Err(ParseError::ParseError("Invalid QoS level".to_string()));
        }
        if qos == 0 && dup {
            return Err(ParseError::ParseError(
                "DUP flag must be 0 for QoS 0 messages".to_string(),
            ));
        }

        let mut body = BodyReader::new(frame.body);
        let topic_name = body.utf8()?;
        let message_id = if qos > 0 {
            Some(body.packet_id()?)
        } else {
            None
        };

        Ok(MqttPublish {
            dup,
            qos,
            retain,
            topic_name,
            message_id,
            payload: body.rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::parser::ParseOk;

    #[test]
    fn test_publish_qos1_serialization() {
        let publish = MqttPublish::new("a/b".to_string(), 1, vec![1, 2, 3], Some(123), true, true);
        assert_eq!(
            publish.to_bytes().unwrap(),
            vec![
                0x3B, // type + DUP, QoS1, RETAIN
                10,   // 5 topic + 2 msg id + 3 payload
                0x00, 0x03, b'a', b'/', b'b', // topic
                0x00, 0x7B, // message id
                1, 2, 3, // payload
            ]
        );
    }

    #[test]
    fn test_publish_qos0_deserialization() {
        let bytes = vec![0x30, 8, 0x00, 0x03, b'a', b'/', b'b', 1, 2, 3];
        match MqttPublish::from_bytes(&bytes).unwrap() {
            ParseOk::Packet(MqttPacket::Publish(p), len) => {
                assert_eq!(len, 10);
                assert!(!p.dup);
                assert_eq!(p.qos, 0);
                assert_eq!(p.topic_name, "a/b");
                assert_eq!(p.message_id, None);
                assert_eq!(p.payload, vec![1, 2, 3]);
            }
            _ => panic!("Expected PUBLISH packet"),
        }
    }

    #[test]
    fn test_publish_empty_payload() {
        let bytes = vec![0x34, 0x05, 0x00, 0x01, b'x', 0x00, 0x09];
        match MqttPublish::from_bytes(&bytes).unwrap() {
            ParseOk::Packet(MqttPacket::Publish(p), 7) => {
                assert_eq!(p.qos, 2);
                assert_eq!(p.message_id, Some(9));
                assert!(p.payload.is_empty());
            }
            _ => panic!("Expected PUBLISH packet"),
        }
    }

    #[test]
    fn test_publish_invalid_header_bits() {
        // QoS 3
        assert!(MqttPublish::from_bytes(&[0x36, 0x03, 0x00, 0x01, b'x']).is_err());
        // DUP on QoS 0
        assert!(MqttPublish::from_bytes(&[0x38, 0x03, 0x00, 0x01, b'x']).is_err());
        // packet id 0 on QoS 1
        assert!(MqttPublish::from_bytes(&[0x32, 0x05, 0x00, 0x01, b'x', 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_publish_qos1_requires_id_to_encode() {
        let publish = MqttPublish::new("a".to_string(), 1, vec![], None, false, false);
        assert!(publish.to_bytes().is_err());
    }
}
