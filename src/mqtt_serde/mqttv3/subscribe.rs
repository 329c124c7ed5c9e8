use serde::{Deserialize, Serialize};

use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
use crate::mqtt_serde::encode_utf8_string;
use crate::mqtt_serde::parser::{expect_flags, BodyReader, Frame, ParseError};

/// One topic filter of a SUBSCRIBE request with its requested maximum QoS.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct TopicSubscription {
    pub topic_filter: String,
    pub qos: u8,
}

impl TopicSubscription {
    pub fn new(topic_filter: impl Into<String>, qos: u8) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
        }
    }
}

/// SUBSCRIBE packet, MQTT v3.1.1 section 3.8.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttSubscribe {
    pub message_id: u16,
    pub subscriptions: Vec<TopicSubscription>,
}

impl MqttSubscribe {
    pub fn new(message_id: u16, subscriptions: Vec<TopicSubscription>) -> Self {
        Self {
            message_id,
            subscriptions,
        }
    }
}

impl From<MqttSubscribe> for MqttPacket {
    fn from(p: MqttSubscribe) -> Self {
        MqttPacket::Subscribe(p)
    }
}

impl MqttControlPacket for MqttSubscribe {
    const PACKET_TYPE: ControlPacketType = ControlPacketType::SUBSCRIBE;

    fn flags(&self) -> u8 {
        0x02
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        Ok(TwoByteInteger::encode(self.message_id).to_vec())
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        if self.subscriptions.is_empty() {
            return Err(ParseError::ParseError(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }
        let mut payload = Vec::new();
        for sub in &self.subscriptions {
            payload.extend(encode_utf8_string(&sub.topic_filter)?);
            payload.push(sub.qos);
        }
        Ok(payload)
    }

    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
        expect_flags(frame, 0x02, "SUBSCRIBE")?;
        let mut body = BodyReader::new(frame.body);
        let message_id = body.packet_id()?;
        let mut subscriptions = Vec::new();
        while !body.is_empty() {
            let topic_filter = body.utf8()?;
            let qos = body.u8()?;
            if qos > 2 {
                return Err(ParseError::ParseError(format!(
                    "SUBSCRIBE requested QoS {} is invalid",
                    qos
                )));
            }
            subscriptions.push(TopicSubscription { topic_filter, qos });
        }
        if subscriptions.is_empty() {
            return Err(ParseError::ParseError(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }
        Ok(MqttSubscribe {
            message_id,
            subscriptions,
        })
    }
}

/// SUBACK packet, MQTT v3.1.1 section 3.9.
///
/// Return codes are not range checked here; the client decides what an
/// unexpected code means for its pending request.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttSubAck {
    pub message_id: u16,
    pub return_codes: Vec<u8>,
}

impl MqttSubAck {
    pub fn new(message_id: u16, return_codes: Vec<u8>) -> Self {
        Self {
            message_id,
            return_codes,
        }
    }
}

impl From<MqttSubAck> for MqttPacket {
    fn from(p: MqttSubAck) -> Self {
        MqttPacket::SubAck(p)
    }
}

impl MqttControlPacket for MqttSubAck {
    const PACKET_TYPE: ControlPacketType = ControlPacketType::SUBACK;

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        Ok(TwoByteInteger::encode(self.message_id).to_vec())
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        Ok(self.return_codes.clone())
    }

    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
        expect_flags(frame, 0x00, "SUBACK")?;
        let mut body = BodyReader::new(frame.body);
        let message_id = body.packet_id()?;
        let return_codes = body.rest().to_vec();
        if return_codes.is_empty() {
            return Err(ParseError::ParseError(
                "SUBACK carries no return code".to_string(),
            ));
        }
        Ok(MqttSubAck {
            message_id,
            return_codes,
        })
    }
}

/// UNSUBSCRIBE packet, MQTT v3.1.1 section 3.10.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttUnsubscribe {
    pub message_id: u16,
    pub topic_filters: Vec<String>,
}

impl MqttUnsubscribe {
    pub fn new(message_id: u16, topic_filters: Vec<String>) -> Self {
        Self {
            message_id,
            topic_filters,
        }
    }
}

impl From<MqttUnsubscribe> for MqttPacket {
    fn from(p: MqttUnsubscribe) -> Self {
        MqttPacket::Unsubscribe(p)
    }
}

impl MqttControlPacket for MqttUnsubscribe {
    const PACKET_TYPE: ControlPacketType = ControlPacketType::UNSUBSCRIBE;

    fn flags(&self) -> u8 {
        0x02
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        Ok(TwoByteInteger::encode(self.message_id).to_vec())
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        if self.topic_filters.is_empty() {
            return Err(ParseError::ParseError(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }
        let mut payload = Vec::new();
        for filter in &self.topic_filters {
            payload.extend(encode_utf8_string(filter)?);
        }
        Ok(payload)
    }

    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
        expect_flags(frame, 0x02, "UNSUBSCRIBE")?;
        let mut body = BodyReader::new(frame.body);
        let message_id = body.packet_id()?;
        let mut topic_filters = Vec::new();
        while !body.is_empty() {
            topic_filters.push(body.utf8()?);
        }
        if topic_filters.is_empty() {
            return Err(ParseError::ParseError(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }
        Ok(MqttUnsubscribe {
            message_id,
            topic_filters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::parser::ParseOk;

    #[test]
    fn test_subscribe_wire_layout() {
        let sub = MqttSubscribe::new(
            10,
            vec![TopicSubscription::new("a/+", 1), TopicSubscription::new("#", 2)],
        );
        assert_eq!(
            sub.to_bytes().unwrap(),
            vec![
                0x82, 12, // type + reserved flags, remaining length
                0x00, 0x0A, // packet id
                0x00, 0x03, b'a', b'/', b'+', 0x01, // first filter
                0x00, 0x01, b'#', 0x02, // second filter
            ]
        );
    }

    #[test]
    fn test_suback_keeps_unknown_codes() {
        match MqttSubAck::from_bytes(&[0x90, 0x05, 0x00, 0x0A, 0x00, 0x80, 0x07]).unwrap() {
            ParseOk::Packet(MqttPacket::SubAck(ack), 7) => {
                assert_eq!(ack.message_id, 10);
                assert_eq!(ack.return_codes, vec![0x00, 0x80, 0x07]);
            }
            _ => panic!("Expected SUBACK packet"),
        }
    }

    #[test]
    fn test_unsubscribe_decodes_filters() {
        let unsub = MqttUnsubscribe::new(3, vec!["a/b".to_string(), "c".to_string()]);
        let bytes = unsub.to_bytes().unwrap();
        assert_eq!(bytes[0], 0xA2);
        match MqttUnsubscribe::from_bytes(&bytes).unwrap() {
            ParseOk::Packet(MqttPacket::Unsubscribe(parsed), _) => {
                assert_eq!(parsed.topic_filters, vec!["a/b", "c"]);
            }
            _ => panic!("Expected UNSUBSCRIBE packet"),
        }
    }

    #[test]
    fn test_empty_filter_lists_rejected() {
        assert!(MqttSubscribe::new(1, vec![]).to_bytes().is_err());
        assert!(MqttUnsubscribe::from_bytes(&[0xA2, 0x02, 0x00, 0x01]).is_err());
    }
}
