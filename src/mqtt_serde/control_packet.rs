use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use super::encode_variable_length;
use super::parser::{split_frame, Frame, ParseError, ParseOk};

use crate::mqtt_serde::mqttv3::*;

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MqttPacket {
    Connect(MqttConnect),
    ConnAck(MqttConnAck),
    Publish(MqttPublish),
    PubAck(MqttPubAck),
    PubRec(MqttPubRec),
    PubRel(MqttPubRel),
    PubComp(MqttPubComp),
    Subscribe(MqttSubscribe),
    SubAck(MqttSubAck),
    Unsubscribe(MqttUnsubscribe),
    UnsubAck(MqttUnsubAck),
    PingReq(MqttPingReq),
    PingResp(MqttPingResp),
    Disconnect(MqttDisconnect),
}

macro_rules! for_each_packet {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            MqttPacket::Connect($p) => $body,
            MqttPacket::ConnAck($p) => $body,
            MqttPacket::Publish($p) => $body,
            MqttPacket::PubAck($p) => $body,
            MqttPacket::PubRec($p) => $body,
            MqttPacket::PubRel($p) => $body,
            MqttPacket::PubComp($p) => $body,
            MqttPacket::Subscribe($p) => $body,
            MqttPacket::SubAck($p) => $body,
            MqttPacket::Unsubscribe($p) => $body,
            MqttPacket::UnsubAck($p) => $body,
            MqttPacket::PingReq($p) => $body,
            MqttPacket::PingResp($p) => $body,
            MqttPacket::Disconnect($p) => $body,
        }
    };
}

impl MqttPacket {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        for_each_packet!(self, p => p.to_bytes())
    }

    /// Size of the serialized packet, computed without producing it.
    pub fn encoded_len(&self) -> Result<usize, ParseError> {
        for_each_packet!(self, p => p.encoded_len())
    }

    pub fn packet_type(&self) -> ControlPacketType {
        for_each_packet!(self, p => p.packet_type())
    }

    /// Packet identifier carried by the packet, if any.
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            MqttPacket::Publish(p) => p.message_id,
            MqttPacket::PubAck(p) => Some(p.message_id),
            MqttPacket::PubRec(p) => Some(p.message_id),
            MqttPacket::PubRel(p) => Some(p.message_id),
            MqttPacket::PubComp(p) => Some(p.message_id),
            MqttPacket::Subscribe(p) => Some(p.message_id),
            MqttPacket::SubAck(p) => Some(p.message_id),
            MqttPacket::Unsubscribe(p) => Some(p.message_id),
            MqttPacket::UnsubAck(p) => Some(p.message_id),
            _ => None,
        }
    }

    /// Decodes one MQTT v3.1.1 packet from the head of `buffer`.
    pub fn from_bytes(buffer: &[u8]) -> Result<ParseOk, ParseError> {
        let frame = match split_frame(buffer)? {
            Ok(frame) => frame,
            Err(hint) => return Ok(ParseOk::Continue(hint, 0)),
        };

        let packet = match ControlPacketType::try_from(frame.packet_type)? {
            ControlPacketType::CONNECT => MqttConnect::from_frame(&frame)?.into(),
            ControlPacketType::CONNACK => MqttConnAck::from_frame(&frame)?.into(),
            ControlPacketType::PUBLISH => MqttPublish::from_frame(&frame)?.into(),
            ControlPacketType::PUBACK => MqttPubAck::from_frame(&frame)?.into(),
            ControlPacketType::PUBREC => MqttPubRec::from_frame(&frame)?.into(),
            ControlPacketType::PUBREL => MqttPubRel::from_frame(&frame)?.into(),
            ControlPacketType::PUBCOMP => MqttPubComp::from_frame(&frame)?.into(),
            ControlPacketType::SUBSCRIBE => MqttSubscribe::from_frame(&frame)?.into(),
            ControlPacketType::SUBACK => MqttSubAck::from_frame(&frame)?.into(),
            ControlPacketType::UNSUBSCRIBE => MqttUnsubscribe::from_frame(&frame)?.into(),
            ControlPacketType::UNSUBACK => MqttUnsubAck::from_frame(&frame)?.into(),
            ControlPacketType::PINGREQ => MqttPingReq::from_frame(&frame)?.into(),
            ControlPacketType::PINGRESP => MqttPingResp::from_frame(&frame)?.into(),
            ControlPacketType::DISCONNECT => MqttDisconnect::from_frame(&frame)?.into(),
        };
        Ok(ParseOk::Packet(packet, frame.total_len))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPacketType {
    CONNECT = 1,
    CONNACK = 2,
    PUBLISH = 3,
    PUBACK = 4,
    PUBREC = 5,
    PUBREL = 6,
    PUBCOMP = 7,
    SUBSCRIBE = 8,
    SUBACK = 9,
    UNSUBSCRIBE = 10,
    UNSUBACK = 11,
    PINGREQ = 12,
    PINGRESP = 13,
    DISCONNECT = 14,
}

impl ControlPacketType {
    /// True for packets a v3.1.1 server may send to a client.
    pub fn is_server_to_client(self) -> bool {
        matches!(
            self,
            ControlPacketType::CONNACK
                | ControlPacketType::PUBLISH
                | ControlPacketType::PUBACK
                | ControlPacketType::PUBREC
                | ControlPacketType::PUBREL
                | ControlPacketType::PUBCOMP
                | ControlPacketType::SUBACK
                | ControlPacketType::UNSUBACK
                | ControlPacketType::PINGRESP
        )
    }
}

impl TryFrom<u8> for ControlPacketType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ControlPacketType::CONNECT),
            2 => Ok(ControlPacketType::CONNACK),
            3 => Ok(ControlPacketType::PUBLISH),
            4 => Ok(ControlPacketType::PUBACK),
            5 => Ok(ControlPacketType::PUBREC),
            6 => Ok(ControlPacketType::PUBREL),
            7 => Ok(ControlPacketType::PUBCOMP),
            8 => Ok(ControlPacketType::SUBSCRIBE),
            9 => Ok(ControlPacketType::SUBACK),
            10 => Ok(ControlPacketType::UNSUBSCRIBE),
            11 => Ok(ControlPacketType::UNSUBACK),
            12 => Ok(ControlPacketType::PINGREQ),
            13 => Ok(ControlPacketType::PINGRESP),
            14 => Ok(ControlPacketType::DISCONNECT),
            _ => Err(ParseError::InvalidPacketType),
        }
    }
}

pub trait MqttControlPacket: Sized + Into<MqttPacket> {
    // MQTT 3.1.1: 2.2.1, MQTT control packet type
    const PACKET_TYPE: ControlPacketType;

    fn packet_type(&self) -> ControlPacketType {
        Self::PACKET_TYPE
    }

    // MQTT 3.1.1: 2.2.2, Flags in the fixed header
    fn flags(&self) -> u8 {
        0u8
    }

    fn fixed_header(&self, len: usize) -> Vec<u8> {
        let byte1: u8 = (Self::PACKET_TYPE as u8) << 4 | self.flags();
        let mut hdr = vec![byte1];
        hdr.extend(encode_variable_length(len));
        hdr
    }

    fn variable_header(&self) -> Result<Vec<u8>, ParseError>;

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        Ok(Vec::new())
    }

    /// Decodes the packet out of an already split frame.
    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError>;

    fn from_bytes(buffer: &[u8]) -> Result<ParseOk, ParseError> {
        let frame = match split_frame(buffer)? {
            Ok(frame) => frame,
            Err(hint) => return Ok(ParseOk::Continue(hint, 0)),
        };
        if frame.packet_type != Self::PACKET_TYPE as u8 {
            return Err(ParseError::InvalidPacketType);
        }
        Ok(ParseOk::Packet(Self::from_frame(&frame)?.into(), frame.total_len))
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ParseError> {
        let vhdr = self.variable_header()?;
        let payload = self.payload()?;
        let remaining_length = vhdr.len() + payload.len();
        if remaining_length > crate::mqtt_serde::base_data::MAX_REMAINING_LENGTH {
            return Err(ParseError::InvalidLength);
        }
        let mut bytes = self.fixed_header(remaining_length);
        bytes.reserve(remaining_length);
        bytes.extend(vhdr);
        bytes.extend(payload);
        Ok(bytes)
    }

    fn encoded_len(&self) -> Result<usize, ParseError> {
        let remaining_length = self.variable_header()?.len() + self.payload()?.len();
        Ok(1 + encode_variable_length(remaining_length).len() + remaining_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_serde_tagging() {
        let pkt = MqttPacket::PubAck(MqttPubAck::new(7));
        let json = serde_json::to_string(&pkt).unwrap();
        assert_eq!(json, "{\"type\":\"PubAck\",\"message_id\":7}");
    }

    #[test]
    fn test_unknown_packet_type() {
        assert!(matches!(
            MqttPacket::from_bytes(&[0xF0, 0x00]),
            Err(ParseError::InvalidPacketType)
        ));
        assert!(matches!(
            MqttPacket::from_bytes(&[0x00, 0x00]),
            Err(ParseError::InvalidPacketType)
        ));
    }

    #[test]
    fn test_partial_packet_is_continue() {
        match MqttPacket::from_bytes(&[0x30, 0x08, 0x00]).unwrap() {
            ParseOk::Continue(hint, consumed) => {
                assert_eq!(hint, 7);
                assert_eq!(consumed, 0);
            }
            _ => panic!("Expected Continue"),
        }
    }

    #[test]
    fn test_encoded_len_matches_bytes() {
        let pkt = MqttPacket::Publish(MqttPublish::new(
            "a/b".to_string(),
            1,
            vec![0u8; 200],
            Some(3),
            false,
            false,
        ));
        assert_eq!(pkt.encoded_len().unwrap(), pkt.to_bytes().unwrap().len());
    }

    #[test]
    fn test_server_to_client_classification() {
        assert!(ControlPacketType::CONNACK.is_server_to_client());
        assert!(ControlPacketType::PUBREL.is_server_to_client());
        assert!(!ControlPacketType::CONNECT.is_server_to_client());
        assert!(!ControlPacketType::DISCONNECT.is_server_to_client());
        assert!(!ControlPacketType::PINGREQ.is_server_to_client());
    }
}
