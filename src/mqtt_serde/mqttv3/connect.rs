use serde::{Deserialize, Serialize};

use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
use crate::mqtt_serde::parser::{expect_flags, BodyReader, Frame, ParseError};
use crate::mqtt_serde::{encode_binary_data, encode_utf8_string};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

/// Will message carried by CONNECT.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Will {
    pub retain: bool,
    pub qos: u8,
    pub topic: String,
    pub message: Vec<u8>,
}

/// CONNECT packet, MQTT v3.1.1 section 3.1.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttConnect {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl MqttConnect {
    pub fn new(client_id: String, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            clean_session,
            keep_alive,
            client_id,
            will: None,
            username: None,
            password: None,
        }
    }

    fn connect_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | (will.qos << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        flags
    }
}

impl From<MqttConnect> for MqttPacket {
    fn from(p: MqttConnect) -> Self {
        MqttPacket::Connect(p)
    }
}

impl MqttControlPacket for MqttConnect {
    const PACKET_TYPE: ControlPacketType = ControlPacketType::CONNECT;

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        let mut vh = encode_utf8_string(PROTOCOL_NAME)?;
        vh.push(PROTOCOL_LEVEL);
        vh.push(self.connect_flags());
        vh.extend_from_slice(&TwoByteInteger::encode(self.keep_alive));
        Ok(vh)
    }

    fn payload(&self) -> Result<Vec<u8>, ParseError> {
        let mut payload = encode_utf8_string(&self.client_id)?;
        if let Some(will) = &self.will {
            payload.extend(encode_utf8_string(&will.topic)?);
            payload.extend(encode_binary_data(&will.message)?);
        }
        if let Some(username) = &self.username {
            payload.extend(encode_utf8_string(username)?);
        }
        if let Some(password) = &self.password {
            payload.extend(encode_binary_data(password)?);
        }
        Ok(payload)
    }

    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
        expect_flags(frame, 0x00, "CONNECT")?;
        let mut body = BodyReader::new(frame.body);

        if body.utf8()? != PROTOCOL_NAME {
            return Err(ParseError::ParseError("Invalid protocol name".to_string()));
        }
        if body.u8()? != PROTOCOL_LEVEL {
            return Err(ParseError::ParseError(
                "Invalid protocol version".to_string(),
            ));
        }

        let flags = body.u8()?;
        if flags & 0x01 != 0 {
            return Err(ParseError::ParseError(
                "CONNECT reserved flag bit is not 0".to_string(),
            ));
        }
        let will_flag = flags & 0x04 != 0;
        let username_flag = flags & 0x80 != 0;
        let password_flag = flags & 0x40 != 0;
        if password_flag && !username_flag {
            return Err(ParseError::ParseError(
                "Password flag requires username flag".to_string(),
            ));
        }

        let keep_alive = body.u16()?;
        let client_id = body.utf8()?;
        let will = if will_flag {
            Some(Will {
                retain: flags & 0x20 != 0,
                qos: (flags & 0x18) >> 3,
                topic: body.utf8()?,
                message: body.binary()?,
            })
        } else {
            None
        };
        let username = if username_flag { Some(body.utf8()?) } else { None };
        let password = if password_flag { Some(body.binary()?) } else { None };
        body.finish("CONNECT")?;

        Ok(MqttConnect {
            clean_session: flags & 0x02 != 0,
            keep_alive,
            client_id,
            will,
            username,
            password,
        })
    }
}

/// CONNACK packet, MQTT v3.1.1 section 3.2.
///
/// The return code is kept raw: values above 5 are reserved by the protocol
/// and it is up to the receiver to treat them as a violation.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct MqttConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl MqttConnAck {
    pub fn new(session_present: bool, return_code: u8) -> Self {
        Self {
            session_present,
            return_code,
        }
    }
}

impl From<MqttConnAck> for MqttPacket {
    fn from(p: MqttConnAck) -> Self {
        MqttPacket::ConnAck(p)
    }
}

impl MqttControlPacket for MqttConnAck {
    const PACKET_TYPE: ControlPacketType = ControlPacketType::CONNACK;

    fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
        Ok(vec![self.session_present as u8, self.return_code])
    }

    fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
        expect_flags(frame, 0x00, "CONNACK")?;
        if frame.body.len() != 2 {
            return Err(ParseError::ParseError(
                "CONNACK packet must have a remaining length of 2".to_string(),
            ));
        }
        let ack_flags = frame.body[0];
        if ack_flags & 0xFE != 0 {
            return Err(ParseError::ParseError(
                "CONNACK acknowledge flags reserved bits are not 0".to_string(),
            ));
        }
        Ok(MqttConnAck {
            session_present: ack_flags & 0x01 != 0,
            return_code: frame.body[1],
        })
    }
}
