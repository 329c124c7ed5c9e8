// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
use crate::mqtt_serde::parser::{expect_flags, Frame, ParseError};

// Packets made of a bare fixed header with zero remaining length.
macro_rules! header_only_packet {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ident) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
        pub struct $name;

        impl From<$name> for MqttPacket {
            fn from(p: $name) -> Self {
                MqttPacket::$variant(p)
            }
        }

        impl MqttControlPacket for $name {
            const PACKET_TYPE: ControlPacketType = ControlPacketType::$ty;

            fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
                Ok(Vec::new())
            }

            fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
                expect_flags(frame, 0x00, stringify!($ty))?;
                if !frame.body.is_empty() {
                    return Err(ParseError::ParseError(format!(
                        "{} packet must have a remaining length of 0",
                        stringify!($ty)
                    )));
                }
                Ok($name)
            }
        }
    };
}

header_only_packet!(
    /// PINGREQ, sent by the client to probe the link.
    MqttPingReq, PingReq, PINGREQ
);
header_only_packet!(
    /// PINGRESP, the broker's answer to PINGREQ.
    MqttPingResp, PingResp, PINGRESP
);
header_only_packet!(
    /// DISCONNECT, client-to-broker only in v3.1.1.
    MqttDisconnect, Disconnect, DISCONNECT
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_serde::parser::ParseOk;

    #[test]
    fn test_header_only_bytes() {
        assert_eq!(MqttPingReq.to_bytes().unwrap(), vec![0xC0, 0x00]);
        assert_eq!(MqttPingResp.to_bytes().unwrap(), vec![0xD0, 0x00]);
        assert_eq!(MqttDisconnect.to_bytes().unwrap(), vec![0xE0, 0x00]);
    }

    #[test]
    fn test_pingresp_decode() {
        match MqttPingResp::from_bytes(&[0xD0, 0x00, 0x20]).unwrap() {
            ParseOk::Packet(MqttPacket::PingResp(_), 2) => {}
            _ => panic!("Expected PINGRESP packet"),
        }
        assert!(MqttPingResp::from_bytes(&[0xD0, 0x01, 0x00]).is_err());
        assert!(MqttPingResp::from_bytes(&[0xD1, 0x00]).is_err());
    }
}
