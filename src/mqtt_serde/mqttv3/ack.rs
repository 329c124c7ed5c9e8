use serde::{Deserialize, Serialize};

use crate::mqtt_serde::base_data::TwoByteInteger;
use crate::mqtt_serde::control_packet::{ControlPacketType, MqttControlPacket, MqttPacket};
use crate::mqtt_serde::parser::{expect_flags, BodyReader, Frame, ParseError};

// PUBACK, PUBREC, PUBREL, PUBCOMP and UNSUBACK share one layout: a fixed
// header followed by the two byte packet identifier.
macro_rules! id_only_packet {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ident, $flags:expr) => {
        $(#[$doc])*
        #[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub message_id: u16,
        }

        impl $name {
            pub fn new(message_id: u16) -> Self {
                Self { message_id }
            }
        }

        impl From<$name> for MqttPacket {
            fn from(p: $name) -> Self {
                MqttPacket::$variant(p)
            }
        }

        impl MqttControlPacket for $name {
            const PACKET_TYPE: ControlPacketType = ControlPacketType::$ty;

            fn flags(&self) -> u8 {
                $flags
            }

            fn variable_header(&self) -> Result<Vec<u8>, ParseError> {
                Ok(TwoByteInteger::encode(self.message_id).to_vec())
            }

            fn from_frame(frame: &Frame<'_>) -> Result<Self, ParseError> {
                expect_flags(frame, $flags, stringify!($ty))?;
                let mut body = BodyReader::new(frame.body);
                let message_id = body.packet_id()?;
                body.finish(stringify!($ty))?;
                Ok(Self { message_id })
            }
        }
    };
}

id_only_packet!(
    /// PUBACK, the QoS 1 acknowledgement.
    MqttPubAck, PubAck, PUBACK, 0x00
);
id_only_packet!(
    /// PUBREC, first QoS 2 acknowledgement.
    MqttPubRec, PubRec, PUBREC, 0x00
);
id_only_packet!(
    /// PUBREL, QoS 2 release. Its fixed header flags are 0b0010.
    MqttPubRel, PubRel, PUBREL, 0x02
);
id_only_packet!(
    /// PUBCOMP, final QoS 2 acknowledgement.
    MqttPubComp, PubComp, PUBCOMP, 0x00
);
id_only_packet!(
    /// UNSUBACK. v3.1.1 carries no per-filter result.
    MqttUnsubAck, UnsubAck, UNSUBACK, 0x00
);
