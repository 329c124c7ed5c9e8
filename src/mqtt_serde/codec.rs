use super::control_packet::MqttPacket;
use super::parser::{ParseError, ParseOk};

/// Boundary between the client engine and the byte-level frame format.
///
/// The engine only ever asks to decode the next message off a buffer or to
/// encode a typed message, so a replacement codec (for instance one that
/// rejects oversized frames early) plugs in here.
pub trait FrameCodec {
    /// Decodes the message at the head of `buf`.
    ///
    /// `Ok(ParseOk::Continue(..))` or `Err(ParseError::More(..))` mean the
    /// buffer holds an incomplete frame.
    fn decode(&mut self, buf: &[u8]) -> Result<ParseOk, ParseError>;

    fn encode(&self, packet: &MqttPacket) -> Result<Vec<u8>, ParseError>;

    fn encoded_len(&self, packet: &MqttPacket) -> Result<usize, ParseError>;
}

/// Default MQTT v3.1.1 codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mqtt311Codec;

impl FrameCodec for Mqtt311Codec {
    fn decode(&mut self, buf: &[u8]) -> Result<ParseOk, ParseError> {
        MqttPacket::from_bytes(buf)
    }

    fn encode(&self, packet: &MqttPacket) -> Result<Vec<u8>, ParseError> {
        packet.to_bytes()
    }

    fn encoded_len(&self, packet: &MqttPacket) -> Result<usize, ParseError> {
        packet.encoded_len()
    }
}
