use crate::mqtt_serde::control_packet::MqttPacket;
use crate::mqtt_serde::parser::{ParseError, ParseOk};
use bytes::{Buf, BytesMut};

/// A stateful parser for a stream of MQTT v3.1.1 data.
///
/// It buffers whatever is fed to it and yields complete packets, keeping
/// any trailing partial frame for the next [`MqttParser::feed`].
#[derive(Debug)]
pub struct MqttParser {
    buffer: BytesMut,
}

impl Default for MqttParser {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl MqttParser {
    pub fn new(buffer_size: usize) -> Self {
        MqttParser {
            buffer: BytesMut::with_capacity(buffer_size),
        }
    }

    /// Appends new data from the stream to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to parse a single packet from the internal buffer.
    ///
    /// - `Ok(Some(packet))`: a full packet was removed from the buffer.
    /// - `Ok(None)`: the buffer does not hold a full packet yet.
    /// - `Err(_)`: the buffered data is malformed.
    pub fn next_packet(&mut self) -> Result<Option<MqttPacket>, ParseError> {
        match MqttPacket::from_bytes(&self.buffer) {
            Ok(ParseOk::Packet(packet, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(packet))
            }
            Ok(ParseOk::Continue(_, _)) => Ok(None),
            Err(e) if e.is_incomplete() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Drains every complete packet currently buffered.
    pub fn drain_packets(&mut self) -> Result<Vec<MqttPacket>, ParseError> {
        let mut packets = Vec::new();
        while let Some(packet) = self.next_packet()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    /// Bytes held that did not form a complete packet yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops the first `cnt` buffered bytes, for callers that decode in place.
    pub fn consume(&mut self, cnt: usize) {
        self.buffer.advance(cnt.min(self.buffer.len()));
    }
}
