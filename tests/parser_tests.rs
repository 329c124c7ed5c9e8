// SPDX-License-Identifier: MPL-2.0

mod common;

use common::{publish_id, Harness};
use mqtt311_engine::mqtt_client::{BrokerDisconnectReason, QoS};
use mqtt311_engine::mqtt_serde::control_packet::{MqttControlPacket, MqttPacket};
use mqtt311_engine::mqtt_serde::mqttv3::{
    MqttConnect, MqttDisconnect, MqttPingReq, MqttPingResp, MqttPubAck, MqttPublish, MqttSubAck,
};
use mqtt311_engine::mqtt_serde::parser::{
    packet_type, parse_binary_data, parse_packet_id, parse_remaining_length, parse_utf8_string, ParseError, ParseOk,
};
use mqtt311_engine::mqtt_serde::{FrameCodec, Mqtt311Codec, MqttParser};

fn connect_bytes() -> Vec<u8> {
    MqttConnect::new("tester".to_string(), 60, true).to_bytes().unwrap()
}

#[test]
fn test_packet_type_extraction() {
    assert_eq!(packet_type(&[0x10]).unwrap(), 1); // CONNECT
    assert_eq!(packet_type(&[0x20]).unwrap(), 2); // CONNACK
    assert_eq!(packet_type(&[0xc0]).unwrap(), 12); // PINGREQ
    assert_eq!(packet_type(&[0xe0]).unwrap(), 14); // DISCONNECT
    assert!(matches!(packet_type(&[]), Err(ParseError::BufferTooShort)));
}

#[test]
fn test_parse_remaining_length() {
    assert_eq!(parse_remaining_length(&[0x00]).unwrap(), (0, 1));
    assert_eq!(parse_remaining_length(&[0x7f]).unwrap(), (127, 1));
    assert_eq!(parse_remaining_length(&[0x80, 0x01]).unwrap(), (128, 2));
    assert_eq!(parse_remaining_length(&[0xff, 0x7f]).unwrap(), (16383, 2));
    assert_eq!(
        parse_remaining_length(&[0xff, 0xff, 0xff, 0x7f]).unwrap(),
        (268_435_455, 4)
    );
    assert!(parse_remaining_length(&[0x80]).is_err());
    assert!(parse_remaining_length(&[0xff, 0xff, 0xff, 0xff, 0x01]).is_err());
}

#[test]
fn test_parse_strings_and_ids() {
    let data = [0x00, 0x05, b'h', b'e', b'l', b'l', b'o'];
    assert_eq!(parse_utf8_string(&data).unwrap(), ("hello".to_string(), 7));
    assert!(parse_utf8_string(&[0x00, 0x05, b'h']).is_err());
    assert!(parse_utf8_string(&[0x00, 0x02, 0xc3, 0x28]).is_err());

    assert_eq!(parse_binary_data(&[0x00, 0x02, 0xde, 0xad]).unwrap(), (vec![0xde, 0xad], 4));
    assert_eq!(parse_packet_id(&[0x12, 0x34]).unwrap(), (0x1234, 2));
    assert!(parse_packet_id(&[0x00, 0x00]).is_err());
}

#[test]
fn test_stream_parser_byte_by_byte() {
    let bytes = connect_bytes();
    let mut parser = MqttParser::default();
    for (i, byte) in bytes.iter().enumerate() {
        parser.feed(&[*byte]);
        let packet = parser.next_packet().unwrap();
        if i + 1 < bytes.len() {
            assert!(packet.is_none(), "packet produced after {} bytes", i + 1);
        } else {
            assert!(matches!(packet, Some(MqttPacket::Connect(c)) if c.client_id == "tester"));
        }
    }
    assert!(parser.buffered().is_empty());
}

#[test]
fn test_stream_parser_multiple_packets() {
    let mut stream = connect_bytes();
    stream.extend(MqttPingReq.to_bytes().unwrap());
    stream.extend(MqttDisconnect.to_bytes().unwrap());
    let tail = MqttPublish::new("a/b".to_string(), 1, b"xyz".to_vec(), Some(5), false, false)
        .to_bytes()
        .unwrap();
    stream.extend_from_slice(&tail[..3]);

    let mut parser = MqttParser::default();
    parser.feed(&stream);
    let packets = parser.drain_packets().unwrap();
    assert_eq!(packets.len(), 3);
    assert!(matches!(packets[1], MqttPacket::PingReq(_)));
    assert!(matches!(packets[2], MqttPacket::Disconnect(_)));
    assert_eq!(parser.buffered(), &tail[..3]);

    parser.feed(&tail[3..]);
    match parser.next_packet().unwrap() {
        Some(MqttPacket::Publish(p)) => {
            assert_eq!(p.message_id, Some(5));
            assert_eq!(p.payload, b"xyz");
        }
        other => panic!("Expected PUBLISH, got {other:?}"),
    }
}

#[test]
fn test_codec_rejects_malformed_frames() {
    let mut codec = Mqtt311Codec;
    // PUBLISH with QoS 3
    assert!(codec.decode(&[0x36, 0x05, 0x00, 0x01, b'a', 0x00, 0x01]).is_err());
    // PUBREL with wrong fixed header flags
    assert!(codec.decode(&[0x60, 0x02, 0x00, 0x01]).is_err());
    // SUBACK without return codes
    assert!(codec.decode(&[0x90, 0x02, 0x00, 0x01]).is_err());
    // truncated frame is not an error
    assert!(matches!(codec.decode(&[0x90, 0x03, 0x00]), Ok(ParseOk::Continue(_, 0))));
}

#[test]
fn test_codec_encodes_suback() {
    let codec = Mqtt311Codec;
    let packet = MqttPacket::SubAck(MqttSubAck::new(10, vec![0x00, 0x01, 0x80]));
    assert_eq!(
        codec.encode(&packet).unwrap(),
        vec![0x90, 0x05, 0x00, 0x0a, 0x00, 0x01, 0x80]
    );
    assert_eq!(codec.encoded_len(&packet).unwrap(), 7);
}

#[test]
fn test_engine_consumes_everything_after_malformed_frame() {
    let mut h = Harness::new();
    h.connect();
    // CONNACK with reserved acknowledge flags, then a well-formed PINGRESP
    let mut data = vec![0x20, 0x02, 0x02, 0x00];
    data.extend(MqttPingResp.to_bytes().unwrap());
    assert_eq!(h.engine.process_data(&data), data.len());
    assert!(!h.engine.is_connected());
    assert_eq!(*h.disconnects.borrow(), vec![BrokerDisconnectReason::ProtocolError]);

    // garbage arriving after the session ended is drained without another report
    assert_eq!(h.engine.process_data(&[0xF0, 0x00, 0x01]), 3);
    assert_eq!(h.disconnects.borrow().len(), 1);
}

#[test]
fn test_engine_drains_frames_while_disconnecting() {
    let mut h = Harness::new();
    h.connect();
    let (_, status) = h.publish("a/b", QoS::AtLeastOnce);
    let id = publish_id(&h.sent()[0]);
    let handle = h.engine.disconnect_prepare().unwrap();
    h.engine.disconnect_send(handle).unwrap();
    assert!(matches!(h.sent().as_slice(), [MqttPacket::Disconnect(_)]));

    let mut data = MqttPubAck::new(id).to_bytes().unwrap();
    data.extend(MqttPingResp.to_bytes().unwrap());
    assert_eq!(h.engine.process_data(&data), data.len());
    // the late PUBACK is dropped, the publish waits for the next session
    assert_eq!(*status.borrow(), None);
    assert_eq!(h.engine.sends_in_flight(), 1);
    assert!(h.sent().is_empty());
    assert!(h.disconnects.borrow().is_empty());
}
