#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mqtt311_engine::mqtt_client::{
    BrokerDisconnectReason, ClientConfig, ConnectConfig, ConnectResponse, MqttEngine, OpStatus, PublishConfig,
    PublishHandle, QoS, SubscribeTopicConfig,
};
use mqtt311_engine::mqtt_serde::mqttv3::{MqttConnAck, MqttSubAck};
use mqtt311_engine::mqtt_serde::{MqttPacket, MqttParser};

/// Inbound application message as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub topic: String,
    pub data: Vec<u8>,
    pub qos: QoS,
    pub retained: bool,
}

/// Shared slot a completion callback writes its status into.
pub type StatusSlot = Rc<RefCell<Option<OpStatus>>>;

/// Engine wired to recording callbacks, standing in for a transport and an
/// event loop.
pub struct Harness {
    pub engine: MqttEngine,
    output: Rc<RefCell<MqttParser>>,
    pub disconnects: Rc<RefCell<Vec<BrokerDisconnectReason>>>,
    pub messages: Rc<RefCell<Vec<Received>>>,
    pub errors: Rc<RefCell<Vec<String>>>,
    /// Waits requested through the next-tick-program callback
    pub programmed: Rc<RefCell<Vec<u32>>>,
    /// Returned (and reset) by the cancel-next-tick-wait callback
    pub elapsed: Rc<Cell<u32>>,
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        init_tracing();
        let mut engine = MqttEngine::new(config);
        let output = Rc::new(RefCell::new(MqttParser::default()));
        let disconnects = Rc::new(RefCell::new(Vec::new()));
        let messages = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));
        let programmed = Rc::new(RefCell::new(Vec::new()));
        let elapsed = Rc::new(Cell::new(0));

        let sink = output.clone();
        engine.set_send_output_callback(move |bytes| sink.borrow_mut().feed(bytes));
        let sink = disconnects.clone();
        engine.set_broker_disconnect_report_callback(move |_, reason| sink.borrow_mut().push(reason));
        let sink = messages.clone();
        engine.set_message_received_callback(move |_, info| {
            sink.borrow_mut().push(Received {
                topic: info.topic.to_string(),
                data: info.data.to_vec(),
                qos: info.qos,
                retained: info.retained,
            })
        });
        let sink = errors.clone();
        engine.set_error_log_callback(move |msg| sink.borrow_mut().push(msg.to_string()));
        let sink = programmed.clone();
        engine.set_next_tick_program_callback(move |ms| sink.borrow_mut().push(ms));
        let source = elapsed.clone();
        engine.set_cancel_next_tick_wait_callback(move || source.replace(0));

        Self {
            engine,
            output,
            disconnects,
            messages,
            errors,
            programmed,
            elapsed,
        }
    }

    /// Packets written by the engine since the last call.
    pub fn sent(&mut self) -> Vec<MqttPacket> {
        self.output
            .borrow_mut()
            .drain_packets()
            .expect("engine produced malformed output")
    }

    /// Delivers a packet from the broker, asserting it was fully consumed.
    pub fn feed(&mut self, packet: impl Into<MqttPacket>) {
        let bytes = packet.into().to_bytes().unwrap();
        assert_eq!(self.engine.process_data(&bytes), bytes.len());
    }

    pub fn last_programmed(&self) -> Option<u32> {
        self.programmed.borrow().last().copied()
    }

    /// Runs a clean-session connect through CONNACK.
    pub fn connect(&mut self) -> Option<ConnectResponse> {
        self.connect_with(ConnectConfig::new("test-client").clean_session(true), false)
    }

    pub fn connect_with(&mut self, config: ConnectConfig, session_present: bool) -> Option<ConnectResponse> {
        let handle = self.engine.connect_prepare().unwrap();
        self.engine.connect_config(handle, config).unwrap();
        let response = Rc::new(RefCell::new(None));
        let slot = response.clone();
        self.engine
            .connect_send(handle, move |_, status, resp| {
                assert_eq!(status, OpStatus::Complete);
                *slot.borrow_mut() = resp.cloned();
            })
            .unwrap();
        let sent = self.sent();
        assert!(matches!(sent.as_slice(), [MqttPacket::Connect(_)]));
        self.feed(MqttConnAck::new(session_present, 0));
        let response = response.borrow_mut().take();
        response
    }

    /// Subscribes to `filter` and acknowledges it with the requested QoS.
    pub fn subscribe(&mut self, filter: &str, qos: QoS) {
        let handle = self.engine.subscribe_prepare().unwrap();
        self.engine
            .subscribe_config_topic(handle, SubscribeTopicConfig::new(filter, qos))
            .unwrap();
        let status = new_slot();
        let slot = status.clone();
        self.engine
            .subscribe_send(handle, move |_, _, s, _| *slot.borrow_mut() = Some(s))
            .unwrap();
        let packet_id = match self.sent().as_slice() {
            [MqttPacket::Subscribe(sub)] => sub.message_id,
            other => panic!("Expected SUBSCRIBE, got {other:?}"),
        };
        self.feed(MqttSubAck::new(packet_id, vec![qos.as_u8()]));
        assert_eq!(*status.borrow(), Some(OpStatus::Complete));
    }

    /// Prepares and sends a publish, recording its completion status.
    pub fn publish(&mut self, topic: &str, qos: QoS) -> (PublishHandle, StatusSlot) {
        let handle = self.engine.publish_prepare().unwrap();
        self.engine
            .publish_config(handle, PublishConfig::new(topic, topic.as_bytes().to_vec(), qos))
            .unwrap();
        let status = new_slot();
        let slot = status.clone();
        self.engine
            .publish_send_with_callback(handle, move |_, _, s| *slot.borrow_mut() = Some(s))
            .unwrap();
        (handle, status)
    }
}

pub fn new_slot() -> StatusSlot {
    Rc::new(RefCell::new(None))
}

/// Packet id of an outgoing PUBLISH.
pub fn publish_id(packet: &MqttPacket) -> u16 {
    match packet {
        MqttPacket::Publish(p) => p.message_id.expect("QoS>0 PUBLISH carries an id"),
        other => panic!("Expected PUBLISH, got {other:?}"),
    }
}
