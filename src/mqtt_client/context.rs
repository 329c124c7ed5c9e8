//! State every operation reaches through: configuration, session flags,
//! identifier and timer pools, and the byte output.

use std::collections::VecDeque;

use tracing::{error, trace, warn};

use crate::mqtt_client::error::{BrokerDisconnectReason, MqttClientError, MqttClientResult, OpStatus};
use crate::mqtt_client::ops::TimerOwner;
use crate::mqtt_client::opts::ClientConfig;
use crate::mqtt_client::packet_id::PacketIdRegistry;
use crate::mqtt_client::timer::{TimerId, TimerMgr};
use crate::mqtt_serde::{FrameCodec, MqttPacket};
use crate::mqtt_session::{ClientState, SessionState, SubscriptionFilters};

pub(crate) type SendOutputFn = Box<dyn FnMut(&[u8])>;
pub(crate) type NextTickProgramFn = Box<dyn FnMut(u32)>;
pub(crate) type CancelNextTickWaitFn = Box<dyn FnMut() -> u32>;
pub(crate) type ErrorLogFn = Box<dyn FnMut(&str)>;

/// Callbacks that never re-enter the engine.
#[derive(Default)]
pub(crate) struct Sinks {
    pub send_output: Option<SendOutputFn>,
    pub next_tick_program: Option<NextTickProgramFn>,
    pub cancel_next_tick_wait: Option<CancelNextTickWaitFn>,
    pub error_log: Option<ErrorLogFn>,
}

/// Session-level consequence of an operation step, applied by the engine
/// once the operation handler has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Effect {
    BrokerConnected {
        session_present: bool,
    },
    BrokerDisconnected {
        reason: Option<BrokerDisconnectReason>,
        status: OpStatus,
    },
}

pub(crate) struct SessionCtx {
    pub config: ClientConfig,
    pub client: ClientState,
    pub session: SessionState,
    pub filters: SubscriptionFilters,
    pub packet_ids: PacketIdRegistry,
    pub timers: TimerMgr<TimerOwner>,
    pub sinks: Sinks,
    /// Ping timer of the live keep-alive operation
    pub ping_timer: Option<TimerId>,
    codec: Box<dyn FrameCodec>,
    effects: VecDeque<Effect>,
}

impl SessionCtx {
    pub fn new(config: ClientConfig, codec: Box<dyn FrameCodec>) -> Self {
        let timers = TimerMgr::new(config.max_timers);
        Self {
            config,
            client: ClientState::default(),
            session: SessionState::default(),
            filters: SubscriptionFilters::default(),
            packet_ids: PacketIdRegistry::new(),
            timers,
            sinks: Sinks::default(),
            ping_timer: None,
            codec,
            effects: VecDeque::new(),
        }
    }

    pub fn codec_mut(&mut self) -> &mut dyn FrameCodec {
        self.codec.as_mut()
    }

    /// Fails with `BufferOverflow` if `packet` would not fit the output limit.
    pub fn check_output_size(&mut self, packet: &MqttPacket) -> MqttClientResult<()> {
        let Some(max) = self.config.max_output_packet_size else {
            return Ok(());
        };
        let len = self.codec.encoded_len(packet)?;
        if len > max {
            self.log_error(&format!(
                "{:?} of {} bytes exceeds output limit of {} bytes",
                packet.packet_type(),
                len,
                max
            ));
            return Err(MqttClientError::BufferOverflow);
        }
        Ok(())
    }

    /// Serializes `packet` and hands it to the output callback.
    pub fn send_message(&mut self, packet: &MqttPacket) -> MqttClientResult<()> {
        self.check_output_size(packet)?;
        let bytes = self.codec.encode(packet)?;
        let out = self
            .sinks
            .send_output
            .as_mut()
            .ok_or(MqttClientError::NotInitialized)?;
        trace!(packet_type = ?packet.packet_type(), len = bytes.len(), "sending packet");
        out(&bytes);

        if let Some(ping) = self.ping_timer {
            if self.session.keep_alive_ms > 0 {
                self.timers.wait(ping, self.session.keep_alive_ms);
            }
        }
        Ok(())
    }

    pub fn push_effect(&mut self, effect: Effect) {
        self.effects.push_back(effect);
    }

    pub fn pop_effect(&mut self) -> Option<Effect> {
        self.effects.pop_front()
    }

    /// Logs `msg` and schedules a reported protocol-error disconnect.
    pub fn protocol_violation(&mut self, msg: &str) {
        self.log_error(msg);
        self.push_effect(Effect::BrokerDisconnected {
            reason: Some(BrokerDisconnectReason::ProtocolError),
            status: OpStatus::ProtocolError,
        });
    }

    pub fn log_error(&mut self, msg: &str) {
        error!("{}", msg);
        if let Some(log) = self.sinks.error_log.as_mut() {
            log(msg);
        }
    }

    pub fn log_warn(&mut self, msg: &str) {
        warn!("{}", msg);
        if let Some(log) = self.sinks.error_log.as_mut() {
            log(msg);
        }
    }
}
