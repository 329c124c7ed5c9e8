//! Outgoing PUBLISH, QoS 0, 1 and 2.
//!
//! A send op is *sent* once the application hands it over, and *published*
//! once the first PUBLISH actually went out. Between the two it may sit
//! paused while publish ordering holds it back.

use tracing::{debug, warn};

use crate::mqtt_client::commands::{PublishConfig, QoS};
use crate::mqtt_client::context::SessionCtx;
use crate::mqtt_client::engine::PublishCompleteFn;
use crate::mqtt_client::error::{MqttClientError, MqttClientResult, OpStatus};
use crate::mqtt_client::ops::Step;
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_client::topic;
use crate::mqtt_serde::mqttv3::{MqttPubRel, MqttPublish};
use crate::mqtt_serde::MqttPacket;

pub(crate) struct SendOp {
    publish: MqttPublish,
    qos: QoS,
    resend_attempts: u32,
    // retransmissions in the current phase
    resends: u32,
    acked: bool,
    published: bool,
    paused: bool,
    sent: bool,
    pub timer: TimerId,
    pub response_timeout_ms: u32,
    pub callback: Option<PublishCompleteFn>,
}

impl SendOp {
    pub fn new(timer: TimerId, resend_attempts: u32, response_timeout_ms: u32) -> Self {
        Self {
            publish: MqttPublish::new(String::new(), 0, Vec::new(), None, false, false),
            qos: QoS::AtMostOnce,
            resend_attempts,
            resends: 0,
            acked: false,
            published: false,
            paused: false,
            sent: false,
            timer,
            response_timeout_ms,
            callback: None,
        }
    }

    pub fn configure(&mut self, ctx: &mut SessionCtx, config: PublishConfig) -> MqttClientResult<()> {
        if self.sent {
            return Err(MqttClientError::BadParam);
        }
        let rejection = if config.topic.is_empty() {
            Some("Topic hasn't been provided in publish configuration")
        } else if ctx.config.verify_outgoing_topic && !topic::is_valid_topic(&config.topic) {
            Some("Bad topic format in publish")
        } else if config.topic.len() > ctx.config.max_string_len {
            Some("Publish topic is too long")
        } else if config.qos > ctx.config.max_qos {
            Some("QoS value is too high in publish")
        } else {
            None
        };
        if let Some(msg) = rejection {
            ctx.log_error(msg);
            return Err(MqttClientError::BadParam);
        }

        self.qos = config.qos;
        self.publish = MqttPublish::new(
            config.topic,
            config.qos.as_u8(),
            config.data,
            None,
            config.retain,
            false,
        );
        Ok(())
    }

    pub fn set_resend_attempts(&mut self, attempts: u32) -> MqttClientResult<()> {
        if attempts == 0 {
            return Err(MqttClientError::BadParam);
        }
        self.resend_attempts = attempts;
        Ok(())
    }

    pub fn resend_attempts(&self) -> u32 {
        self.resend_attempts
    }

    pub fn packet_id(&self) -> Option<u16> {
        self.publish.message_id
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Hands the publish over. With `may_transmit == false` it is parked
    /// until [`SendOp::resume`].
    pub fn send(&mut self, ctx: &mut SessionCtx, may_transmit: bool) -> MqttClientResult<Step> {
        if self.publish.topic_name.is_empty() {
            ctx.log_error("Topic hasn't been properly configured, cannot publish");
            return Err(MqttClientError::InsufficientConfig);
        }

        if self.qos != QoS::AtMostOnce {
            let id = ctx
                .packet_ids
                .allocate()
                .ok_or(MqttClientError::RetryLater)?;
            self.publish.message_id = Some(id);
        }
        if let Err(e) = ctx.check_output_size(&MqttPacket::Publish(self.publish.clone())) {
            self.release_packet_id(ctx);
            return Err(e);
        }

        self.sent = true;
        if !may_transmit {
            debug!(packet_id = ?self.packet_id(), "publish paused by ordering");
            self.paused = true;
            return Ok(Step::Continue);
        }

        self.transmit(ctx).map_err(|e| {
            self.sent = false;
            self.release_packet_id(ctx);
            e
        })
    }

    fn release_packet_id(&mut self, ctx: &mut SessionCtx) {
        if let Some(id) = self.publish.message_id.take() {
            ctx.packet_ids.release(id);
        }
    }

    fn transmit(&mut self, ctx: &mut SessionCtx) -> MqttClientResult<Step> {
        ctx.send_message(&MqttPacket::Publish(self.publish.clone()))?;
        self.published = true;
        self.resends = 0;
        if self.qos == QoS::AtMostOnce {
            return Ok(Step::Complete(OpStatus::Complete));
        }
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        Ok(Step::Continue)
    }

    /// First transmission of a paused publish.
    pub fn resume(&mut self, ctx: &mut SessionCtx) -> Step {
        self.paused = false;
        match self.transmit(ctx) {
            Ok(step) => step,
            Err(e) => {
                ctx.log_error(&format!("Failed to send paused PUBLISH: {e}"));
                Step::Complete(OpStatus::from(e))
            }
        }
    }

    pub fn on_timeout(&mut self, ctx: &mut SessionCtx) -> Step {
        if self.resends >= self.resend_attempts {
            ctx.log_error("Exhausted all attempts to publish message, discarding publish");
            return Step::Complete(OpStatus::Timeout);
        }
        warn!(packet_id = ?self.packet_id(), resend = self.resends + 1, "timeout on publish acknowledgement");
        self.resends += 1;
        self.retransmit(ctx)
    }

    /// Retransmits the current phase without charging the resend budget.
    pub fn force_resend(&mut self, ctx: &mut SessionCtx) -> Step {
        if self.paused || !self.published {
            return Step::Continue;
        }
        ctx.timers.cancel(self.timer);
        self.retransmit(ctx)
    }

    pub fn post_reconnection_resend(&mut self, ctx: &mut SessionCtx) -> Step {
        ctx.timers.set_suspended(self.timer, false);
        self.force_resend(ctx)
    }

    fn retransmit(&mut self, ctx: &mut SessionCtx) -> Step {
        let packet = match self.packet_id() {
            Some(id) if self.acked => MqttPacket::PubRel(MqttPubRel::new(id)),
            _ => {
                self.publish.dup = true;
                MqttPacket::Publish(self.publish.clone())
            }
        };
        if let Err(e) = ctx.send_message(&packet) {
            ctx.log_error(&format!("Failed to resend {:?}: {e}", packet.packet_type()));
            return Step::Complete(OpStatus::from(e));
        }
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        Step::Continue
    }

    pub fn handle_puback(&mut self, ctx: &mut SessionCtx) -> Step {
        ctx.timers.cancel(self.timer);
        if self.qos != QoS::AtLeastOnce {
            ctx.protocol_violation("Unexpected PUBACK for QoS2 message");
            return Step::Complete(OpStatus::ProtocolError);
        }
        Step::Complete(OpStatus::Complete)
    }

    pub fn handle_pubrec(&mut self, ctx: &mut SessionCtx) -> Step {
        ctx.timers.cancel(self.timer);
        if self.qos != QoS::ExactlyOnce {
            ctx.protocol_violation("Unexpected PUBREC for QoS1 message");
            return Step::Complete(OpStatus::ProtocolError);
        }
        if self.acked {
            ctx.protocol_violation("Double PUBREC message");
            return Step::Complete(OpStatus::ProtocolError);
        }
        self.acked = true;
        self.resends = 0;
        let Some(id) = self.packet_id() else {
            return Step::Complete(OpStatus::InternalError);
        };
        if let Err(e) = ctx.send_message(&MqttPacket::PubRel(MqttPubRel::new(id))) {
            ctx.log_error(&format!("Failed to send PUBREL: {e}"));
            return Step::Complete(OpStatus::from(e));
        }
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        Step::Continue
    }

    pub fn handle_pubcomp(&mut self, ctx: &mut SessionCtx) -> Step {
        ctx.timers.cancel(self.timer);
        if self.qos != QoS::ExactlyOnce {
            ctx.protocol_violation("Unexpected PUBCOMP for QoS1 message");
            return Step::Complete(OpStatus::ProtocolError);
        }
        if !self.acked {
            ctx.protocol_violation("Unexpected PUBCOMP without PUBREC");
            return Step::Complete(OpStatus::ProtocolError);
        }
        Step::Complete(OpStatus::Complete)
    }

    pub fn connectivity_changed(&mut self, ctx: &mut SessionCtx) {
        let suspended = !ctx.session.connected || ctx.client.network_disconnected;
        ctx.timers.set_suspended(self.timer, suspended);
    }
}
