use tracing::debug;

use crate::mqtt_client::commands::QoS;
use crate::mqtt_client::context::SessionCtx;
use crate::mqtt_client::error::OpStatus;
use crate::mqtt_client::ops::Step;
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_client::topic;
use crate::mqtt_serde::mqttv3::{MqttPubAck, MqttPubComp, MqttPubRec, MqttPublish};
use crate::mqtt_serde::MqttPacket;

/// Incoming PUBLISH. Only QoS 2 outlives the packet that created it.
pub(crate) struct RecvOp {
    /// Set while a QoS 2 exchange waits for PUBREL
    pub packet_id: Option<u16>,
    pub timer: TimerId,
    pub response_timeout_ms: u32,
}

impl RecvOp {
    pub fn new(timer: TimerId, response_timeout_ms: u32) -> Self {
        Self {
            packet_id: None,
            timer,
            response_timeout_ms,
        }
    }

    /// Validates an inbound PUBLISH before it is reported.
    ///
    /// Returns the completion step on a violation, which has already been
    /// queued as a protocol-error disconnect.
    pub fn accept(&mut self, ctx: &mut SessionCtx, publish: &MqttPublish) -> Option<Step> {
        let violation = match QoS::try_from(publish.qos) {
            Err(_) => Some("Received PUBLISH with unknown QoS value".to_string()),
            Ok(qos) if qos > ctx.config.max_qos => Some("Invalid QoS in PUBLISH from broker".to_string()),
            Ok(qos) if qos != QoS::AtMostOnce && publish.message_id.is_none() => {
                Some("Received PUBLISH without packet identifier".to_string())
            }
            Ok(_) if !ctx.session.connected => Some("Received PUBLISH when not CONNECTED".to_string()),
            Ok(_) if publish.topic_name.is_empty()
                || (ctx.config.verify_incoming_topic && !topic::is_valid_topic(&publish.topic_name)) =>
            {
                Some(format!("Received PUBLISH with invalid topic \"{}\"", publish.topic_name))
            }
            Ok(_) if ctx.config.verify_subscription_filter
                && !ctx.filters.iter().any(|f| topic::matches(&publish.topic_name, f)) =>
            {
                Some(format!("Received PUBLISH on non-subscribed topic \"{}\"", publish.topic_name))
            }
            Ok(_) => None,
        };
        violation.map(|msg| {
            ctx.protocol_violation(&msg);
            Step::Complete(OpStatus::ProtocolError)
        })
    }

    /// Acknowledges an accepted PUBLISH after it was reported.
    pub fn acknowledge(&mut self, ctx: &mut SessionCtx, publish: &MqttPublish) -> Step {
        let (qos, id) = match (QoS::try_from(publish.qos), publish.message_id) {
            (Ok(QoS::AtMostOnce), _) => return Step::Complete(OpStatus::Complete),
            (Ok(qos), Some(id)) => (qos, id),
            _ => return Step::Complete(OpStatus::InternalError),
        };
        if qos == QoS::AtLeastOnce {
            return match ctx.send_message(&MqttPacket::PubAck(MqttPubAck::new(id))) {
                Ok(()) => Step::Complete(OpStatus::Complete),
                Err(e) => Step::Complete(OpStatus::from(e)),
            };
        }
        self.packet_id = Some(id);
        self.send_pubrec(ctx, id)
    }

    /// Retransmitted QoS 2 PUBLISH for an exchange already in progress.
    pub fn handle_dup_publish(&mut self, ctx: &mut SessionCtx) -> Step {
        match self.packet_id {
            Some(id) => {
                debug!(packet_id = id, "duplicate QoS2 PUBLISH");
                self.send_pubrec(ctx, id)
            }
            None => Step::Continue,
        }
    }

    fn send_pubrec(&mut self, ctx: &mut SessionCtx, id: u16) -> Step {
        if let Err(e) = ctx.send_message(&MqttPacket::PubRec(MqttPubRec::new(id))) {
            return Step::Complete(OpStatus::from(e));
        }
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        Step::Continue
    }

    pub fn handle_pubrel(&mut self, ctx: &mut SessionCtx) -> Step {
        let Some(id) = self.packet_id else {
            return Step::Continue;
        };
        ctx.timers.cancel(self.timer);
        match ctx.send_message(&MqttPacket::PubComp(MqttPubComp::new(id))) {
            Ok(()) => Step::Complete(OpStatus::Complete),
            Err(e) => Step::Complete(OpStatus::from(e)),
        }
    }

    /// The broker re-drives an unfinished exchange, so a missing PUBREL
    /// just drops the operation.
    pub fn on_timeout(&mut self, ctx: &mut SessionCtx) -> Step {
        ctx.log_warn("Timeout on PUBREL reception from broker");
        Step::Complete(OpStatus::Timeout)
    }

    pub fn connectivity_changed(&mut self, ctx: &mut SessionCtx) {
        let suspended = !ctx.session.connected || ctx.client.network_disconnected;
        ctx.timers.set_suspended(self.timer, suspended);
    }

    pub fn post_reconnection_resume(&mut self, ctx: &mut SessionCtx) {
        self.connectivity_changed(ctx);
        if self.packet_id.is_some() {
            ctx.timers.wait(self.timer, self.response_timeout_ms);
        }
    }
}
