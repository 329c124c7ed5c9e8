use tracing::debug;

use crate::mqtt_client::context::SessionCtx;
use crate::mqtt_client::engine::UnsubscribeCompleteFn;
use crate::mqtt_client::error::{MqttClientError, MqttClientResult, OpStatus};
use crate::mqtt_client::ops::subscribe::check_filter;
use crate::mqtt_client::ops::Step;
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_serde::mqttv3::{MqttUnsubAck, MqttUnsubscribe};
use crate::mqtt_serde::MqttPacket;

pub(crate) struct UnsubscribeOp {
    filters: Vec<String>,
    pub packet_id: Option<u16>,
    pub timer: TimerId,
    pub response_timeout_ms: u32,
    pub callback: Option<UnsubscribeCompleteFn>,
}

impl UnsubscribeOp {
    pub fn new(timer: TimerId, response_timeout_ms: u32) -> Self {
        Self {
            filters: Vec::new(),
            packet_id: None,
            timer,
            response_timeout_ms,
            callback: None,
        }
    }

    pub fn config_topic(&mut self, ctx: &mut SessionCtx, filter: &str) -> MqttClientResult<()> {
        if self.packet_id.is_some() {
            return Err(MqttClientError::BadParam);
        }
        check_filter(ctx, filter)?;
        if ctx.config.verify_subscription_filter && !ctx.filters.contains(filter) {
            ctx.log_error(&format!("Requested unsubscribe from \"{filter}\" which is not subscribed"));
            return Err(MqttClientError::BadParam);
        }
        self.filters.push(filter.to_string());
        Ok(())
    }

    pub fn send(&mut self, ctx: &mut SessionCtx) -> MqttClientResult<()> {
        if self.filters.is_empty() {
            ctx.log_error("No unsubscribe topic has been configured");
            return Err(MqttClientError::InsufficientConfig);
        }
        let packet_id = ctx
            .packet_ids
            .allocate()
            .ok_or(MqttClientError::RetryLater)?;
        let packet = MqttPacket::Unsubscribe(MqttUnsubscribe::new(packet_id, self.filters.clone()));
        if let Err(e) = ctx.send_message(&packet) {
            ctx.packet_ids.release(packet_id);
            return Err(e);
        }
        self.packet_id = Some(packet_id);
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        Ok(())
    }

    /// UNSUBACK carries no per-filter result, so every filter is dropped.
    pub fn handle_unsuback(&mut self, ctx: &mut SessionCtx, ack: &MqttUnsubAck) -> Option<Step> {
        if self.packet_id != Some(ack.message_id) {
            return None;
        }
        ctx.timers.cancel(self.timer);
        for filter in &self.filters {
            ctx.filters.remove(filter);
        }
        debug!(packet_id = ack.message_id, filters = ?self.filters, "unsubscribe acknowledged");
        Some(Step::Complete(OpStatus::Complete))
    }

    pub fn on_timeout(&mut self) -> Step {
        Step::Complete(OpStatus::Timeout)
    }
}
