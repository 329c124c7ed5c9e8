use crate::mqtt_client::context::{Effect, SessionCtx};
use crate::mqtt_client::error::{MqttClientResult, OpStatus};
use crate::mqtt_client::ops::Step;
use crate::mqtt_serde::mqttv3::MqttDisconnect;
use crate::mqtt_serde::MqttPacket;

/// Solicited DISCONNECT. Completes as soon as the packet is written.
#[derive(Debug, Default)]
pub(crate) struct DisconnectOp;

impl DisconnectOp {
    pub fn send(&mut self, ctx: &mut SessionCtx) -> MqttClientResult<Step> {
        ctx.send_message(&MqttPacket::Disconnect(MqttDisconnect))?;
        ctx.push_effect(Effect::BrokerDisconnected {
            reason: None,
            status: OpStatus::BrokerDisconnected,
        });
        Ok(Step::Complete(OpStatus::Complete))
    }
}
