use tracing::debug;

use crate::mqtt_client::commands::{QoS, SubscribeResponse, SubscribeReturnCode, SubscribeTopicConfig};
use crate::mqtt_client::context::SessionCtx;
use crate::mqtt_client::engine::SubscribeCompleteFn;
use crate::mqtt_client::error::{MqttClientError, MqttClientResult, OpStatus};
use crate::mqtt_client::ops::Step;
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_client::topic;
use crate::mqtt_serde::mqttv3::{MqttSubAck, MqttSubscribe, TopicSubscription};
use crate::mqtt_serde::MqttPacket;

const SUBACK_FAILURE: u8 = 0x80;

/// Checks a subscribe or unsubscribe filter against the configured limits.
pub(crate) fn check_filter(ctx: &mut SessionCtx, filter: &str) -> MqttClientResult<()> {
    let rejection = if filter.is_empty() {
        Some("Topic filter is not provided")
    } else if ctx.config.verify_outgoing_topic && !topic::is_valid_filter(filter) {
        Some("Bad topic filter format")
    } else if filter.len() > ctx.config.max_string_len {
        Some("Topic filter is too long")
    } else {
        None
    };
    match rejection {
        Some(msg) => {
            ctx.log_error(msg);
            Err(MqttClientError::BadParam)
        }
        None => Ok(()),
    }
}

pub(crate) struct SubscribeOp {
    topics: Vec<SubscribeTopicConfig>,
    pub packet_id: Option<u16>,
    pub timer: TimerId,
    pub response_timeout_ms: u32,
    pub callback: Option<SubscribeCompleteFn>,
    pub response: Option<SubscribeResponse>,
}

impl SubscribeOp {
    pub fn new(timer: TimerId, response_timeout_ms: u32) -> Self {
        Self {
            topics: Vec::new(),
            packet_id: None,
            timer,
            response_timeout_ms,
            callback: None,
            response: None,
        }
    }

    pub fn config_topic(&mut self, ctx: &mut SessionCtx, config: SubscribeTopicConfig) -> MqttClientResult<()> {
        if self.packet_id.is_some() {
            return Err(MqttClientError::BadParam);
        }
        check_filter(ctx, &config.filter)?;
        if config.max_qos > ctx.config.max_qos {
            ctx.log_error("Bad subscription qos value");
            return Err(MqttClientError::BadParam);
        }
        self.topics.push(config);
        Ok(())
    }

    pub fn send(&mut self, ctx: &mut SessionCtx) -> MqttClientResult<()> {
        if self.topics.is_empty() {
            ctx.log_error("No subscribe topic has been configured");
            return Err(MqttClientError::InsufficientConfig);
        }
        let packet_id = ctx
            .packet_ids
            .allocate()
            .ok_or(MqttClientError::RetryLater)?;
        let subscriptions = self
            .topics
            .iter()
            .map(|t| TopicSubscription::new(t.filter.clone(), t.max_qos.as_u8()))
            .collect();
        let packet = MqttPacket::Subscribe(MqttSubscribe::new(packet_id, subscriptions));
        if let Err(e) = ctx.send_message(&packet) {
            ctx.packet_ids.release(packet_id);
            return Err(e);
        }
        self.packet_id = Some(packet_id);
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        Ok(())
    }

    pub fn handle_suback(&mut self, ctx: &mut SessionCtx, ack: &MqttSubAck) -> Option<Step> {
        if self.packet_id != Some(ack.message_id) {
            return None;
        }
        ctx.timers.cancel(self.timer);

        if ack.return_codes.len() != self.topics.len() {
            ctx.protocol_violation("Amount of return codes in SUBACK doesn't match amount of subscribe topics");
            return Some(Step::Complete(OpStatus::ProtocolError));
        }

        let mut return_codes = Vec::with_capacity(ack.return_codes.len());
        for (requested, &code) in self.topics.iter().zip(&ack.return_codes) {
            if code == SUBACK_FAILURE {
                return_codes.push(SubscribeReturnCode::Failure);
                continue;
            }
            let granted = match QoS::try_from(code) {
                Ok(granted) if granted <= requested.max_qos => granted,
                Ok(_) => {
                    ctx.protocol_violation("Granted QoS in SUBACK is greater than requested");
                    return Some(Step::Complete(OpStatus::ProtocolError));
                }
                Err(_) => {
                    ctx.protocol_violation(&format!("Invalid return code 0x{code:02x} in SUBACK"));
                    return Some(Step::Complete(OpStatus::ProtocolError));
                }
            };
            return_codes.push(SubscribeReturnCode::Granted(granted));
        }

        if ctx.config.verify_subscription_filter {
            for (requested, code) in self.topics.iter().zip(&return_codes) {
                if matches!(code, SubscribeReturnCode::Granted(_)) {
                    ctx.filters.insert(&requested.filter);
                }
            }
        }
        debug!(packet_id = ack.message_id, ?return_codes, "subscription acknowledged");
        self.response = Some(SubscribeResponse { return_codes });
        Some(Step::Complete(OpStatus::Complete))
    }

    pub fn on_timeout(&mut self) -> Step {
        Step::Complete(OpStatus::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_client::context::Effect;
    use crate::mqtt_client::ops::test_support::{sent_packets, test_ctx};
    use crate::mqtt_client::ops::{OpId, TimerKind, TimerOwner};

    fn subscribe_op(ctx: &mut SessionCtx) -> SubscribeOp {
        let owner = TimerOwner {
            op: OpId::for_test(0),
            kind: TimerKind::Response,
        };
        SubscribeOp::new(ctx.timers.alloc(owner).unwrap(), 1000)
    }

    #[test]
    fn test_config_topic_validation() {
        let (mut ctx, _) = test_ctx();
        let mut op = subscribe_op(&mut ctx);
        let bad = ["", "a/#/b", "a+/b"];
        for filter in bad {
            assert_eq!(
                op.config_topic(&mut ctx, SubscribeTopicConfig::new(filter, QoS::AtMostOnce)),
                Err(MqttClientError::BadParam)
            );
        }
        ctx.config.max_qos = QoS::AtLeastOnce;
        assert_eq!(
            op.config_topic(&mut ctx, SubscribeTopicConfig::new("a/b", QoS::ExactlyOnce)),
            Err(MqttClientError::BadParam)
        );
        assert_eq!(
            op.config_topic(&mut ctx, SubscribeTopicConfig::new("a/+/c", QoS::AtLeastOnce)),
            Ok(())
        );
    }

    #[test]
    fn test_send_requires_topics() {
        let (mut ctx, out) = test_ctx();
        let mut op = subscribe_op(&mut ctx);
        assert_eq!(op.send(&mut ctx), Err(MqttClientError::InsufficientConfig));
        assert!(out.borrow().is_empty());
        assert_eq!(ctx.packet_ids.in_use_count(), 0);
    }

    #[test]
    fn test_suback_inserts_granted_filters() {
        let (mut ctx, out) = test_ctx();
        let mut op = subscribe_op(&mut ctx);
        op.config_topic(&mut ctx, SubscribeTopicConfig::new("a/+/c", QoS::ExactlyOnce))
            .unwrap();
        op.config_topic(&mut ctx, SubscribeTopicConfig::new("denied", QoS::AtMostOnce))
            .unwrap();
        op.send(&mut ctx).unwrap();
        let id = op.packet_id.unwrap();
        match &sent_packets(&out)[0] {
            MqttPacket::Subscribe(sub) => {
                assert_eq!(sub.message_id, id);
                assert_eq!(sub.subscriptions.len(), 2);
            }
            _ => panic!("Expected SUBSCRIBE packet"),
        }

        // other packet id is not ours
        assert_eq!(op.handle_suback(&mut ctx, &MqttSubAck::new(id + 1, vec![1, 0x80])), None);

        let step = op.handle_suback(&mut ctx, &MqttSubAck::new(id, vec![1, 0x80]));
        assert_eq!(step, Some(Step::Complete(OpStatus::Complete)));
        assert_eq!(
            op.response.unwrap().return_codes,
            vec![
                SubscribeReturnCode::Granted(QoS::AtLeastOnce),
                SubscribeReturnCode::Failure
            ]
        );
        assert!(ctx.filters.contains("a/+/c"));
        assert!(!ctx.filters.contains("denied"));
    }

    #[test]
    fn test_suback_without_verification_keeps_filters_empty() {
        let (mut ctx, _) = test_ctx();
        ctx.config.verify_subscription_filter = false;
        let mut op = subscribe_op(&mut ctx);
        op.config_topic(&mut ctx, SubscribeTopicConfig::new("a", QoS::AtMostOnce))
            .unwrap();
        op.send(&mut ctx).unwrap();
        let id = op.packet_id.unwrap();
        op.handle_suback(&mut ctx, &MqttSubAck::new(id, vec![0]));
        assert!(ctx.filters.is_empty());
    }

    #[test]
    fn test_suback_violations() {
        for codes in [vec![0, 0], vec![2], vec![3]] {
            let (mut ctx, _) = test_ctx();
            let mut op = subscribe_op(&mut ctx);
            op.config_topic(&mut ctx, SubscribeTopicConfig::new("a", QoS::AtLeastOnce))
                .unwrap();
            op.send(&mut ctx).unwrap();
            let id = op.packet_id.unwrap();
            let step = op.handle_suback(&mut ctx, &MqttSubAck::new(id, codes));
            assert_eq!(step, Some(Step::Complete(OpStatus::ProtocolError)));
            assert!(matches!(
                ctx.pop_effect(),
                Some(Effect::BrokerDisconnected { .. })
            ));
            assert!(ctx.filters.is_empty());
        }
    }
}
