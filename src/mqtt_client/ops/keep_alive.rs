// SPDX-License-Identifier: MPL-2.0

use tracing::debug;

use crate::mqtt_client::context::{Effect, SessionCtx};
use crate::mqtt_client::error::{BrokerDisconnectReason, OpStatus};
use crate::mqtt_client::ops::{Step, TimerKind};
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_serde::mqttv3::MqttPingReq;
use crate::mqtt_serde::MqttPacket;

/// Session singleton driving PINGREQ/PINGRESP.
///
/// The ping timer is re-armed by every transmission (see
/// [`SessionCtx::send_message`]), the receive watchdog by every inbound
/// packet. Either one running out sends a PINGREQ; a missing PINGRESP ends
/// the session.
pub(crate) struct KeepAliveOp {
    pub ping_timer: TimerId,
    pub recv_timer: TimerId,
    pub resp_timer: TimerId,
}

impl KeepAliveOp {
    pub fn new(ping_timer: TimerId, recv_timer: TimerId, resp_timer: TimerId) -> Self {
        Self {
            ping_timer,
            recv_timer,
            resp_timer,
        }
    }

    pub fn start(&mut self, ctx: &mut SessionCtx) {
        ctx.ping_timer = Some(self.ping_timer);
        let keep_alive = ctx.session.keep_alive_ms;
        if keep_alive > 0 {
            ctx.timers.wait(self.ping_timer, keep_alive);
        }
    }

    pub fn message_received(&mut self, ctx: &mut SessionCtx, packet: &MqttPacket) {
        if matches!(packet, MqttPacket::PingResp(_)) {
            ctx.timers.cancel(self.resp_timer);
        }
        let keep_alive = ctx.session.keep_alive_ms;
        if keep_alive > 0 {
            ctx.timers.wait(self.recv_timer, keep_alive);
        }
    }

    pub fn on_timer(&mut self, ctx: &mut SessionCtx, kind: TimerKind) -> Step {
        match kind {
            TimerKind::PingResponse => {
                ctx.log_error("The broker did not respond to PING");
                ctx.push_effect(Effect::BrokerDisconnected {
                    reason: Some(BrokerDisconnectReason::NoBrokerResponse),
                    status: OpStatus::BrokerDisconnected,
                });
            }
            _ => self.send_ping(ctx),
        }
        Step::Continue
    }

    fn send_ping(&mut self, ctx: &mut SessionCtx) {
        if ctx.timers.is_active(self.resp_timer) {
            return;
        }
        if let Err(e) = ctx.send_message(&MqttPacket::PingReq(MqttPingReq)) {
            ctx.log_error(&format!("Failed to send PINGREQ: {e}"));
            return;
        }
        debug!("PINGREQ sent");
        ctx.timers.wait(self.resp_timer, ctx.config.response_timeout_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_client::ops::test_support::{sent_packets, test_ctx};
    use crate::mqtt_client::ops::{OpId, TimerOwner};
    use crate::mqtt_serde::mqttv3::MqttPingResp;

    fn keep_alive_op(ctx: &mut SessionCtx) -> KeepAliveOp {
        let mut alloc = |kind| {
            ctx.timers
                .alloc(TimerOwner {
                    op: OpId::for_test(0),
                    kind,
                })
                .unwrap()
        };
        let ping = alloc(TimerKind::Ping);
        let recv = alloc(TimerKind::RecvWatchdog);
        let resp = alloc(TimerKind::PingResponse);
        KeepAliveOp::new(ping, recv, resp)
    }

    #[test]
    fn test_single_outstanding_ping() {
        let (mut ctx, out) = test_ctx();
        ctx.session.keep_alive_ms = 5000;
        let mut op = keep_alive_op(&mut ctx);
        op.start(&mut ctx);
        assert_eq!(ctx.timers.remaining(op.ping_timer), Some(5000));

        op.on_timer(&mut ctx, TimerKind::Ping);
        op.on_timer(&mut ctx, TimerKind::RecvWatchdog);
        assert_eq!(sent_packets(&out), vec![MqttPacket::PingReq(MqttPingReq)]);
        assert_eq!(ctx.timers.remaining(op.resp_timer), Some(2000));

        op.message_received(&mut ctx, &MqttPacket::PingResp(MqttPingResp));
        assert!(!ctx.timers.is_active(op.resp_timer));
        assert_eq!(ctx.timers.remaining(op.recv_timer), Some(5000));
    }

    #[test]
    fn test_missing_pingresp_disconnects() {
        let (mut ctx, _) = test_ctx();
        let mut op = keep_alive_op(&mut ctx);
        assert_eq!(op.on_timer(&mut ctx, TimerKind::PingResponse), Step::Continue);
        assert_eq!(
            ctx.pop_effect(),
            Some(Effect::BrokerDisconnected {
                reason: Some(BrokerDisconnectReason::NoBrokerResponse),
                status: OpStatus::BrokerDisconnected
            })
        );
    }

    #[test]
    fn test_failed_pingreq_arms_no_response_timer() {
        let (mut ctx, out) = test_ctx();
        ctx.sinks.send_output = None;
        let mut op = keep_alive_op(&mut ctx);
        op.on_timer(&mut ctx, TimerKind::Ping);
        assert!(out.borrow().is_empty());
        assert!(!ctx.timers.is_active(op.resp_timer));
    }
}
