use tracing::debug;

use crate::mqtt_client::commands::{ConnectConfig, ConnectResponse, ConnectReturnCode, WillConfig};
use crate::mqtt_client::context::{Effect, SessionCtx};
use crate::mqtt_client::engine::ConnectCompleteFn;
use crate::mqtt_client::error::{MqttClientError, MqttClientResult, OpStatus};
use crate::mqtt_client::ops::Step;
use crate::mqtt_client::timer::TimerId;
use crate::mqtt_client::topic;
use crate::mqtt_serde::mqttv3::{MqttConnAck, MqttConnect, Will};
use crate::mqtt_serde::MqttPacket;
use crate::mqtt_session::SessionState;

/// CONNECT exchange: configuring, then waiting for CONNACK.
pub(crate) struct ConnectOp {
    config: ConnectConfig,
    will: Option<WillConfig>,
    pub timer: TimerId,
    pub response_timeout_ms: u32,
    sent: bool,
    pub callback: Option<ConnectCompleteFn>,
    pub response: Option<ConnectResponse>,
}

impl ConnectOp {
    pub fn new(timer: TimerId, response_timeout_ms: u32) -> Self {
        Self {
            config: ConnectConfig::default(),
            will: None,
            timer,
            response_timeout_ms,
            sent: false,
            callback: None,
            response: None,
        }
    }

    pub fn configure(&mut self, ctx: &mut SessionCtx, config: ConnectConfig) -> MqttClientResult<()> {
        if self.sent {
            return Err(MqttClientError::BadParam);
        }
        let max = ctx.config.max_string_len;
        let rejection = if config.password.is_some() && config.username.is_none() {
            Some("Password cannot be configured without the username")
        } else if !config.clean_session
            && ctx.client.first_connect
            && ctx.config.verify_subscription_filter
        {
            Some("Clean session flag needs to be set on the first connection attempt")
        } else if config.keep_alive == 0 {
            Some("Keep alive must be set to a non-zero value")
        } else if config.keep_alive > u32::from(u16::MAX) {
            Some("Keep alive value is too high in connect configuration")
        } else if config.client_id.len() > max {
            Some("Client ID is too long")
        } else if config.client_id.is_empty() && !config.clean_session {
            Some("Clean session flag needs to be set for empty client id")
        } else if config.username.as_ref().is_some_and(|u| u.len() > max) {
            Some("Username is too long")
        } else if config.password.as_ref().is_some_and(|p| p.len() > max) {
            Some("Password is too long")
        } else {
            None
        };
        if let Some(msg) = rejection {
            ctx.log_error(msg);
            return Err(MqttClientError::BadParam);
        }
        self.config = config;
        Ok(())
    }

    pub fn configure_will(&mut self, ctx: &mut SessionCtx, will: WillConfig) -> MqttClientResult<()> {
        if self.sent {
            return Err(MqttClientError::BadParam);
        }
        let max = ctx.config.max_string_len;
        let rejection = if will.topic.is_empty() {
            Some("Will topic is not provided")
        } else if ctx.config.verify_outgoing_topic && !topic::is_valid_topic(&will.topic) {
            Some("Bad will topic format")
        } else if will.qos > ctx.config.max_qos {
            Some("Invalid will QoS value in configuration")
        } else if will.topic.len() > max {
            Some("Will topic is too long")
        } else if will.data.len() > max {
            Some("Will data is too long")
        } else {
            None
        };
        if let Some(msg) = rejection {
            ctx.log_error(msg);
            return Err(MqttClientError::BadParam);
        }
        self.will = Some(will);
        Ok(())
    }

    fn to_packet(&self) -> MqttPacket {
        // keep_alive was range checked by configure
        let keep_alive = u16::try_from(self.config.keep_alive).unwrap_or(u16::MAX);
        let mut connect = MqttConnect::new(
            self.config.client_id.clone(),
            keep_alive,
            self.config.clean_session,
        );
        connect.username = self.config.username.clone();
        connect.password = self.config.password.clone();
        connect.will = self.will.as_ref().map(|w| Will {
            retain: w.retain,
            qos: w.qos.as_u8(),
            topic: w.topic.clone(),
            message: w.data.clone(),
        });
        MqttPacket::Connect(connect)
    }

    pub fn send(&mut self, ctx: &mut SessionCtx) -> MqttClientResult<()> {
        if !self.config.clean_session
            && ctx.client.first_connect
            && ctx.config.verify_subscription_filter
        {
            ctx.log_error(
                "Clean session flag needs to be set on the first connection attempt, perform configuration first",
            );
            return Err(MqttClientError::InsufficientConfig);
        }
        if self.config.client_id.is_empty() && !self.config.clean_session {
            ctx.log_error("Clean session flag needs to be set for empty client id");
            return Err(MqttClientError::InsufficientConfig);
        }

        ctx.send_message(&self.to_packet())?;
        self.sent = true;
        ctx.timers.wait(self.timer, self.response_timeout_ms);
        debug!(client_id = %self.config.client_id, "CONNECT sent");
        Ok(())
    }

    pub fn handle_connack(&mut self, ctx: &mut SessionCtx, ack: &MqttConnAck) -> Option<Step> {
        if !self.sent {
            return None;
        }
        ctx.timers.cancel(self.timer);

        let Some(return_code) = ConnectReturnCode::from_u8(ack.return_code) else {
            ctx.protocol_violation(&format!("Unknown connection return code {}", ack.return_code));
            return Some(Step::Complete(OpStatus::ProtocolError));
        };
        if ack.session_present && self.config.clean_session {
            ctx.protocol_violation("Session present when clean session is requested");
            return Some(Step::Complete(OpStatus::ProtocolError));
        }

        self.response = Some(ConnectResponse {
            return_code,
            session_present: ack.session_present,
        });

        if return_code != ConnectReturnCode::Accepted {
            debug!(?return_code, "connection rejected by broker");
            ctx.session = SessionState::default();
            return Some(Step::Complete(OpStatus::Complete));
        }

        if !ack.session_present {
            ctx.filters.clear();
        }
        ctx.session.keep_alive_ms = self.config.keep_alive.saturating_mul(1000);
        ctx.push_effect(Effect::BrokerConnected {
            session_present: ack.session_present,
        });
        Some(Step::Complete(OpStatus::Complete))
    }

    pub fn on_timeout(&mut self) -> Step {
        Step::Complete(OpStatus::Timeout)
    }
}
