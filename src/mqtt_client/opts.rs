use serde::{Deserialize, Serialize};

use crate::mqtt_client::commands::QoS;

/// Ordering guarantee between independently sent publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PublishOrdering {
    /// Preserve order only among publishes of equal QoS.
    #[default]
    SameQos,
    /// Preserve a strict global order. A publish waits while an earlier one
    /// with higher QoS is still in flight.
    Full,
}

/// Per-variant operation pool sizes. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpLimits {
    pub connect: Option<usize>,
    pub disconnect: Option<usize>,
    pub keep_alive: Option<usize>,
    pub subscribe: Option<usize>,
    pub unsubscribe: Option<usize>,
    pub send: Option<usize>,
    pub recv: Option<usize>,
}

impl Default for OpLimits {
    fn default() -> Self {
        Self {
            connect: Some(1),
            disconnect: Some(1),
            keep_alive: Some(1),
            subscribe: None,
            unsubscribe: None,
            send: None,
            recv: None,
        }
    }
}

/// Engine configuration.
///
/// Every field has a default, so a configuration file only needs to name
/// what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub response_timeout_ms: u32,
    pub publish_ordering: PublishOrdering,
    /// Retransmissions allowed per publish phase before it times out
    pub resend_attempts: u32,
    pub verify_outgoing_topic: bool,
    pub verify_incoming_topic: bool,
    /// Track acknowledged filters and require inbound topics to match one
    pub verify_subscription_filter: bool,
    pub max_qos: QoS,
    pub max_string_len: usize,
    pub max_output_packet_size: Option<usize>,
    /// Cap on concurrently live operations of all kinds
    pub max_ops: Option<usize>,
    pub op_limits: OpLimits,
    pub max_timers: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 2000,
            publish_ordering: PublishOrdering::SameQos,
            resend_attempts: 2,
            verify_outgoing_topic: true,
            verify_incoming_topic: true,
            verify_subscription_filter: true,
            max_qos: QoS::ExactlyOnce,
            max_string_len: u16::MAX as usize,
            max_output_packet_size: None,
            max_ops: None,
            op_limits: OpLimits::default(),
            max_timers: None,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn response_timeout_ms(mut self, ms: u32) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    pub fn publish_ordering(mut self, ordering: PublishOrdering) -> Self {
        self.config.publish_ordering = ordering;
        self
    }

    pub fn resend_attempts(mut self, attempts: u32) -> Self {
        self.config.resend_attempts = attempts;
        self
    }

    pub fn verify_outgoing_topic(mut self, verify: bool) -> Self {
        self.config.verify_outgoing_topic = verify;
        self
    }

    pub fn verify_incoming_topic(mut self, verify: bool) -> Self {
        self.config.verify_incoming_topic = verify;
        self
    }

    pub fn verify_subscription_filter(mut self, verify: bool) -> Self {
        self.config.verify_subscription_filter = verify;
        self
    }

    pub fn max_qos(mut self, qos: QoS) -> Self {
        self.config.max_qos = qos;
        self
    }

    pub fn max_string_len(mut self, len: usize) -> Self {
        self.config.max_string_len = len;
        self
    }

    pub fn max_output_packet_size(mut self, size: usize) -> Self {
        self.config.max_output_packet_size = Some(size);
        self
    }

    pub fn max_ops(mut self, max: usize) -> Self {
        self.config.max_ops = Some(max);
        self
    }

    pub fn op_limits(mut self, limits: OpLimits) -> Self {
        self.config.op_limits = limits;
        self
    }

    pub fn max_timers(mut self, max: usize) -> Self {
        self.config.max_timers = Some(max);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.response_timeout_ms, 2000);
        assert_eq!(config.resend_attempts, 2);
        assert_eq!(config.publish_ordering, PublishOrdering::SameQos);
        assert!(config.verify_subscription_filter);
        assert_eq!(config.op_limits.connect, Some(1));
        assert_eq!(config.op_limits.send, None);
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .response_timeout_ms(500)
            .publish_ordering(PublishOrdering::Full)
            .verify_subscription_filter(false)
            .max_ops(8)
            .build();
        assert_eq!(config.response_timeout_ms, 500);
        assert_eq!(config.publish_ordering, PublishOrdering::Full);
        assert!(!config.verify_subscription_filter);
        assert_eq!(config.max_ops, Some(8));
        assert_eq!(config.resend_attempts, 2);
    }

    #[test]
    fn test_partial_json_config() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"response_timeout_ms": 750, "publish_ordering": "Full", "op_limits": {"send": 4}}"#,
        )
        .unwrap();
        assert_eq!(config.response_timeout_ms, 750);
        assert_eq!(config.publish_ordering, PublishOrdering::Full);
        assert_eq!(config.op_limits.send, Some(4));
        assert_eq!(config.op_limits.connect, Some(1));
        assert!(config.verify_incoming_topic);
    }
}
