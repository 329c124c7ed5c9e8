//! Request records the application configures operations with, and the
//! response records completion callbacks receive.

use serde::{Deserialize, Serialize};

use crate::mqtt_client::error::MqttClientError;

/// MQTT quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = MqttClientError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(MqttClientError::BadParam),
        }
    }
}

/// CONNECT parameters.
///
/// The default is what a freshly prepared connect carries: empty client id,
/// 60 second keep-alive and `clean_session == false`. A brand new client
/// therefore has to configure a clean session before its first connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectConfig {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    /// Keep-alive period in seconds
    pub keep_alive: u32,
    pub clean_session: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            username: None,
            password: None,
            keep_alive: 60,
            clean_session: false,
        }
    }
}

impl ConnectConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    pub fn keep_alive(mut self, secs: u32) -> Self {
        self.keep_alive = secs;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<Vec<u8>>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Will message attached to a CONNECT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WillConfig {
    pub topic: String,
    pub data: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl WillConfig {
    pub fn new(topic: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Outgoing application message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    pub topic: String,
    pub data: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishConfig {
    pub fn new(topic: impl Into<String>, data: impl Into<Vec<u8>>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            qos,
            retain: false,
        }
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// One filter of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeTopicConfig {
    pub filter: String,
    pub max_qos: QoS,
}

impl SubscribeTopicConfig {
    pub fn new(filter: impl Into<String>, max_qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            max_qos,
        }
    }
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// `None` for the values v3.1.1 reserves.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Accepted),
            1 => Some(Self::UnacceptableProtocolVersion),
            2 => Some(Self::IdentifierRejected),
            3 => Some(Self::ServerUnavailable),
            4 => Some(Self::BadUserNameOrPassword),
            5 => Some(Self::NotAuthorized),
            _ => None,
        }
    }
}

/// Broker's answer to a CONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectResponse {
    pub return_code: ConnectReturnCode,
    pub session_present: bool,
}

/// Per-filter SUBACK result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscribeReturnCode {
    Granted(QoS),
    Failure,
}

/// Broker's answer to a SUBSCRIBE, one code per requested filter in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeResponse {
    pub return_codes: Vec<SubscribeReturnCode>,
}

/// Incoming application message. Borrowed data is only valid during the
/// report callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo<'a> {
    pub topic: &'a str,
    pub data: &'a [u8],
    pub qos: QoS,
    pub retained: bool,
}
