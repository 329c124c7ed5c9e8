pub mod commands;
pub(crate) mod context;
pub mod engine;
pub mod error;
pub(crate) mod ops;
pub mod opts;
pub mod packet_id;
pub mod timer;
pub mod topic;

pub use commands::{
    ConnectConfig, ConnectResponse, ConnectReturnCode, MessageInfo, PublishConfig, QoS, SubscribeResponse,
    SubscribeReturnCode, SubscribeTopicConfig, WillConfig,
};
pub use engine::{
    ConnectHandle, DisconnectHandle, MqttEngine, OpHandle, PublishHandle, SubscribeHandle, UnsubscribeHandle,
};
pub use error::{BrokerDisconnectReason, MqttClientError, MqttClientResult, OpStatus};
pub use ops::OpId;
pub use opts::{ClientConfig, ClientConfigBuilder, OpLimits, PublishOrdering};
