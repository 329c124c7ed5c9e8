// SPDX-License-Identifier: MPL-2.0

pub mod ack;
pub mod connect;
pub mod ping;
pub mod publish;
pub mod subscribe;

pub use ack::{MqttPubAck, MqttPubComp, MqttPubRec, MqttPubRel, MqttUnsubAck};
pub use connect::{MqttConnAck, MqttConnect, Will};
pub use ping::{MqttDisconnect, MqttPingReq, MqttPingResp};
pub use publish::MqttPublish;
pub use subscribe::{MqttSubAck, MqttSubscribe, MqttUnsubscribe, TopicSubscription};
