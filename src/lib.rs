// SPDX-License-Identifier: MPL-2.0

//! Sans-I/O MQTT v3.1.1 client protocol engine.
//!
//! The engine owns no socket, thread or clock. It is driven by three inputs,
//! bytes that arrived from the broker ([`MqttEngine::process_data`]), elapsed
//! time ([`MqttEngine::tick`]) and application requests (the `*_prepare` /
//! `*_send` families), and it answers through the callbacks registered on it.
//!
//! [`MqttEngine::process_data`]: mqtt_client::MqttEngine::process_data
//! [`MqttEngine::tick`]: mqtt_client::MqttEngine::tick

pub mod mqtt_client;
pub mod mqtt_serde;
pub mod mqtt_session;

pub use mqtt_client::{MqttClientError, MqttClientResult, MqttEngine};
