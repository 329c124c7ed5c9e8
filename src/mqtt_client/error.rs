// SPDX-License-Identifier: MPL-2.0

//! Error types for MQTT client operations
//!
//! Two taxonomies live here. [`MqttClientError`] is returned synchronously by
//! prepare/configure/send requests. [`OpStatus`] is handed to completion
//! callbacks once an accepted operation has finished. [`BrokerDisconnectReason`]
//! accompanies unsolicited disconnect reports.

use crate::mqtt_serde::parser::ParseError;
use serde::Serialize;

/// Request-time error, returned by the engine's public calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
pub enum MqttClientError {
    // ==================== Engine errors ====================
    /// Internal inconsistency, should not happen
    #[error("internal error")]
    InternalError,

    /// Mandatory callbacks were not registered before connecting
    #[error("client is not initialized")]
    NotInitialized,

    // ==================== Session state errors ====================
    /// Another operation of an exclusive kind is in flight
    #[error("another operation of the same kind is in progress")]
    Busy,

    #[error("not connected to broker")]
    NotConnected,

    #[error("already connected to broker")]
    AlreadyConnected,

    /// A disconnect is in progress; wait for the next connect
    #[error("session is disconnecting")]
    Disconnecting,

    /// The transport reported the link as lost
    #[error("network is disconnected")]
    NetworkDisconnected,

    /// Another operation is prepared but neither sent nor cancelled
    #[error("another operation is being prepared")]
    PreparationLocked,

    // ==================== Request errors ====================
    #[error("bad parameter")]
    BadParam,

    /// A mandatory field was never configured
    #[error("insufficient configuration")]
    InsufficientConfig,

    #[error("not supported")]
    NotSupported,

    // ==================== Resource errors ====================
    /// A fixed pool (operations, timers, packet identifiers) is exhausted
    #[error("out of memory")]
    OutOfMemory,

    /// Serialized message exceeds the output buffer limit
    #[error("output buffer overflow")]
    BufferOverflow,

    /// Transient capacity limit; safe to retry on the next tick
    #[error("retry later")]
    RetryLater,
}

impl MqttClientError {
    /// Returns true if repeating the same request later may succeed without
    /// any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryLater | Self::Busy | Self::PreparationLocked
        )
    }

    /// Returns true if the error reflects the connection state rather than
    /// the request itself.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::AlreadyConnected
                | Self::Disconnecting
                | Self::NetworkDisconnected
        )
    }
}

impl From<ParseError> for MqttClientError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::StringTooLong | ParseError::InvalidLength => Self::BadParam,
            _ => Self::InternalError,
        }
    }
}

/// Result type alias for request-time calls
pub type MqttClientResult<T> = Result<T, MqttClientError>;

/// Final status of an accepted operation, delivered by its completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpStatus {
    Complete,
    InternalError,
    /// No response within the response timeout (after all resends)
    Timeout,
    /// The broker violated the protocol
    ProtocolError,
    /// Locally cancelled or superseded (for instance by a clean reconnect)
    Aborted,
    BrokerDisconnected,
    OutOfMemory,
    BadParam,
}

impl OpStatus {
    pub fn is_complete(&self) -> bool {
        *self == OpStatus::Complete
    }
}

impl From<MqttClientError> for OpStatus {
    /// Maps a failure raised while transmitting on behalf of an already
    /// accepted operation to the status it completes with.
    fn from(err: MqttClientError) -> Self {
        match err {
            MqttClientError::BadParam => OpStatus::BadParam,
            MqttClientError::BufferOverflow | MqttClientError::OutOfMemory => OpStatus::OutOfMemory,
            _ => OpStatus::InternalError,
        }
    }
}

/// Why the engine dropped the session on its own initiative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BrokerDisconnectReason {
    InternalError,
    /// PINGREQ went unanswered
    NoBrokerResponse,
    ProtocolError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let retryable = vec![
            MqttClientError::RetryLater,
            MqttClientError::Busy,
            MqttClientError::PreparationLocked,
        ];
        for err in retryable {
            assert!(err.is_retryable(), "{:?} should be retryable", err);
            assert!(!err.is_connectivity());
        }

        let permanent = vec![
            MqttClientError::BadParam,
            MqttClientError::InsufficientConfig,
            MqttClientError::NotInitialized,
            MqttClientError::BufferOverflow,
        ];
        for err in permanent {
            assert!(!err.is_retryable(), "{:?} should not be retryable", err);
        }
    }

    #[test]
    fn test_connectivity_errors() {
        let errors = vec![
            MqttClientError::NotConnected,
            MqttClientError::AlreadyConnected,
            MqttClientError::Disconnecting,
            MqttClientError::NetworkDisconnected,
        ];
        for err in errors {
            assert!(err.is_connectivity(), "{:?} should be connectivity", err);
        }
    }

    #[test]
    fn test_send_failure_to_status() {
        assert_eq!(OpStatus::from(MqttClientError::BadParam), OpStatus::BadParam);
        assert_eq!(
            OpStatus::from(MqttClientError::BufferOverflow),
            OpStatus::OutOfMemory
        );
        assert_eq!(
            OpStatus::from(MqttClientError::NotConnected),
            OpStatus::InternalError
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        assert_eq!(
            MqttClientError::from(ParseError::StringTooLong),
            MqttClientError::BadParam
        );
        assert_eq!(
            MqttClientError::from(ParseError::InvalidPacketType),
            MqttClientError::InternalError
        );
    }

    #[test]
    fn test_display_and_serialize() {
        assert_eq!(
            MqttClientError::PreparationLocked.to_string(),
            "another operation is being prepared"
        );
        assert_eq!(
            serde_json::to_string(&OpStatus::Timeout).unwrap(),
            "\"Timeout\""
        );
        assert_eq!(
            serde_json::to_string(&BrokerDisconnectReason::NoBrokerResponse).unwrap(),
            "\"NoBrokerResponse\""
        );
    }
}
