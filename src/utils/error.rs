//! Error types shared across the broker, the transport and the client.
//!
//! `BrokerError` is what the core reports to the caller of a publish,
//! subscribe or unsubscribe. The transport turns it into a wire `ErrorCode`
//! via [`BrokerError::code`]; the client turns wire errors back into
//! `ClientError::Broker`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a subscription session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The peer's stream closed (client disconnected or transport failed).
    StreamEnded,
    /// The process-wide shutdown signal fired.
    BrokerClosed,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::StreamEnded => f.write_str("stream ended"),
            CancelReason::BrokerClosed => f.write_str("broker closed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("subscribers with {topic} topic doesn't exist")]
    TopicNotFound { topic: String },

    #[error("subscriber with id {subscriber_id} doesn't exist on topic {topic}")]
    SubscriberNotFound {
        topic: String,
        subscriber_id: String,
    },

    #[error("failed to send payload to {failed} of {attempted} streams")]
    PartialDeliveryFailure { failed: usize, attempted: usize },

    #[error("subscription cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("subscriber stream is closed")]
    StreamClosed,

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BrokerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BrokerError::TopicNotFound { .. } | BrokerError::SubscriberNotFound { .. } => {
                ErrorCode::NotFound
            }
            BrokerError::PartialDeliveryFailure { .. } => ErrorCode::DataLoss,
            BrokerError::Cancelled(_) => ErrorCode::Cancelled,
            BrokerError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            BrokerError::StreamClosed | BrokerError::Encode(_) => ErrorCode::Internal,
        }
    }
}

/// Status codes carried by `response` and `stream_end` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    DataLoss,
    Cancelled,
    InvalidArgument,
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::DataLoss => "DATA_LOSS",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection to broker closed")]
    ConnectionClosed,

    #[error("broker replied {code}: {message}")]
    Broker { code: ErrorCode, message: String },
}
