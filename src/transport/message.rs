//! Wire protocol
//!
//! JSON objects over WebSocket text frames, tagged by `"type"`. Requests may
//! carry a `request_id`; the matching `response` or `stream_end` echoes it so
//! a client can have several calls in flight on one connection.

use serde::{Deserialize, Serialize};

use crate::broker::message::PayloadFrame;
use crate::utils::error::{BrokerError, ErrorCode};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "publish")]
    Publish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        topic: String,
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        topic: String,
        subscriber_id: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        topic: String,
        subscriber_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResponseStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "response")]
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "payload")]
    Payload(PayloadFrame),
    #[serde(rename = "stream_end")]
    StreamEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        topic: String,
        subscriber_id: String,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// Reply to a publish or unsubscribe.
    pub fn response<T>(request_id: Option<u64>, result: &Result<T, BrokerError>) -> Self {
        let (status, code, message) = outcome(result);
        ServerMessage::Response {
            request_id,
            status,
            code,
            message,
        }
    }

    /// Terminal frame of a subscribe stream.
    pub fn stream_end(
        request_id: Option<u64>,
        topic: &str,
        subscriber_id: &str,
        result: &Result<(), BrokerError>,
    ) -> Self {
        let (status, code, message) = outcome(result);
        ServerMessage::StreamEnd {
            request_id,
            topic: topic.to_string(),
            subscriber_id: subscriber_id.to_string(),
            status,
            code,
            message,
        }
    }
}

fn outcome<T>(
    result: &Result<T, BrokerError>,
) -> (ResponseStatus, Option<ErrorCode>, Option<String>) {
    match result {
        Ok(_) => (ResponseStatus::Ok, None, None),
        Err(e) => (ResponseStatus::Error, Some(e.code()), Some(e.to_string())),
    }
}

/// Serde adapter for byte payloads as standard base64 strings.
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
