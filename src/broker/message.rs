//! Payload frame
//!
//! A `PayloadFrame` is one published message as it is fanned out to every
//! subscriber of its topic. The payload is an opaque byte sequence; the
//! broker imposes no size limit of its own. On the wire it travels as a
//! `payload` frame with the bytes base64-encoded.

use serde::{Deserialize, Serialize};

use crate::transport::message::base64_bytes;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFrame {
    pub topic: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl PayloadFrame {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
