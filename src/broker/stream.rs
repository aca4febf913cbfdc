//! Subscriber stream handle
//!
//! `SubscriberStream` is the outbound half of one connected peer: the sending
//! side of the per-connection channel drained by the transport's send loop,
//! plus the token that is cancelled when the peer goes away. Every
//! subscription opened over a connection holds a clone of that connection's
//! stream.

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tungstenite::protocol::Message as WsMessage;

use crate::transport::message::ServerMessage;
use crate::utils::error::BrokerError;

#[derive(Debug, Clone)]
pub struct SubscriberStream {
    /// Connection id. Identifies which connection owns a registry entry.
    pub peer: String,
    sender: UnboundedSender<WsMessage>,
    closed: CancellationToken,
}

impl SubscriberStream {
    pub fn new(peer: impl Into<String>, sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            peer: peer.into(),
            sender,
            closed: CancellationToken::new(),
        }
    }

    /// Push one already-encoded frame. Fails once the peer is gone.
    pub fn push(&self, msg: WsMessage) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::StreamClosed);
        }
        self.sender.send(msg).map_err(|_| BrokerError::StreamClosed)
    }

    pub fn send_message(&self, msg: &ServerMessage) -> Result<(), BrokerError> {
        let text = serde_json::to_string(msg)?;
        self.push(WsMessage::text(text))
    }

    /// Mark the stream as terminated; wakes every session waiting on it.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }
}
