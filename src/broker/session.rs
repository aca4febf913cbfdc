//! Subscription lifecycle
//!
//! One `Session` per subscribe request: `Pending` until it is registered,
//! `Active` while it waits for the peer's stream to close or for the broker
//! to shut down, `Terminated` afterwards. Waiting never polls; it is a select
//! over the two cancellation tokens.
//!
//! Ending a session does not unregister it unless eviction is enabled. Without
//! eviction a peer that disconnects without unsubscribing stays in the
//! registry and every later publish to that topic counts it as a failure.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::registry::Registry;
use crate::broker::stream::SubscriberStream;
use crate::utils::error::{BrokerError, CancelReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Terminated,
}

#[derive(Debug)]
pub struct Session {
    topic: String,
    subscriber_id: String,
    stream: SubscriberStream,
    state: SessionState,
}

impl Session {
    pub fn new(topic: &str, subscriber_id: &str, stream: SubscriberStream) -> Self {
        Self {
            topic: topic.to_string(),
            subscriber_id: subscriber_id.to_string(),
            stream,
            state: SessionState::Pending,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Pending -> Active, or straight to Terminated if `(topic, subscriber_id)`
    /// is already registered. Returns whether this session now owns an entry.
    pub fn register(&mut self, registry: &Registry) -> bool {
        if self.state != SessionState::Pending {
            return self.state == SessionState::Active;
        }

        if !registry.register(&self.topic, &self.subscriber_id, self.stream.clone()) {
            info!(
                subscriber_id = %self.subscriber_id,
                topic = %self.topic,
                "already subscribed to topic"
            );
            self.transition(SessionState::Terminated);
            return false;
        }

        self.transition(SessionState::Active);
        info!(
            subscriber_id = %self.subscriber_id,
            topic = %self.topic,
            peer = %self.stream.peer,
            "subscriber added to list"
        );
        true
    }

    /// Block until the peer's stream closes or `shutdown` fires.
    ///
    /// A session that never became active (duplicate subscribe) returns
    /// `Ok(())` at once. An active one always ends in `BrokerError::Cancelled`
    /// carrying whichever signal fired first.
    pub async fn wait(
        &mut self,
        registry: &Registry,
        shutdown: &CancellationToken,
        eviction: bool,
    ) -> Result<(), BrokerError> {
        if self.state != SessionState::Active {
            return Ok(());
        }

        // Shutdown wins when both have fired: the transport closes every
        // stream right after the shutdown token, and that is not a disconnect.
        let reason = tokio::select! {
            biased;
            _ = shutdown.cancelled() => CancelReason::BrokerClosed,
            _ = self.stream.closed() => CancelReason::StreamEnded,
        };
        self.transition(SessionState::Terminated);
        info!(
            subscriber_id = %self.subscriber_id,
            topic = %self.topic,
            %reason,
            "subscription session ended"
        );

        if eviction
            && reason == CancelReason::StreamEnded
            && registry.evict(&self.topic, &self.subscriber_id, &self.stream.peer)
        {
            info!(
                subscriber_id = %self.subscriber_id,
                topic = %self.topic,
                "evicted subscriber after disconnect"
            );
        }

        Err(BrokerError::Cancelled(reason))
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            subscriber_id = %self.subscriber_id,
            topic = %self.topic,
            from = ?self.state,
            to = ?next,
            "session state change"
        );
        self.state = next;
    }
}
