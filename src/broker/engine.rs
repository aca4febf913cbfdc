//! Broker engine
//!
//! The broker owns the subscription registry and the process-wide shutdown
//! token, and exposes the three remote operations:
//! - `publish`: best-effort fan-out of one payload to every subscriber of a
//!   topic, counting the pushes that failed
//! - `subscribe`: register and hold the subscription session open until the
//!   peer disconnects or the broker shuts down
//! - `unsubscribe`: drop one `(topic, subscriber id)` entry
//!
//! All three take `&self`; the broker is shared as `Arc<Broker>` and the
//! registry does its own locking. Pushes happen on a snapshot, outside the
//! registry lock.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::message::PayloadFrame;
use crate::broker::registry::Registry;
use crate::broker::session::Session;
use crate::broker::stream::SubscriberStream;
use crate::config::BrokerSettings;
use crate::transport::message::ServerMessage;
use crate::utils::error::BrokerError;

#[derive(Debug)]
pub struct Broker {
    registry: Registry,
    shutdown: CancellationToken,
    eviction: bool,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl Broker {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            registry: Registry::new(),
            shutdown,
            eviction: false,
        }
    }

    pub fn with_settings(settings: &BrokerSettings, shutdown: CancellationToken) -> Self {
        Self {
            eviction: settings.eviction,
            ..Self::new(shutdown)
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    ///
    /// Returns the number of subscribers it was pushed to. A failed push does
    /// not stop delivery to the rest and does not unregister anyone.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BrokerError> {
        info!(topic, "publish request received");
        require_non_empty("topic", topic)?;

        let subscribers = self.registry.snapshot(topic);
        if subscribers.is_empty() {
            return Err(BrokerError::TopicNotFound {
                topic: topic.to_string(),
            });
        }

        let frame = ServerMessage::Payload(PayloadFrame::new(topic, payload));
        let ws_msg = WsMessage::text(serde_json::to_string(&frame)?);

        let mut failed = 0;
        for subscriber in &subscribers {
            debug!(topic, subscriber_id = %subscriber.id, "sending payload stream");

            if let Err(e) = subscriber.stream.push(ws_msg.clone()) {
                failed += 1;
                warn!(topic, subscriber_id = %subscriber.id, error = %e, "error send payload stream");
                continue;
            }

            debug!(topic, subscriber_id = %subscriber.id, "send payload stream successful");
        }

        if failed > 0 {
            return Err(BrokerError::PartialDeliveryFailure {
                failed,
                attempted: subscribers.len(),
            });
        }

        Ok(subscribers.len())
    }

    /// Register `subscriber_id` on `topic` and block until the session ends.
    ///
    /// See [`Session::wait`] for the outcomes.
    pub async fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        stream: SubscriberStream,
    ) -> Result<(), BrokerError> {
        let mut session = self.open_session(topic, subscriber_id, stream)?;
        self.hold_session(&mut session).await
    }

    /// First half of `subscribe`: validate and register, without waiting.
    ///
    /// The transport uses this to register in request order and then park the
    /// session on its own task.
    pub fn open_session(
        &self,
        topic: &str,
        subscriber_id: &str,
        stream: SubscriberStream,
    ) -> Result<Session, BrokerError> {
        info!(subscriber_id, topic, "subscribe request received");
        require_non_empty("topic", topic)?;
        require_non_empty("subscriber_id", subscriber_id)?;

        let mut session = Session::new(topic, subscriber_id, stream);
        session.register(&self.registry);
        Ok(session)
    }

    pub async fn hold_session(&self, session: &mut Session) -> Result<(), BrokerError> {
        session
            .wait(&self.registry, &self.shutdown, self.eviction)
            .await
    }

    pub fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<(), BrokerError> {
        info!(subscriber_id, topic, "unsubscribe request received");
        require_non_empty("topic", topic)?;
        require_non_empty("subscriber_id", subscriber_id)?;

        if !self.registry.unregister(topic, subscriber_id) {
            info!(subscriber_id, topic, "subscriber not found");
            return Err(BrokerError::SubscriberNotFound {
                topic: topic.to_string(),
                subscriber_id: subscriber_id.to_string(),
            });
        }

        info!(subscriber_id, topic, "unsubscribed from topic");
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), BrokerError> {
    if value.is_empty() {
        return Err(BrokerError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(())
}
