//! Subscription registry
//!
//! Maps a topic name to the ordered list of its subscribers. A topic comes
//! into existence with its first subscription and is never removed; an empty
//! list means the same thing as an unknown topic.
//!
//! There is at most one entry per (topic, subscriber id). The whole map sits
//! behind a single `RwLock`: `snapshot` and `contains` share the read side,
//! `register` and `unregister` take the write side. Callers get clones out of
//! `snapshot` and do their network I/O after the lock is released.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::broker::stream::SubscriberStream;

pub type SubscriberId = String;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub stream: SubscriberStream,
}

#[derive(Debug, Default)]
pub struct Registry {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `(topic, id)`. Returns `false` without touching anything if the
    /// pair is already registered.
    pub fn register(&self, topic: &str, id: &str, stream: SubscriberStream) -> bool {
        let mut topics = self.write();
        let subscribers = topics.entry(topic.to_string()).or_default();

        if subscribers.iter().any(|s| s.id == id) {
            return false;
        }

        subscribers.push(Subscriber {
            id: id.to_string(),
            stream,
        });
        true
    }

    /// Remove `(topic, id)`. Returns `false` if there was no such entry.
    pub fn unregister(&self, topic: &str, id: &str) -> bool {
        let mut topics = self.write();
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };

        match subscribers.iter().position(|s| s.id == id) {
            Some(index) => {
                subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove `(topic, id)` only while it still belongs to the connection
    /// `peer`. A later subscription under the same id from another
    /// connection is left alone.
    pub fn evict(&self, topic: &str, id: &str, peer: &str) -> bool {
        let mut topics = self.write();
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };

        let before = subscribers.len();
        subscribers.retain(|s| !(s.id == id && s.stream.peer == peer));
        subscribers.len() != before
    }

    /// Current subscribers of `topic`, in registration order. Empty for a
    /// topic that was never subscribed to.
    pub fn snapshot(&self, topic: &str) -> Vec<Subscriber> {
        self.read().get(topic).cloned().unwrap_or_default()
    }

    pub fn contains(&self, topic: &str, id: &str) -> bool {
        self.read()
            .get(topic)
            .is_some_and(|subscribers| subscribers.iter().any(|s| s.id == id))
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.read().get(topic).map_or(0, Vec::len)
    }

    /// Total number of entries across all topics.
    pub fn len(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every mutation is a single push or remove, so a poisoned map is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.topics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Subscriber>>> {
        self.topics.write().unwrap_or_else(PoisonError::into_inner)
    }
}
