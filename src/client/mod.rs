//! The `client` module is the caller's side of the protocol: a connection to
//! the broker that can publish, subscribe and unsubscribe.

pub mod pubsub_client;

pub use pubsub_client::{PubSubClient, stream_end_result};
