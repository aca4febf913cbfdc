//! # Topicast
//!
//! `topicast` is a minimal, in-memory topic-based publish/subscribe broker.
//! Publishers send a payload to a named topic; subscribers register under an
//! id of their choosing and receive a live stream of payloads until they
//! disconnect, unsubscribe, or the broker shuts down.
//!
//! ## Core Modules
//!
//! - `broker`: the subscription registry, the fan-out publisher and the
//!   per-subscription session lifecycle.
//! - `transport`: the WebSocket server and the JSON wire protocol.
//! - `client`: a client for that protocol, used by the CLI.
//! - `config`: loading server, broker and log settings.
//! - `utils`: error types and logging setup.
//!
//! Nothing is persisted: a restart drops every subscription.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
