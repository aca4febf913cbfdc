pub mod engine;
pub mod message;
pub mod registry;
pub mod session;
pub mod stream;

pub use engine::Broker;
pub use message::PayloadFrame;
pub use registry::{Registry, Subscriber, SubscriberId};
pub use stream::SubscriberStream;
