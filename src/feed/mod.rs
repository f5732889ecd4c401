//! Connection to the sensor feed.
//!
//! The adapter is transport-agnostic: it reacts to connect and message
//! events and hands decoded readings to the windowed buffer. The MQTT
//! transport drives it from a broker connection.

pub mod adapter;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use adapter::{FeedAdapter, FeedError, OutboundMessage, Publisher, Subscriber};

#[cfg(feature = "mqtt")]
pub use mqtt::MqttFeed;
