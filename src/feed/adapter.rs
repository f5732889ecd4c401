//! Feed adapter: inbound messages to buffered readings.

use crate::core::buffer::WindowedBuffer;
use crate::core::reading::Reading;
use crate::stats::SharedIngestStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Longest payload prefix written to the log for a dropped message.
pub const PAYLOAD_PREVIEW_BYTES: usize = 256;

/// Printable prefix of a payload, cut at [`PAYLOAD_PREVIEW_BYTES`].
pub fn payload_preview(payload: &[u8]) -> String {
    if payload.len() <= PAYLOAD_PREVIEW_BYTES {
        return String::from_utf8_lossy(payload).into_owned();
    }
    format!(
        "{}... ({} bytes)",
        String::from_utf8_lossy(&payload[..PAYLOAD_PREVIEW_BYTES]),
        payload.len()
    )
}

/// Something that can subscribe to a topic on the feed.
pub trait Subscriber {
    fn subscribe(&self, topic: &str) -> Result<(), FeedError>;
}

/// Something that can publish to a topic on the feed.
pub trait Publisher {
    fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), FeedError>;
}

/// A message to publish: either already encoded, or a record to encode.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text(String),
    Record(Reading),
}

impl OutboundMessage {
    /// Encoded payload bytes.
    pub fn into_payload(self) -> Vec<u8> {
        match self {
            OutboundMessage::Text(text) => text.into_bytes(),
            OutboundMessage::Record(reading) => reading.to_json_string().into_bytes(),
        }
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        OutboundMessage::Text(text)
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        OutboundMessage::Text(text.to_string())
    }
}

impl From<Reading> for OutboundMessage {
    fn from(reading: Reading) -> Self {
        OutboundMessage::Record(reading)
    }
}

/// Receives feed events and forwards well-formed readings to the buffer.
///
/// Reconnecting belongs to the transport. A subscription that fails is kept
/// pending and retried through [`FeedAdapter::retry_subscription`].
#[derive(Clone)]
pub struct FeedAdapter {
    topic: String,
    buffer: Arc<WindowedBuffer>,
    stats: SharedIngestStats,
    subscription_pending: Arc<AtomicBool>,
}

impl FeedAdapter {
    pub fn new(topic: impl Into<String>, buffer: Arc<WindowedBuffer>, stats: SharedIngestStats) -> Self {
        Self {
            topic: topic.into(),
            buffer,
            stats,
            subscription_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// (Re)subscribe after the transport reports a connection.
    pub fn on_connect(&self, subscriber: &dyn Subscriber) {
        self.subscription_pending.store(true, Ordering::SeqCst);
        self.try_subscribe(subscriber);
    }

    /// Retry a subscription that failed since the last connection.
    ///
    /// Does nothing once the subscription went through. Returns whether a
    /// subscription is still pending.
    pub fn retry_subscription(&self, subscriber: &dyn Subscriber) -> bool {
        if !self.subscription_pending() {
            return false;
        }
        self.try_subscribe(subscriber);
        self.subscription_pending()
    }

    pub fn subscription_pending(&self) -> bool {
        self.subscription_pending.load(Ordering::SeqCst)
    }

    fn try_subscribe(&self, subscriber: &dyn Subscriber) {
        match subscriber.subscribe(&self.topic) {
            Ok(()) => {
                self.subscription_pending.store(false, Ordering::SeqCst);
                tracing::info!("Subscribed to {}", self.topic);
            }
            Err(e) => tracing::error!("Failed to subscribe to {}: {}, will retry", self.topic, e),
        }
    }

    /// Handle one inbound message. Malformed payloads are logged and dropped.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        self.stats.record_message();

        match Reading::from_json_slice(payload) {
            Ok(reading) => {
                tracing::debug!(topic, fields = reading.len(), "Reading received");
                self.buffer.add(reading);
                self.stats.record_accepted();
            }
            Err(e) => {
                tracing::warn!(
                    "Dropping malformed message on {}: {} (payload: {})",
                    topic,
                    e,
                    payload_preview(payload)
                );
                self.stats.record_decode_error();
            }
        }
    }
}

/// Feed errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedError {
    Subscribe(String),
    Publish(String),
    Disconnect(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Subscribe(e) => write!(f, "Subscribe failed: {e}"),
            FeedError::Publish(e) => write!(f, "Publish failed: {e}"),
            FeedError::Disconnect(e) => write!(f, "Disconnect failed: {e}"),
        }
    }
}

impl std::error::Error for FeedError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::reading::FieldValue;
    use crate::stats::create_shared_stats;
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingFeed {
        subscriptions: RefCell<Vec<String>>,
        published: RefCell<Vec<(String, Vec<u8>)>>,
        failures_left: Cell<usize>,
    }

    impl RecordingFeed {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: Cell::new(times),
                ..Default::default()
            }
        }
    }

    impl Subscriber for RecordingFeed {
        fn subscribe(&self, topic: &str) -> Result<(), FeedError> {
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(FeedError::Subscribe("not connected".to_string()));
            }
            self.subscriptions.borrow_mut().push(topic.to_string());
            Ok(())
        }
    }

    impl Publisher for RecordingFeed {
        fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), FeedError> {
            self.published
                .borrow_mut()
                .push((topic.to_string(), message.into_payload()));
            Ok(())
        }
    }

    fn adapter() -> (FeedAdapter, Arc<WindowedBuffer>, SharedIngestStats) {
        let buffer = Arc::new(WindowedBuffer::new(Duration::from_secs(60)).unwrap());
        let stats = create_shared_stats();
        (
            FeedAdapter::new("sensor/sonido", buffer.clone(), stats.clone()),
            buffer,
            stats,
        )
    }

    #[test]
    fn test_well_formed_message_reaches_buffer() {
        let (adapter, buffer, stats) = adapter();

        adapter.on_message("sensor/sonido", br#"{"analog": 312}"#);

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].get("analog"), Some(&FieldValue::Integer(312)));
        assert_eq!(stats.snapshot().readings_accepted, 1);
    }

    #[test]
    fn test_malformed_message_dropped() {
        let (adapter, buffer, stats) = adapter();

        adapter.on_message("sensor/sonido", b"analog=312");
        adapter.on_message("sensor/sonido", b"\"just a string\"");
        adapter.on_message("sensor/sonido", &[0xc3, 0x28]);

        assert!(buffer.snapshot().is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 3);
        assert_eq!(snapshot.decode_errors, 3);
    }

    #[test]
    fn test_malformed_message_does_not_disturb_later_ones() {
        let (adapter, buffer, _stats) = adapter();

        adapter.on_message("sensor/sonido", br#"{"analog": 1}"#);
        adapter.on_message("sensor/sonido", b"{broken");
        adapter.on_message("sensor/sonido", br#"{"analog": 2}"#);

        assert_eq!(
            buffer.snapshot(),
            vec![
                Reading::new().with("analog", 1),
                Reading::new().with("analog", 2)
            ]
        );
    }

    #[test]
    fn test_on_connect_subscribes_every_time() {
        let (adapter, _buffer, _stats) = adapter();
        let feed = RecordingFeed::default();

        adapter.on_connect(&feed);
        adapter.on_connect(&feed);

        assert_eq!(
            *feed.subscriptions.borrow(),
            vec!["sensor/sonido".to_string(), "sensor/sonido".to_string()]
        );
    }

    #[test]
    fn test_subscribe_failure_is_contained() {
        let (adapter, _buffer, _stats) = adapter();
        let feed = RecordingFeed::failing(usize::MAX);

        adapter.on_connect(&feed);
        assert!(feed.subscriptions.borrow().is_empty());
        assert!(adapter.subscription_pending());
    }

    #[test]
    fn test_failed_subscribe_is_retried_until_it_succeeds() {
        let (adapter, _buffer, _stats) = adapter();
        let feed = RecordingFeed::failing(2);

        adapter.on_connect(&feed);
        assert!(adapter.subscription_pending());

        assert!(adapter.retry_subscription(&feed));
        assert!(!adapter.retry_subscription(&feed));
        assert_eq!(*feed.subscriptions.borrow(), vec!["sensor/sonido".to_string()]);

        // Settled: further retries do not subscribe again
        assert!(!adapter.retry_subscription(&feed));
        assert_eq!(feed.subscriptions.borrow().len(), 1);
    }

    #[test]
    fn test_retry_without_connection_does_nothing() {
        let (adapter, _buffer, _stats) = adapter();
        let feed = RecordingFeed::default();

        assert!(!adapter.retry_subscription(&feed));
        assert!(feed.subscriptions.borrow().is_empty());
    }

    #[test]
    fn test_payload_preview_is_capped() {
        assert_eq!(payload_preview(b"{broken"), "{broken");

        let exact = vec![b'x'; PAYLOAD_PREVIEW_BYTES];
        assert_eq!(payload_preview(&exact).len(), PAYLOAD_PREVIEW_BYTES);

        let large = vec![b'x'; 1 << 20];
        let preview = payload_preview(&large);
        assert!(preview.starts_with(&"x".repeat(PAYLOAD_PREVIEW_BYTES)));
        assert!(preview.ends_with("... (1048576 bytes)"));
        assert!(preview.len() < PAYLOAD_PREVIEW_BYTES + 32);
    }

    #[test]
    fn test_oversized_malformed_payload_is_dropped() {
        let (adapter, buffer, stats) = adapter();
        let mut payload = b"{\"analog\": ".to_vec();
        payload.extend(std::iter::repeat(b'9').take(1 << 20));

        adapter.on_message("sensor/sonido", &payload);

        assert!(buffer.is_empty());
        assert_eq!(stats.snapshot().decode_errors, 1);
    }

    #[test]
    fn test_outbound_message_encoding() {
        let feed = RecordingFeed::default();

        feed.publish("cmd", "raw text".into()).unwrap();
        feed.publish("cmd", Reading::new().with("gain", 2).into())
            .unwrap();

        let published = feed.published.borrow();
        assert_eq!(published[0].1, b"raw text".to_vec());
        assert_eq!(published[1].1, br#"{"gain":2}"#.to_vec());
    }
}
