//! Ingest statistics.
//!
//! Counters recorded by the feed adapter and the window scheduler, exposed
//! over the query interface and printed on shutdown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for the ingest pipeline.
#[derive(Debug)]
pub struct IngestStats {
    /// Messages delivered by the feed
    messages_received: AtomicU64,
    /// Messages decoded and added to the buffer
    readings_accepted: AtomicU64,
    /// Messages dropped as malformed
    decode_errors: AtomicU64,
    /// Scheduler ticks
    ticks: AtomicU64,
    /// Ticks that published a new aggregate
    aggregates_published: AtomicU64,
    /// Ticks that found an empty window
    empty_ticks: AtomicU64,
    /// Ticks whose computation failed
    failed_ticks: AtomicU64,
    /// When counting started
    started_at: DateTime<Utc>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            readings_accepted: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            aggregates_published: AtomicU64::new(0),
            empty_ticks: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.aggregates_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_empty_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.empty_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            aggregates_published: self.aggregates_published.load(Ordering::Relaxed),
            empty_ticks: self.empty_ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Ingest Statistics:\n\
             - Messages received: {}\n\
             - Readings accepted: {}\n\
             - Malformed messages dropped: {}\n\
             - Windows aggregated: {} ({} published, {} empty, {} failed)\n\
             - Uptime: {} seconds",
            stats.messages_received,
            stats.readings_accepted,
            stats.decode_errors,
            stats.ticks,
            stats.aggregates_published,
            stats.empty_ticks,
            stats.failed_ticks,
            stats.uptime_secs
        )
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestStatsSnapshot {
    pub messages_received: u64,
    pub readings_accepted: u64,
    pub decode_errors: u64,
    pub ticks: u64,
    pub aggregates_published: u64,
    pub empty_ticks: u64,
    pub failed_ticks: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared statistics.
pub type SharedIngestStats = Arc<IngestStats>;

pub fn create_shared_stats() -> SharedIngestStats {
    Arc::new(IngestStats::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_counters() {
        let stats = IngestStats::new();

        stats.record_message();
        stats.record_accepted();
        stats.record_message();
        stats.record_decode_error();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.readings_accepted, 1);
        assert_eq!(snapshot.decode_errors, 1);
    }

    #[test]
    fn test_tick_counters() {
        let stats = IngestStats::new();

        stats.record_published();
        stats.record_empty_tick();
        stats.record_empty_tick();
        stats.record_failed_tick();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.ticks, 4);
        assert_eq!(snapshot.aggregates_published, 1);
        assert_eq!(snapshot.empty_ticks, 2);
        assert_eq!(snapshot.failed_ticks, 1);
    }

    #[test]
    fn test_summary_format() {
        let stats = IngestStats::new();
        let summary = stats.summary();

        assert!(summary.contains("Messages received: 0"));
        assert!(summary.contains("Malformed messages dropped"));
        assert!(summary.contains("Uptime"));
    }
}
