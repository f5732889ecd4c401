//! Sliding time-window buffer of sensor readings.
//!
//! Readings are stamped on arrival and kept oldest-first. Every add and
//! every read first evicts entries that have aged out of the window, so
//! memory is bounded by wall-clock age rather than by count.

use crate::config::ConfigError;
use crate::core::reading::Reading;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Source of arrival timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to drive windows in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A reading paired with its arrival time.
#[derive(Debug, Clone)]
pub struct TimestampedReading {
    pub arrival: DateTime<Utc>,
    pub reading: Reading,
}

/// Window contents taken under a single lock.
#[derive(Debug, Clone, Default)]
pub struct WindowContents {
    /// Readings in window, oldest first
    pub readings: Vec<Reading>,
    /// Arrival time of the newest reading, if any
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Thread-safe buffer holding the readings of the trailing window.
///
/// Eviction scans from the oldest end and stops at the first entry still
/// inside the window. Entries inserted out of arrival order may therefore
/// outlive their nominal age until everything older than them is gone.
pub struct WindowedBuffer {
    /// Width of the trailing window
    window: Duration,
    /// Source of arrival times
    clock: Arc<dyn Clock>,
    /// Entries ordered by arrival (oldest first)
    entries: Mutex<VecDeque<TimestampedReading>>,
}

impl WindowedBuffer {
    /// Create a buffer stamped by the wall clock.
    pub fn new(window: std::time::Duration) -> Result<Self, ConfigError> {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    /// Create a buffer stamped by the given clock.
    pub fn with_clock(
        window: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        if window.is_zero() {
            return Err(ConfigError::InvalidWindow(
                "window duration must be positive".to_string(),
            ));
        }
        let window = Duration::from_std(window)
            .map_err(|e| ConfigError::InvalidWindow(format!("window duration out of range: {e}")))?;

        Ok(Self {
            window,
            clock,
            entries: Mutex::new(VecDeque::new()),
        })
    }

    /// Width of the window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a reading as the newest entry, then evict.
    pub fn add(&self, reading: Reading) {
        let now = self.clock.now();
        let mut entries = self.lock();
        entries.push_back(TimestampedReading {
            arrival: now,
            reading,
        });
        self.evict(&mut entries, now);
    }

    /// Readings currently in window, oldest first.
    pub fn snapshot(&self) -> Vec<Reading> {
        self.lock_evicted()
            .iter().map(|e| e.reading.clone()).collect()
    }

    /// Arrival time of the newest reading still in window.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock_evicted().back().map(|e| e.arrival)
    }

    /// Readings and newest arrival time, consistent with each other.
    pub fn contents(&self) -> WindowContents {
        let entries = self.lock_evicted();
        WindowContents {
            readings: entries.iter().map(|e| e.reading.clone()).collect(),
            last_timestamp: entries.back().map(|e| e.arrival),
        }
    }

    /// Remove all entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of retained entries, without evicting.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TimestampedReading>> {
        // Eviction never leaves the deque half-updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_evicted(&self) -> MutexGuard<'_, VecDeque<TimestampedReading>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.evict(&mut entries, now);
        entries
    }

    fn evict(&self, entries: &mut VecDeque<TimestampedReading>, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some(front) = entries.front() {
            if front.arrival < cutoff {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}

impl std::fmt::Debug for WindowedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedBuffer")
            .field("window", &self.window)
            .field("len", &self.len())
            .finish()
    }
}
