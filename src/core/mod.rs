//! Core functionality for the sensor window agent.
//!
//! This module contains:
//! - The reading model and payload decoding
//! - The sliding time-window buffer
//! - Aggregation of window contents
//! - The periodic window scheduler

pub mod aggregate;
pub mod buffer;
pub mod reading;
pub mod scheduler;

// Re-export commonly used types
pub use aggregate::{
    average_field, average_record, compute_aggregate, raw_to_level, AggregateError,
    AggregateResult, LatestAggregate, LevelScale,
};
pub use buffer::{Clock, ManualClock, SystemClock, WindowContents, WindowedBuffer};
pub use reading::{DecodeError, FieldValue, Reading};
pub use scheduler::{SchedulerHandle, TickOutcome, WindowScheduler};
