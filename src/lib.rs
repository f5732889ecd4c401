//! Sensor Window Agent - sliding-window aggregation of sensor readings.
//!
//! Readings arrive on an MQTT topic as JSON objects. Each one is stamped on
//! arrival and kept for a trailing window of fixed length. Once per window
//! the configured field is averaged and published as the latest aggregate,
//! which the HTTP query interface serves to clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Sensor Window Agent                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │    Feed     │──▶│  Windowed   │──▶│  Scheduler  │         │
//! │  │  (MQTT)     │   │   Buffer    │   │ (every Ns)  │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │                │
//! │                                             ▼                │
//! │                    ┌─────────────┐   ┌─────────────┐         │
//! │                    │  GET /data  │◀──│   Latest    │         │
//! │                    │   (HTTP)    │   │  Aggregate  │         │
//! │                    └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensor_window_agent::{Agent, Config};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = Config::load(None)?;
//! config.apply_env()?;
//!
//! let running = Agent::new(config)?.start().await?;
//! tokio::signal::ctrl_c().await?;
//! running.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod core;
pub mod feed;
pub mod stats;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use agent::{Agent, RunningAgent};
pub use config::{BrokerConfig, Config, ConfigError, HttpConfig};
pub use self::core::{
    average_field, average_record, raw_to_level, AggregateResult, FieldValue, LatestAggregate,
    LevelScale, Reading, WindowScheduler, WindowedBuffer,
};
pub use feed::{FeedAdapter, FeedError, OutboundMessage};
pub use stats::{IngestStats, IngestStatsSnapshot, SharedIngestStats};

#[cfg(feature = "mqtt")]
pub use feed::MqttFeed;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
