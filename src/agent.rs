//! Wiring of the ingest pipeline.
//!
//! [`Agent`] owns every component explicitly; there is no process-wide
//! client. [`Agent::start`] brings up the query server, the scheduler and
//! the feed, and [`RunningAgent::shutdown`] stops them with the scheduler
//! first, so no tick races against the feed teardown.

use crate::config::{Config, ConfigError};
use crate::core::aggregate::LatestAggregate;
use crate::core::buffer::{Clock, SystemClock, WindowedBuffer};
use crate::core::scheduler::{SchedulerHandle, WindowScheduler};
use crate::feed::FeedAdapter;
use crate::stats::{create_shared_stats, SharedIngestStats};
use std::sync::Arc;

#[cfg(feature = "mqtt")]
use crate::feed::MqttFeed;

#[cfg(feature = "server")]
use crate::server::{self, ServerState};
#[cfg(feature = "server")]
use std::net::SocketAddr;

/// All pipeline components, constructed but not yet running.
pub struct Agent {
    config: Config,
    buffer: Arc<WindowedBuffer>,
    latest: LatestAggregate,
    stats: SharedIngestStats,
    adapter: FeedAdapter,
    scheduler: WindowScheduler,
}

impl Agent {
    /// Build the pipeline stamped by the wall clock.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the pipeline with a specific clock.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let buffer = Arc::new(WindowedBuffer::with_clock(config.window_duration, clock)?);
        let latest = LatestAggregate::new();
        let stats = create_shared_stats();
        let adapter = FeedAdapter::new(config.broker.topic.clone(), buffer.clone(), stats.clone());
        let scheduler = WindowScheduler::new(
            buffer.clone(),
            latest.clone(),
            config.field.clone(),
            config.window_duration,
            stats.clone(),
        )?
        .with_level_scale(config.level);

        Ok(Self {
            config,
            buffer,
            latest,
            stats,
            adapter,
            scheduler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer(&self) -> &Arc<WindowedBuffer> {
        &self.buffer
    }

    pub fn latest(&self) -> &LatestAggregate {
        &self.latest
    }

    pub fn stats(&self) -> &SharedIngestStats {
        &self.stats
    }

    pub fn adapter(&self) -> &FeedAdapter {
        &self.adapter
    }

    pub fn scheduler(&self) -> &WindowScheduler {
        &self.scheduler
    }

    /// Take the scheduler alone, to drive it without the feed and server.
    pub fn into_scheduler(self) -> WindowScheduler {
        self.scheduler
    }

    /// Start the query server, the scheduler and the feed.
    pub async fn start(self) -> anyhow::Result<RunningAgent> {
        #[cfg(feature = "server")]
        let server = {
            let state = Arc::new(ServerState::new(self.latest.clone(), self.stats.clone()));
            server::run(&self.config.server, state).await?
        };

        let scheduler = self.scheduler.spawn();

        #[cfg(feature = "mqtt")]
        let feed = MqttFeed::start(&self.config.broker, self.adapter.clone());

        Ok(RunningAgent {
            latest: self.latest,
            stats: self.stats,
            scheduler,
            #[cfg(feature = "mqtt")]
            feed,
            #[cfg(feature = "server")]
            server,
        })
    }
}

/// A started pipeline.
pub struct RunningAgent {
    latest: LatestAggregate,
    stats: SharedIngestStats,
    scheduler: SchedulerHandle,
    #[cfg(feature = "mqtt")]
    feed: MqttFeed,
    #[cfg(feature = "server")]
    server: (SocketAddr, tokio::sync::oneshot::Sender<()>),
}

impl RunningAgent {
    pub fn latest(&self) -> &LatestAggregate {
        &self.latest
    }

    pub fn stats(&self) -> &SharedIngestStats {
        &self.stats
    }

    /// Address the query server is bound to.
    #[cfg(feature = "server")]
    pub fn server_addr(&self) -> SocketAddr {
        self.server.0
    }

    /// Stop the scheduler, then the feed, then the query server.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;

        #[cfg(feature = "mqtt")]
        self.feed.shutdown().await;

        #[cfg(feature = "server")]
        {
            let _ = self.server.1.send(());
        }
    }
}
