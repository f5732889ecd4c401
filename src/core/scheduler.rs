//! Periodic aggregation of the window.
//!
//! Every window period the scheduler takes the buffer contents, averages the
//! configured field and replaces the published aggregate. An empty window or
//! a failed computation leaves the previous aggregate in place. The cadence
//! comes from a tokio interval, so no outcome of a tick can stop the next one.

use crate::config::ConfigError;
use crate::core::aggregate::{
    compute_aggregate, AggregateError, AggregateResult, LatestAggregate, LevelScale,
};
use crate::core::buffer::WindowedBuffer;
use crate::stats::SharedIngestStats;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A new aggregate replaced the previous one
    Published(AggregateResult),
    /// The window was empty; nothing changed
    Empty,
    /// Computation failed; nothing changed
    Failed(AggregateError),
}

/// Computes and publishes the window aggregate on a fixed period.
pub struct WindowScheduler {
    buffer: Arc<WindowedBuffer>,
    latest: LatestAggregate,
    field: String,
    scale: Option<LevelScale>,
    period: Duration,
    stats: SharedIngestStats,
}

impl WindowScheduler {
    /// Create a scheduler that aggregates `field` every `period`.
    pub fn new(
        buffer: Arc<WindowedBuffer>,
        latest: LatestAggregate,
        field: impl Into<String>,
        period: Duration,
        stats: SharedIngestStats,
    ) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::InvalidWindow(
                "aggregation period must be positive".to_string(),
            ));
        }
        Ok(Self {
            buffer,
            latest,
            field: field.into(),
            scale: None,
            period,
            stats,
        })
    }

    /// Also express each aggregate as a level on `scale`.
    pub fn with_level_scale(mut self, scale: Option<LevelScale>) -> Self {
        self.scale = scale;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one aggregation step.
    pub fn tick(&self) -> TickOutcome {
        let contents = self.buffer.contents();

        match compute_aggregate(&contents, &self.field, self.scale.as_ref()) {
            Ok(Some(result)) => {
                tracing::debug!(
                    value = result.value,
                    samples = result.samples,
                    "Publishing window aggregate"
                );
                self.latest.publish(result.clone());
                self.stats.record_published();
                TickOutcome::Published(result)
            }
            Ok(None) => {
                tracing::debug!("Window empty, keeping previous aggregate");
                self.stats.record_empty_tick();
                TickOutcome::Empty
            }
            Err(e) => {
                tracing::warn!("Aggregation failed, keeping previous aggregate: {}", e);
                self.stats.record_failed_tick();
                TickOutcome::Failed(e)
            }
        }
    }

    /// Start ticking on the current tokio runtime.
    ///
    /// The first tick fires one period from now.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                "Window scheduler started (field '{}', every {:?})",
                self.field,
                self.period
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        if catch_unwind(AssertUnwindSafe(|| self.tick())).is_err() {
                            tracing::error!("Aggregation panicked, keeping previous aggregate");
                            self.stats.record_failed_tick();
                        }
                    }
                }
            }

            tracing::info!("Window scheduler stopped");
        });

        SchedulerHandle {
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running scheduler. Dropping it also stops the scheduler.
pub struct SchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop ticking and wait for the task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!("Window scheduler task failed: {}", e);
        }
    }
}
