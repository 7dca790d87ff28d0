//! Periodic delivery tick.
//!
//! Every instance runs the same loop; the store's atomic claim keeps them
//! from processing the same job twice, so adding instances adds throughput
//! instead of duplicates.

use std::sync::Arc;
use std::time::Duration;

use fanwave_common::config::DeliveryConfig;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::dispatcher::Dispatcher;

/// Delivery tick configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between ticks.
    pub tick_interval: Duration,
    /// Maximum jobs processed per tick.
    pub max_jobs_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(15),
            max_jobs_per_tick: 4,
        }
    }
}

impl SchedulerConfig {
    /// Build from delivery configuration.
    #[must_use]
    pub fn from_delivery(config: &DeliveryConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_secs.max(1)),
            max_jobs_per_tick: config.max_jobs_per_tick.max(1),
        }
    }
}

/// Spawn the delivery tick task.
///
/// A failed tick is logged and the loop keeps going; the jobs it would have
/// claimed stay durable for the next tick.
pub fn run_scheduler(config: SchedulerConfig, dispatcher: Arc<Dispatcher>) {
    tokio::spawn(async move {
        let mut interval = interval(config.tick_interval);
        loop {
            interval.tick().await;
            match dispatcher.process_next(config.max_jobs_per_tick).await {
                Ok(summary) => {
                    if summary.processed > 0 {
                        info!(
                            processed = summary.processed,
                            succeeded = summary.succeeded,
                            failed = summary.failed,
                            rescheduled = summary.rescheduled,
                            "Delivery tick"
                        );
                    } else {
                        debug!("Delivery tick found no claimable jobs");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Delivery tick failed");
                }
            }
        }
    });
}
