//! services/api/src/adapters/scheduler.rs
//!
//! A `Scheduler` that runs every registered job on a fixed tokio interval.

use conversation_analytics_core::ports::{PortError, PortResult};
use conversation_analytics_core::retention::{ScheduledJob, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Spawns one task per registered job. Each task waits a full period before its
/// first tick and runs the job to completion before waiting again.
pub struct IntervalScheduler {
    period: Duration,
    shutdown: CancellationToken,
}

impl IntervalScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops all job tasks after their current tick, if any, completes.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Scheduler for IntervalScheduler {
    fn register(&self, name: &str, job: Arc<dyn ScheduledJob>) -> PortResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(PortError::Unexpected(format!(
                "cannot register '{}': scheduler is shut down",
                name
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PortError::Unexpected(format!("cannot register '{}': {}", name, e)))?;

        let period = self.period;
        let token = self.shutdown.clone();
        let name = name.to_string();
        runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("start cron job '{}' every {:?}", name, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => job.on_tick().await,
                }
            }
            info!("cron job '{}' stopped", name);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingJob {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJob for CountingJob {
        async fn on_tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn registered_job_ticks_until_shutdown() {
        let scheduler = IntervalScheduler::new(Duration::from_millis(10));
        let job = Arc::new(CountingJob::default());
        scheduler.register("count", job.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(job.ticks.load(Ordering::SeqCst) >= 2);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_shutdown = job.ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn first_tick_waits_a_full_period() {
        let scheduler = IntervalScheduler::new(Duration::from_secs(3600));
        let job = Arc::new(CountingJob::default());
        scheduler.register("hourly", job.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), 0);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn registering_after_shutdown_fails() {
        let scheduler = IntervalScheduler::new(Duration::from_millis(10));
        scheduler.shutdown();
        let result = scheduler.register("late", Arc::new(CountingJob::default()));
        assert!(result.is_err());
    }

    #[test]
    fn registering_outside_a_runtime_fails() {
        let scheduler = IntervalScheduler::new(Duration::from_millis(10));
        let result = scheduler.register("orphan", Arc::new(CountingJob::default()));
        assert!(result.is_err());
    }
}
