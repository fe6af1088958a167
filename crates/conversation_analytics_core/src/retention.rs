//! crates/conversation_analytics_core/src/retention.rs
//!
//! Periodic removal of stat records older than the retention window.
//!
//! The sweeper registers itself with a [`Scheduler`] handed to it at construction.
//! A failed tick is only logged; the next scheduled tick evaluates the same age
//! predicate and picks up whatever is left, so there is no retry of its own.

use crate::ports::{PortResult, StatStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Span};

/// Stat records older than this are deleted.
pub const STAT_RETENTION_HOURS: i64 = 24;

/// A unit of work a [`Scheduler`] invokes on every tick.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    async fn on_tick(&self);
}

/// Recurring-timer capability. Implementations own the cadence.
pub trait Scheduler: Send + Sync {
    fn register(&self, name: &str, job: Arc<dyn ScheduledJob>) -> PortResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Running,
}

pub struct RetentionSweeper {
    store: Arc<dyn StatStore>,
    running: AtomicBool,
    span: Span,
}

impl RetentionSweeper {
    pub const JOB_NAME: &'static str = "remove_old_stat_data";

    pub fn new(store: Arc<dyn StatStore>, span: Span) -> Self {
        Self {
            store,
            running: AtomicBool::new(false),
            span,
        }
    }

    /// Builds a sweeper and registers its tick handler with `scheduler`.
    pub fn start(
        store: Arc<dyn StatStore>,
        scheduler: &dyn Scheduler,
        span: Span,
    ) -> PortResult<Arc<Self>> {
        let sweeper = Arc::new(Self::new(store, span));
        scheduler.register(Self::JOB_NAME, sweeper.clone())?;
        info!(parent: &sweeper.span, cron_id = Self::JOB_NAME, "add cron job");
        Ok(sweeper)
    }

    pub fn retention() -> Duration {
        Duration::hours(STAT_RETENTION_HOURS)
    }

    pub fn state(&self) -> SweeperState {
        if self.running.load(Ordering::SeqCst) {
            SweeperState::Running
        } else {
            SweeperState::Idle
        }
    }

    /// Deletes every record created before `now - 24h`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> PortResult<u64> {
        self.store
            .delete_stats_older_than(now - Self::retention())
            .await
    }
}

#[async_trait]
impl ScheduledJob for RetentionSweeper {
    async fn on_tick(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(parent: &self.span, "previous sweep still running, skipping tick");
            return;
        }

        info!(parent: &self.span, "remove old stat data start");
        match self.sweep(Utc::now()).await {
            Ok(deleted) => {
                info!(parent: &self.span, deleted, "remove old stat data successful")
            }
            Err(e) => error!(parent: &self.span, error = %e, "remove old stat data failed"),
        }
        self.running.store(false, Ordering::SeqCst);
    }
}
