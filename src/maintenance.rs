//! Periodic storage maintenance.
//!
//! One background task migrates old blocks on a fixed interval. A run
//! failure is logged and the schedule continues; only one run can be in
//! flight at a time.

use crate::dal::Dal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const MEMORY_CLEAN_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct MemoryCleaner {
    inner: Arc<CleanerInner>,
}

struct CleanerInner {
    dal: Arc<dyn Dal>,
    running: AtomicBool,
    token: Mutex<CancellationToken>,
}

impl MemoryCleaner {
    pub fn new(dal: Arc<dyn Dal>) -> Self {
        MemoryCleaner {
            inner: Arc::new(CleanerInner {
                dal,
                running: AtomicBool::new(false),
                token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Starts the periodic migration task. A second call while the task
    /// runs is a no-op.
    pub fn regular_clean_memory(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let token = {
            let mut guard = self
                .inner
                .token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *guard = CancellationToken::new();
            guard.clone()
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MEMORY_CLEAN_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick of an interval fires immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = inner.dal.migrate_old_blocks() {
                            tracing::warn!("old blocks migration failed: {}", err);
                        }
                    }
                }
            }
            inner.running.store(false, Ordering::Release);
            tracing::debug!("memory cleaning stopped");
        });
    }

    pub fn stop_clean_memory(&self) {
        self.inner
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDal;

    #[tokio::test(start_paused = true)]
    async fn migration_runs_periodically_until_stopped() {
        let dal = Arc::new(MemoryDal::default());
        let cleaner = MemoryCleaner::new(Arc::clone(&dal) as Arc<dyn Dal>);

        cleaner.regular_clean_memory();
        tokio::time::sleep(MEMORY_CLEAN_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(dal.migrations(), 1);

        tokio::time::sleep(MEMORY_CLEAN_INTERVAL).await;
        assert_eq!(dal.migrations(), 2);

        cleaner.stop_clean_memory();
        tokio::time::sleep(MEMORY_CLEAN_INTERVAL * 3).await;
        assert_eq!(dal.migrations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn migration_failures_do_not_stop_the_schedule() {
        let dal = Arc::new(MemoryDal::default());
        dal.fail_migrations
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let cleaner = MemoryCleaner::new(Arc::clone(&dal) as Arc<dyn Dal>);

        cleaner.regular_clean_memory();
        tokio::time::sleep(MEMORY_CLEAN_INTERVAL * 2 + Duration::from_secs(1)).await;
        assert_eq!(dal.migrations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_twice_keeps_a_single_schedule() {
        let dal = Arc::new(MemoryDal::default());
        let cleaner = MemoryCleaner::new(Arc::clone(&dal) as Arc<dyn Dal>);

        cleaner.regular_clean_memory();
        cleaner.regular_clean_memory();
        tokio::time::sleep(MEMORY_CLEAN_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(dal.migrations(), 1);
    }
}
