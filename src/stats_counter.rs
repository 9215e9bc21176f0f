use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cheap shared counters describing the admission activity of the node.
#[derive(Clone, Debug, Default)]
pub struct StatsCounter {
    stats: Arc<StatsCounterImpl>,
}

#[derive(Debug)]
struct StatsCounterImpl {
    block_recv_cnt: AtomicUsize,
    block_added_cnt: AtomicUsize,
    fork_block_cnt: AtomicUsize,
    switch_cnt: AtomicUsize,
    start_time: Instant,
}

impl Default for StatsCounterImpl {
    fn default() -> Self {
        Self {
            block_recv_cnt: AtomicUsize::default(),
            block_added_cnt: AtomicUsize::default(),
            fork_block_cnt: AtomicUsize::default(),
            switch_cnt: AtomicUsize::default(),
            start_time: Instant::now(),
        }
    }
}

impl StatsCounter {
    pub fn add_block_recv_cnt(&self, count: usize) {
        self.stats.block_recv_cnt.fetch_add(count, Ordering::Relaxed);
    }

    pub fn block_recv_cnt(&self) -> u64 {
        self.stats.block_recv_cnt.load(Ordering::Relaxed) as u64
    }

    pub fn add_block_added_cnt(&self, count: usize) {
        self.stats
            .block_added_cnt
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn block_added_cnt(&self) -> u64 {
        self.stats.block_added_cnt.load(Ordering::Relaxed) as u64
    }

    pub fn add_fork_block_cnt(&self, count: usize) {
        self.stats.fork_block_cnt.fetch_add(count, Ordering::Relaxed);
    }

    pub fn fork_block_cnt(&self) -> u64 {
        self.stats.fork_block_cnt.load(Ordering::Relaxed) as u64
    }

    pub fn add_switch_cnt(&self, count: usize) {
        self.stats.switch_cnt.fetch_add(count, Ordering::Relaxed);
    }

    pub fn switch_cnt(&self) -> u64 {
        self.stats.switch_cnt.load(Ordering::Relaxed) as u64
    }

    pub fn uptime_sec(&self) -> u64 {
        self.stats.start_time.elapsed().as_secs()
    }
}
