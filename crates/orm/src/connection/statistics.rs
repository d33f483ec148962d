//! Connection Pool Statistics
//!
//! Lock-free counters shared by the pool threads and transaction workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Snapshot of pool activity
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub interactions: u64,
    pub interaction_errors: u64,
    pub reconnects: u64,
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub active_workers: u64,
    pub created_at: Instant,
}

impl PoolStats {
    /// Calculate the interaction error rate as a percentage
    pub fn error_rate(&self) -> f64 {
        if self.interactions > 0 {
            (self.interaction_errors as f64 / self.interactions as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Get the pool uptime
    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

#[derive(Debug)]
pub(crate) struct PoolCounters {
    interactions: AtomicU64,
    interaction_errors: AtomicU64,
    reconnects: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_rolled_back: AtomicU64,
    active_workers: AtomicU64,
    created_at: Instant,
}

impl Default for PoolCounters {
    fn default() -> Self {
        Self {
            interactions: AtomicU64::new(0),
            interaction_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            transactions_started: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_rolled_back: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }
}

impl PoolCounters {
    pub(crate) fn interaction(&self, ok: bool) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.interaction_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction_started(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn transaction_finished(&self, committed: bool) {
        if committed {
            self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns the number of live workers after the increment.
    pub(crate) fn worker_started(&self) -> u64 {
        self.active_workers.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn worker_stopped(&self) {
        let _ = self
            .active_workers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            interactions: self.interactions.load(Ordering::Relaxed),
            interaction_errors: self.interaction_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.transactions_rolled_back.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }
}


/// Counts one live worker until dropped.
pub(crate) struct ActiveWorker {
    counters: Arc<PoolCounters>,
}

impl ActiveWorker {
    pub(crate) fn start(counters: &Arc<PoolCounters>) -> Self {
        counters.worker_started();
        Self {
            counters: counters.clone(),
        }
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        self.counters.worker_stopped();
    }
}
