//! Aggregate statistics
//!
//! Request counters only ever grow within a session. Rule totals are
//! derived from the published table and overwritten on every mutation.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::DeclarativeKind;

/// Point-in-time view of the counters, in the persisted shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_rules: u64,
    pub active_rules: u64,
    pub blocked_requests: u64,
    pub redirected_requests: u64,
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    total_rules: AtomicU64,
    active_rules: AtomicU64,
    blocked_requests: AtomicU64,
    redirected_requests: AtomicU64,
}

impl StatsAggregator {
    /// Resume counting from persisted stats.
    pub fn restore(stats: Stats) -> Self {
        Self {
            total_rules: AtomicU64::new(stats.total_rules),
            active_rules: AtomicU64::new(stats.active_rules),
            blocked_requests: AtomicU64::new(stats.blocked_requests),
            redirected_requests: AtomicU64::new(stats.redirected_requests),
        }
    }

    pub(crate) fn set_rule_counts(&self, total: usize, active: usize) {
        self.total_rules.store(total as u64, Ordering::Relaxed);
        self.active_rules.store(active as u64, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.blocked_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_redirect(&self) {
        self.redirected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, kind: DeclarativeKind) {
        match kind {
            DeclarativeKind::Block => self.record_block(),
            DeclarativeKind::Redirect => self.record_redirect(),
        }
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            total_rules: self.total_rules.load(Ordering::Relaxed),
            active_rules: self.active_rules.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            redirected_requests: self.redirected_requests.load(Ordering::Relaxed),
        }
    }
}
