//! Query metrics: append-only log with a retention window.
//!
//! Every execution records one [`QueryMetric`], success or failure. Entries
//! are never mutated; pruning drops whole entries past the retention
//! window, on record and from the scheduler's periodic pass.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::time::Instant;

use crate::config::MetricsConfig;

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryMetric {
    /// e.g. `select strategies`
    pub query_type: String,
    pub duration_ms: u64,
    pub result_count: usize,
    pub cache_hit: bool,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over the retained window.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total: usize,
    pub failures: usize,
    pub cache_hits: usize,
    pub cache_hit_rate: f64,
    pub avg_duration_ms: f64,
}

pub struct MetricsRecorder {
    config: MetricsConfig,
    // monotonic instant kept beside each metric for retention arithmetic
    entries: RwLock<VecDeque<(Instant, QueryMetric)>>,
}

impl MetricsRecorder {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn record(&self, metric: QueryMetric) {
        let mut entries = self.entries.write();
        entries.push_back((Instant::now(), metric));
        Self::prune_front(&mut entries, self.config.retention);
    }

    /// Periodic prune pass; returns how many entries were dropped.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        Self::prune_front(&mut entries, self.config.retention);
        before - entries.len()
    }

    fn prune_front(entries: &mut VecDeque<(Instant, QueryMetric)>, retention: std::time::Duration) {
        let now = Instant::now();
        while let Some((recorded_at, _)) = entries.front() {
            if now.duration_since(*recorded_at) >= retention {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<QueryMetric> {
        self.entries.read().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let entries = self.entries.read();
        let total = entries.len();
        let failures = entries.iter().filter(|(_, m)| !m.success).count();
        let cache_hits = entries.iter().filter(|(_, m)| m.cache_hit).count();
        let duration_sum: u64 = entries.iter().map(|(_, m)| m.duration_ms).sum();
        MetricsSummary {
            total,
            failures,
            cache_hits,
            cache_hit_rate: if total > 0 {
                cache_hits as f64 / total as f64
            } else {
                0.0
            },
            avg_duration_ms: if total > 0 {
                duration_sum as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}
