//! Duration statistics for executions, workflows and agents.
//!
//! Everything here is pure: callers extract plain numeric samples (durations in
//! milliseconds, success counts) and get summaries back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Below this many samples, tail percentiles are reported coarsely.
pub const MIN_PERCENTILE_SAMPLES: usize = 5;

/// Distribution summary of a set of samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentileStats {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub avg: u64,
    pub count: usize,
}

/// Summarize samples with p50/p95/p99, extremes and mean
pub fn calculate_percentiles(values: &[u64]) -> PercentileStats {
    if values.is_empty() {
        return PercentileStats::default();
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let count = sorted.len();
    let sum: u128 = sorted.iter().map(|&v| u128::from(v)).sum();
    let avg = (sum as f64 / count as f64).round() as u64;

    PercentileStats {
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        min: sorted[0],
        max: sorted[count - 1],
        avg,
        count,
    }
}

/// Percentile of an ascending-sorted slice.
///
/// With at least [`MIN_PERCENTILE_SAMPLES`] samples this interpolates linearly
/// between the two nearest ranks. With fewer, p95 and above is the maximum,
/// p50 up to p95 is the middle element and anything lower is the minimum.
pub fn percentile(sorted: &[u64], p: f64) -> u64 {
    let count = sorted.len();
    if count == 0 {
        return 0;
    }

    if count < MIN_PERCENTILE_SAMPLES {
        return if p >= 95.0 {
            sorted[count - 1]
        } else if p >= 50.0 {
            sorted[count / 2]
        } else {
            sorted[0]
        };
    }

    let p = p.clamp(0.0, 100.0);
    let index = (p / 100.0) * (count - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        return sorted[lower];
    }

    let weight = index - lower as f64;
    let low = sorted[lower] as f64;
    let high = sorted[upper] as f64;
    (low + (high - low) * weight).round() as u64
}

/// Fold `new_count` samples averaging `new_value` into an existing average.
///
/// `old_count` must be the count before this update; incrementing it first
/// would weigh the new sample twice.
pub fn weighted_average(old_average: u64, old_count: u64, new_value: u64, new_count: u64) -> u64 {
    let total = old_count + new_count;
    if total == 0 {
        return 0;
    }

    let weighted = old_average as f64 * old_count as f64 + new_value as f64 * new_count as f64;
    (weighted / total as f64).round() as u64
}

/// Percentage of `successful` over `total`, two decimal places
pub fn success_rate(successful: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * successful as f64 / total as f64 * 100.0).round() / 100.0
}

/// Percentage of `failed` over `total`, two decimal places
pub fn failure_rate(failed: u64, total: u64) -> f64 {
    success_rate(failed, total)
}

/// Running statistics for a workflow or agent across executions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalStats {
    pub avg_duration_ms: u64,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl HistoricalStats {
    /// Fold one finished execution into the running statistics
    pub fn record(&mut self, duration_ms: u64, success: bool) {
        self.avg_duration_ms =
            weighted_average(self.avg_duration_ms, self.execution_count, duration_ms, 1);

        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_execution_at = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        success_rate(self.success_count, self.execution_count)
    }

    pub fn failure_rate(&self) -> f64 {
        failure_rate(self.failure_count, self.execution_count)
    }
}
