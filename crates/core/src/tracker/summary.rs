use crate::metrics::{calculate_percentiles, success_rate, PercentileStats};
use crate::types::{Execution, StepExecutionState, StepKey, StepPayload};
use serde::{Deserialize, Serialize};

/// Slowest step of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub step_key: StepKey,
    pub duration_ms: u64,
    pub percentage_of_total: f64,
}

/// Final report attached to the last snapshot of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub duration_ms: Option<u64>,
    pub step_durations: PercentileStats,
    pub steps_total: u32,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    /// Completed steps over all finished steps, in percent
    pub success_rate: f64,
    pub total_retries: u32,
    pub bottleneck: Option<Bottleneck>,
    pub output: Option<StepPayload>,
}

impl ExecutionSummary {
    pub fn build(execution: &Execution, steps: &[StepExecutionState]) -> Self {
        let durations: Vec<u64> = steps.iter().filter_map(|s| s.duration_ms).collect();

        let duration_ms = match (execution.started_at, execution.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        };

        let bottleneck = steps
            .iter()
            .filter_map(|s| s.duration_ms.map(|d| (s, d)))
            .max_by_key(|(_, d)| *d)
            .map(|(s, d)| {
                let total = duration_ms.unwrap_or(0);
                let percentage_of_total = if total == 0 {
                    0.0
                } else {
                    (d as f64 / total as f64 * 10_000.0).round() / 100.0
                };
                Bottleneck {
                    step_key: s.step_key.clone(),
                    duration_ms: d,
                    percentage_of_total,
                }
            });

        Self {
            duration_ms,
            step_durations: calculate_percentiles(&durations),
            steps_total: execution.steps_total,
            steps_completed: execution.steps_completed,
            steps_failed: execution.steps_failed,
            steps_skipped: execution.steps_skipped,
            success_rate: success_rate(
                u64::from(execution.steps_completed),
                u64::from(execution.steps_finished()),
            ),
            total_retries: steps.iter().map(|s| s.retry_count).sum(),
            bottleneck,
            output: execution.output.clone(),
        }
    }
}
