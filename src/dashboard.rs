//! Dashboard aggregation over scenes and execution records.

use crate::model::{DashboardStats, ExecutionResult, ExecutionStatus};

/// Aggregate execution records into dashboard numbers.
pub struct StatsAggregator;

impl StatsAggregator {
    /// Only `pass` / `fail` runs count as completed; `error` and `running`
    /// runs are excluded from pass rate and average time.
    pub fn compute(total_scenes: usize, executions: &[ExecutionResult]) -> DashboardStats {
        let completed: Vec<&ExecutionResult> = executions
            .iter()
            .filter(|e| matches!(e.status, ExecutionStatus::Pass | ExecutionStatus::Fail))
            .collect();
        let passed = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Pass)
            .count();

        let pass_rate = if completed.is_empty() {
            0.0
        } else {
            let rate = passed as f64 / completed.len() as f64;
            (rate * 100.0).round() / 100.0
        };

        let durations: Vec<u64> = completed.iter().filter_map(|e| e.duration).collect();
        let average_execution_time = if durations.is_empty() {
            0
        } else {
            (durations.iter().sum::<u64>() as f64 / durations.len() as f64).round() as u64
        };

        DashboardStats {
            total_scenes,
            total_executions: executions.len(),
            pass_rate,
            edge_cases_found: executions.iter().map(|e| e.edge_cases_explored.len()).sum(),
            self_healed_count: executions.iter().map(|e| e.self_healing_actions.len()).sum(),
            average_execution_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeCaseExploration, ExplorationOutcome};

    fn finished(status: ExecutionStatus, duration_ms: i64) -> ExecutionResult {
        let mut e = ExecutionResult::new("scene_1", "Users");
        let done = e.started_at + chrono::Duration::milliseconds(duration_ms);
        e.finalize(status, "", done).unwrap();
        e
    }

    #[test]
    fn test_empty_stats() {
        let stats = StatsAggregator::compute(0, &[]);
        assert_eq!(stats, DashboardStats::default());
    }

    #[test]
    fn test_pass_rate_and_average_skip_errors_and_running() {
        let mut with_hint = finished(ExecutionStatus::Pass, 100);
        with_hint.edge_cases_explored.push(EdgeCaseExploration {
            kind: "boundary".to_string(),
            description: "x".to_string(),
            result: ExplorationOutcome::Inconclusive,
            findings: None,
        });

        let executions = vec![
            with_hint,
            finished(ExecutionStatus::Pass, 200),
            finished(ExecutionStatus::Fail, 301),
            finished(ExecutionStatus::Error, 5000),
            ExecutionResult::new("scene_1", "Users"),
        ];

        let stats = StatsAggregator::compute(3, &executions);
        assert_eq!(stats.total_scenes, 3);
        assert_eq!(stats.total_executions, 5);
        assert_eq!(stats.pass_rate, 0.67);
        assert_eq!(stats.average_execution_time, 200);
        assert_eq!(stats.edge_cases_found, 1);
        assert_eq!(stats.self_healed_count, 0);
    }
}
