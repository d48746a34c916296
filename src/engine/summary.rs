//! Narrative text written into `ExecutionResult::reasoning`.

use crate::model::{AssertionResult, StepResult};

/// Counts gathered from a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunTally {
    pub planned_steps: usize,
    pub planned_assertions: usize,
    pub passed_steps: usize,
    pub failed_steps: usize,
    pub passed_assertions: usize,
    pub failed_assertions: usize,
    pub total_bytes: u64,
    pub avg_step_ms: u64,
}

impl RunTally {
    pub fn new(
        planned_steps: usize,
        planned_assertions: usize,
        steps: &[StepResult],
        assertions: &[AssertionResult],
    ) -> Self {
        let passed_steps = steps.iter().filter(|s| s.status.is_pass()).count();
        let passed_assertions = assertions.iter().filter(|a| a.status.is_pass()).count();
        let total_bytes = steps.iter().filter_map(|s| s.response_size).sum();
        let avg_step_ms = if steps.is_empty() {
            0
        } else {
            let total: u64 = steps.iter().map(|s| s.duration).sum();
            (total as f64 / steps.len() as f64).round() as u64
        };

        Self {
            planned_steps,
            planned_assertions,
            passed_steps,
            failed_steps: steps.len() - passed_steps,
            passed_assertions,
            failed_assertions: assertions.len() - passed_assertions,
            total_bytes,
            avg_step_ms,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed_steps == 0 && self.failed_assertions == 0
    }
}

pub fn passed(t: &RunTally) -> String {
    format!(
        "Execution PASSED: {}/{} steps executed successfully, {}/{} assertions passed. \
         Total data: {:.2}KB, Avg step time: {}ms.",
        t.passed_steps,
        t.planned_steps,
        t.passed_assertions,
        t.planned_assertions,
        t.total_bytes as f64 / 1024.0,
        t.avg_step_ms
    )
}

pub fn failed(t: &RunTally) -> String {
    format!(
        "Execution FAILED: {} passed, {} failed steps. {} passed, {} failed assertions. \
         Check details above for root cause analysis.",
        t.passed_steps, t.failed_steps, t.passed_assertions, t.failed_assertions
    )
}

pub fn fatal(message: &str) -> String {
    format!("Fatal execution error: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Verdict;

    fn step(status: Verdict, duration: u64, size: Option<u64>) -> StepResult {
        StepResult {
            step_id: "s".to_string(),
            description: String::new(),
            status,
            duration,
            request: None,
            response: None,
            response_size: size,
            error: None,
        }
    }

    #[test]
    fn test_pass_summary_reports_size_and_latency() {
        let steps = vec![step(Verdict::Pass, 100, Some(2048)), step(Verdict::Pass, 51, Some(1024))];
        let tally = RunTally::new(2, 0, &steps, &[]);
        assert!(tally.all_passed());
        assert_eq!(tally.avg_step_ms, 76);
        assert_eq!(
            passed(&tally),
            "Execution PASSED: 2/2 steps executed successfully, 0/0 assertions passed. \
             Total data: 3.00KB, Avg step time: 76ms."
        );
    }

    #[test]
    fn test_fail_summary_counts() {
        let steps = vec![step(Verdict::Pass, 10, None), step(Verdict::Fail, 10, None)];
        let tally = RunTally::new(2, 0, &steps, &[]);
        assert!(!tally.all_passed());
        assert_eq!(
            failed(&tally),
            "Execution FAILED: 1 passed, 1 failed steps. 0 passed, 0 failed assertions. \
             Check details above for root cause analysis."
        );
    }

    #[test]
    fn test_empty_run_is_vacuous_pass() {
        let tally = RunTally::new(0, 0, &[], &[]);
        assert!(tally.all_passed());
        assert_eq!(tally.avg_step_ms, 0);
        assert!(passed(&tally).contains("0/0 steps"));
    }
}
