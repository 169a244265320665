use crate::judge_job::TestCase;
use crate::{SubmissionStatus, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result for a single test case execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub case_id: String,
    pub status: Verdict,
    /// Wall-clock time in milliseconds. Equals the limit on timeout.
    pub time_ms: u64,
    /// Peak memory in kilobytes, 0 when the sandbox cannot measure it.
    pub memory_kb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TestCaseResult {
    /// A failed case that produced no comparable output.
    pub fn failed(case_id: impl Into<String>, status: Verdict, message: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            status,
            time_ms: 0,
            memory_kb: 0,
            actual_output: None,
            expected_output: None,
            error_message: Some(message.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status.is_ok()
    }
}

/// Aggregated result of grading a submission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub status: SubmissionStatus,
    /// Percentage of passed cases, 0..=100.
    pub score: f64,
    pub time_ms_total: u64,
    pub memory_kb_total: u64,
    pub test_case_results: Vec<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GradeReport {
    pub fn passed_count(&self) -> usize {
        self.test_case_results.iter().filter(|r| r.passed()).count()
    }

    /// Copy of the report safe to show the learner: outputs of hidden cases are dropped.
    pub fn redact_hidden(&self, test_cases: &[TestCase]) -> Self {
        let hidden: HashSet<&str> = test_cases
            .iter()
            .filter(|tc| tc.is_hidden)
            .map(|tc| tc.id.as_str())
            .collect();

        let mut report = self.clone();
        for result in &mut report.test_case_results {
            if hidden.contains(result.case_id.as_str()) {
                result.actual_output = None;
                result.expected_output = None;
            }
        }
        report
    }
}
