use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SubmissionStatus;
use crate::judge_job::Language;
use crate::judge_result::{GradeReport, TestCaseResult};

/// One attempt by a user to solve a challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub course_id: String,
    pub language: Language,
    pub code: String,
    pub status: SubmissionStatus,
    pub score: f64,
    pub time_ms_total: u64,
    pub memory_kb_total: u64,
    #[serde(default)]
    pub test_case_results: Vec<TestCaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// A freshly created submission, as the intake flow stores it.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        challenge_id: impl Into<String>,
        course_id: impl Into<String>,
        language: Language,
        code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            challenge_id: challenge_id.into(),
            course_id: course_id.into(),
            language,
            code: code.into(),
            status: SubmissionStatus::Queued,
            score: 0.0,
            time_ms_total: 0,
            memory_kb_total: 0,
            test_case_results: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the grading payload with `report`.
    ///
    /// Results are overwritten, never appended, so re-grading the same
    /// submission converges on a single set of case results.
    pub fn apply_report(&mut self, report: GradeReport) {
        self.status = report.status;
        self.score = report.score;
        self.time_ms_total = report.time_ms_total;
        self.memory_kb_total = report.memory_kb_total;
        self.test_case_results = report.test_case_results;
        self.error_message = report.error_message;
        self.updated_at = Utc::now();
    }

    /// Clear the previous attempt's payload and set `status`.
    pub fn reset(&mut self, status: SubmissionStatus) {
        self.status = status;
        self.score = 0.0;
        self.time_ms_total = 0;
        self.memory_kb_total = 0;
        self.test_case_results.clear();
        self.error_message = None;
        self.updated_at = Utc::now();
    }
}
