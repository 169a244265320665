use std::sync::Arc;

use common::{GradeReport, Submission, SubmissionStatus};
use thiserror::Error;
use tracing::debug;

use crate::store::{StoreError, SubmissionStore};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Submission not found: {0}")]
    NotFound(String),

    #[error("Illegal transition {from} -> {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sole writer of submission status once a submission has been queued.
#[derive(Clone)]
pub struct SubmissionStateMachine {
    store: Arc<dyn SubmissionStore>,
}

impl SubmissionStateMachine {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    async fn load(&self, id: &str) -> Result<Submission, StateError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    fn check(submission: &Submission, to: SubmissionStatus) -> Result<(), StateError> {
        if submission.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(StateError::InvalidTransition {
                from: submission.status,
                to,
            })
        }
    }

    /// Start a grading attempt, clearing whatever the previous attempt left.
    pub async fn mark_running(&self, id: &str) -> Result<Submission, StateError> {
        let mut submission = self.load(id).await?;
        Self::check(&submission, SubmissionStatus::Running)?;
        submission.reset(SubmissionStatus::Running);
        self.store.update(&submission).await?;
        debug!(submission_id = %id, "Submission running");
        Ok(submission)
    }

    /// Persist the terminal result of the running attempt in one write.
    pub async fn complete(&self, id: &str, report: GradeReport) -> Result<Submission, StateError> {
        let mut submission = self.load(id).await?;
        if !report.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                from: submission.status,
                to: report.status,
            });
        }
        Self::check(&submission, report.status)?;
        submission.apply_report(report);
        self.store.update(&submission).await?;
        debug!(submission_id = %id, status = %submission.status, "Submission completed");
        Ok(submission)
    }

    /// End the running attempt as a runtime error carrying `message`.
    pub async fn fail(&self, id: &str, message: &str) -> Result<Submission, StateError> {
        self.complete(
            id,
            GradeReport {
                status: SubmissionStatus::RuntimeError,
                score: 0.0,
                time_ms_total: 0,
                memory_kb_total: 0,
                test_case_results: Vec::new(),
                error_message: Some(message.to_string()),
            },
        )
        .await
    }

    /// Hand an abandoned attempt back to the queue.
    pub async fn reset_to_queued(&self, id: &str) -> Result<Submission, StateError> {
        let mut submission = self.load(id).await?;
        Self::check(&submission, SubmissionStatus::Queued)?;
        submission.reset(SubmissionStatus::Queued);
        self.store.update(&submission).await?;
        Ok(submission)
    }
}
