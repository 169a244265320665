use std::sync::Arc;

use common::SubmissionJob;
use mq::{JobId, JobQueue, JobState, QueueStats};
use tracing::{error, info};

use crate::error::{Result, WorkerError};
use crate::reconcile::rebuild_job;
use crate::state::SubmissionStateMachine;
use crate::store::ChallengeStore;

/// Result of handing a new submission to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued(JobId),
    /// The queue was unreachable. The submission stays QUEUED for the reconciler.
    Deferred,
}

/// Queue-facing operations for the intake API.
#[derive(Clone)]
pub struct JudgeService {
    queue: Arc<dyn JobQueue>,
    states: SubmissionStateMachine,
    challenges: Arc<dyn ChallengeStore>,
}

impl JudgeService {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        states: SubmissionStateMachine,
        challenges: Arc<dyn ChallengeStore>,
    ) -> Self {
        Self {
            queue,
            states,
            challenges,
        }
    }

    /// Enqueue a grading job. Never fails.
    pub async fn submit(&self, job: &SubmissionJob) -> SubmitOutcome {
        match self.queue.enqueue(job).await {
            Ok(job_id) => {
                info!(submission_id = %job.submission_id, %job_id, "Submission enqueued");
                SubmitOutcome::Enqueued(job_id)
            }
            Err(e) => {
                error!(
                    submission_id = %job.submission_id,
                    error = %e,
                    "Failed to enqueue submission, leaving it queued"
                );
                SubmitOutcome::Deferred
            }
        }
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        Ok(self.queue.stats().await?)
    }

    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobState>> {
        Ok(self.queue.job_status(job_id).await?)
    }

    /// Put a job from the failed set back in line with a fresh attempt budget.
    pub async fn retry_failed_job(&self, job_id: &str) -> Result<()> {
        self.queue.retry_failed(job_id).await?;
        info!(%job_id, "Failed job revived");
        Ok(())
    }

    /// Grade an existing submission again, whatever state it is in.
    pub async fn reprocess(&self, submission_id: &str) -> Result<JobId> {
        let submission = self
            .states
            .store()
            .find_by_id(submission_id)
            .await?
            .ok_or_else(|| WorkerError::SubmissionNotFound(submission_id.to_string()))?;
        let job = rebuild_job(self.challenges.as_ref(), &submission).await?;
        let job_id = self.queue.enqueue(&job).await?;
        info!(%submission_id, %job_id, previous_status = %submission.status, "Submission reprocessing");
        Ok(job_id)
    }
}
