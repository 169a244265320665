use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{Submission, SubmissionJob, SubmissionStatus};
use mq::JobQueue;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconcileConfig;
use crate::error::{Result, WorkerError};
use crate::state::SubmissionStateMachine;
use crate::store::ChallengeStore;

/// Rebuild the grading job for `submission` from its challenge.
pub async fn rebuild_job(
    challenges: &dyn ChallengeStore,
    submission: &Submission,
) -> Result<SubmissionJob> {
    let challenge = challenges
        .find_by_id(&submission.challenge_id)
        .await?
        .ok_or_else(|| WorkerError::ChallengeNotFound(submission.challenge_id.clone()))?;
    Ok(challenge.job_for(submission))
}

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale QUEUED submissions given a new job.
    pub requeued: usize,
    /// Stale RUNNING submissions reset to QUEUED and given a new job.
    pub reset: usize,
    /// Stale submissions left alone because a job for them is still live.
    pub skipped: usize,
    pub errors: usize,
}

/// Recovers submissions whose job was lost to an enqueue failure or a crash.
pub struct Reconciler {
    queue: Arc<dyn JobQueue>,
    states: SubmissionStateMachine,
    challenges: Arc<dyn ChallengeStore>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        states: SubmissionStateMachine,
        challenges: Arc<dyn ChallengeStore>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            queue,
            states,
            challenges,
            config,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = Utc::now();

        let queued_cutoff = now - secs(self.config.queued_timeout_secs);
        for submission in self
            .states
            .store()
            .find_stale(SubmissionStatus::Queued, queued_cutoff)
            .await?
        {
            match self.recover(&submission, false).await {
                Ok(true) => report.requeued += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(submission_id = %submission.id, error = %e, "Failed to requeue submission");
                    report.errors += 1;
                }
            }
        }

        let running_cutoff = now - secs(self.config.running_timeout_secs);
        for submission in self
            .states
            .store()
            .find_stale(SubmissionStatus::Running, running_cutoff)
            .await?
        {
            match self.recover(&submission, true).await {
                Ok(true) => report.reset += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    error!(submission_id = %submission.id, error = %e, "Failed to reset submission");
                    report.errors += 1;
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                requeued = report.requeued,
                reset = report.reset,
                skipped = report.skipped,
                errors = report.errors,
                "Reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Give `submission` a fresh job unless one is still live. Returns whether it did.
    async fn recover(&self, submission: &Submission, reset: bool) -> Result<bool> {
        if let Some(job_id) = self.queue.live_job_for(&submission.id).await? {
            // Slow or backed off, not lost.
            debug!(submission_id = %submission.id, %job_id, "Live job exists, skipping");
            return Ok(false);
        }

        let job = rebuild_job(self.challenges.as_ref(), submission).await?;
        if reset {
            self.states.reset_to_queued(&submission.id).await?;
        }
        let job_id = self.queue.enqueue(&job).await?;
        warn!(
            submission_id = %submission.id,
            %job_id,
            previous_status = %submission.status,
            "Re-enqueued stale submission"
        );
        Ok(true)
    }

    /// Sweep every `interval_secs` until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.sweep().await {
                error!(error = %e, "Reconciliation sweep failed");
            }
        }
    }
}

fn secs(n: u64) -> TimeDelta {
    TimeDelta::seconds(i64::try_from(n).unwrap_or(i64::MAX / 1000))
}
