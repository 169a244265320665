use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::SubmissionJob;
use common::retry::{RetryAttempt, RetryDecision, RetryPolicy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MqError;

pub type JobId = String;

/// Where a job currently sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    /// Waiting for its backoff to elapse.
    Delayed,
    /// Delivered to a worker and not yet acknowledged.
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Job will still be delivered (again) without outside help.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed | Self::Active)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Stored form of a job, shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub submission_id: String,
    /// Raw job payload. Kept undecoded so a malformed payload can still be inspected.
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Failed attempts so far.
    #[serde(default)]
    pub history: Vec<RetryAttempt>,
    /// Token of the delivery currently owning the job.
    #[serde(default)]
    pub lease: Option<String>,
    #[serde(default)]
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job: &SubmissionJob) -> Result<Self, MqError> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            submission_id: job.submission_id.clone(),
            payload: serde_json::to_value(job)?,
            state: JobState::Waiting,
            history: Vec::new(),
            lease: None,
            failed_reason: None,
            created_at: Utc::now(),
            finished_at: None,
        })
    }

    /// Number of the delivery that is about to happen, 1-based.
    pub fn next_attempt(&self) -> u32 {
        self.history.len() as u32 + 1
    }

    /// Take ownership for a new delivery. Fails when the payload cannot be decoded.
    pub fn lease_out(&mut self) -> Result<Delivery, serde_json::Error> {
        let job: SubmissionJob = serde_json::from_value(self.payload.clone())?;
        let lease = Uuid::new_v4().to_string();
        self.state = JobState::Active;
        self.lease = Some(lease.clone());
        Ok(Delivery {
            id: self.id.clone(),
            lease,
            attempt: self.next_attempt(),
            job,
        })
    }

    /// Ensure `delivery` still owns this job.
    pub fn check_lease(&self, delivery: &Delivery) -> Result<(), MqError> {
        if self.state == JobState::Active && self.lease.as_deref() == Some(delivery.lease.as_str())
        {
            Ok(())
        } else {
            Err(MqError::LeaseLost(self.id.clone()))
        }
    }

    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
        self.lease = None;
        self.finished_at = Some(Utc::now());
    }

    /// Record a failed attempt and move to `Delayed` or `Failed` accordingly.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: &str) -> RetryDecision {
        let decision = policy.record_failure(&mut self.history, error);
        self.lease = None;
        match &decision {
            RetryDecision::Retry { .. } => self.state = JobState::Delayed,
            RetryDecision::Exhausted { .. } => self.mark_failed(error),
        }
        decision
    }

    /// Move to the failed set without spending further attempts.
    pub fn mark_failed(&mut self, reason: &str) {
        self.state = JobState::Failed;
        self.lease = None;
        self.failed_reason = Some(reason.to_string());
        self.finished_at = Some(Utc::now());
    }

    /// Manual retry of a failed job: a fresh attempt budget.
    pub fn revive(&mut self) -> Result<(), MqError> {
        if self.state != JobState::Failed {
            return Err(MqError::InvalidState {
                id: self.id.clone(),
                state: self.state.to_string(),
                expected: JobState::Failed.to_string(),
            });
        }
        self.state = JobState::Waiting;
        self.history.clear();
        self.failed_reason = None;
        self.finished_at = None;
        Ok(())
    }
}

/// One delivery of a job to a worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: JobId,
    pub lease: String,
    /// 1-based delivery attempt.
    pub attempt: u32,
    pub job: SubmissionJob,
}

/// Error text recorded when a lease runs out.
pub const LEASE_EXPIRED: &str = "Visibility timeout expired before acknowledgement";

/// Durable, at-least-once work queue for grading jobs.
///
/// A delivered job stays owned by one worker until it is acknowledged,
/// retried, failed, or its visibility timeout runs out. Workers holding a job
/// longer than that must `extend` the lease. A job whose lease ran out may be
/// delivered again, so consumers must tolerate seeing a job twice.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &SubmissionJob) -> Result<JobId, MqError>;

    /// Wait at most `wait` for the next job.
    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, MqError>;

    /// Restart the delivery's visibility timeout from now.
    ///
    /// Fails with `LeaseLost` once the job was reclaimed or settled.
    async fn extend(&self, delivery: &Delivery) -> Result<(), MqError>;

    /// How long a delivery stays owned without an `extend`.
    fn visibility_timeout(&self) -> Duration;

    /// Mark a delivery as successfully processed.
    async fn ack(&self, delivery: &Delivery) -> Result<(), MqError>;

    /// Record a failed attempt; the job is delayed or moved to the failed set.
    async fn retry(&self, delivery: &Delivery, error: &str) -> Result<RetryDecision, MqError>;

    /// Move straight to the failed set, skipping remaining attempts.
    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), MqError>;

    async fn stats(&self) -> Result<QueueStats, MqError>;

    async fn inspect(&self, id: &str) -> Result<Option<JobRecord>, MqError>;

    async fn job_status(&self, id: &str) -> Result<Option<JobState>, MqError> {
        Ok(self.inspect(id).await?.map(|record| record.state))
    }

    /// Put a failed job back in line with a fresh attempt budget.
    async fn retry_failed(&self, id: &str) -> Result<(), MqError>;

    /// Reclaim deliveries whose visibility timeout ran out. Returns how many.
    async fn requeue_expired(&self) -> Result<usize, MqError>;

    /// The live job grading `submission_id`, if any.
    async fn live_job_for(&self, submission_id: &str) -> Result<Option<JobId>, MqError>;
}
