pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Submission, SubmissionJob, SubmissionStatus, TestCase};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{MemoryChallengeStore, MemorySubmissionStore, RecordingLeaderboard};
pub use redis_store::{RedisChallengeStore, RedisLeaderboard, RedisSubmissionStore};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Internal(e.to_string())
        }
    }
}

/// Durable home of submission records.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Submission>, StoreError>;

    /// Replace the stored record with `submission` in one write.
    async fn update(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Submissions in `status` whose last update is older than `older_than`.
    async fn find_stale(
        &self,
        status: SubmissionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError>;
}

/// Published challenge data needed to build a job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub course_id: String,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u32,
    pub test_cases: Vec<TestCase>,
}

impl Challenge {
    /// Snapshot of this challenge and `submission` as a queue job.
    pub fn job_for(&self, submission: &Submission) -> SubmissionJob {
        let mut test_cases = self.test_cases.clone();
        test_cases.sort_by_key(|tc| tc.order);
        SubmissionJob {
            submission_id: submission.id.clone(),
            user_id: submission.user_id.clone(),
            challenge_id: submission.challenge_id.clone(),
            course_id: submission.course_id.clone(),
            language: submission.language,
            code: submission.code.clone(),
            time_limit: self.time_limit_ms,
            memory_limit: self.memory_limit_mb,
            test_cases,
        }
    }
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Challenge>, StoreError>;
}

/// Trigger into the external ranking service.
#[async_trait]
pub trait LeaderboardHook: Send + Sync {
    async fn update_for_challenge(&self, challenge_id: &str) -> Result<(), StoreError>;

    async fn update_for_course(&self, course_id: &str) -> Result<(), StoreError>;
}

/// A leaderboard recomputation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "lowercase")]
pub enum LeaderboardEvent {
    Challenge(String),
    Course(String),
}
