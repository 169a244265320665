use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Submission, SubmissionStatus};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::{Challenge, ChallengeStore, LeaderboardEvent, LeaderboardHook, StoreError, SubmissionStore};

fn submission_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:submission:{id}")
}

/// Per-status index, scored by `updated_at` in milliseconds.
fn status_index_key(namespace: &str, status: SubmissionStatus) -> String {
    format!("{namespace}:submissions:{}", status.as_str())
}

/// Submissions as JSON records, with a sorted-set index per status.
#[derive(Clone)]
pub struct RedisSubmissionStore {
    con: MultiplexedConnection,
    namespace: String,
}

impl RedisSubmissionStore {
    pub fn new(con: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            con,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Submission>, StoreError> {
        let mut con = self.con.clone();
        let raw: Option<String> = con.get(submission_key(&self.namespace, id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, submission: &Submission) -> Result<(), StoreError> {
        let raw = serde_json::to_string(submission)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(submission_key(&self.namespace, &submission.id), raw)
            .ignore();
        for status in SubmissionStatus::ALL {
            pipe.zrem(status_index_key(&self.namespace, *status), &submission.id)
                .ignore();
        }
        pipe.zadd(
            status_index_key(&self.namespace, submission.status),
            &submission.id,
            submission.updated_at.timestamp_millis(),
        )
        .ignore();

        let mut con = self.con.clone();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn find_stale(
        &self,
        status: SubmissionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        let mut con = self.con.clone();
        let ids: Vec<String> = con
            .zrangebyscore(
                status_index_key(&self.namespace, status),
                "-inf",
                format!("({}", older_than.timestamp_millis()),
            )
            .await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| submission_key(&self.namespace, id))
            .collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut con).await?;

        let mut stale = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            let submission: Submission = serde_json::from_str(&raw)?;
            // The index can lag a concurrent update.
            if submission.status == status {
                stale.push(submission);
            }
        }
        Ok(stale)
    }
}

/// Challenges as JSON records written by the course service.
#[derive(Clone)]
pub struct RedisChallengeStore {
    con: MultiplexedConnection,
    namespace: String,
}

impl RedisChallengeStore {
    pub fn new(con: MultiplexedConnection, namespace: impl Into<String>) -> Self {
        Self {
            con,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl ChallengeStore for RedisChallengeStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Challenge>, StoreError> {
        let mut con = self.con.clone();
        let raw: Option<String> = con
            .get(format!("{}:challenge:{id}", self.namespace))
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Pushes recomputation requests onto a list the ranking service consumes.
#[derive(Clone)]
pub struct RedisLeaderboard {
    con: MultiplexedConnection,
    key: String,
}

impl RedisLeaderboard {
    pub fn new(con: MultiplexedConnection, namespace: &str) -> Self {
        Self {
            con,
            key: format!("{namespace}:leaderboard:events"),
        }
    }

    async fn push(&self, event: LeaderboardEvent) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&event)?;
        let mut con = self.con.clone();
        let _: () = con.rpush(&self.key, raw).await?;
        debug!(?event, "Leaderboard update requested");
        Ok(())
    }
}

#[async_trait]
impl LeaderboardHook for RedisLeaderboard {
    async fn update_for_challenge(&self, challenge_id: &str) -> Result<(), StoreError> {
        self.push(LeaderboardEvent::Challenge(challenge_id.to_string()))
            .await
    }

    async fn update_for_course(&self, course_id: &str) -> Result<(), StoreError> {
        self.push(LeaderboardEvent::Course(course_id.to_string()))
            .await
    }
}
