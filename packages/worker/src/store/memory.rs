use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Submission, SubmissionStatus};
use tokio::sync::Mutex;

use super::{Challenge, ChallengeStore, LeaderboardEvent, LeaderboardHook, StoreError, SubmissionStore};

#[derive(Default)]
pub struct MemorySubmissionStore {
    records: Mutex<HashMap<String, Submission>>,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, submission: Submission) {
        self.records
            .lock()
            .await
            .insert(submission.id.clone(), submission);
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Submission>, StoreError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn update(&self, submission: &Submission) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(submission.id.clone(), submission.clone());
        Ok(())
    }

    async fn find_stale(
        &self,
        status: SubmissionStatus,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Submission>, StoreError> {
        let mut stale: Vec<Submission> = self
            .records
            .lock()
            .await
            .values()
            .filter(|s| s.status == status && s.updated_at < older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|s| s.updated_at);
        Ok(stale)
    }
}

#[derive(Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<String, Challenge>>,
}

impl MemoryChallengeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, challenge: Challenge) {
        self.challenges
            .lock()
            .await
            .insert(challenge.id.clone(), challenge);
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Challenge>, StoreError> {
        Ok(self.challenges.lock().await.get(id).cloned())
    }
}

/// Leaderboard hook that only remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingLeaderboard {
    events: Mutex<Vec<LeaderboardEvent>>,
}

impl RecordingLeaderboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LeaderboardEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl LeaderboardHook for RecordingLeaderboard {
    async fn update_for_challenge(&self, challenge_id: &str) -> Result<(), StoreError> {
        self.events
            .lock()
            .await
            .push(LeaderboardEvent::Challenge(challenge_id.to_string()));
        Ok(())
    }

    async fn update_for_course(&self, course_id: &str) -> Result<(), StoreError> {
        self.events
            .lock()
            .await
            .push(LeaderboardEvent::Course(course_id.to_string()));
        Ok(())
    }
}
