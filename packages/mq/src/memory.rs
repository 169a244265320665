use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use common::SubmissionJob;
use common::retry::RetryDecision;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::MqError;
use crate::models::{Delivery, JobId, JobQueue, JobRecord, JobState, LEASE_EXPIRED, QueueStats};

#[derive(Default)]
struct Inner {
    records: HashMap<JobId, JobRecord>,
    waiting: VecDeque<JobId>,
    delayed: Vec<(Instant, JobId)>,
    /// Lease expiry per active job.
    leases: HashMap<JobId, Instant>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
}

impl Inner {
    fn promote_due(&mut self, now: Instant) {
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        due.sort_by_key(|(at, _)| *at);
        self.waiting.extend(due.into_iter().map(|(_, id)| id));
    }

    fn next_delayed(&self) -> Option<Instant> {
        self.delayed.iter().map(|(at, _)| *at).min()
    }

    fn record_mut(&mut self, id: &str) -> Result<&mut JobRecord, MqError> {
        self.records
            .get_mut(id)
            .ok_or_else(|| MqError::NotFound(id.to_string()))
    }

    fn push_completed(&mut self, id: JobId, keep: usize) {
        self.completed.push_back(id);
        while self.completed.len() > keep {
            if let Some(old) = self.completed.pop_front() {
                self.records.remove(&old);
            }
        }
    }

    fn push_failed(&mut self, id: JobId, keep: usize) {
        self.failed.push_back(id);
        while self.failed.len() > keep {
            if let Some(old) = self.failed.pop_front() {
                self.records.remove(&old);
            }
        }
    }
}

/// In-process queue with the same delivery semantics as the Redis backend.
///
/// Nothing survives a restart. Meant for tests and single-process development.
pub struct MemoryQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    /// Take the next deliverable job, failing any whose payload cannot be decoded.
    fn take_next(&self, inner: &mut Inner, now: Instant) -> Option<Delivery> {
        inner.promote_due(now);
        while let Some(id) = inner.waiting.pop_front() {
            let Some(record) = inner.records.get_mut(&id) else {
                continue;
            };
            match record.lease_out() {
                Ok(delivery) => {
                    inner
                        .leases
                        .insert(id, now + self.config.visibility_timeout);
                    return Some(delivery);
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Dropping job with malformed payload");
                    record.mark_failed(&format!("Malformed job payload: {e}"));
                    inner.push_failed(id, self.config.keep_failed);
                }
            }
        }
        None
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: &SubmissionJob) -> Result<JobId, MqError> {
        let record = JobRecord::new(job)?;
        let id = record.id.clone();
        {
            let mut inner = self.inner.lock().await;
            inner.records.insert(id.clone(), record);
            inner.waiting.push_back(id.clone());
        }
        self.notify.notify_one();
        debug!(job_id = %id, submission_id = %job.submission_id, "Job enqueued");
        Ok(id)
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, MqError> {
        let deadline = Instant::now() + wait;
        loop {
            let wake_at = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                if let Some(delivery) = self.take_next(&mut inner, now) {
                    return Ok(Some(delivery));
                }
                if now >= deadline {
                    return Ok(None);
                }
                inner
                    .next_delayed()
                    .map_or(deadline, |at| at.min(deadline))
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn extend(&self, delivery: &Delivery) -> Result<(), MqError> {
        let mut inner = self.inner.lock().await;
        inner.record_mut(&delivery.id)?.check_lease(delivery)?;
        let expires = Instant::now() + self.config.visibility_timeout;
        inner.leases.insert(delivery.id.clone(), expires);
        Ok(())
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MqError> {
        let mut inner = self.inner.lock().await;
        let record = inner.record_mut(&delivery.id)?;
        record.check_lease(delivery)?;
        record.mark_completed();
        inner.leases.remove(&delivery.id);
        inner.push_completed(delivery.id.clone(), self.config.keep_completed);
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> Result<RetryDecision, MqError> {
        let decision = {
            let mut inner = self.inner.lock().await;
            let record = inner.record_mut(&delivery.id)?;
            record.check_lease(delivery)?;
            let decision = record.record_failure(&self.config.retry, error);
            inner.leases.remove(&delivery.id);
            match &decision {
                RetryDecision::Retry { delay, .. } => {
                    inner
                        .delayed
                        .push((Instant::now() + *delay, delivery.id.clone()));
                }
                RetryDecision::Exhausted { .. } => {
                    inner.push_failed(delivery.id.clone(), self.config.keep_failed);
                }
            }
            decision
        };
        // Wake a waiter so it picks up the new delayed deadline.
        self.notify.notify_one();
        Ok(decision)
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), MqError> {
        let mut inner = self.inner.lock().await;
        let record = inner.record_mut(&delivery.id)?;
        record.check_lease(delivery)?;
        record.mark_failed(error);
        inner.leases.remove(&delivery.id);
        inner.push_failed(delivery.id.clone(), self.config.keep_failed);
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, MqError> {
        let inner = self.inner.lock().await;
        Ok(QueueStats {
            waiting: inner.waiting.len(),
            delayed: inner.delayed.len(),
            active: inner.leases.len(),
            completed: inner.completed.len(),
            failed: inner.failed.len(),
        })
    }

    async fn inspect(&self, id: &str) -> Result<Option<JobRecord>, MqError> {
        Ok(self.inner.lock().await.records.get(id).cloned())
    }

    async fn retry_failed(&self, id: &str) -> Result<(), MqError> {
        {
            let mut inner = self.inner.lock().await;
            inner.record_mut(id)?.revive()?;
            inner.failed.retain(|failed| failed != id);
            inner.waiting.push_back(id.to_string());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, MqError> {
        let mut reclaimed = 0;
        {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let expired: Vec<JobId> = inner
                .leases
                .iter()
                .filter(|(_, expires)| **expires <= now)
                .map(|(id, _)| id.clone())
                .collect();

            for id in expired {
                inner.leases.remove(&id);
                let Some(record) = inner.records.get_mut(&id) else {
                    continue;
                };
                if record.state != JobState::Active {
                    continue;
                }
                match record.record_failure(&self.config.retry, LEASE_EXPIRED) {
                    RetryDecision::Retry { .. } => inner.waiting.push_back(id.clone()),
                    RetryDecision::Exhausted { .. } => {
                        inner.push_failed(id.clone(), self.config.keep_failed)
                    }
                }
                warn!(job_id = %id, "Reclaimed job with expired lease");
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            self.notify.notify_one();
        }
        Ok(reclaimed)
    }

    async fn live_job_for(&self, submission_id: &str) -> Result<Option<JobId>, MqError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .find(|record| record.submission_id == submission_id && record.state.is_live())
            .map(|record| record.id.clone()))
    }
}
