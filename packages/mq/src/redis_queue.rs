use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::SubmissionJob;
use common::retry::RetryDecision;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::error::MqError;
use crate::models::{Delivery, JobId, JobQueue, JobRecord, JobState, LEASE_EXPIRED, QueueStats};

/// Sleep between empty polls inside `dequeue`.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Promote due delayed jobs, pop the next waiting id and lease it.
///
/// KEYS: delayed, waiting, leases. ARGV: now_ms, lease_expiry_ms.
const DEQUEUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('RPUSH', KEYS[2], id)
end
local id = redis.call('LPOP', KEYS[2])
if not id then
    return false
end
redis.call('ZADD', KEYS[3], ARGV[2], id)
return id
"#;

/// Write a settled record only if the caller still holds the lease.
///
/// KEYS: jobs, leases, target. ARGV: id, lease, record_json, target_kind, score,
/// expired_by. A non-empty `expired_by` also requires the lease to have run out
/// by then, so a reclaim never overrides a fresh `extend`.
/// Returns -1 when the job is gone, 0 when the lease was lost, 1 on success.
const SETTLE_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
    return -1
end
local record = cjson.decode(raw)
if record.state ~= 'active' or record.lease ~= ARGV[2] then
    return 0
end
if ARGV[6] ~= '' then
    local expiry = redis.call('ZSCORE', KEYS[2], ARGV[1])
    if expiry and tonumber(expiry) > tonumber(ARGV[6]) then
        return 0
    end
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('ZREM', KEYS[2], ARGV[1])
if ARGV[4] == 'zset' then
    redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
elseif ARGV[4] == 'list' then
    redis.call('RPUSH', KEYS[3], ARGV[1])
end
return 1
"#;

/// Move the lease deadline of an owned job.
///
/// KEYS: jobs, leases. ARGV: id, lease, expiry_ms.
/// Returns -1 when the job is gone, 0 when the lease was lost, 1 on success.
const EXTEND_SCRIPT: &str = r#"
local raw = redis.call('HGET', KEYS[1], ARGV[1])
if not raw then
    return -1
end
local record = cjson.decode(raw)
if record.state ~= 'active' or record.lease ~= ARGV[2] then
    return 0
end
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[1])
return 1
"#;

/// Drop the oldest entries of a bounded list along with their records and
/// the submission index entries still pointing at them.
///
/// KEYS: list, jobs, by_submission. ARGV: keep.
const TRIM_SCRIPT: &str = r#"
local excess = redis.call('LLEN', KEYS[1]) - tonumber(ARGV[1])
if excess <= 0 then
    return 0
end
local ids = redis.call('LPOP', KEYS[1], excess)
for _, id in ipairs(ids) do
    local raw = redis.call('HGET', KEYS[2], id)
    if raw then
        local submission = cjson.decode(raw).submission_id
        if redis.call('HGET', KEYS[3], submission) == id then
            redis.call('HDEL', KEYS[3], submission)
        end
    end
    redis.call('HDEL', KEYS[2], id)
end
return excess
"#;

/// Where a settled job goes next.
enum Target<'a> {
    Delayed { ready_at_ms: i64 },
    List(&'a str),
}

struct Keys {
    jobs: String,
    waiting: String,
    delayed: String,
    leases: String,
    completed: String,
    failed: String,
    by_submission: String,
}

impl Keys {
    fn new(namespace: &str, queue: &str) -> Self {
        let prefix = format!("{namespace}:{queue}");
        Self {
            jobs: format!("{prefix}:jobs"),
            waiting: format!("{prefix}:waiting"),
            delayed: format!("{prefix}:delayed"),
            leases: format!("{prefix}:leases"),
            completed: format!("{prefix}:completed"),
            failed: format!("{prefix}:failed"),
            by_submission: format!("{prefix}:by_submission"),
        }
    }
}

/// Redis-backed queue. State survives worker and API restarts.
pub struct RedisQueue {
    con: MultiplexedConnection,
    keys: Keys,
    config: QueueConfig,
    dequeue_script: Script,
    settle_script: Script,
    extend_script: Script,
    trim_script: Script,
}

impl RedisQueue {
    pub async fn connect(
        url: &str,
        namespace: &str,
        queue: &str,
        config: QueueConfig,
    ) -> Result<Self, MqError> {
        let client = redis::Client::open(url)?;
        let con = client.get_multiplexed_async_connection().await?;
        Ok(Self::with_connection(con, namespace, queue, config))
    }

    pub fn with_connection(
        con: MultiplexedConnection,
        namespace: &str,
        queue: &str,
        config: QueueConfig,
    ) -> Self {
        Self {
            con,
            keys: Keys::new(namespace, queue),
            config,
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            settle_script: Script::new(SETTLE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
            trim_script: Script::new(TRIM_SCRIPT),
        }
    }

    async fn load(&self, id: &str) -> Result<Option<JobRecord>, MqError> {
        let mut con = self.con.clone();
        let raw: Option<String> = con.hget(&self.keys.jobs, id).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn load_existing(&self, id: &str) -> Result<JobRecord, MqError> {
        self.load(id)
            .await?
            .ok_or_else(|| MqError::NotFound(id.to_string()))
    }

    async fn save(&self, record: &JobRecord) -> Result<(), MqError> {
        let mut con = self.con.clone();
        let raw = serde_json::to_string(record)?;
        let _: () = con.hset(&self.keys.jobs, &record.id, raw).await?;
        Ok(())
    }

    /// Persist `record` and move it to `target` if `lease` still owns the job.
    ///
    /// With `expired_by`, the lease must also have run out by that time.
    async fn settle(
        &self,
        record: &JobRecord,
        lease: &str,
        target: Target<'_>,
        expired_by: Option<i64>,
    ) -> Result<(), MqError> {
        let raw = serde_json::to_string(record)?;
        let (target_key, kind, score) = match target {
            Target::Delayed { ready_at_ms } => (self.keys.delayed.as_str(), "zset", ready_at_ms),
            Target::List(key) => (key, "list", 0),
        };

        let mut con = self.con.clone();
        let outcome: i64 = self
            .settle_script
            .key(&self.keys.jobs)
            .key(&self.keys.leases)
            .key(target_key)
            .arg(&record.id)
            .arg(lease)
            .arg(raw)
            .arg(kind)
            .arg(score)
            .arg(expired_by.map(|ms| ms.to_string()).unwrap_or_default())
            .invoke_async(&mut con)
            .await?;

        match outcome {
            1 => {
                if target_key == self.keys.completed {
                    self.trim(&self.keys.completed, self.config.keep_completed)
                        .await?;
                } else if target_key == self.keys.failed {
                    self.trim(&self.keys.failed, self.config.keep_failed).await?;
                }
                Ok(())
            }
            0 => Err(MqError::LeaseLost(record.id.clone())),
            _ => Err(MqError::NotFound(record.id.clone())),
        }
    }

    async fn trim(&self, list: &str, keep: usize) -> Result<(), MqError> {
        let mut con = self.con.clone();
        let dropped: i64 = self
            .trim_script
            .key(list)
            .key(&self.keys.jobs)
            .key(&self.keys.by_submission)
            .arg(keep)
            .invoke_async(&mut con)
            .await?;
        if dropped > 0 {
            debug!(list, dropped, "Trimmed finished jobs");
        }
        Ok(())
    }

    /// Fetch a record for a settle call, verifying ownership up front.
    async fn owned_record(&self, delivery: &Delivery) -> Result<JobRecord, MqError> {
        let record = self.load_existing(&delivery.id).await?;
        record.check_lease(delivery)?;
        Ok(record)
    }

    /// Lease the job behind a popped id, or fail it if its payload is broken.
    async fn lease_popped(&self, id: &str) -> Result<Option<Delivery>, MqError> {
        let Some(mut record) = self.load(id).await? else {
            let mut con = self.con.clone();
            let _: () = con.zrem(&self.keys.leases, id).await?;
            return Ok(None);
        };

        match record.lease_out() {
            Ok(delivery) => {
                self.save(&record).await?;
                Ok(Some(delivery))
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "Dropping job with malformed payload");
                record.mark_failed(&format!("Malformed job payload: {e}"));
                let raw = serde_json::to_string(&record)?;
                let mut con = self.con.clone();
                let _: () = redis::pipe()
                    .atomic()
                    .hset(&self.keys.jobs, id, raw)
                    .zrem(&self.keys.leases, id)
                    .rpush(&self.keys.failed, id)
                    .query_async(&mut con)
                    .await?;
                self.trim(&self.keys.failed, self.config.keep_failed).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: &SubmissionJob) -> Result<JobId, MqError> {
        let record = JobRecord::new(job)?;
        let raw = serde_json::to_string(&record)?;
        let mut con = self.con.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(&self.keys.jobs, &record.id, raw)
            .hset(&self.keys.by_submission, &record.submission_id, &record.id)
            .rpush(&self.keys.waiting, &record.id)
            .query_async(&mut con)
            .await?;
        debug!(job_id = %record.id, submission_id = %record.submission_id, "Job enqueued");
        Ok(record.id)
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<Delivery>, MqError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let now_ms = Utc::now().timestamp_millis();
            let expiry_ms = now_ms + self.config.visibility_timeout.as_millis() as i64;
            let mut con = self.con.clone();
            let popped: Option<String> = self
                .dequeue_script
                .key(&self.keys.delayed)
                .key(&self.keys.waiting)
                .key(&self.keys.leases)
                .arg(now_ms)
                .arg(expiry_ms)
                .invoke_async(&mut con)
                .await?;

            if let Some(id) = popped {
                if let Some(delivery) = self.lease_popped(&id).await? {
                    return Ok(Some(delivery));
                }
                continue;
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn extend(&self, delivery: &Delivery) -> Result<(), MqError> {
        let expiry_ms =
            Utc::now().timestamp_millis() + self.config.visibility_timeout.as_millis() as i64;
        let mut con = self.con.clone();
        let outcome: i64 = self
            .extend_script
            .key(&self.keys.jobs)
            .key(&self.keys.leases)
            .arg(&delivery.id)
            .arg(&delivery.lease)
            .arg(expiry_ms)
            .invoke_async(&mut con)
            .await?;
        match outcome {
            1 => Ok(()),
            0 => Err(MqError::LeaseLost(delivery.id.clone())),
            _ => Err(MqError::NotFound(delivery.id.clone())),
        }
    }

    fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), MqError> {
        let mut record = self.owned_record(delivery).await?;
        record.mark_completed();
        self.settle(
            &record,
            &delivery.lease,
            Target::List(&self.keys.completed),
            None,
        )
        .await
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> Result<RetryDecision, MqError> {
        let mut record = self.owned_record(delivery).await?;
        let decision = record.record_failure(&self.config.retry, error);
        let target = match &decision {
            RetryDecision::Retry { delay, .. } => Target::Delayed {
                ready_at_ms: Utc::now().timestamp_millis() + delay.as_millis() as i64,
            },
            RetryDecision::Exhausted { .. } => Target::List(&self.keys.failed),
        };
        self.settle(&record, &delivery.lease, target, None).await?;
        Ok(decision)
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), MqError> {
        let mut record = self.owned_record(delivery).await?;
        record.mark_failed(error);
        self.settle(&record, &delivery.lease, Target::List(&self.keys.failed), None)
            .await
    }

    async fn stats(&self) -> Result<QueueStats, MqError> {
        let mut con = self.con.clone();
        let (waiting, delayed, active, completed, failed): (usize, usize, usize, usize, usize) =
            redis::pipe()
                .llen(&self.keys.waiting)
                .zcard(&self.keys.delayed)
                .zcard(&self.keys.leases)
                .llen(&self.keys.completed)
                .llen(&self.keys.failed)
                .query_async(&mut con)
                .await?;
        Ok(QueueStats {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn inspect(&self, id: &str) -> Result<Option<JobRecord>, MqError> {
        self.load(id).await
    }

    async fn retry_failed(&self, id: &str) -> Result<(), MqError> {
        let mut record = self.load_existing(id).await?;
        record.revive()?;
        let raw = serde_json::to_string(&record)?;
        let mut con = self.con.clone();
        let removed: (i64,) = redis::pipe()
            .atomic()
            .lrem(&self.keys.failed, 0, id)
            .hset(&self.keys.jobs, id, raw)
            .ignore()
            .rpush(&self.keys.waiting, id)
            .ignore()
            .query_async(&mut con)
            .await?;
        if removed.0 == 0 {
            debug!(job_id = %id, "Revived job was not in the failed list");
        }
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, MqError> {
        let now_ms = Utc::now().timestamp_millis();
        let mut con = self.con.clone();
        let expired: Vec<String> = con
            .zrangebyscore(&self.keys.leases, "-inf", now_ms)
            .await?;

        let mut reclaimed = 0;
        for id in expired {
            let Some(mut record) = self.load(&id).await? else {
                let _: () = con.zrem(&self.keys.leases, &id).await?;
                continue;
            };
            match (record.state, record.lease.clone()) {
                (JobState::Active, Some(lease)) => {
                    let target = match record.record_failure(&self.config.retry, LEASE_EXPIRED) {
                        RetryDecision::Retry { .. } => Target::Delayed { ready_at_ms: now_ms },
                        RetryDecision::Exhausted { .. } => Target::List(&self.keys.failed),
                    };
                    match self.settle(&record, &lease, target, Some(now_ms)).await {
                        Ok(()) => {
                            warn!(job_id = %id, "Reclaimed job with expired lease");
                            reclaimed += 1;
                        }
                        // Settled or extended by its worker in the meantime.
                        Err(MqError::LeaseLost(_)) | Err(MqError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                (JobState::Waiting, _) => {
                    // Popped but never leased: the dequeuing process died mid-way.
                    let _: () = redis::pipe()
                        .atomic()
                        .zrem(&self.keys.leases, &id)
                        .rpush(&self.keys.waiting, &id)
                        .query_async(&mut con)
                        .await?;
                    reclaimed += 1;
                }
                _ => {
                    let _: () = con.zrem(&self.keys.leases, &id).await?;
                }
            }
        }
        Ok(reclaimed)
    }

    async fn live_job_for(&self, submission_id: &str) -> Result<Option<JobId>, MqError> {
        let mut con = self.con.clone();
        let id: Option<String> = con.hget(&self.keys.by_submission, submission_id).await?;
        let Some(id) = id else {
            return Ok(None);
        };
        Ok(self
            .load(&id)
            .await?
            .filter(|record| record.state.is_live())
            .map(|record| record.id))
    }
}
