use std::sync::Arc;
use std::time::Duration;

use common::retry::RetryDecision;
use common::{Submission, SubmissionJob};
use mq::{Delivery, JobQueue, MqError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::grader::Grader;
use crate::state::{StateError, SubmissionStateMachine};
use crate::store::LeaderboardHook;

/// Floor for the lease renewal period.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Collaborators shared by every worker in a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<dyn JobQueue>,
    pub grader: Grader,
    pub states: SubmissionStateMachine,
    pub leaderboard: Arc<dyn LeaderboardHook>,
}

/// What the worker does with a delivery after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Retry,
    Fail,
}

impl Settlement {
    fn for_error(err: &WorkerError) -> Self {
        match err {
            WorkerError::State(StateError::NotFound(_)) | WorkerError::SubmissionNotFound(_) => {
                Settlement::Fail
            }
            // Another delivery of the same job already finished the attempt.
            WorkerError::State(StateError::InvalidTransition { .. }) => Settlement::Ack,
            _ => Settlement::Retry,
        }
    }
}

/// One grading loop pulling from the shared queue.
pub struct Worker {
    id: String,
    ctx: WorkerContext,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(id: impl Into<String>, ctx: WorkerContext, poll_timeout: Duration) -> Self {
        Self {
            id: id.into(),
            ctx,
            poll_timeout,
        }
    }

    /// Pull and process jobs until `shutdown` fires.
    ///
    /// A job already dequeued is always settled before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.id, "Worker started");
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.ctx.queue.dequeue(self.poll_timeout) => next,
            };

            match next {
                Ok(Some(delivery)) => self.process(delivery).await,
                Ok(None) => {}
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_timeout) => {}
                    }
                }
            }
        }
        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Grade one delivery and settle it with the queue.
    pub async fn process(&self, delivery: Delivery) {
        let span = info_span!(
            "process",
            worker_id = %self.id,
            job_id = %delivery.id,
            submission_id = %delivery.job.submission_id,
            attempt = delivery.attempt,
        );
        async {
            info!(
                language = %delivery.job.language,
                test_cases = delivery.job.test_cases.len(),
                "Processing submission"
            );

            let (settlement, reason) = match self.handle_leased(&delivery).await {
                Ok(submission) => {
                    info!(status = %submission.status, score = submission.score, "Submission finished");
                    (Settlement::Ack, None)
                }
                Err(e) => {
                    let settlement = Settlement::for_error(&e);
                    match settlement {
                        Settlement::Ack => warn!(error = %e, "Stale completion, dropping job"),
                        _ => error!(error = %e, "Failed to process submission"),
                    }
                    (settlement, Some(e.to_string()))
                }
            };

            self.settle(&delivery, settlement, reason.as_deref()).await;
        }
        .instrument(span)
        .await
    }

    /// Run `handle` while renewing the delivery's lease, so a long grade is
    /// never reclaimed and handed to a second worker.
    async fn handle_leased(&self, delivery: &Delivery) -> Result<Submission> {
        let work = self.handle(&delivery.job);
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval(self.heartbeat_every());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick is immediate and the lease is still fresh.
        heartbeat.tick().await;
        let mut lease_lost = false;

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = heartbeat.tick(), if !lease_lost => {
                    match self.ctx.queue.extend(delivery).await {
                        Ok(()) => debug!("Lease extended"),
                        Err(MqError::LeaseLost(_)) => {
                            warn!("Lease lost while grading, job was redelivered");
                            lease_lost = true;
                        }
                        Err(e) => warn!(error = %e, "Failed to extend lease"),
                    }
                }
            }
        }
    }

    fn heartbeat_every(&self) -> Duration {
        (self.ctx.queue.visibility_timeout() / 3).max(MIN_HEARTBEAT)
    }

    async fn handle(&self, job: &SubmissionJob) -> Result<Submission> {
        let id = &job.submission_id;
        self.ctx.states.mark_running(id).await?;

        let report = match self
            .ctx
            .grader
            .grade(job.language, &job.code, &job.test_cases, job.limits())
            .await
        {
            Ok(report) => report,
            Err(e) => {
                if let Err(fail_err) = self.ctx.states.fail(id, &e.to_string()).await {
                    error!(error = %fail_err, "Failed to record grading failure");
                }
                return Err(e.into());
            }
        };

        let submission = self.ctx.states.complete(id, report).await?;
        self.notify_leaderboard(&submission).await;
        Ok(submission)
    }

    /// Best effort: the terminal status stays whatever the hook does.
    async fn notify_leaderboard(&self, submission: &Submission) {
        if let Err(e) = self
            .ctx
            .leaderboard
            .update_for_challenge(&submission.challenge_id)
            .await
        {
            warn!(challenge_id = %submission.challenge_id, error = %e, "Leaderboard update failed");
        }
        if let Err(e) = self
            .ctx
            .leaderboard
            .update_for_course(&submission.course_id)
            .await
        {
            warn!(course_id = %submission.course_id, error = %e, "Leaderboard update failed");
        }
    }

    async fn settle(&self, delivery: &Delivery, settlement: Settlement, reason: Option<&str>) {
        let reason = reason.unwrap_or("unknown error");
        let result = match settlement {
            Settlement::Ack => self.ctx.queue.ack(delivery).await,
            Settlement::Fail => self.ctx.queue.fail(delivery, reason).await,
            Settlement::Retry => match self.ctx.queue.retry(delivery, reason).await {
                Ok(RetryDecision::Retry { attempt, delay, .. }) => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Job scheduled for retry"
                    );
                    Ok(())
                }
                Ok(RetryDecision::Exhausted { history }) => {
                    error!(retry_count = history.len(), "Max retries exhausted, job failed");
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(()) => debug!(?settlement, "Job settled"),
            Err(MqError::LeaseLost(_)) => {
                warn!(?settlement, "Lease expired before settlement, job was redelivered")
            }
            Err(e) => error!(?settlement, error = %e, "Failed to settle job"),
        }
    }
}

/// A fixed set of workers plus the expired-lease reclaimer.
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(ctx: WorkerContext, config: &WorkerConfig, shutdown: CancellationToken) -> Self {
        let concurrency = config.concurrency.max(1);
        let mut handles = Vec::with_capacity(concurrency + 1);

        for n in 0..concurrency {
            let worker = Worker::new(
                format!("{}-{n}", config.id),
                ctx.clone(),
                config.poll_timeout(),
            );
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(token).await }));
        }

        handles.push(tokio::spawn(reclaim_loop(
            ctx.queue.clone(),
            config.reclaim_interval(),
            shutdown.clone(),
        )));

        info!(worker_id = %config.id, concurrency, "Worker pool started");
        Self { shutdown, handles }
    }

    /// Signal every task to stop and wait for in-flight jobs to settle.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn reclaim_loop(queue: Arc<dyn JobQueue>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match queue.requeue_expired().await {
            Ok(0) => {}
            Ok(reclaimed) => warn!(reclaimed, "Reclaimed jobs with expired leases"),
            Err(e) => error!(error = %e, "Failed to reclaim expired jobs"),
        }
    }
}
