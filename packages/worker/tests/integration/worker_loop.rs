use std::sync::Arc;
use std::time::Duration;

use common::{Language, SubmissionStatus};
use mq::{JobQueue, JobState, QueueConfig};
use tokio_util::sync::CancellationToken;
use worker::config::WorkerConfig;
use worker::{Worker, WorkerContext, WorkerPool};

use crate::support::{
    ADD, BrokenLeaderboard, Harness, WAIT, addition_cases, assert_status, case, fast_queue,
};

#[tokio::test]
async fn redelivered_job_overwrites_instead_of_accumulating() {
    let harness = Harness::new();
    let job = harness
        .submit("s1", Language::Python, ADD, addition_cases())
        .await;
    // At-least-once: the same job can arrive twice.
    harness.queue.enqueue(&job).await.unwrap();
    harness.queue.enqueue(&job).await.unwrap();

    let worker = Worker::new("w", harness.context(), WAIT);
    for _ in 0..2 {
        let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
        worker.process(delivery).await;
    }

    let submission = harness.submission("s1").await;
    assert_status(&submission, SubmissionStatus::Accepted);
    assert_eq!(submission.test_case_results.len(), job.test_cases.len());
    assert_eq!(harness.queue.stats().await.unwrap().completed, 2);
}

#[tokio::test]
async fn missing_submission_fails_job_without_retry() {
    let harness = Harness::new();
    let job = harness
        .submit("s1", Language::Python, ADD, addition_cases())
        .await;
    let mut orphan = job.clone();
    orphan.submission_id = "ghost".into();
    let job_id = harness.queue.enqueue(&orphan).await.unwrap();

    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    Worker::new("w", harness.context(), WAIT).process(delivery).await;

    assert_eq!(
        harness.queue.job_status(&job_id).await.unwrap(),
        Some(JobState::Failed)
    );
    let record = harness.queue.inspect(&job_id).await.unwrap().unwrap();
    assert!(record.history.is_empty());
}

#[tokio::test]
async fn grading_error_records_runtime_error_then_retries() {
    let harness = Harness::new();
    // No executor is registered for Java.
    let job = harness
        .submit("s1", Language::Java, "class Main {}", addition_cases())
        .await;
    let job_id = harness.queue.enqueue(&job).await.unwrap();

    let worker = Worker::new("w", harness.context(), WAIT);
    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    worker.process(delivery).await;

    let submission = harness.submission("s1").await;
    assert_status(&submission, SubmissionStatus::RuntimeError);
    assert!(submission.error_message.unwrap().contains("java"));
    assert_eq!(
        harness.queue.job_status(&job_id).await.unwrap(),
        Some(JobState::Delayed)
    );

    // Second and last attempt.
    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    assert_eq!(delivery.attempt, 2);
    worker.process(delivery).await;
    assert_eq!(
        harness.queue.job_status(&job_id).await.unwrap(),
        Some(JobState::Failed)
    );
    assert_eq!(
        harness.queue.inspect(&job_id).await.unwrap().unwrap().history.len(),
        2
    );
}

#[tokio::test]
async fn leaderboard_failure_keeps_terminal_status() {
    let harness = Harness::new();
    let job = harness
        .submit("s1", Language::Python, ADD, addition_cases())
        .await;
    let job_id = harness.queue.enqueue(&job).await.unwrap();

    let ctx = WorkerContext {
        leaderboard: Arc::new(BrokenLeaderboard),
        ..harness.context()
    };
    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    Worker::new("w", ctx, WAIT).process(delivery).await;

    assert_status(&harness.submission("s1").await, SubmissionStatus::Accepted);
    assert_eq!(
        harness.queue.job_status(&job_id).await.unwrap(),
        Some(JobState::Completed)
    );
}

#[tokio::test]
async fn grading_longer_than_visibility_timeout_keeps_its_lease() {
    let harness = Harness::with_queue(QueueConfig {
        visibility_timeout: Duration::from_millis(300),
        ..fast_queue()
    });
    let cases = vec![
        case("t1", "", "x\n", 0),
        case("t2", "", "x\n", 1),
        case("t3", "", "x\n", 2),
    ];
    let job = harness
        .submit("s1", Language::Python, "sleep 0.4\necho x\n", cases)
        .await;
    let job_id = harness.queue.enqueue(&job).await.unwrap();

    // Reclaim as aggressively as a busy pool would.
    let reclaimer = {
        let queue = harness.queue.clone();
        tokio::spawn(async move {
            loop {
                queue.requeue_expired().await.unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    Worker::new("w", harness.context(), WAIT)
        .process(delivery)
        .await;
    reclaimer.abort();

    assert_status(&harness.submission("s1").await, SubmissionStatus::Accepted);
    let record = harness.queue.inspect(&job_id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Completed);
    assert!(record.history.is_empty(), "{:?}", record.history);
}

#[tokio::test]
async fn pool_drains_queue_and_stops() {
    let harness = Harness::new();
    for id in ["s1", "s2", "s3"] {
        let job = harness
            .submit(id, Language::Python, ADD, addition_cases())
            .await;
        harness.queue.enqueue(&job).await.unwrap();
    }

    let config = WorkerConfig {
        id: "test".into(),
        concurrency: 2,
        poll_timeout_secs: 1,
        reclaim_interval_secs: 1,
    };
    let shutdown = CancellationToken::new();
    let pool = WorkerPool::start(harness.context(), &config, shutdown.clone());

    for id in ["s1", "s2", "s3"] {
        let submission = harness.wait_terminal(id).await;
        assert_status(&submission, SubmissionStatus::Accepted);
    }

    tokio::time::timeout(std::time::Duration::from_secs(5), pool.stop())
        .await
        .expect("pool did not stop");
    assert!(shutdown.is_cancelled());

    let stats = harness.queue.stats().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.waiting, 0);
}
