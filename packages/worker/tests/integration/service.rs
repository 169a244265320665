use std::sync::Arc;

use common::{Language, SubmissionStatus};
use mq::{JobQueue, JobState, MqError};
use worker::{JudgeService, SubmitOutcome, Worker, WorkerError};

use crate::support::{ADD, DownQueue, Harness, WAIT, addition_cases, assert_status};

fn service(harness: &Harness) -> JudgeService {
    JudgeService::new(
        harness.queue.clone(),
        harness.states.clone(),
        harness.challenges.clone(),
    )
}

#[tokio::test]
async fn submit_reports_job_id_and_stats() {
    let harness = Harness::new();
    let service = service(&harness);
    let job = harness
        .submit("s1", Language::Python, ADD, addition_cases())
        .await;

    let SubmitOutcome::Enqueued(job_id) = service.submit(&job).await else {
        panic!("expected the job to be enqueued");
    };
    assert_eq!(
        service.job_status(&job_id).await.unwrap(),
        Some(JobState::Waiting)
    );
    assert_eq!(service.queue_stats().await.unwrap().waiting, 1);
    assert_eq!(service.job_status("nope").await.unwrap(), None);
}

#[tokio::test]
async fn enqueue_failure_is_deferred_and_submission_stays_queued() {
    let harness = Harness::new();
    let service = JudgeService::new(
        Arc::new(DownQueue),
        harness.states.clone(),
        harness.challenges.clone(),
    );
    let job = harness
        .submit("s1", Language::Python, ADD, addition_cases())
        .await;

    assert_eq!(service.submit(&job).await, SubmitOutcome::Deferred);
    assert_status(&harness.submission("s1").await, SubmissionStatus::Queued);

    let err = service.queue_stats().await.unwrap_err();
    assert!(matches!(err, WorkerError::Mq(MqError::Connection(_))));
}

#[tokio::test]
async fn failed_job_can_be_retried_manually() {
    let harness = Harness::new();
    let service = service(&harness);
    let job = harness
        .submit("s1", Language::Python, ADD, addition_cases())
        .await;
    let SubmitOutcome::Enqueued(job_id) = service.submit(&job).await else {
        panic!("expected the job to be enqueued");
    };

    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    harness.queue.fail(&delivery, "operator test").await.unwrap();
    assert_eq!(service.queue_stats().await.unwrap().failed, 1);

    service.retry_failed_job(&job_id).await.unwrap();
    assert_eq!(
        service.job_status(&job_id).await.unwrap(),
        Some(JobState::Waiting)
    );

    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    assert_eq!(delivery.attempt, 1);
    Worker::new("w", harness.context(), WAIT)
        .process(delivery)
        .await;
    assert_status(&harness.submission("s1").await, SubmissionStatus::Accepted);

    assert!(service.retry_failed_job(&job_id).await.is_err());
}

#[tokio::test]
async fn reprocess_regrades_a_finished_submission() {
    let harness = Harness::new();
    let service = service(&harness);
    let job = harness
        .submit("s1", Language::Python, "echo 3\n", addition_cases())
        .await;
    service.submit(&job).await;

    let worker = Worker::new("w", harness.context(), WAIT);
    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    worker.process(delivery).await;
    let first = harness.submission("s1").await;
    assert_status(&first, SubmissionStatus::WrongAnswer);

    service.reprocess("s1").await.unwrap();
    let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
    worker.process(delivery).await;

    let second = harness.submission("s1").await;
    assert_status(&second, SubmissionStatus::WrongAnswer);
    assert_eq!(second.test_case_results.len(), 2);
    assert!(second.updated_at > first.updated_at);

    assert!(matches!(
        service.reprocess("missing").await,
        Err(WorkerError::SubmissionNotFound(_))
    ));
}
