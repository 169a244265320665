use chrono::{TimeDelta, Utc};
use common::{Language, SubmissionStatus};
use mq::JobQueue;
use worker::config::ReconcileConfig;
use worker::reconcile::rebuild_job;
use worker::store::SubmissionStore;
use worker::{Reconciler, SweepReport};

use crate::support::{ADD, Harness, addition_cases};

fn reconciler(harness: &Harness) -> Reconciler {
    Reconciler::new(
        harness.queue.clone(),
        harness.states.clone(),
        harness.challenges.clone(),
        ReconcileConfig {
            enabled: true,
            interval_secs: 60,
            queued_timeout_secs: 60,
            running_timeout_secs: 600,
        },
    )
}

/// Store a submission in `status`, last touched `age` ago.
async fn aged(harness: &Harness, id: &str, status: SubmissionStatus, age: TimeDelta) {
    harness
        .submit(id, Language::Python, ADD, addition_cases())
        .await;
    let mut submission = harness.submission(id).await;
    submission.status = status;
    submission.updated_at = Utc::now() - age;
    harness.submissions.update(&submission).await.unwrap();
}

#[tokio::test]
async fn sweep_recovers_lost_submissions_only() {
    let harness = Harness::new();
    // Enqueue failed long ago.
    aged(&harness, "lost", SubmissionStatus::Queued, TimeDelta::minutes(5)).await;
    // Still within the grace period.
    aged(&harness, "fresh", SubmissionStatus::Queued, TimeDelta::seconds(5)).await;
    // Worker crashed mid-grading.
    aged(&harness, "crashed", SubmissionStatus::Running, TimeDelta::minutes(30)).await;
    // Old, but its job is still waiting in line.
    aged(&harness, "backlogged", SubmissionStatus::Queued, TimeDelta::minutes(5)).await;
    let backlogged = harness.submission("backlogged").await;
    let job = rebuild_job(harness.challenges.as_ref(), &backlogged)
        .await
        .unwrap();
    harness.queue.enqueue(&job).await.unwrap();

    let report = reconciler(&harness).sweep().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            requeued: 1,
            reset: 1,
            skipped: 1,
            errors: 0,
        }
    );

    assert_eq!(
        harness.submission("crashed").await.status,
        SubmissionStatus::Queued
    );
    assert!(harness.queue.live_job_for("lost").await.unwrap().is_some());
    assert!(harness.queue.live_job_for("crashed").await.unwrap().is_some());
    assert!(harness.queue.live_job_for("fresh").await.unwrap().is_none());
    assert_eq!(harness.queue.stats().await.unwrap().waiting, 3);

    // Every lost submission now has a job, so a second pass is a no-op apart from skips.
    let again = reconciler(&harness).sweep().await.unwrap();
    assert_eq!(again.requeued, 0);
    assert_eq!(again.reset, 0);
}

#[tokio::test]
async fn sweep_counts_submissions_without_challenge_as_errors() {
    let harness = Harness::new();
    aged(&harness, "s1", SubmissionStatus::Queued, TimeDelta::minutes(5)).await;
    let mut submission = harness.submission("s1").await;
    submission.challenge_id = "deleted".into();
    harness.submissions.update(&submission).await.unwrap();

    let report = reconciler(&harness).sweep().await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(harness.queue.stats().await.unwrap().waiting, 0);
}
