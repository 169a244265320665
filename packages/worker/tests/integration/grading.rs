use common::{ExecutionLimits, Language, SubmissionStatus, Verdict};
use mq::JobQueue;
use worker::store::LeaderboardEvent;

use crate::support::{ADD, Harness, WAIT, addition_cases, assert_status, case, shell_registry};

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn partial_pass_is_wrong_answer_with_half_score() {
        let harness = Harness::new();
        let cases = vec![case("t1", "1 2\n", "3\n", 0), case("t2", "2 2\n", "5\n", 1)];
        let job = harness.submit("s1", Language::Python, ADD, cases).await;
        harness.queue.enqueue(&job).await.unwrap();

        let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
        worker::Worker::new("w", harness.context(), WAIT)
            .process(delivery)
            .await;

        let submission = harness.submission("s1").await;
        assert_status(&submission, SubmissionStatus::WrongAnswer);
        assert_eq!(submission.score, 50.0);
        assert_eq!(submission.test_case_results.len(), 2);
        assert_eq!(submission.test_case_results[0].status, Verdict::Ok);
        let wrong = &submission.test_case_results[1];
        assert_eq!(wrong.status, Verdict::WrongAnswer);
        assert_eq!(wrong.actual_output.as_deref(), Some("4"));
        assert_eq!(wrong.expected_output.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn syntax_error_in_compiled_language_is_compilation_error() {
        let harness = Harness::new();
        let job = harness
            .submit("s1", Language::Cpp, "if then fi (\n", addition_cases())
            .await;
        harness.queue.enqueue(&job).await.unwrap();

        let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
        worker::Worker::new("w", harness.context(), WAIT)
            .process(delivery)
            .await;

        let submission = harness.submission("s1").await;
        assert_status(&submission, SubmissionStatus::CompilationError);
        assert_eq!(submission.score, 0.0);
        assert!(
            submission
                .test_case_results
                .iter()
                .all(|r| r.status == Verdict::CompilationError)
        );
        let message = submission.error_message.unwrap();
        assert!(message.starts_with("t1: "), "{message}");
    }

    #[tokio::test]
    async fn infinite_loop_times_out_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let harness = Harness::with_registry(shell_registry(Some(scratch.path())));
        let job = harness
            .submit(
                "s1",
                Language::Python,
                "while :; do :; done\n",
                vec![case("t1", "", "never\n", 0)],
            )
            .await;

        let started = std::time::Instant::now();
        let report = harness
            .grader
            .grade(job.language, &job.code, &job.test_cases, job.limits())
            .await
            .unwrap();

        assert_eq!(report.status, SubmissionStatus::TimeLimitExceeded);
        assert_eq!(report.test_case_results[0].status, Verdict::TimeLimitExceeded);
        assert_eq!(report.test_case_results[0].time_ms, 1000);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!(report.error_message.unwrap().contains("Time limit exceeded"));

        let leftovers: Vec<_> = std::fs::read_dir(scratch.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "scratch not removed: {leftovers:?}");
    }

    #[tokio::test]
    async fn all_pass_is_accepted_and_notifies_leaderboards_once() {
        let harness = Harness::new();
        let job = harness
            .submit("s1", Language::Python, ADD, addition_cases())
            .await;
        harness.queue.enqueue(&job).await.unwrap();

        let delivery = harness.queue.dequeue(WAIT).await.unwrap().unwrap();
        worker::Worker::new("w", harness.context(), WAIT)
            .process(delivery)
            .await;

        let submission = harness.submission("s1").await;
        assert_status(&submission, SubmissionStatus::Accepted);
        assert_eq!(submission.score, 100.0);
        assert!(submission.error_message.is_none());
        assert_eq!(
            harness.leaderboard.events().await,
            vec![
                LeaderboardEvent::Challenge("c1".into()),
                LeaderboardEvent::Course("k1".into()),
            ]
        );
    }
}

mod executor {
    use super::*;

    #[tokio::test]
    async fn runtime_failure_keeps_stderr() {
        let harness = Harness::new();
        let report = harness
            .grader
            .grade(
                Language::Python,
                "echo 'division by zero' >&2\nexit 3\n",
                &addition_cases(),
                ExecutionLimits::new(1000, 64).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, SubmissionStatus::RuntimeError);
        let first = &report.test_case_results[0];
        assert_eq!(first.status, Verdict::RuntimeError);
        assert!(first.error_message.as_deref().unwrap().contains("division by zero"));
        assert_eq!(report.test_case_results.len(), 2);
    }

    #[tokio::test]
    async fn compiled_language_runs_after_clean_build() {
        let harness = Harness::new();
        let report = harness
            .grader
            .grade(
                Language::Cpp,
                ADD,
                &addition_cases(),
                ExecutionLimits::new(1000, 64).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(report.status, SubmissionStatus::Accepted);
        assert_eq!(report.score, 100.0);
    }

    #[tokio::test]
    async fn failing_cases_do_not_stop_later_ones() {
        let harness = Harness::new();
        let cases = vec![
            case("first", "", "x\n", 0),
            case("wrong", "", "y\n", 1),
            case("last", "", "x\n", 2),
        ];
        let code = "echo x\n";
        let report = harness
            .grader
            .grade(
                Language::Python,
                code,
                &cases,
                ExecutionLimits::new(1000, 64).unwrap(),
            )
            .await
            .unwrap();

        let statuses: Vec<_> = report.test_case_results.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![Verdict::Ok, Verdict::WrongAnswer, Verdict::Ok]);
        assert_eq!(report.status, SubmissionStatus::WrongAnswer);
        assert!((report.score - 200.0 / 3.0).abs() < 1e-9);
    }
}
