pub mod containers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::retry::{RetryDecision, RetryPolicy};
use common::{Language, Submission, SubmissionJob, SubmissionStatus, TestCase};
use mq::{Delivery, JobId, JobQueue, JobRecord, MemoryQueue, MqError, QueueConfig, QueueStats};
use worker::config::SandboxConfig;
use worker::language::{ExecutorSettings, SandboxExecutor, Toolchain};
use worker::sandbox::ProcessSandbox;
use worker::store::{
    Challenge, LeaderboardHook, MemoryChallengeStore, MemorySubmissionStore, RecordingLeaderboard,
    StoreError,
};
use worker::{ExecutorRegistry, Grader, SubmissionStateMachine, WorkerContext};

/// Runs submissions as POSIX shell scripts, standing in for an interpreted language.
pub struct Shell {
    pub language: Language,
}

impl Toolchain for Shell {
    fn language(&self) -> Language {
        self.language
    }

    fn source_file(&self) -> &str {
        "solution.sh"
    }

    fn image(&self) -> &str {
        ""
    }

    fn run_command(&self) -> Vec<String> {
        vec!["sh".into(), "solution.sh".into()]
    }
}

/// Shell scripts with a syntax check as the build step, standing in for a compiled language.
pub struct CheckedShell {
    pub language: Language,
}

impl Toolchain for CheckedShell {
    fn language(&self) -> Language {
        self.language
    }

    fn source_file(&self) -> &str {
        "solution.sh"
    }

    fn image(&self) -> &str {
        ""
    }

    fn compile_command(&self) -> Option<Vec<String>> {
        Some(vec!["sh".into(), "-n".into(), "solution.sh".into()])
    }

    fn run_command(&self) -> Vec<String> {
        vec!["sh".into(), "solution.sh".into()]
    }

    fn is_compile_failure(&self, stderr: &str) -> bool {
        stderr.to_lowercase().contains("syntax error")
    }
}

pub fn settings(scratch_root: Option<&std::path::Path>) -> ExecutorSettings {
    ExecutorSettings {
        compile_timeout: Duration::from_secs(10),
        compile_memory_mb: 256,
        scratch_root: scratch_root.map(|p| p.to_path_buf()),
    }
}

/// Python runs as shell, C++ as syntax-checked shell, Java is left unregistered.
pub fn shell_registry(scratch_root: Option<&std::path::Path>) -> ExecutorRegistry {
    let sandbox = Arc::new(ProcessSandbox::new(&SandboxConfig::default()));
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(SandboxExecutor::new(
        Shell {
            language: Language::Python,
        },
        sandbox.clone(),
        settings(scratch_root),
    )));
    registry.register(Arc::new(SandboxExecutor::new(
        CheckedShell {
            language: Language::Cpp,
        },
        sandbox,
        settings(scratch_root),
    )));
    registry
}

pub fn case(id: &str, input: &str, expected: &str, order: u32) -> TestCase {
    TestCase {
        id: id.into(),
        input: input.into(),
        expected_output: expected.into(),
        is_hidden: order % 2 == 1,
        order,
    }
}

/// Challenge "c1" of course "k1" with a 1 s, 64 MB budget.
pub fn challenge(test_cases: Vec<TestCase>) -> Challenge {
    Challenge {
        id: "c1".into(),
        course_id: "k1".into(),
        time_limit_ms: 1000,
        memory_limit_mb: 64,
        test_cases,
    }
}

/// Adds the two numbers on stdin.
pub const ADD: &str = "read a b\necho $((a + b))\n";

pub fn addition_cases() -> Vec<TestCase> {
    vec![case("t1", "1 2\n", "3\n", 0), case("t2", "20 22\n", "42\n", 1)]
}

/// Everything a worker needs, backed by memory.
pub struct Harness {
    pub queue: Arc<MemoryQueue>,
    pub submissions: Arc<MemorySubmissionStore>,
    pub challenges: Arc<MemoryChallengeStore>,
    pub leaderboard: Arc<RecordingLeaderboard>,
    pub states: SubmissionStateMachine,
    pub grader: Grader,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(shell_registry(None))
    }

    pub fn with_registry(registry: ExecutorRegistry) -> Self {
        Self::build(registry, fast_queue())
    }

    pub fn with_queue(config: QueueConfig) -> Self {
        Self::build(shell_registry(None), config)
    }

    fn build(registry: ExecutorRegistry, config: QueueConfig) -> Self {
        let submissions = Arc::new(MemorySubmissionStore::new());
        Self {
            queue: Arc::new(MemoryQueue::new(config)),
            states: SubmissionStateMachine::new(submissions.clone()),
            submissions,
            challenges: Arc::new(MemoryChallengeStore::new()),
            leaderboard: Arc::new(RecordingLeaderboard::new()),
            grader: Grader::new(registry),
        }
    }

    pub fn context(&self) -> WorkerContext {
        WorkerContext {
            queue: self.queue.clone(),
            grader: self.grader.clone(),
            states: self.states.clone(),
            leaderboard: self.leaderboard.clone(),
        }
    }

    /// Store a QUEUED submission and its challenge, returning the matching job.
    pub async fn submit(
        &self,
        id: &str,
        language: Language,
        code: &str,
        cases: Vec<TestCase>,
    ) -> SubmissionJob {
        let submission = Submission::new(id, "u1", "c1", "k1", language, code);
        let challenge = challenge(cases);
        let job = challenge.job_for(&submission);
        self.challenges.insert(challenge).await;
        self.submissions.insert(submission).await;
        job
    }

    pub async fn submission(&self, id: &str) -> Submission {
        use worker::store::SubmissionStore;
        self.submissions
            .find_by_id(id)
            .await
            .unwrap()
            .expect("submission stored")
    }

    /// Poll until `id` reaches a terminal status.
    pub async fn wait_terminal(&self, id: &str) -> Submission {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            let submission = self.submission(id).await;
            if submission.status.is_terminal() {
                return submission;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "submission {id} stuck in {}",
                submission.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Upper bound for a dequeue in tests.
pub const WAIT: Duration = Duration::from_millis(500);

pub fn fast_queue() -> QueueConfig {
    QueueConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 20,
            max_delay_ms: 100,
        },
        visibility_timeout: Duration::from_secs(30),
        keep_completed: 10,
        keep_failed: 10,
    }
}

pub fn assert_status(submission: &Submission, status: SubmissionStatus) {
    assert_eq!(
        submission.status, status,
        "unexpected status, error: {:?}",
        submission.error_message
    );
}

/// A queue whose backend is always unreachable.
pub struct DownQueue;

fn down() -> MqError {
    MqError::Connection("connection refused".into())
}

#[async_trait]
impl JobQueue for DownQueue {
    async fn enqueue(&self, _job: &SubmissionJob) -> Result<JobId, MqError> {
        Err(down())
    }

    async fn dequeue(&self, _wait: Duration) -> Result<Option<Delivery>, MqError> {
        Err(down())
    }

    async fn extend(&self, _delivery: &Delivery) -> Result<(), MqError> {
        Err(down())
    }

    fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), MqError> {
        Err(down())
    }

    async fn retry(&self, _delivery: &Delivery, _error: &str) -> Result<RetryDecision, MqError> {
        Err(down())
    }

    async fn fail(&self, _delivery: &Delivery, _error: &str) -> Result<(), MqError> {
        Err(down())
    }

    async fn stats(&self) -> Result<QueueStats, MqError> {
        Err(down())
    }

    async fn inspect(&self, _id: &str) -> Result<Option<JobRecord>, MqError> {
        Err(down())
    }

    async fn retry_failed(&self, _id: &str) -> Result<(), MqError> {
        Err(down())
    }

    async fn requeue_expired(&self) -> Result<usize, MqError> {
        Err(down())
    }

    async fn live_job_for(&self, _submission_id: &str) -> Result<Option<JobId>, MqError> {
        Err(down())
    }
}

/// A leaderboard service that rejects every request.
pub struct BrokenLeaderboard;

#[async_trait]
impl LeaderboardHook for BrokenLeaderboard {
    async fn update_for_challenge(&self, _challenge_id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("leaderboard down".into()))
    }

    async fn update_for_course(&self, _course_id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("leaderboard down".into()))
    }
}
