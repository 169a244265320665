pub mod config;
pub mod judge_job;
pub mod judge_result;
pub mod retry;
pub mod submission;
pub mod submission_status;

pub use config::MqAppConfig;
pub use judge_job::{ExecutionLimits, Language, SubmissionJob, TestCase};
pub use judge_result::{GradeReport, TestCaseResult};
pub use submission::Submission;
pub use submission_status::{SubmissionStatus, Verdict};
