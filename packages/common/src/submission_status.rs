use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a submission during the grading lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    /// Waiting to be picked up by a worker.
    #[default]
    Queued,
    /// A worker is running the test cases.
    Running,
    /// All test cases passed.
    Accepted,
    /// At least one output did not match and nothing worse happened.
    WrongAnswer,
    /// A test case ran past its deadline.
    TimeLimitExceeded,
    /// Program crashed, exited non-zero, or could not be launched.
    RuntimeError,
    /// Source failed to compile.
    CompilationError,
}

impl SubmissionStatus {
    /// Returns true once grading for the current attempt has finished.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `RUNNING` may be re-entered from any state: redelivery of a job after a
    /// worker crash and explicit reprocessing both go through it. Terminal
    /// states are only reachable from `RUNNING`. `QUEUED` is reachable from
    /// `RUNNING` so stale attempts can be handed back to the queue.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        match next {
            Self::Running => true,
            Self::Queued => matches!(self, Self::Queued | Self::Running),
            _ => matches!(self, Self::Running),
        }
    }

    pub const ALL: &'static [SubmissionStatus] = &[
        Self::Queued,
        Self::Running,
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
    ];

    pub const TERMINAL: &'static [SubmissionStatus] = &[
        Self::Accepted,
        Self::WrongAnswer,
        Self::TimeLimitExceeded,
        Self::RuntimeError,
        Self::CompilationError,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Accepted => "ACCEPTED",
            Self::WrongAnswer => "WRONG_ANSWER",
            Self::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::CompilationError => "COMPILATION_ERROR",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            SubmissionStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for SubmissionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubmissionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}

/// Outcome of a single test case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Output matched.
    Ok,
    WrongAnswer,
    TimeLimitExceeded,
    RuntimeError,
    CompilationError,
}

impl Verdict {
    /// Rank used to pick the overall status when cases fail differently.
    ///
    /// `COMPILATION_ERROR > RUNTIME_ERROR > TIME_LIMIT_EXCEEDED > WRONG_ANSWER > OK`
    pub fn severity(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::WrongAnswer => 1,
            Self::TimeLimitExceeded => 2,
            Self::RuntimeError => 3,
            Self::CompilationError => 4,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Submission status this verdict rolls up to.
    pub fn as_status(&self) -> SubmissionStatus {
        match self {
            Self::Ok => SubmissionStatus::Accepted,
            Self::WrongAnswer => SubmissionStatus::WrongAnswer,
            Self::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
            Self::RuntimeError => SubmissionStatus::RuntimeError,
            Self::CompilationError => SubmissionStatus::CompilationError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            other => other.as_status().as_str(),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
