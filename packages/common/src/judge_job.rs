use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Languages a submission can be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Cpp,
    Java,
}

impl Language {
    pub const ALL: &'static [Language] = &[Self::Python, Self::Javascript, Self::Cpp, Self::Java];

    /// Compiled languages build first and only run on success.
    pub fn is_compiled(&self) -> bool {
        matches!(self, Self::Cpp | Self::Java)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Cpp => "cpp",
            Self::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .copied()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| format!("Unsupported language '{s}'"))
    }
}

/// One input/expected-output pair, copied from the challenge at job creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub id: String,
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub is_hidden: bool,
    /// Position within the challenge. Cases sharing an order keep job order.
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitsError {
    #[error("time limit must be positive")]
    ZeroTime,
    #[error("memory limit must be positive")]
    ZeroMemory,
}

/// Per-case resource limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLimits {
    pub time_limit_ms: u64,
    pub memory_limit_mb: u32,
}

impl ExecutionLimits {
    pub fn new(time_limit_ms: u64, memory_limit_mb: u32) -> Result<Self, LimitsError> {
        let limits = Self {
            time_limit_ms,
            memory_limit_mb,
        };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.time_limit_ms == 0 {
            return Err(LimitsError::ZeroTime);
        }
        if self.memory_limit_mb == 0 {
            return Err(LimitsError::ZeroMemory);
        }
        Ok(())
    }
}

/// Everything needed to grade one submission.
///
/// This is a snapshot taken when the submission is created, so grading never
/// has to re-read mutable challenge state mid-flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionJob {
    pub submission_id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub course_id: String,
    pub language: Language,
    pub code: String,
    /// Milliseconds per test case.
    pub time_limit: u64,
    /// Megabytes per test case.
    pub memory_limit: u32,
    pub test_cases: Vec<TestCase>,
}

impl SubmissionJob {
    pub fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_limit_ms: self.time_limit,
            memory_limit_mb: self.memory_limit,
        }
    }

    /// Test cases sorted by `order`, stable for equal orders.
    pub fn ordered_test_cases(&self) -> Vec<TestCase> {
        let mut cases = self.test_cases.clone();
        cases.sort_by_key(|tc| tc.order);
        cases
    }

    pub fn test_case_ids(&self) -> Vec<&str> {
        self.test_cases.iter().map(|tc| tc.id.as_str()).collect()
    }
}
