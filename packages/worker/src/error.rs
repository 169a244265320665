use thiserror::Error;

use crate::grader::GradeError;
use crate::state::StateError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(#[from] mq::MqError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Grade(#[from] GradeError),

    #[error("Challenge not found: {0}")]
    ChallengeNotFound(String),

    #[error("Submission not found: {0}")]
    SubmissionNotFound(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
