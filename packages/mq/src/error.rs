use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    /// The queue backend could not be reached.
    #[error("Queue unavailable: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The delivery's lease expired and the job was handed to someone else.
    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl MqError {
    /// Whether the failure is the backend being unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<redis::RedisError> for MqError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() {
            MqError::Connection(e.to_string())
        } else {
            MqError::Internal(e.to_string())
        }
    }
}
