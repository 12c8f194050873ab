use thiserror::Error;

pub type PollResult<T> = Result<T, PollError>;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll {0} not found")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("poll {0} already exists")]
    Conflict(String),

    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl PollError {
    /// Stable machine-readable name sent to clients alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::NotFound(_) => "not_found",
            PollError::Unauthorized(_) => "unauthorized",
            PollError::InvalidState(_) => "invalid_state",
            PollError::Conflict(_) => "conflict",
            PollError::StorageFailure(_) => "storage_failure",
            PollError::Validation(_) => "validation",
        }
    }
}

impl From<sqlx::Error> for PollError {
    fn from(err: sqlx::Error) -> Self {
        PollError::StorageFailure(err.to_string())
    }
}

impl From<serde_json::Error> for PollError {
    fn from(err: serde_json::Error) -> Self {
        PollError::StorageFailure(format!("malformed document: {}", err))
    }
}
