use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::PollError;

pub type AppResult<T> = Result<T, AppError>;

/// HTTP face of a [`PollError`].
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "kind": self.kind,
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<PollError> for AppError {
    fn from(err: PollError) -> Self {
        let status = match err {
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            PollError::InvalidState(_) => StatusCode::BAD_REQUEST,
            PollError::Conflict(_) => StatusCode::CONFLICT,
            PollError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PollError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, err.kind(), err.to_string())
    }
}

// Unreadable request bodies are malformed input like any other
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::from(PollError::Validation(rejection.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_errors_map_to_statuses() {
        let cases = [
            (PollError::NotFound("X".into()), StatusCode::NOT_FOUND),
            (PollError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (PollError::InvalidState("x".into()), StatusCode::BAD_REQUEST),
            (PollError::Conflict("X".into()), StatusCode::CONFLICT),
            (PollError::StorageFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (PollError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
        ];
        for (err, status) in cases {
            let kind = err.kind();
            let app = AppError::from(err);
            assert_eq!(app.status, status);
            assert_eq!(app.kind, kind);
        }
    }
}
