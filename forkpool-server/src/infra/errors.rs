use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use forkpool_model::ModelError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

pub const ROUTE_NOT_FOUND: &str = "Route not found";
pub const METHOD_NOT_ALLOWED: &str = "Method not allowed";
pub const USER_NOT_FOUND: &str = "User not found";

/// Error value returned by handlers, rendered as `{"message": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn user_not_found() -> Self {
        Self::not_found(USER_NOT_FOUND)
    }

    pub fn route_not_found() -> Self {
        Self::not_found(ROUTE_NOT_FOUND)
    }

    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), message = %self.message, "request failed");
        }

        let body = Json(json!({ "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        Self::bad_request(err.to_string())
    }
}

pub async fn route_not_found() -> AppError {
    AppError::route_not_found()
}

pub async fn method_not_allowed() -> AppError {
    AppError::method_not_allowed()
}
