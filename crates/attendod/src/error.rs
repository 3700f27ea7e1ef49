use crate::service::ServiceError;
use attendo_core::{SessionError, StoreError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// An error as the HTTP API reports it: a status and a `{error, code}` body.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for AppError {}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            ServiceError::Frame(_) | ServiceError::InvalidLabel(_) => {
                (StatusCode::BAD_REQUEST, "invalid_input")
            }
            ServiceError::NoFace => (StatusCode::BAD_REQUEST, "no_face"),
            ServiceError::MultipleFaces(_) => (StatusCode::BAD_REQUEST, "multiple_faces"),
            ServiceError::Extractor(_) => (StatusCode::BAD_GATEWAY, "extractor_unavailable"),
            ServiceError::Store(StoreError::DuplicateLabel(_)) => (StatusCode::CONFLICT, "duplicate_label"),
            ServiceError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::Store(_) | ServiceError::Worker(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persistence_unavailable")
            }
            ServiceError::Session(SessionError::UnknownSession(_)) => {
                (StatusCode::NOT_FOUND, "unknown_session")
            }
            ServiceError::Session(SessionError::DefaultSession) => {
                (StatusCode::BAD_REQUEST, "default_session")
            }
            ServiceError::Photo(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, "request failed");
        }
        Self::new(status, code, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: &self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}
