use actix_web::{http::StatusCode, ResponseError};
use thiserror::Error;

use crate::response::response_from_error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    /// Validation failure attributed to a single request field.
    #[error("{field}: {msg}")]
    Field { field: String, msg: String },
    #[error("{0}")]
    BadRequest(String),
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized("Authentication credentials were not provided.".to_string())
    }

    pub fn invalid_token() -> Self {
        Self::Unauthorized("Invalid token.".to_string())
    }

    pub fn not_found() -> Self {
        Self::NotFound("Not found.".to_string())
    }

    pub fn field_error(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            msg: msg.into(),
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self::field_error(field, "This field is required.")
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal() -> Self {
        Self::Internal
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Field { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        response_from_error(self)
    }
}
