// Domain error taxonomy and its HTTP rendering.
//
// Stores normalize driver errors into these kinds, services attach
// domain messages, and the HTTP layer maps kinds to status codes
// uniformly. Server errors carry a cause for logging only; their public
// message is always "Internal server error".

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Forbidden,
    BadRequest,
    ValidationFailed,
    BusinessValidation,
    DuplicateEntry,
    Server,
}

impl ErrorKind {
    pub const fn status(self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BusinessValidation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DuplicateEntry => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Server => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub struct ApiError {
    kind: ErrorKind,
    message: String,
    meta: Option<Value>,
    cause: Option<anyhow::Error>,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Structural input errors with per-field detail in `meta`.
    pub fn validation_failed(field_errors: Value) -> Self {
        Self::new(ErrorKind::ValidationFailed, "Validation Failed").with_meta(field_errors)
    }

    /// Semantic rule violation, e.g. "you cannot add yourself as a member".
    pub fn business_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BusinessValidation, message)
    }

    pub fn duplicate_entry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateEntry, message)
    }

    /// Unexpected failure. The cause is logged, never rendered.
    pub fn server(message: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self { cause: Some(cause.into()), ..Self::new(ErrorKind::Server, message) }
    }

    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), meta: None, cause: None }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The message safe to show a client; server errors are masked.
    pub fn public_message(&self) -> &str {
        if self.kind == ErrorKind::Server {
            "Internal server error"
        } else {
            &self.message
        }
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }
}

impl fmt::Debug for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();

        let message = if self.kind == ErrorKind::Server {
            match &self.cause {
                Some(cause) => error!(message = %self.message, error = ?cause, "internal server error"),
                None => error!(message = %self.message, "internal server error"),
            }
            "Internal server error".to_string()
        } else {
            self.message
        };

        let mut body = json!({
            "status": status.as_u16(),
            "message": message,
        });
        if self.kind != ErrorKind::Server {
            if let Some(meta) = self.meta {
                body["meta"] = meta;
            }
        }

        (status, Json(body)).into_response()
    }
}
