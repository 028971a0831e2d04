//! Error types for the HTTP service.

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tenant_session_core::SessionError;

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Key is reserved: {0}")]
    ReservedKey(String),

    #[error("Invalid tenant code: {0}")]
    InvalidTenant(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Session for tenant {0} was closed")]
    SessionClosed(String),

    #[error("Session error: {0}")]
    Session(SessionError),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidTenant(code) => AppError::InvalidTenant(code),
            SessionError::InvalidPolicy(msg) => AppError::InvalidPolicy(msg),
            SessionError::Closed(tenant) => AppError::SessionClosed(tenant),
            other => AppError::Session(other),
        }
    }
}

impl AppError {
    /// Infrastructure failures escape request handling and go through the
    /// unhandled-error path; the rest are ordinary client-facing failures.
    pub fn is_unhandled(&self) -> bool {
        matches!(self, AppError::Session(_) | AppError::Internal(_))
    }
}

/// Marker attached to a response whose request failed with an unhandled error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UnhandledError {
    message: String,
}

impl UnhandledError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("handler panicked: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("handler panicked: {}", s)
        } else {
            "handler panicked".to_string()
        };
        Self { message }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
        }

        let (status, code) = match &self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::ReservedKey(_) => (StatusCode::BAD_REQUEST, "RESERVED_KEY"),
            AppError::InvalidTenant(_) => (StatusCode::BAD_REQUEST, "INVALID_TENANT"),
            AppError::InvalidPolicy(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_POLICY"),
            AppError::SessionClosed(_) => (StatusCode::SERVICE_UNAVAILABLE, "SESSION_CLOSED"),
            AppError::JsonError(_) => (StatusCode::BAD_REQUEST, "INVALID_JSON"),
            AppError::Session(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SESSION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorBody {
            error: self.to_string(),
            code,
        };

        let mut response = (status, axum::Json(body)).into_response();
        if self.is_unhandled() {
            response
                .extensions_mut()
                .insert(UnhandledError::new(self.to_string()));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_map_to_client_errors() {
        assert!(matches!(
            AppError::from(SessionError::InvalidTenant("x y".into())),
            AppError::InvalidTenant(_)
        ));
        assert!(matches!(
            AppError::from(SessionError::Closed("T1".into())),
            AppError::SessionClosed(_)
        ));
        assert!(AppError::from(SessionError::Transaction("boom".into())).is_unhandled());
    }

    #[test]
    fn test_unhandled_errors_mark_response() {
        let response = AppError::Internal("disk on fire".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<UnhandledError>().is_some());

        let response = AppError::NotFound("k".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.extensions().get::<UnhandledError>().is_none());
    }

    #[test]
    fn test_panic_payload_message() {
        let err = UnhandledError::from_panic(Box::new("kaboom"));
        assert_eq!(err.to_string(), "handler panicked: kaboom");
    }
}
