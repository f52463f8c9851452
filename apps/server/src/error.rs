use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Custom error types for the retrieval agent server
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    ConfigurationError(String),

    #[error("{message}")]
    UpstreamError {
        status: Option<u16>,
        message: String,
    },

    #[error("{0}")]
    DemoModeRestriction(String),

    #[error("Vector store connection error: {0}")]
    ConnectionError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        AppError::UpstreamError {
            status,
            message: message.into(),
        }
    }

    /// HTTP status reported to the client for this error
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::DemoModeRestriction(_) => StatusCode::FORBIDDEN,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamError {
                status: Some(code), ..
            } => StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::upstream(Some(status.as_u16()), err.to_string()),
            None => AppError::HttpError(err.to_string()),
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        AppError::InvalidInput(err.body_text())
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Render as `{"error": message}` with the error's status
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", status, self);
        } else {
            log::warn!("Request rejected ({}): {}", status, self);
        }
        let body = Json(serde_json::json!({ "error": self }));
        (status, body).into_response()
    }
}

/// Result type alias for retrieval agent operations
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_is_propagated() {
        let error = AppError::upstream(Some(429), "rate limited");
        assert_eq!(error.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn upstream_without_status_defaults_to_500() {
        let error = AppError::upstream(None, "connection reset");
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn invalid_upstream_status_defaults_to_500() {
        let error = AppError::upstream(Some(42), "nonsense");
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn demo_mode_maps_to_forbidden() {
        let error = AppError::DemoModeRestriction("no".to_string());
        assert_eq!(error.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn configuration_and_connection_errors_are_500() {
        assert_eq!(
            AppError::ConfigurationError("missing".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::ConnectionError("down".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn serializes_as_display_string() {
        let error = AppError::ConfigurationError("Must provide a model".to_string());
        let value = serde_json::to_value(&error).expect("serialize");
        assert_eq!(value, serde_json::json!("Must provide a model"));
    }
}
