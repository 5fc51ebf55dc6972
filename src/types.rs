// Error types shared by handlers and middleware

use std::collections::BTreeMap;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

/// Field name to the list of messages for that field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub const PERMISSION_DENIED: &str = "User dont have permission";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0:?}")]
    Validation(FieldErrors),

    #[error("{}", PERMISSION_DENIED)]
    PermissionDenied,

    #[error("Request was throttled. Expected available in {wait_secs} seconds.")]
    Throttled { wait_secs: u64 },

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Malformed query string: {0}")]
    MalformedQuery(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn field(name: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(name.to_string(), vec![message.into()]);
        AppError::Validation(errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Validation(errors) => (StatusCode::BAD_REQUEST, Json(errors)).into_response(),
            // Anonymous callers get a 400, not a 401/403; existing clients depend on it.
            AppError::PermissionDenied => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": PERMISSION_DENIED })),
            )
                .into_response(),
            AppError::Throttled { wait_secs } => {
                let detail = AppError::Throttled { wait_secs }.to_string();
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(serde_json::json!({ "detail": detail })),
                )
                    .into_response();
                response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(wait_secs));
                response
            }
            AppError::MalformedBody(detail) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "detail": format!("JSON parse error - {detail}") })),
            )
                .into_response(),
            AppError::MalformedQuery(detail) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "detail": format!("Query parse error - {detail}") })),
            )
                .into_response(),
            AppError::Internal(err) => {
                tracing::error!("{:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Something went wrong: {}", err))
                    .into_response()
            }
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
