//! Error types for saju-api
//!
//! Every error renders as the JSON envelope
//! `{"resp": "ERROR", "resp_message": <CODE>, "message": <text>, ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::models::InputError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid login session (401)
    #[error("Login required: {0}")]
    LoginRequired(String),

    /// Invalid request (400) with a machine-readable code and extra fields
    #[error("{code}: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
        extra: Map<String, Value>,
    },

    /// Resource not found (404)
    #[error("{code}: {message}")]
    NotFound { code: &'static str, message: String },

    /// Resource belongs to another login (403)
    #[error("{code}: {message}")]
    Forbidden { code: &'static str, message: String },

    /// Balance too low for the request (402)
    #[error("Insufficient tokens: have {current_tokens}, need {required_tokens}")]
    InsufficientTokens {
        current_tokens: i64,
        required_tokens: i64,
    },

    /// Another analysis holds the login's slot (409)
    #[error("Analysis already running: {active_result_id}")]
    AnalysisAlreadyRunning {
        active_result_id: String,
        active_service_type: String,
    },

    /// Upstream provider failure (502)
    #[error("{code}: {message}")]
    BadGateway { code: &'static str, message: String },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// saju-common error
    #[error("Common error: {0}")]
    Common(#[from] saju_common::Error),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
            extra: Map::new(),
        }
    }

    /// 400 carrying additional top-level fields
    pub fn bad_request_with(code: &'static str, message: impl Into<String>, extra: Value) -> Self {
        ApiError::BadRequest {
            code,
            message: message.into(),
            extra: match extra {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::NotFound {
            code,
            message: message.into(),
        }
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        ApiError::bad_request(err.code, err.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut extra = Map::new();
        let (status, code, message) = match self {
            ApiError::LoginRequired(msg) => (StatusCode::UNAUTHORIZED, "LOGIN_REQUIRED", msg),
            ApiError::BadRequest {
                code,
                message,
                extra: fields,
            } => {
                extra = fields;
                (StatusCode::BAD_REQUEST, code, message)
            }
            ApiError::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message),
            ApiError::Forbidden { code, message } => (StatusCode::FORBIDDEN, code, message),
            ApiError::InsufficientTokens {
                current_tokens,
                required_tokens,
            } => {
                extra.insert("current_tokens".into(), json!(current_tokens));
                extra.insert("required_tokens".into(), json!(required_tokens));
                (
                    StatusCode::PAYMENT_REQUIRED,
                    "INSUFFICIENT_TOKENS",
                    format!("{} tokens are required; you have {}.", required_tokens, current_tokens),
                )
            }
            ApiError::AnalysisAlreadyRunning {
                active_result_id,
                active_service_type,
            } => {
                extra.insert("active_result_id".into(), json!(active_result_id));
                extra.insert("active_service_type".into(), json!(active_service_type));
                (
                    StatusCode::CONFLICT,
                    "ANALYSIS_ALREADY_RUNNING",
                    "Another analysis is already in progress.".to_string(),
                )
            }
            ApiError::BadGateway { code, message } => (StatusCode::BAD_GATEWAY, code, message),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred.".to_string(),
                )
            }
            ApiError::Common(err) => {
                tracing::error!(error = %err, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred.".to_string(),
                )
            }
        };

        let mut body = Map::new();
        body.insert("resp".into(), json!("ERROR"));
        body.insert("resp_message".into(), json!(code));
        body.insert("message".into(), json!(message));
        body.extend(extra);

        (status, Json(Value::Object(body))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Success envelope: `{"resp": "OK", "resp_message": <message>, ...fields}`
pub fn ok_envelope(resp_message: &str, fields: Value) -> Json<Value> {
    let mut body = Map::new();
    body.insert("resp".into(), json!("OK"));
    body.insert("resp_message".into(), json!(resp_message));
    if let Value::Object(fields) = fields {
        body.extend(fields);
    }
    Json(Value::Object(body))
}
