//! Login session extractors
//!
//! Identity is asserted by the upstream login tier through headers:
//! `X-Login-Id`, optional `X-User-Name`, and `X-Session-Timestamp` /
//! `X-Session-Signature` (see [`saju_common::auth`]). The first
//! authenticated request registers the user row.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use saju_common::auth::validate_session;
use saju_common::time::now_millis;

use crate::db::profiles;
use crate::error::ApiError;
use crate::AppState;

pub const LOGIN_ID_HEADER: &str = "x-login-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const TIMESTAMP_HEADER: &str = "x-session-timestamp";
pub const SIGNATURE_HEADER: &str = "x-session-signature";

/// Authenticated login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSession {
    pub login_id: String,
    pub user_name: String,
}

/// Login when present; handlers that also serve anonymous callers use this
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalLoginSession(pub Option<LoginSession>);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Validate the session headers; `Ok(None)` when no login id is sent
async fn read_session(parts: &Parts, state: &AppState) -> Result<Option<LoginSession>, ApiError> {
    let Some(login_id) = header(parts, LOGIN_ID_HEADER) else {
        return Ok(None);
    };

    let timestamp = header(parts, TIMESTAMP_HEADER).and_then(|t| t.parse::<i64>().ok());
    let signature = header(parts, SIGNATURE_HEADER);
    let session = &state.config.session;

    validate_session(
        login_id,
        timestamp,
        signature,
        &session.secret,
        now_millis(),
        session.max_age_secs.saturating_mul(1000),
    )
    .map_err(|e| {
        tracing::debug!(login_id, error = %e, "Session rejected");
        ApiError::LoginRequired(e.to_string())
    })?;

    let user_name = header(parts, USER_NAME_HEADER).unwrap_or_default().to_string();
    profiles::ensure_user(&state.db, login_id, &user_name).await?;

    Ok(Some(LoginSession {
        login_id: login_id.to_string(),
        user_name,
    }))
}

#[async_trait]
impl FromRequestParts<AppState> for LoginSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        read_session(parts, state)
            .await?
            .ok_or_else(|| ApiError::LoginRequired("Login is required".to_string()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for OptionalLoginSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(OptionalLoginSession(read_session(parts, state).await?))
    }
}
