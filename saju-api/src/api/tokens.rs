//! Token wallet endpoints

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::wallet::{self, GrantOutcome};
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::services::token_policy;
use crate::session::LoginSession;
use crate::AppState;

const RECENT_ENTRY_LIMIT: i64 = 20;
const DEFAULT_EVENT_CODE: &str = "MANUAL_EVENT";

/// GET /api/tokens/summary
pub async fn token_summary(
    State(state): State<AppState>,
    session: LoginSession,
) -> ApiResult<impl IntoResponse> {
    let summary = wallet::summary(&state.db, &session.login_id)
        .await?
        .ok_or_else(|| ApiError::LoginRequired("Unknown user".to_string()))?;
    if !summary.sync_ok {
        tracing::warn!(
            login_id = %session.login_id,
            current = summary.current_tokens,
            ledger = summary.ledger_net_tokens,
            "Token balance differs from ledger"
        );
    }
    let entries = wallet::recent_entries(&state.db, &session.login_id, RECENT_ENTRY_LIMIT).await?;

    let packages: Vec<Value> = token_policy::TOKEN_PACKAGES
        .iter()
        .map(|(krw, tokens)| json!({ "amount_krw": krw, "token_amount": tokens }))
        .collect();

    let body = ok_envelope(
        "OK",
        json!({
            "login_id": summary.login_id,
            "current_tokens": summary.current_tokens,
            "ledger_net_tokens": summary.ledger_net_tokens,
            "sync_ok": summary.sync_ok,
            "recent_entries": entries,
            "packages": packages,
        }),
    );

    Ok((
        [
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        body,
    ))
}

#[derive(Debug, Deserialize)]
pub struct GrantEventRequest {
    /// Kept loose so `"10"` and `10.5` can be rejected with a proper code
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub event_code: String,
    #[serde(default)]
    pub memo: String,
}

fn positive_amount(value: &Value) -> Option<i64> {
    let amount = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (amount > 0).then_some(amount)
}

/// POST /api/tokens/grant-event
pub async fn grant_event(
    State(state): State<AppState>,
    session: LoginSession,
    ApiJson(body): ApiJson<GrantEventRequest>,
) -> ApiResult<Json<Value>> {
    let amount = positive_amount(&body.amount).ok_or_else(|| {
        ApiError::bad_request("INVALID_GRANT_AMOUNT", "Amount must be a positive integer")
    })?;
    let event_code = match body.event_code.trim() {
        "" => DEFAULT_EVENT_CODE.to_string(),
        code => code.to_ascii_uppercase(),
    };
    let memo = match body.memo.trim() {
        "" => format!("Event grant {}", event_code),
        memo => memo.to_string(),
    };

    match wallet::grant_event(&state.db, &session.login_id, amount, &event_code, &memo).await? {
        GrantOutcome::Granted { current_tokens } => {
            tracing::info!(login_id = %session.login_id, amount, event_code = %event_code, "Event tokens granted");
            Ok(ok_envelope(
                "TOKENS_GRANTED",
                json!({
                    "event_code": event_code,
                    "granted_tokens": amount,
                    "current_tokens": current_tokens,
                }),
            ))
        }
        GrantOutcome::Duplicate => Err(ApiError::bad_request(
            "EVENT_ALREADY_GRANTED",
            format!("Event {} was already granted", event_code),
        )),
        GrantOutcome::UnknownUser => Err(ApiError::LoginRequired("Unknown user".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_amount() {
        assert_eq!(positive_amount(&json!(10)), Some(10));
        assert_eq!(positive_amount(&json!("25")), Some(25));
        assert_eq!(positive_amount(&json!(0)), None);
        assert_eq!(positive_amount(&json!(-3)), None);
        assert_eq!(positive_amount(&json!(1.5)), None);
        assert_eq!(positive_amount(&Value::Null), None);
    }
}
