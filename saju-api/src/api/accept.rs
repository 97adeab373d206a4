//! Shared acceptance flow for analysis requests
//!
//! Order matters: slot, then debit, then record. Every step after the slot
//! undoes what came before it when it fails, so a rejected request leaves
//! neither a slot nor a debit behind.

use axum::{http::StatusCode, response::IntoResponse};
use saju_common::ids::{new_result_id, new_token_reference_id};
use saju_common::time::now_millis;
use serde_json::{json, Value};

use crate::db::{results, slots, wallet};
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::models::{AnalysisMode, AnalysisRecord, FortuneFeature, ServiceType, TokenUsage};
use crate::services::jobs::{self, AcceptedJob, JobWork};
use crate::services::token_policy;
use crate::session::LoginSession;
use crate::AppState;

/// One analysis about to be accepted
pub struct AcceptRequest {
    pub service_type: ServiceType,
    pub feature: Option<FortuneFeature>,
    pub mode: AnalysisMode,
    /// Stored as the record's `request`
    pub request_json: Value,
    pub work: JobWork,
}

impl AcceptRequest {
    fn usage_code(&self) -> &'static str {
        match (self.service_type, self.feature) {
            (ServiceType::Fortune, Some(feature)) => feature.usage_code(),
            _ => "SAJU_VIEW",
        }
    }

    fn reference_prefix(&self) -> String {
        match (self.service_type, self.feature) {
            (ServiceType::Fortune, Some(feature)) => format!("FORTUNE-{}", feature.key()),
            _ => "SAJU".to_string(),
        }
    }
}

/// 402 unless the login holds at least `required` tokens
pub async fn ensure_balance(state: &AppState, login_id: &str, required: i64) -> ApiResult<i64> {
    let current = wallet::current_tokens(&state.db, login_id).await?.unwrap_or(0);
    if current < required {
        return Err(ApiError::InsufficientTokens {
            current_tokens: current,
            required_tokens: required,
        });
    }
    Ok(current)
}

async fn release_slot(state: &AppState, login_id: &str, result_id: &str) {
    if let Err(e) = slots::release(&state.db, login_id, Some(result_id)).await {
        tracing::error!(result_id, error = %e, "Failed to release slot after rejected request");
    }
}

/// Acquire the slot, debit, create the queued record and spawn the job
pub async fn accept(
    state: &AppState,
    session: &LoginSession,
    request: AcceptRequest,
) -> ApiResult<impl IntoResponse> {
    let login_id = session.login_id.as_str();
    let result_id = new_result_id();
    let cost = token_policy::cost_for_mode(&state.config.analysis, request.mode);

    match slots::try_acquire(
        &state.db,
        login_id,
        &result_id,
        request.service_type,
        state.slot_stale_ms(),
    )
    .await?
    {
        slots::AcquireOutcome::Acquired => {}
        slots::AcquireOutcome::Conflict {
            existing_result_id,
            existing_service_type,
        } => {
            tracing::info!(login_id, active_result_id = %existing_result_id, "Analysis already running");
            return Err(ApiError::AnalysisAlreadyRunning {
                active_result_id: existing_result_id,
                active_service_type: existing_service_type,
            });
        }
        slots::AcquireOutcome::InvalidInput => {
            return Err(ApiError::bad_request("INVALID_INPUT", "Login id is required"));
        }
    }

    let reference_id = new_token_reference_id(&request.reference_prefix(), now_millis());
    let reference_type = jobs::reference_type(request.service_type);
    let memo = format!("{} analysis {}", request.service_type.as_str(), result_id);

    let debit = wallet::TokenDebit {
        login_id,
        amount: cost,
        usage_code: request.usage_code(),
        reference_type,
        reference_id: &reference_id,
        memo: &memo,
    };
    let current_tokens = match wallet::consume(&state.db, &debit).await {
        Ok(wallet::DebitOutcome::Debited { current_tokens }) => current_tokens,
        Ok(wallet::DebitOutcome::Insufficient { current_tokens }) => {
            release_slot(state, login_id, &result_id).await;
            return Err(ApiError::InsufficientTokens {
                current_tokens,
                required_tokens: cost,
            });
        }
        Ok(wallet::DebitOutcome::UnknownUser) => {
            release_slot(state, login_id, &result_id).await;
            return Err(ApiError::LoginRequired("Unknown user".to_string()));
        }
        Ok(wallet::DebitOutcome::Duplicate) => {
            release_slot(state, login_id, &result_id).await;
            return Err(ApiError::Internal(format!("Duplicate token reference {}", reference_id)));
        }
        Err(e) => {
            release_slot(state, login_id, &result_id).await;
            return Err(e.into());
        }
    };

    let token_usage = TokenUsage {
        reference_id: reference_id.clone(),
        amount: cost,
    };
    let record = AnalysisRecord::queued(
        result_id.clone(),
        login_id.to_string(),
        request.service_type,
        request.feature.map(|f| f.key().to_string()),
        request.request_json,
        Some(token_usage.clone()),
        now_millis(),
    );

    if let Err(e) = results::create(&state.db, &record).await {
        tracing::error!(result_id = %result_id, error = %e, "Failed to create analysis record");
        let memo = format!("Refund for unsaved analysis {}", result_id);
        if let Err(refund_err) = wallet::refund(&state.db, login_id, reference_type, &reference_id, &memo).await {
            tracing::error!(result_id = %result_id, error = %refund_err, "Refund after record failure failed");
        }
        release_slot(state, login_id, &result_id).await;
        return Err(e.into());
    }

    tracing::info!(
        result_id = %result_id,
        login_id,
        service = request.service_type.as_str(),
        mode = request.mode.as_str(),
        cost,
        "Analysis request accepted"
    );

    jobs::spawn(
        state.clone(),
        AcceptedJob {
            result_id: result_id.clone(),
            login_id: login_id.to_string(),
            service_type: request.service_type,
            token_usage,
        },
        request.work,
    );

    let body = ok_envelope(
        "REQUEST_ACCEPTED",
        json!({
            "result_id": result_id,
            "status": record.status.as_str(),
            "service_type": request.service_type.as_str(),
            "feature": record.feature,
            "analysis_mode": request.mode.as_str(),
            "status_url": record.status_url(),
            "result_url": record.result_url(),
            "consumed_tokens": cost,
            "current_tokens": current_tokens,
        }),
    );
    Ok((StatusCode::ACCEPTED, body))
}

/// 400 listing the fields left blank
pub fn missing_fields_error(missing: Vec<String>) -> ApiError {
    ApiError::bad_request_with(
        "INVALID_INPUT",
        format!("Required fields missing: {}", missing.join(", ")),
        json!({ "missing_fields": missing }),
    )
}
