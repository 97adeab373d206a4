//! Fortune feature endpoints

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::Value;

use super::accept::{self, missing_fields_error, AcceptRequest};
use super::status::status_fields;
use crate::db::results;
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::models::{AnalysisMode, FortuneFeature, FortuneRequest, ServiceType};
use crate::services::jobs::{fortune::FortuneJob, JobWork};
use crate::services::token_policy;
use crate::session::OptionalLoginSession;
use crate::AppState;

fn feature_or_404(key: &str) -> ApiResult<FortuneFeature> {
    FortuneFeature::parse(key)
        .ok_or_else(|| ApiError::not_found("FEATURE_NOT_FOUND", format!("Unknown fortune feature: {}", key)))
}

/// POST /api/fortune/:feature/request
///
/// The feature is checked before the login so unknown features are a 404
/// for everyone. Fortune features have one price: the body's
/// `analysis_mode` is overwritten with `PREMIUM`.
pub async fn request_fortune(
    State(state): State<AppState>,
    OptionalLoginSession(session): OptionalLoginSession,
    Path(feature): Path<String>,
    ApiJson(body): ApiJson<FortuneRequest>,
) -> ApiResult<impl IntoResponse> {
    let feature = feature_or_404(&feature)?;
    let session = session.ok_or_else(|| ApiError::LoginRequired("Login is required".to_string()))?;

    let mode = AnalysisMode::Premium;
    let cost = token_policy::cost_for_mode(&state.config.analysis, mode);
    accept::ensure_balance(&state, &session.login_id, cost).await?;

    let missing = body.missing_fields(feature);
    if !missing.is_empty() {
        return Err(missing_fields_error(missing));
    }

    let mut input = body;
    if feature != FortuneFeature::Compatibility {
        input.partner = None;
    }
    input.analysis_mode = mode.as_str().to_string();
    let persons = input
        .persons()
        .into_iter()
        .map(|p| p.normalize())
        .collect::<Result<Vec<_>, _>>()?;
    let input = serde_json::to_value(&input).map_err(saju_common::Error::from)?;

    accept::accept(
        &state,
        &session,
        AcceptRequest {
            service_type: ServiceType::Fortune,
            feature: Some(feature),
            mode,
            request_json: input.clone(),
            work: JobWork::Fortune(FortuneJob {
                feature,
                persons,
                input,
            }),
        },
    )
    .await
}

/// GET /api/fortune/:feature/request/:result_id/status
pub async fn fortune_status(
    State(state): State<AppState>,
    OptionalLoginSession(session): OptionalLoginSession,
    Path((feature, result_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let feature = feature_or_404(&feature)?;
    let session = session.ok_or_else(|| ApiError::LoginRequired("Login is required".to_string()))?;

    let record = results::get_owned(&state.db, &session.login_id, &result_id)
        .await?
        .filter(|r| r.service_type == ServiceType::Fortune && r.feature.as_deref() == Some(feature.key()))
        .ok_or_else(|| ApiError::not_found("RESULT_NOT_FOUND", "Fortune result not found"))?;

    Ok(ok_envelope("OK", status_fields(&record)))
}
