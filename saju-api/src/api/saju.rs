//! Saju analysis endpoints: request, status, sharing and saving targets

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::accept::{self, missing_fields_error, AcceptRequest};
use super::status::status_fields;
use crate::db::{profiles, results};
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::models::{
    AnalysisMode, CounselingTone, PersonInput, PersonProfile, SajuRequest, ServiceType, TargetType,
};
use crate::services::jobs::{saju::SajuJob, JobWork};
use crate::services::token_policy;
use crate::session::LoginSession;
use crate::AppState;

/// POST /api/saju/request
pub async fn request_saju(
    State(state): State<AppState>,
    session: LoginSession,
    ApiJson(body): ApiJson<SajuRequest>,
) -> ApiResult<impl IntoResponse> {
    let mode = AnalysisMode::parse(&body.analysis_mode);
    let cost = token_policy::cost_for_mode(&state.config.analysis, mode);
    accept::ensure_balance(&state, &session.login_id, cost).await?;

    let missing = body.person.missing_fields(None, false);
    if !missing.is_empty() {
        return Err(missing_fields_error(missing));
    }
    let profile = body.person.normalize()?;
    let tone = CounselingTone::parse(&body.counseling_type);

    let mut request_json = serde_json::to_value(&body).map_err(saju_common::Error::from)?;
    request_json["counseling_type"] = json!(tone.key());
    request_json["analysis_mode"] = json!(mode.as_str());

    accept::accept(
        &state,
        &session,
        AcceptRequest {
            service_type: ServiceType::Saju,
            feature: None,
            mode,
            request_json,
            work: JobWork::Saju(SajuJob { profile, tone, mode }),
        },
    )
    .await
}

/// GET /api/saju/request/:result_id/status
pub async fn saju_status(
    State(state): State<AppState>,
    session: LoginSession,
    Path(result_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = results::get_owned(&state.db, &session.login_id, &result_id)
        .await?
        .filter(|r| r.service_type == ServiceType::Saju)
        .ok_or_else(|| ApiError::not_found("RESULT_NOT_FOUND", "Analysis result not found"))?;

    Ok(ok_envelope("OK", status_fields(&record)))
}

/// POST /api/saju/request/:result_id/share
pub async fn share_result(
    State(state): State<AppState>,
    session: LoginSession,
    Path(result_id): Path<String>,
) -> ApiResult<Json<Value>> {
    match results::issue_share_token(&state.db, &session.login_id, &result_id).await? {
        results::ShareOutcome::Shared { token, created_at } => {
            let base = state.config.server.public_base_url.trim_end_matches('/');
            Ok(ok_envelope(
                "SHARE_ENABLED",
                json!({
                    "result_id": result_id,
                    "share_token": token,
                    "share_url": format!("{}/saju/shared/{}", base, token),
                    "created_at": created_at,
                }),
            ))
        }
        results::ShareOutcome::NotFound => Err(ApiError::not_found(
            "RESULT_NOT_FOUND",
            "Analysis result not found",
        )),
        results::ShareOutcome::NotCompleted => Err(ApiError::bad_request(
            "RESULT_NOT_COMPLETED",
            "Only completed results can be shared",
        )),
    }
}

/// Where to save a person's birth data
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveTargetOptions {
    /// `self` or `relative`
    #[serde(default)]
    pub save_as: String,
    /// Relation code for a relative (`PARENT`, `SPOUSE`, ...)
    #[serde(default)]
    pub relation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveTargetRequest {
    #[serde(flatten)]
    pub person: PersonInput,
    #[serde(flatten)]
    pub options: SaveTargetOptions,
}

/// Store `profile` as the login's own profile or as a relative
async fn store_target(
    state: &AppState,
    login_id: &str,
    profile: &PersonProfile,
    options: &SaveTargetOptions,
) -> ApiResult<Value> {
    if options.save_as.trim().eq_ignore_ascii_case("self") {
        profiles::save_user_birth(&state.db, login_id, profile).await?;
        profiles::invalidate_cached_chart(&state.db, login_id, TargetType::SelfProfile).await?;
        tracing::info!(login_id, "Saved own birth profile");
        return Ok(json!({ "saved_as": "self" }));
    }

    let relative_id = match profile.target {
        TargetType::Relative(id) => {
            if !profiles::update_relative_birth(&state.db, login_id, id, profile).await? {
                return Err(ApiError::not_found("RELATIVE_NOT_FOUND", "Relative not found"));
            }
            profiles::invalidate_cached_chart(&state.db, login_id, profile.target).await?;
            id
        }
        _ => profiles::create_relative(&state.db, login_id, &options.relation, profile).await?,
    };
    tracing::info!(login_id, relative_id, "Saved relative birth profile");

    Ok(json!({
        "saved_as": "relative",
        "relative_id": relative_id,
        "relation": profiles::normalize_relation(&options.relation),
    }))
}

/// POST /api/saju/target/save
pub async fn save_target(
    State(state): State<AppState>,
    session: LoginSession,
    ApiJson(body): ApiJson<SaveTargetRequest>,
) -> ApiResult<Json<Value>> {
    let missing = body.person.missing_fields(None, false);
    if !missing.is_empty() {
        return Err(missing_fields_error(missing));
    }
    let profile = body.person.normalize()?;
    let saved = store_target(&state, &session.login_id, &profile, &body.options).await?;
    Ok(ok_envelope("TARGET_SAVED", saved))
}

/// Person stored in a record's request (fortune requests nest it under `person`)
fn person_from_request(request: &Value) -> Option<PersonInput> {
    let person = match request.get("person") {
        Some(person) if person.is_object() => person.clone(),
        _ => request.clone(),
    };
    serde_json::from_value(person).ok()
}

/// POST /api/saju/request/:result_id/save-target
pub async fn save_target_from_result(
    State(state): State<AppState>,
    session: LoginSession,
    Path(result_id): Path<String>,
    ApiJson(options): ApiJson<SaveTargetOptions>,
) -> ApiResult<Json<Value>> {
    let record = results::get_owned(&state.db, &session.login_id, &result_id)
        .await?
        .ok_or_else(|| ApiError::not_found("RESULT_NOT_FOUND", "Analysis result not found"))?;

    let person = person_from_request(&record.request).ok_or_else(|| {
        ApiError::bad_request("INVALID_INPUT", "The result has no birth data to save")
    })?;
    let profile = person.normalize()?;

    let mut saved = store_target(&state, &session.login_id, &profile, &options).await?;
    saved["result_id"] = json!(result_id);
    Ok(ok_envelope("TARGET_SAVED", saved))
}
