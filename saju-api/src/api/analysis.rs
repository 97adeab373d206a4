//! Current analysis status for the logged-in user
//!
//! Lets a client that lost its polling URL (reload, another tab) find the
//! job in flight, or the most recent one.

use axum::{extract::State, Json};
use saju_common::time::now_millis;
use serde_json::{json, Value};

use super::status::{status_fields, timing};
use crate::db::{results, slots};
use crate::error::{ok_envelope, ApiResult};
use crate::models::ServiceType;
use crate::session::LoginSession;
use crate::AppState;

/// GET /api/analysis/current-status
pub async fn current_status(
    State(state): State<AppState>,
    session: LoginSession,
) -> ApiResult<Json<Value>> {
    let login_id = session.login_id.as_str();
    let active = slots::get_active(&state.db, login_id, state.slot_stale_ms()).await?;

    let mut record = None;
    if let Some(slot) = &active {
        record = results::get_owned(&state.db, login_id, &slot.result_id).await?;
    }
    let slot_held = record.is_some();
    if record.is_none() {
        record = results::latest_for_login(&state.db, login_id).await?;
    }

    let Some(record) = record else {
        return Ok(ok_envelope("OK", json!({ "has_job": false, "is_active": false })));
    };

    let expected = match record.service_type {
        ServiceType::Saju => state.config.analysis.saju_expected_seconds,
        ServiceType::Fortune => state.config.analysis.fortune_expected_seconds,
    };
    let (elapsed_seconds, eta_seconds) = timing(&record, expected, now_millis());

    let mut fields = status_fields(&record);
    fields["has_job"] = json!(true);
    fields["is_active"] = json!(slot_held && record.status.is_active());
    fields["elapsed_seconds"] = json!(elapsed_seconds);
    fields["eta_seconds"] = json!(eta_seconds);
    fields["expected_seconds"] = json!(expected);

    Ok(ok_envelope("OK", fields))
}
