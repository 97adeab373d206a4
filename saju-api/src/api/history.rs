//! Analysis history of the logged-in user

use axum::{
    extract::{Path, State},
    Json,
};
use saju_common::time::millis_to_rfc3339;
use serde::Deserialize;
use serde_json::{json, Value};

use super::status::status_fields;
use crate::db::results;
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::extract::ApiQuery;
use crate::models::AnalysisRecord;
use crate::session::LoginSession;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

fn list_item(record: &AnalysisRecord) -> Value {
    json!({
        "result_id": record.result_id,
        "service_type": record.service_type.as_str(),
        "feature": record.feature,
        "status": record.status.as_str(),
        "status_text": record.status.display_text(),
        "summary": record.summary(),
        "name": record.result.as_ref().and_then(|r| r.name.clone()),
        "result_url": record.result_url(),
        "shared": record.share.enabled,
        "created_at": millis_to_rfc3339(record.created_at),
    })
}

/// GET /api/history?limit=
pub async fn list_history(
    State(state): State<AppState>,
    session: LoginSession,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let limit = results::clamp_list_limit(query.limit);
    let records = results::list_for_login(&state.db, &session.login_id, limit).await?;
    let items: Vec<Value> = records.iter().map(list_item).collect();

    Ok(ok_envelope(
        "OK",
        json!({ "count": items.len(), "limit": limit, "items": items }),
    ))
}

/// GET /api/history/:result_id
pub async fn history_detail(
    State(state): State<AppState>,
    session: LoginSession,
    Path(result_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = results::get_owned(&state.db, &session.login_id, &result_id)
        .await?
        .ok_or_else(|| ApiError::not_found("RESULT_NOT_FOUND", "Analysis result not found"))?;

    let mut fields = status_fields(&record);
    fields["result"] = json!(record.result);
    fields["request"] = record.request.clone();
    fields["share"] = json!(record.share);
    fields["token_usage"] = json!(record.token_usage);

    Ok(ok_envelope("OK", fields))
}
