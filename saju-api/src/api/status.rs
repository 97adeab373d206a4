//! Status view shared by the polling endpoints

use serde_json::{json, Value};

use crate::models::AnalysisRecord;
use crate::services::error_display;

/// Polling fields of a record, with the classified error display
pub fn status_fields(record: &AnalysisRecord) -> Value {
    let raw_error = record.error_message.as_deref().unwrap_or("");
    let display = error_display::classify(raw_error);

    json!({
        "result_id": record.result_id,
        "service_type": record.service_type.as_str(),
        "feature": record.feature,
        "status": record.status.as_str(),
        "step": record.step,
        "progress_message": record.progress_message,
        "status_url": record.status_url(),
        "result_url": record.result_url(),
        "summary": record.summary(),
        "notice_message": record.notice_message,
        "error_message": raw_error,
        "error_code": display.code,
        "error_message_display": display.message,
        "error_hint": display.hint,
        "maintenance_mode": display.maintenance_mode,
        "token_refund": record.token_refund,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

/// Seconds since creation and a remaining-time estimate
///
/// The estimate never drops below 5 s while the job is active and is 0 once
/// it is terminal.
pub fn timing(record: &AnalysisRecord, expected_seconds: i64, now_ms: i64) -> (i64, i64) {
    let elapsed = ((now_ms - record.created_at).max(0)) / 1000;
    let eta = if record.status.is_terminal() {
        0
    } else {
        (expected_seconds - elapsed).max(5)
    };
    (elapsed, eta)
}
