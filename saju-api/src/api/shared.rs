//! Public view of shared results
//!
//! No login: the share token is the only credential. Only completed records
//! with sharing enabled are visible.

use axum::{
    extract::{Path, State},
    response::Html,
    Json,
};
use saju_common::time::millis_to_rfc3339;
use serde_json::{json, Value};

use crate::db::results;
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::models::{AnalysisRecord, ServiceType};
use crate::AppState;

const SHARED_HTML: &str = include_str!("../ui/shared.html");

async fn shared_record(state: &AppState, token: &str) -> ApiResult<AnalysisRecord> {
    results::get_by_share_token(&state.db, token)
        .await?
        .ok_or_else(|| ApiError::not_found("SHARED_RESULT_NOT_FOUND", "Shared result not found"))
}

fn title(record: &AnalysisRecord) -> String {
    let name = record.result.as_ref().and_then(|r| r.name.as_deref());
    match (record.service_type, name) {
        (ServiceType::Saju, Some(name)) => format!("{}'s saju report", name),
        (ServiceType::Saju, None) => "Saju report".to_string(),
        (ServiceType::Fortune, _) => match record.feature.as_deref() {
            Some(feature) => format!("Fortune report ({})", feature),
            None => "Fortune report".to_string(),
        },
    }
}

/// GET /api/shared/:token
pub async fn shared_result_json(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let record = shared_record(&state, &token).await?;
    let result = record.result.as_ref();

    Ok(ok_envelope(
        "OK",
        json!({
            "result_id": record.result_id,
            "service_type": record.service_type.as_str(),
            "feature": record.feature,
            "title": title(&record),
            "name": result.and_then(|r| r.name.clone()),
            "birth_info": result.and_then(|r| r.birth_info.clone()),
            "summary": record.summary(),
            "body": result.map(|r| r.body.as_str()).unwrap_or(""),
            "created_at": millis_to_rfc3339(record.created_at),
        }),
    ))
}

/// Minimal escaping for text placed inside HTML elements
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fill `{{KEY}}` placeholders in one scan; substituted text is never rescanned
fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after
            .find("}}")
            .and_then(|end| values.iter().find(|(key, _)| *key == &after[..end]).map(|(_, v)| (end, v)));
        match value {
            Some((end, value)) => {
                out.push_str(&escape_html(value));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_page(record: &AnalysisRecord) -> String {
    let result = record.result.as_ref();
    let mut meta = Vec::new();
    if let Some(birth_info) = result.and_then(|r| r.birth_info.as_deref()) {
        meta.push(birth_info.to_string());
    }
    meta.push(millis_to_rfc3339(record.created_at));

    fill_template(
        SHARED_HTML,
        &[
            ("TITLE", title(record)),
            ("META", meta.join(" · ")),
            ("SUMMARY", record.summary().to_string()),
            ("BODY", result.map(|r| r.body.clone()).unwrap_or_default()),
        ],
    )
}

/// GET /saju/shared/:token
pub async fn shared_result_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Html<String>> {
    let record = shared_record(&state, &token).await?;
    Ok(Html(render_page(&record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisOutput, AnalysisStatus};

    fn completed_record() -> AnalysisRecord {
        let mut record = AnalysisRecord::queued(
            "r-1".to_string(),
            "user1".to_string(),
            ServiceType::Saju,
            None,
            json!({}),
            None,
            1_700_000_000_000,
        );
        record.status = AnalysisStatus::Completed;
        record.result = Some(AnalysisOutput {
            summary: "Steady year".to_string(),
            body: "<script>alert(1)</script>\nLine two".to_string(),
            name: Some("Kim".to_string()),
            birth_info: Some("1990-05-17 10:30".to_string()),
        });
        record
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & \"c\""), "a &lt; b &amp; &quot;c&quot;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_render_page_escapes_body() {
        let page = render_page(&completed_record());
        assert!(page.contains("Kim&#39;s saju report"));
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;\nLine two"));
        assert!(!page.contains("<script>"));
        assert!(!page.contains("{{"));
    }

    #[test]
    fn test_placeholder_text_in_values_is_literal() {
        let mut record = completed_record();
        if let Some(result) = record.result.as_mut() {
            result.name = Some("{{BODY}}".to_string());
            result.summary = "{{TITLE}}".to_string();
        }
        let page = render_page(&record);
        assert!(page.contains("{{BODY}}&#39;s saju report"));
        assert!(page.contains("{{TITLE}}"));
        assert_eq!(page.matches("&lt;script&gt;").count(), 1);
    }

    #[test]
    fn test_fill_template_keeps_unknown_placeholders() {
        let values = [("A", "x".to_string())];
        assert_eq!(fill_template("{{A}}-{{B}}-{{A", &values), "x-{{B}}-{{A");
    }
}
