//! Analysis result record store
//!
//! Each record is one JSON document (`payload_json`) plus a few extracted
//! columns for lookups and listing. Updates are read-modify-write inside a
//! transaction so the state machine in [`RecordPatch::apply`] sees the
//! latest stored status.

use saju_common::time::now_millis;
use saju_common::{Error, Result};
use sqlx::{Row, SqlitePool};

use crate::models::{AnalysisRecord, AnalysisStatus, RecordPatch};

/// Max characters kept in the `summary_text` column
pub const SUMMARY_TEXT_MAX_CHARS: usize = 1000;

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

/// Clamp a requested page size into `1..=100`, defaulting to 20
pub fn clamp_list_limit(requested: Option<i64>) -> i64 {
    match requested {
        Some(n) if n > 0 => n.min(MAX_LIST_LIMIT),
        _ => DEFAULT_LIST_LIMIT,
    }
}

fn summary_text(record: &AnalysisRecord) -> String {
    record.summary().chars().take(SUMMARY_TEXT_MAX_CHARS).collect()
}

fn decode(payload: &str) -> Result<AnalysisRecord> {
    Ok(serde_json::from_str(payload)?)
}

/// Insert a new record
pub async fn create(pool: &SqlitePool, record: &AnalysisRecord) -> Result<()> {
    let payload = serde_json::to_string(record)?;

    sqlx::query(
        r#"
        INSERT INTO analysis_results (
            result_id, login_id, service_type, status, payload_json,
            summary_text, share_token, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.result_id)
    .bind(&record.login_id)
    .bind(record.service_type.as_str())
    .bind(record.status.as_str())
    .bind(&payload)
    .bind(summary_text(record))
    .bind(record.share.token.as_deref())
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge `patch` into the stored document and rewrite it
///
/// Fails with `NotFound` for unknown ids and `InvalidInput` when the patch
/// would move the status backwards or touch a terminal record.
pub async fn update(pool: &SqlitePool, result_id: &str, patch: RecordPatch) -> Result<AnalysisRecord> {
    let mut tx = pool.begin().await?;

    // Take the write lock before reading
    let touched = sqlx::query("UPDATE analysis_results SET updated_at = updated_at WHERE result_id = ?")
        .bind(result_id)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Analysis result not found: {}", result_id)));
    }

    let payload: String =
        sqlx::query_scalar("SELECT payload_json FROM analysis_results WHERE result_id = ?")
            .bind(result_id)
            .fetch_one(&mut *tx)
            .await?;

    let mut record = decode(&payload)?;
    patch
        .apply(&mut record, now_millis())
        .map_err(|e| Error::InvalidInput(e.to_string()))?;

    let payload = serde_json::to_string(&record)?;
    sqlx::query(
        r#"
        UPDATE analysis_results
        SET status = ?, payload_json = ?, summary_text = ?, updated_at = ?
        WHERE result_id = ?
        "#,
    )
    .bind(record.status.as_str())
    .bind(&payload)
    .bind(summary_text(&record))
    .bind(record.updated_at)
    .bind(result_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(record)
}

pub async fn get(pool: &SqlitePool, result_id: &str) -> Result<Option<AnalysisRecord>> {
    let payload: Option<String> =
        sqlx::query_scalar("SELECT payload_json FROM analysis_results WHERE result_id = ?")
            .bind(result_id)
            .fetch_optional(pool)
            .await?;

    payload.as_deref().map(decode).transpose()
}

/// Record by id, only if it belongs to `login_id`
pub async fn get_owned(pool: &SqlitePool, login_id: &str, result_id: &str) -> Result<Option<AnalysisRecord>> {
    let payload: Option<String> = sqlx::query_scalar(
        "SELECT payload_json FROM analysis_results WHERE result_id = ? AND login_id = ?",
    )
    .bind(result_id)
    .bind(login_id)
    .fetch_optional(pool)
    .await?;

    payload.as_deref().map(decode).transpose()
}

/// Completed record published under `share_token`
pub async fn get_by_share_token(pool: &SqlitePool, share_token: &str) -> Result<Option<AnalysisRecord>> {
    let share_token = share_token.trim();
    if share_token.is_empty() {
        return Ok(None);
    }

    let payload: Option<String> = sqlx::query_scalar(
        "SELECT payload_json FROM analysis_results WHERE share_token = ? AND status = 'completed'",
    )
    .bind(share_token)
    .fetch_optional(pool)
    .await?;

    let record = payload.as_deref().map(decode).transpose()?;
    Ok(record.filter(|r| r.share.enabled))
}

/// Most recently created record for the login
pub async fn latest_for_login(pool: &SqlitePool, login_id: &str) -> Result<Option<AnalysisRecord>> {
    let payload: Option<String> = sqlx::query_scalar(
        r#"
        SELECT payload_json FROM analysis_results
        WHERE login_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT 1
        "#,
    )
    .bind(login_id)
    .fetch_optional(pool)
    .await?;

    payload.as_deref().map(decode).transpose()
}

/// Newest-first records for the login
pub async fn list_for_login(pool: &SqlitePool, login_id: &str, limit: i64) -> Result<Vec<AnalysisRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT payload_json FROM analysis_results
        WHERE login_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(login_id)
    .bind(clamp_list_limit(Some(limit)))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| decode(row.get::<&str, _>("payload_json")))
        .collect()
}

/// Outcome of a share request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareOutcome {
    Shared { token: String, created_at: i64 },
    NotFound,
    NotCompleted,
}

/// Enable sharing for a completed record, reusing an existing token
pub async fn issue_share_token(pool: &SqlitePool, login_id: &str, result_id: &str) -> Result<ShareOutcome> {
    let mut tx = pool.begin().await?;

    let touched = sqlx::query(
        "UPDATE analysis_results SET updated_at = updated_at WHERE result_id = ? AND login_id = ?",
    )
    .bind(result_id)
    .bind(login_id)
    .execute(&mut *tx)
    .await?;
    if touched.rows_affected() == 0 {
        return Ok(ShareOutcome::NotFound);
    }

    let payload: String =
        sqlx::query_scalar("SELECT payload_json FROM analysis_results WHERE result_id = ?")
            .bind(result_id)
            .fetch_one(&mut *tx)
            .await?;
    let mut record = decode(&payload)?;

    if record.status != AnalysisStatus::Completed {
        return Ok(ShareOutcome::NotCompleted);
    }

    if let (true, Some(token)) = (record.share.enabled, record.share.token.clone()) {
        let created_at = record.share.created_at.unwrap_or(record.updated_at);
        return Ok(ShareOutcome::Shared { token, created_at });
    }

    let token = saju_common::ids::new_share_token();
    let created_at = now_millis();
    record.share.enabled = true;
    record.share.token = Some(token.clone());
    record.share.created_at = Some(created_at);

    sqlx::query("UPDATE analysis_results SET payload_json = ?, share_token = ? WHERE result_id = ?")
        .bind(serde_json::to_string(&record)?)
        .bind(&token)
        .bind(result_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(ShareOutcome::Shared { token, created_at })
}
