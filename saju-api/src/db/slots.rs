//! Per-login analysis job slot
//!
//! At most one row per login id exists in `analysis_slots` (primary key).
//! A row marks "this login has a job in flight". Rows older than the
//! staleness threshold are treated as abandoned by a crashed worker and are
//! purged by the next acquire or lookup.
//!
//! Coordination happens entirely in the database so several service
//! instances can share one store. Acquire opens its transaction with a write
//! (the stale purge), which takes SQLite's write lock before the existence
//! check; a concurrent acquire waits for the commit and then sees the row.

use saju_common::time::now_millis;
use saju_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::ServiceType;

/// A login's active slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSlot {
    pub login_id: String,
    pub result_id: String,
    pub service_type: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of an acquire attempt
///
/// `Conflict` is an expected outcome, not an error: the caller redirects the
/// user to the job already running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Conflict {
        existing_result_id: String,
        existing_service_type: String,
    },
    /// Blank login id or result id
    InvalidInput,
}

async fn purge_stale<'e, E>(executor: E, stale_ms: i64) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let cutoff = now_millis() - stale_ms;
    let result = sqlx::query("DELETE FROM analysis_slots WHERE updated_at < ?")
        .bind(cutoff)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Claim the slot for `login_id` on behalf of `result_id`
pub async fn try_acquire(
    pool: &SqlitePool,
    login_id: &str,
    result_id: &str,
    service_type: ServiceType,
    stale_ms: i64,
) -> Result<AcquireOutcome> {
    let login_id = login_id.trim();
    let result_id = result_id.trim();
    if login_id.is_empty() || result_id.is_empty() {
        return Ok(AcquireOutcome::InvalidInput);
    }

    let mut tx = pool.begin().await?;

    let purged = purge_stale(&mut *tx, stale_ms).await?;
    if purged > 0 {
        tracing::warn!(purged, "Reclaimed stale analysis slots");
    }

    let now = now_millis();
    sqlx::query(
        r#"
        INSERT INTO analysis_slots (login_id, result_id, service_type, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(login_id) DO NOTHING
        "#,
    )
    .bind(login_id)
    .bind(result_id)
    .bind(service_type.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query("SELECT result_id, service_type FROM analysis_slots WHERE login_id = ?")
        .bind(login_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    let holder: String = row.get("result_id");
    if holder == result_id {
        Ok(AcquireOutcome::Acquired)
    } else {
        Ok(AcquireOutcome::Conflict {
            existing_result_id: holder,
            existing_service_type: row.get("service_type"),
        })
    }
}

/// Refresh the slot timestamp; returns false when the slot is no longer ours
pub async fn keep_alive(pool: &SqlitePool, login_id: &str, result_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE analysis_slots SET updated_at = ? WHERE login_id = ? AND result_id = ?",
    )
    .bind(now_millis())
    .bind(login_id)
    .bind(result_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Drop the slot
///
/// With `result_id` the row is only removed while it still belongs to that
/// job; without it the login's slot is removed unconditionally.
pub async fn release(pool: &SqlitePool, login_id: &str, result_id: Option<&str>) -> Result<bool> {
    let result = match result_id.map(str::trim).filter(|r| !r.is_empty()) {
        Some(result_id) => {
            sqlx::query("DELETE FROM analysis_slots WHERE login_id = ? AND result_id = ?")
                .bind(login_id)
                .bind(result_id)
                .execute(pool)
                .await?
        }
        None => {
            sqlx::query("DELETE FROM analysis_slots WHERE login_id = ?")
                .bind(login_id)
                .execute(pool)
                .await?
        }
    };

    Ok(result.rows_affected() > 0)
}

/// Current slot for the login after purging stale rows
pub async fn get_active(pool: &SqlitePool, login_id: &str, stale_ms: i64) -> Result<Option<ActiveSlot>> {
    purge_stale(pool, stale_ms).await?;

    let row = sqlx::query(
        r#"
        SELECT login_id, result_id, service_type, created_at, updated_at
        FROM analysis_slots
        WHERE login_id = ?
        "#,
    )
    .bind(login_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| ActiveSlot {
        login_id: row.get("login_id"),
        result_id: row.get("result_id"),
        service_type: row.get("service_type"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}
