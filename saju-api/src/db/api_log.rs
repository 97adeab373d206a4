//! Outbound provider call log (chart API, LLM)

use saju_common::time::now_millis;
use saju_common::Result;
use sqlx::SqlitePool;

pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_FAILED: &str = "FAILED";

/// Longest request/response text kept per row
const MAX_LOGGED_CHARS: usize = 20_000;

fn clip(text: &str) -> String {
    text.chars().take(MAX_LOGGED_CHARS).collect()
}

/// Open a log row; returns its id for [`finish`]
pub async fn begin(
    pool: &SqlitePool,
    login_id: &str,
    relative_id: i64,
    service_code: &str,
    request_json: &str,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO api_request_log (login_id, relative_id, service_code, request_json, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(login_id)
    .bind(relative_id)
    .bind(service_code)
    .bind(clip(request_json))
    .bind(STATUS_PENDING)
    .bind(now_millis())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Close a log row with the outcome and elapsed time
pub async fn finish(
    pool: &SqlitePool,
    req_id: i64,
    status: &str,
    response_json: &str,
    error_message: &str,
) -> Result<()> {
    let now = now_millis();
    sqlx::query(
        r#"
        UPDATE api_request_log
        SET status = ?, response_json = ?, error_message = ?,
            duration_ms = MAX(? - created_at, 0), finished_at = ?
        WHERE req_id = ?
        "#,
    )
    .bind(status)
    .bind(clip(response_json))
    .bind(clip(error_message))
    .bind(now)
    .bind(now)
    .bind(req_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use saju_common::db::init_memory_database;
    use sqlx::Row;

    #[tokio::test]
    async fn test_begin_and_finish() {
        let pool = init_memory_database().await.unwrap();
        let id = begin(&pool, "u1", 0, "CHART", "{\"birth\":\"1990-01-01\"}").await.unwrap();
        finish(&pool, id, STATUS_FAILED, "", "timeout").await.unwrap();

        let row = sqlx::query("SELECT status, error_message, duration_ms, finished_at FROM api_request_log WHERE req_id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("status"), "FAILED");
        assert_eq!(row.get::<String, _>("error_message"), "timeout");
        assert!(row.get::<i64, _>("duration_ms") >= 0);
        assert!(row.get::<Option<i64>, _>("finished_at").is_some());
    }

    #[test]
    fn test_clip_limits_length() {
        let long = "x".repeat(MAX_LOGGED_CHARS + 10);
        assert_eq!(clip(&long).len(), MAX_LOGGED_CHARS);
    }
}
