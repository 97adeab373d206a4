//! Database initialization
//!
//! Opens (or creates) the SQLite database and brings the schema up to date.
//! Every `create_*` function is idempotent, so startup can run them
//! unconditionally. All timestamps are INTEGER unix milliseconds.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL lets status polling read while a job is writing
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Every connection to `sqlite::memory:` is a separate database, so the pool
/// is pinned to one connection that never expires.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_users_table(pool).await?;
    create_relatives_table(pool).await?;
    create_chart_cache_table(pool).await?;
    create_token_ledger_table(pool).await?;
    create_payments_table(pool).await?;

    // Analysis job coordination
    create_analysis_slots_table(pool).await?;
    create_analysis_results_table(pool).await?;

    create_prompt_templates_table(pool).await?;
    create_api_request_log_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(crate::time::now_millis())
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Users known to the service, with their token balance and saved birth profile
async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            login_id TEXT PRIMARY KEY,
            user_name TEXT NOT NULL DEFAULT '',
            gender TEXT,
            birth_date TEXT,
            birth_time TEXT,
            birth_time_unknown INTEGER NOT NULL DEFAULT 0,
            current_tokens INTEGER NOT NULL DEFAULT 0 CHECK (current_tokens >= 0),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_relatives_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relatives (
            relative_id INTEGER PRIMARY KEY AUTOINCREMENT,
            login_id TEXT NOT NULL REFERENCES users(login_id) ON DELETE CASCADE,
            relation TEXT NOT NULL,
            relative_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            birth_date TEXT NOT NULL,
            birth_time TEXT,
            birth_time_unknown INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_relatives_login ON relatives(login_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Raw birth-chart JSON keyed by owner
///
/// The user's own chart is stored as `(login_id, 0)`, a relative's as `('', relative_id)`.
async fn create_chart_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chart_cache (
            login_id TEXT NOT NULL,
            relative_id INTEGER NOT NULL,
            chart_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (login_id, relative_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_token_ledger_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS token_ledger (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            login_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            entry_type TEXT NOT NULL CHECK (entry_type IN ('USE', 'REFUND', 'CHARGE', 'EVENT')),
            usage_code TEXT NOT NULL DEFAULT '',
            reference_type TEXT NOT NULL DEFAULT '',
            reference_id TEXT NOT NULL DEFAULT '',
            memo TEXT NOT NULL DEFAULT '',
            balance_after INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One debit and one refund per reference; repeat grants are rejected
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_token_ledger_reference
        ON token_ledger(login_id, entry_type, reference_type, reference_id)
        WHERE reference_id <> ''
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_payments_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            payment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            login_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            amount_krw INTEGER NOT NULL,
            token_amount INTEGER NOT NULL,
            status TEXT NOT NULL,
            provider_txn_id TEXT NOT NULL DEFAULT '',
            request_payload TEXT NOT NULL DEFAULT '{}',
            pending_payload TEXT,
            approved_payload TEXT,
            fail_payload TEXT,
            error_message TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_payments_login ON payments(login_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// One row per login while an analysis job is in flight
async fn create_analysis_slots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_slots (
            login_id TEXT PRIMARY KEY,
            result_id TEXT NOT NULL,
            service_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_analysis_slots_updated ON analysis_slots(updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Job-as-a-document records: JSON payload plus indexed columns
async fn create_analysis_results_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            result_id TEXT PRIMARY KEY,
            login_id TEXT NOT NULL,
            service_type TEXT NOT NULL,
            status TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            summary_text TEXT NOT NULL DEFAULT '',
            share_token TEXT UNIQUE,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_analysis_results_login ON analysis_results(login_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_prompt_templates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompt_templates (
            template_id INTEGER PRIMARY KEY AUTOINCREMENT,
            service_code TEXT NOT NULL,
            feature_key TEXT NOT NULL DEFAULT '',
            tone_key TEXT NOT NULL DEFAULT '',
            system_prompt TEXT NOT NULL DEFAULT '',
            user_prompt_guide TEXT NOT NULL DEFAULT '',
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_prompt_templates_lookup
        ON prompt_templates(service_code, feature_key, tone_key, is_active)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Outbound provider call log (chart API, LLM)
async fn create_api_request_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_request_log (
            req_id INTEGER PRIMARY KEY AUTOINCREMENT,
            login_id TEXT NOT NULL DEFAULT '',
            relative_id INTEGER NOT NULL DEFAULT 0,
            service_code TEXT NOT NULL,
            request_json TEXT NOT NULL DEFAULT '',
            response_json TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            error_message TEXT NOT NULL DEFAULT '',
            duration_ms INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            finished_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
