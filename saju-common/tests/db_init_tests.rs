//! Tests for database initialization on disk

use saju_common::db::init::{init_database, init_memory_database, SCHEMA_VERSION};

const TABLES: [&str; 10] = [
    "schema_version",
    "users",
    "relatives",
    "chart_cache",
    "token_ledger",
    "payments",
    "analysis_slots",
    "analysis_results",
    "prompt_templates",
    "api_request_log",
];

async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();
    count == 1
}

#[tokio::test]
async fn test_database_created_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("saju.db");
    assert!(!db_path.exists());

    let pool = init_database(&db_path).await.expect("Database initialization failed");
    assert!(db_path.exists(), "Database file was not created");

    for table in TABLES {
        assert!(table_exists(&pool, table).await, "Missing table {}", table);
    }
    pool.close().await;
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("saju.db");

    let first = init_database(&db_path).await.unwrap();
    sqlx::query("INSERT INTO users (login_id, user_name, created_at, updated_at) VALUES ('u1', 'Kim', 0, 0)")
        .execute(&first)
        .await
        .unwrap();
    first.close().await;

    // Schema creation is idempotent and keeps existing rows
    let second = init_database(&db_path).await.expect("Failed to open existing database");
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&second)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version WHERE version = ?")
        .bind(SCHEMA_VERSION)
        .fetch_one(&second)
        .await
        .unwrap();
    assert_eq!(versions, 1);
    second.close().await;
}

#[tokio::test]
async fn test_memory_database_has_schema() {
    let pool = init_memory_database().await.unwrap();
    for table in TABLES {
        assert!(table_exists(&pool, table).await, "Missing table {}", table);
    }
}
