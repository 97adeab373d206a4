//! Users, relatives and the birth-chart cache

use saju_common::time::now_millis;
use saju_common::Result;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::models::{PersonProfile, TargetType};

/// Stored birth data of the user or a relative
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthSnapshot {
    /// `M` / `F`
    pub gender: String,
    /// `YYYY-MM-DD`
    pub birth_date: String,
    /// `HH:MM:SS`, or the unknown sentinel
    pub birth_time: String,
    /// Relation code, relatives only
    pub relation: Option<String>,
    pub name: String,
}

impl BirthSnapshot {
    /// Whether the submitted profile differs from what is stored
    pub fn differs_from(&self, profile: &PersonProfile) -> bool {
        self.gender.trim().to_ascii_uppercase() != profile.gender.db_code()
            || self.birth_date.trim() != profile.birth.date_string()
            || self.birth_time.trim() != profile.birth.time_string()
    }
}

fn stored_time(time: Option<String>, unknown: i64) -> String {
    if unknown != 0 {
        return crate::models::request::UNKNOWN_BIRTH_TIME.to_string();
    }
    time.unwrap_or_else(|| crate::models::request::UNKNOWN_BIRTH_TIME.to_string())
}

/// Register the login on first sight; keeps an existing row untouched
/// except for filling in a blank user name
pub async fn ensure_user(pool: &SqlitePool, login_id: &str, user_name: &str) -> Result<()> {
    let now = now_millis();
    sqlx::query(
        r#"
        INSERT INTO users (login_id, user_name, created_at, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(login_id) DO UPDATE SET
            user_name = CASE WHEN users.user_name = '' THEN excluded.user_name ELSE users.user_name END
        "#,
    )
    .bind(login_id)
    .bind(user_name)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Stored birth data for the target, if the target is a stored profile
pub async fn load_target_snapshot(
    pool: &SqlitePool,
    login_id: &str,
    target: TargetType,
) -> Result<Option<BirthSnapshot>> {
    match target {
        TargetType::SelfProfile => {
            let row = sqlx::query(
                r#"
                SELECT user_name, gender, birth_date, birth_time, birth_time_unknown
                FROM users
                WHERE login_id = ? AND birth_date IS NOT NULL
                "#,
            )
            .bind(login_id)
            .fetch_optional(pool)
            .await?;

            Ok(row.map(|row| BirthSnapshot {
                gender: row.get::<Option<String>, _>("gender").unwrap_or_default(),
                birth_date: row.get::<Option<String>, _>("birth_date").unwrap_or_default(),
                birth_time: stored_time(row.get("birth_time"), row.get("birth_time_unknown")),
                relation: None,
                name: row.get("user_name"),
            }))
        }
        TargetType::Relative(relative_id) => {
            let row = sqlx::query(
                r#"
                SELECT relation, relative_name, gender, birth_date, birth_time, birth_time_unknown
                FROM relatives
                WHERE login_id = ? AND relative_id = ?
                "#,
            )
            .bind(login_id)
            .bind(relative_id)
            .fetch_optional(pool)
            .await?;

            Ok(row.map(|row| BirthSnapshot {
                gender: row.get("gender"),
                birth_date: row.get("birth_date"),
                birth_time: stored_time(row.get("birth_time"), row.get("birth_time_unknown")),
                relation: Some(row.get("relation")),
                name: row.get("relative_name"),
            }))
        }
        TargetType::New => Ok(None),
    }
}

/// Overwrite the user's own birth profile
pub async fn save_user_birth(pool: &SqlitePool, login_id: &str, profile: &PersonProfile) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET gender = ?, birth_date = ?, birth_time = ?, birth_time_unknown = ?, updated_at = ?
        WHERE login_id = ?
        "#,
    )
    .bind(profile.gender.db_code())
    .bind(profile.birth.date_string())
    .bind(profile.birth.time.map(|t| t.format("%H:%M:%S").to_string()))
    .bind(i64::from(profile.birth.time.is_none()))
    .bind(now_millis())
    .bind(login_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Update an existing relative's birth data; returns false if it isn't the login's relative
pub async fn update_relative_birth(
    pool: &SqlitePool,
    login_id: &str,
    relative_id: i64,
    profile: &PersonProfile,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE relatives
        SET gender = ?, birth_date = ?, birth_time = ?, birth_time_unknown = ?, updated_at = ?
        WHERE login_id = ? AND relative_id = ?
        "#,
    )
    .bind(profile.gender.db_code())
    .bind(profile.birth.date_string())
    .bind(profile.birth.time.map(|t| t.format("%H:%M:%S").to_string()))
    .bind(i64::from(profile.birth.time.is_none()))
    .bind(now_millis())
    .bind(login_id)
    .bind(relative_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Save a new relative and return its id
pub async fn create_relative(
    pool: &SqlitePool,
    login_id: &str,
    relation: &str,
    profile: &PersonProfile,
) -> Result<i64> {
    let now = now_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO relatives
            (login_id, relation, relative_name, gender, birth_date, birth_time, birth_time_unknown, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(login_id)
    .bind(normalize_relation(relation))
    .bind(&profile.name)
    .bind(profile.gender.db_code())
    .bind(profile.birth.date_string())
    .bind(profile.birth.time.map(|t| t.format("%H:%M:%S").to_string()))
    .bind(i64::from(profile.birth.time.is_none()))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Upper-case relation code, `OTHER` when blank or unrecognized
pub fn normalize_relation(raw: &str) -> String {
    const KNOWN: [&str; 8] = [
        "PARENT", "CHILD", "SPOUSE", "SIBLING", "FRIEND", "PARTNER", "COLLEAGUE", "OTHER",
    ];
    let code = raw.trim().to_ascii_uppercase();
    if KNOWN.contains(&code.as_str()) {
        code
    } else {
        "OTHER".to_string()
    }
}

/// Cache key: own chart under `(login, 0)`, a relative's under `('', relative_id)`
fn chart_key(login_id: &str, target: TargetType) -> Option<(String, i64)> {
    match target {
        TargetType::SelfProfile => Some((login_id.to_string(), 0)),
        TargetType::Relative(id) => Some((String::new(), id)),
        TargetType::New => None,
    }
}

pub async fn load_cached_chart(pool: &SqlitePool, login_id: &str, target: TargetType) -> Result<Option<Value>> {
    let Some((key_login, key_relative)) = chart_key(login_id, target) else {
        return Ok(None);
    };

    let raw: Option<String> = sqlx::query_scalar(
        "SELECT chart_json FROM chart_cache WHERE login_id = ? AND relative_id = ?",
    )
    .bind(key_login)
    .bind(key_relative)
    .fetch_optional(pool)
    .await?;

    Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
}

pub async fn save_cached_chart(pool: &SqlitePool, login_id: &str, target: TargetType, chart: &Value) -> Result<()> {
    let Some((key_login, key_relative)) = chart_key(login_id, target) else {
        return Ok(());
    };

    sqlx::query(
        r#"
        INSERT INTO chart_cache (login_id, relative_id, chart_json, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(login_id, relative_id) DO UPDATE SET
            chart_json = excluded.chart_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key_login)
    .bind(key_relative)
    .bind(serde_json::to_string(chart)?)
    .bind(now_millis())
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop a cached chart after the stored birth data changed
pub async fn invalidate_cached_chart(pool: &SqlitePool, login_id: &str, target: TargetType) -> Result<()> {
    let Some((key_login, key_relative)) = chart_key(login_id, target) else {
        return Ok(());
    };

    sqlx::query("DELETE FROM chart_cache WHERE login_id = ? AND relative_id = ?")
        .bind(key_login)
        .bind(key_relative)
        .execute(pool)
        .await?;

    Ok(())
}
