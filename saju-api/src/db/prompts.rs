//! Operator-managed prompt templates

use saju_common::Result;
use sqlx::{Row, SqlitePool};

/// Active template for one service/feature/tone combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub system_prompt: String,
    pub user_prompt_guide: String,
}

/// Most recently updated active template
///
/// An exact tone match wins over a tone-agnostic (`tone_key = ''`) row.
pub async fn find_active(
    pool: &SqlitePool,
    service_code: &str,
    feature_key: &str,
    tone_key: &str,
) -> Result<Option<PromptTemplate>> {
    let row = sqlx::query(
        r#"
        SELECT system_prompt, user_prompt_guide
        FROM prompt_templates
        WHERE service_code = ? AND feature_key = ? AND tone_key IN (?, '') AND is_active = 1
        ORDER BY CASE WHEN tone_key = ? THEN 0 ELSE 1 END, updated_at DESC, template_id DESC
        LIMIT 1
        "#,
    )
    .bind(service_code)
    .bind(feature_key)
    .bind(tone_key)
    .bind(tone_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| PromptTemplate {
        system_prompt: row.get("system_prompt"),
        user_prompt_guide: row.get("user_prompt_guide"),
    }))
}

/// Insert a template and deactivate older ones for the same key
#[cfg(test)]
pub async fn upsert_active(
    pool: &SqlitePool,
    service_code: &str,
    feature_key: &str,
    tone_key: &str,
    template: &PromptTemplate,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let now = saju_common::time::now_millis();

    sqlx::query(
        r#"
        UPDATE prompt_templates SET is_active = 0, updated_at = ?
        WHERE service_code = ? AND feature_key = ? AND tone_key = ? AND is_active = 1
        "#,
    )
    .bind(now)
    .bind(service_code)
    .bind(feature_key)
    .bind(tone_key)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query(
        r#"
        INSERT INTO prompt_templates
            (service_code, feature_key, tone_key, system_prompt, user_prompt_guide, is_active, updated_at)
        VALUES (?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(service_code)
    .bind(feature_key)
    .bind(tone_key)
    .bind(&template.system_prompt)
    .bind(&template.user_prompt_guide)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(result.last_insert_rowid())
}
