//! Token wallet
//!
//! `users.current_tokens` holds the balance; `token_ledger` records every
//! movement with the balance after it. A reference id carries at most one
//! debit (`USE`) and one refund (`REFUND`), enforced by a unique index, so a
//! retried refund can never credit twice.

use saju_common::time::now_millis;
use saju_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntryType {
    Use,
    Refund,
    Charge,
    Event,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Use => "USE",
            LedgerEntryType::Refund => "REFUND",
            LedgerEntryType::Charge => "CHARGE",
            LedgerEntryType::Event => "EVENT",
        }
    }
}

/// Balance as seen by the wallet page
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TokenSummary {
    pub login_id: String,
    pub current_tokens: i64,
    pub ledger_net_tokens: i64,
    /// Balance equals the ledger sum
    pub sync_ok: bool,
}

/// A debit request
#[derive(Debug, Clone)]
pub struct TokenDebit<'a> {
    pub login_id: &'a str,
    pub amount: i64,
    pub usage_code: &'a str,
    pub reference_type: &'a str,
    pub reference_id: &'a str,
    pub memo: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { current_tokens: i64 },
    Insufficient { current_tokens: i64 },
    UnknownUser,
    /// The reference id was already debited
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { amount: i64, current_tokens: i64 },
    AlreadyRefunded,
    /// No debit exists for the reference
    NoMatchingDebit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted { current_tokens: i64 },
    /// The reference id was already credited
    Duplicate,
    UnknownUser,
}

pub async fn current_tokens(pool: &SqlitePool, login_id: &str) -> Result<Option<i64>> {
    let balance = sqlx::query_scalar("SELECT current_tokens FROM users WHERE login_id = ?")
        .bind(login_id)
        .fetch_optional(pool)
        .await?;
    Ok(balance)
}

pub async fn summary(pool: &SqlitePool, login_id: &str) -> Result<Option<TokenSummary>> {
    let Some(current) = current_tokens(pool, login_id).await? else {
        return Ok(None);
    };

    let net: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0) FROM token_ledger WHERE login_id = ?")
        .bind(login_id)
        .fetch_one(pool)
        .await?;

    Ok(Some(TokenSummary {
        login_id: login_id.to_string(),
        current_tokens: current,
        ledger_net_tokens: net,
        sync_ok: net == current,
    }))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[allow(clippy::too_many_arguments)]
async fn insert_ledger(
    conn: &mut SqliteConnection,
    login_id: &str,
    amount: i64,
    entry_type: LedgerEntryType,
    usage_code: &str,
    reference_type: &str,
    reference_id: &str,
    memo: &str,
    balance_after: i64,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO token_ledger
            (login_id, amount, entry_type, usage_code, reference_type, reference_id, memo, balance_after, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(login_id)
    .bind(amount)
    .bind(entry_type.as_str())
    .bind(usage_code)
    .bind(reference_type)
    .bind(reference_id)
    .bind(memo)
    .bind(balance_after)
    .bind(now_millis())
    .execute(conn)
    .await?;
    Ok(())
}

/// Atomically debit `amount` tokens when the balance allows it
pub async fn consume(pool: &SqlitePool, debit: &TokenDebit<'_>) -> Result<DebitOutcome> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE users
        SET current_tokens = current_tokens - ?, updated_at = ?
        WHERE login_id = ? AND current_tokens >= ?
        "#,
    )
    .bind(debit.amount)
    .bind(now_millis())
    .bind(debit.login_id)
    .bind(debit.amount)
    .execute(&mut *tx)
    .await?;

    let balance: Option<i64> = sqlx::query_scalar("SELECT current_tokens FROM users WHERE login_id = ?")
        .bind(debit.login_id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(balance) = balance else {
        return Ok(DebitOutcome::UnknownUser);
    };
    if updated.rows_affected() == 0 {
        return Ok(DebitOutcome::Insufficient { current_tokens: balance });
    }

    match insert_ledger(
        &mut *tx,
        debit.login_id,
        -debit.amount,
        LedgerEntryType::Use,
        debit.usage_code,
        debit.reference_type,
        debit.reference_id,
        debit.memo,
        balance,
    )
    .await
    {
        Ok(()) => {}
        Err(e) if is_unique_violation(&e) => return Ok(DebitOutcome::Duplicate),
        Err(e) => return Err(e.into()),
    }

    tx.commit().await?;
    Ok(DebitOutcome::Debited { current_tokens: balance })
}

/// Return the tokens debited under `reference_id`
///
/// The refunded amount is the recorded debit, never a caller-supplied value.
pub async fn refund(
    pool: &SqlitePool,
    login_id: &str,
    reference_type: &str,
    reference_id: &str,
    memo: &str,
) -> Result<RefundOutcome> {
    if reference_id.trim().is_empty() {
        return Ok(RefundOutcome::NoMatchingDebit);
    }

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO token_ledger
            (login_id, amount, entry_type, usage_code, reference_type, reference_id, memo, balance_after, created_at)
        SELECT login_id, -amount, 'REFUND', usage_code, reference_type, reference_id, ?, 0, ?
        FROM token_ledger
        WHERE login_id = ? AND entry_type = 'USE' AND reference_type = ? AND reference_id = ?
        "#,
    )
    .bind(memo)
    .bind(now_millis())
    .bind(login_id)
    .bind(reference_type)
    .bind(reference_id)
    .execute(&mut *tx)
    .await?;

    if inserted.rows_affected() == 0 {
        let has_debit: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT entry_id FROM token_ledger
            WHERE login_id = ? AND entry_type = 'USE' AND reference_type = ? AND reference_id = ?
            "#,
        )
        .bind(login_id)
        .bind(reference_type)
        .bind(reference_id)
        .fetch_optional(&mut *tx)
        .await?;

        return Ok(match has_debit {
            Some(_) => RefundOutcome::AlreadyRefunded,
            None => RefundOutcome::NoMatchingDebit,
        });
    }

    let entry_id = inserted.last_insert_rowid();
    let amount: i64 = sqlx::query_scalar("SELECT amount FROM token_ledger WHERE entry_id = ?")
        .bind(entry_id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("UPDATE users SET current_tokens = current_tokens + ?, updated_at = ? WHERE login_id = ?")
        .bind(amount)
        .bind(now_millis())
        .bind(login_id)
        .execute(&mut *tx)
        .await?;

    let balance: i64 = sqlx::query_scalar("SELECT current_tokens FROM users WHERE login_id = ?")
        .bind(login_id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("UPDATE token_ledger SET balance_after = ? WHERE entry_id = ?")
        .bind(balance)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(RefundOutcome::Refunded {
        amount,
        current_tokens: balance,
    })
}

/// Credit tokens inside a caller-owned transaction
///
/// The caller commits; on `Duplicate` or `UnknownUser` it should roll back.
#[allow(clippy::too_many_arguments)]
pub async fn grant_in_tx(
    conn: &mut SqliteConnection,
    login_id: &str,
    amount: i64,
    entry_type: LedgerEntryType,
    usage_code: &str,
    reference_type: &str,
    reference_id: &str,
    memo: &str,
) -> Result<GrantOutcome> {
    let updated = sqlx::query("UPDATE users SET current_tokens = current_tokens + ?, updated_at = ? WHERE login_id = ?")
        .bind(amount)
        .bind(now_millis())
        .bind(login_id)
        .execute(&mut *conn)
        .await?;
    if updated.rows_affected() == 0 {
        return Ok(GrantOutcome::UnknownUser);
    }

    let balance: i64 = sqlx::query_scalar("SELECT current_tokens FROM users WHERE login_id = ?")
        .bind(login_id)
        .fetch_one(&mut *conn)
        .await?;

    match insert_ledger(
        conn,
        login_id,
        amount,
        entry_type,
        usage_code,
        reference_type,
        reference_id,
        memo,
        balance,
    )
    .await
    {
        Ok(()) => Ok(GrantOutcome::Granted { current_tokens: balance }),
        Err(e) if is_unique_violation(&e) => Ok(GrantOutcome::Duplicate),
        Err(e) => Err(e.into()),
    }
}

/// Promotional credit, at most once per `event_code` and login
pub async fn grant_event(pool: &SqlitePool, login_id: &str, amount: i64, event_code: &str, memo: &str) -> Result<GrantOutcome> {
    let mut tx = pool.begin().await?;
    let outcome = grant_in_tx(
        &mut *tx,
        login_id,
        amount,
        LedgerEntryType::Event,
        "EVENT_GRANT",
        "EVENT",
        event_code,
        memo,
    )
    .await?;

    if matches!(outcome, GrantOutcome::Granted { .. }) {
        tx.commit().await?;
    }
    Ok(outcome)
}

/// Most recent ledger rows for the login, newest first
pub async fn recent_entries(pool: &SqlitePool, login_id: &str, limit: i64) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT entry_id, amount, entry_type, usage_code, reference_type, reference_id, memo, balance_after, created_at
        FROM token_ledger
        WHERE login_id = ?
        ORDER BY entry_id DESC
        LIMIT ?
        "#,
    )
    .bind(login_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| LedgerEntry {
            entry_id: row.get("entry_id"),
            amount: row.get("amount"),
            entry_type: row.get("entry_type"),
            usage_code: row.get("usage_code"),
            reference_type: row.get("reference_type"),
            reference_id: row.get("reference_id"),
            memo: row.get("memo"),
            balance_after: row.get("balance_after"),
            created_at: row.get("created_at"),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub amount: i64,
    pub entry_type: String,
    pub usage_code: String,
    pub reference_type: String,
    pub reference_id: String,
    pub memo: String,
    pub balance_after: i64,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::profiles::ensure_user;
    use saju_common::db::init_memory_database;

    async fn funded_pool(tokens: i64) -> SqlitePool {
        let pool = init_memory_database().await.unwrap();
        ensure_user(&pool, "u1", "Kim").await.unwrap();
        if tokens > 0 {
            grant_event(&pool, "u1", tokens, "WELCOME", "welcome").await.unwrap();
        }
        pool
    }

    fn debit(reference_id: &str, amount: i64) -> TokenDebit<'_> {
        TokenDebit {
            login_id: "u1",
            amount,
            usage_code: "SAJU_VIEW",
            reference_type: "SAJU_REQUEST",
            reference_id,
            memo: "test",
        }
    }

    #[tokio::test]
    async fn test_debit_and_refund_net_to_zero() {
        let pool = funded_pool(20).await;

        let out = consume(&pool, &debit("R-1", 10)).await.unwrap();
        assert_eq!(out, DebitOutcome::Debited { current_tokens: 10 });

        let out = refund(&pool, "u1", "SAJU_REQUEST", "R-1", "refund").await.unwrap();
        assert_eq!(out, RefundOutcome::Refunded { amount: 10, current_tokens: 20 });

        let s = summary(&pool, "u1").await.unwrap().unwrap();
        assert_eq!(s.current_tokens, 20);
        assert_eq!(s.ledger_net_tokens, 20);
        assert!(s.sync_ok);
    }

    #[tokio::test]
    async fn test_refund_is_idempotent() {
        let pool = funded_pool(20).await;
        consume(&pool, &debit("R-1", 10)).await.unwrap();
        refund(&pool, "u1", "SAJU_REQUEST", "R-1", "refund").await.unwrap();

        let again = refund(&pool, "u1", "SAJU_REQUEST", "R-1", "refund").await.unwrap();
        assert_eq!(again, RefundOutcome::AlreadyRefunded);
        assert_eq!(current_tokens(&pool, "u1").await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn test_refund_without_debit() {
        let pool = funded_pool(20).await;
        let out = refund(&pool, "u1", "SAJU_REQUEST", "R-404", "refund").await.unwrap();
        assert_eq!(out, RefundOutcome::NoMatchingDebit);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_wallet_untouched() {
        let pool = funded_pool(5).await;
        let out = consume(&pool, &debit("R-1", 10)).await.unwrap();
        assert_eq!(out, DebitOutcome::Insufficient { current_tokens: 5 });
        assert_eq!(recent_entries(&pool, "u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_debit_reference_rolls_back() {
        let pool = funded_pool(30).await;
        consume(&pool, &debit("R-1", 10)).await.unwrap();
        let out = consume(&pool, &debit("R-1", 10)).await.unwrap();
        assert_eq!(out, DebitOutcome::Duplicate);
        assert_eq!(current_tokens(&pool, "u1").await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let pool = init_memory_database().await.unwrap();
        assert_eq!(consume(&pool, &debit("R-1", 1)).await.unwrap(), DebitOutcome::UnknownUser);
        assert_eq!(
            grant_event(&pool, "u1", 5, "E", "m").await.unwrap(),
            GrantOutcome::UnknownUser
        );
        assert!(summary(&pool, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_grant_once_per_code() {
        let pool = funded_pool(0).await;
        assert_eq!(
            grant_event(&pool, "u1", 5, "SPRING", "promo").await.unwrap(),
            GrantOutcome::Granted { current_tokens: 5 }
        );
        assert_eq!(
            grant_event(&pool, "u1", 5, "SPRING", "promo").await.unwrap(),
            GrantOutcome::Duplicate
        );
        assert_eq!(current_tokens(&pool, "u1").await.unwrap(), Some(5));
    }
}
