//! Payment rows
//!
//! A payment moves `REQUESTED → PENDING → SUCCESS | FAILED | CANCELED`.
//! Tokens are credited in the same transaction that marks the row `SUCCESS`;
//! the ledger's unique reference index keeps a repeated confirm from
//! crediting twice.

use saju_common::time::now_millis;
use saju_common::{Error, Result};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::db::wallet::{self, GrantOutcome, LedgerEntryType};
use crate::models::{PaymentProvider, PaymentRecord, PaymentStatus};

/// Ledger reference type of purchase credits
pub const PAYMENT_REFERENCE_TYPE: &str = "PAYMENT";

fn row_to_record(row: &SqliteRow) -> Result<PaymentRecord> {
    let provider: String = row.get("provider");
    let status: String = row.get("status");
    let payload: String = row.get("request_payload");

    Ok(PaymentRecord {
        payment_id: row.get("payment_id"),
        login_id: row.get("login_id"),
        provider: PaymentProvider::parse(&provider)
            .ok_or_else(|| Error::Internal(format!("Unknown payment provider: {}", provider)))?,
        amount_krw: row.get("amount_krw"),
        token_amount: row.get("token_amount"),
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Unknown payment status: {}", status)))?,
        provider_txn_id: row.get("provider_txn_id"),
        request_payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Open a `REQUESTED` payment and return its id
pub async fn create(
    pool: &SqlitePool,
    login_id: &str,
    provider: PaymentProvider,
    amount_krw: i64,
    token_amount: i64,
    request_payload: &Value,
) -> Result<i64> {
    let now = now_millis();
    let result = sqlx::query(
        r#"
        INSERT INTO payments
            (login_id, provider, amount_krw, token_amount, status, request_payload, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(login_id)
    .bind(provider.as_str())
    .bind(amount_krw)
    .bind(token_amount)
    .bind(PaymentStatus::Requested.as_str())
    .bind(serde_json::to_string(request_payload)?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get(pool: &SqlitePool, payment_id: i64) -> Result<Option<PaymentRecord>> {
    let row = sqlx::query("SELECT * FROM payments WHERE payment_id = ?")
        .bind(payment_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Record the gateway's ready response; only an open (`REQUESTED`) row moves
pub async fn mark_pending(pool: &SqlitePool, payment_id: i64, provider_txn_id: &str, payload: &Value) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = ?, provider_txn_id = ?, pending_payload = ?, updated_at = ?
        WHERE payment_id = ? AND status = ?
        "#,
    )
    .bind(PaymentStatus::Pending.as_str())
    .bind(provider_txn_id)
    .bind(serde_json::to_string(payload)?)
    .bind(now_millis())
    .bind(payment_id)
    .bind(PaymentStatus::Requested.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Close an open payment as `FAILED` or `CANCELED`; closed rows are left alone
pub async fn mark_closed(
    pool: &SqlitePool,
    payment_id: i64,
    status: PaymentStatus,
    error_message: &str,
    payload: Option<&Value>,
) -> Result<bool> {
    if !matches!(status, PaymentStatus::Failed | PaymentStatus::Canceled) {
        return Err(Error::InvalidInput(format!(
            "{} is not a failure status",
            status.as_str()
        )));
    }

    let payload = payload.map(serde_json::to_string).transpose()?;
    let result = sqlx::query(
        r#"
        UPDATE payments
        SET status = ?, error_message = ?, fail_payload = COALESCE(?, fail_payload), updated_at = ?
        WHERE payment_id = ? AND status IN ('REQUESTED', 'PENDING')
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(payload)
    .bind(now_millis())
    .bind(payment_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Marked `SUCCESS` and tokens credited
    Credited { current_tokens: i64 },
    /// Already `SUCCESS`; nothing credited
    AlreadyConfirmed,
    /// Payment is failed or canceled
    Closed(PaymentStatus),
    NotFound,
}

/// Mark the payment `SUCCESS` and credit its tokens in one transaction
pub async fn confirm_success(
    pool: &SqlitePool,
    payment_id: i64,
    provider_txn_id: &str,
    approved_payload: &Value,
) -> Result<ConfirmOutcome> {
    let mut tx = pool.begin().await?;

    // Write first so the row is locked before it is read
    sqlx::query("UPDATE payments SET updated_at = updated_at WHERE payment_id = ?")
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;

    let row = sqlx::query("SELECT * FROM payments WHERE payment_id = ?")
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(row) = row else {
        return Ok(ConfirmOutcome::NotFound);
    };
    let payment = row_to_record(&row)?;

    match payment.status {
        PaymentStatus::Success => return Ok(ConfirmOutcome::AlreadyConfirmed),
        PaymentStatus::Failed | PaymentStatus::Canceled => {
            return Ok(ConfirmOutcome::Closed(payment.status))
        }
        PaymentStatus::Requested | PaymentStatus::Pending => {}
    }

    sqlx::query(
        r#"
        UPDATE payments
        SET status = ?, provider_txn_id = COALESCE(NULLIF(?, ''), provider_txn_id),
            approved_payload = ?, error_message = '', updated_at = ?
        WHERE payment_id = ?
        "#,
    )
    .bind(PaymentStatus::Success.as_str())
    .bind(provider_txn_id)
    .bind(serde_json::to_string(approved_payload)?)
    .bind(now_millis())
    .bind(payment_id)
    .execute(&mut *tx)
    .await?;

    let memo = format!("{} purchase {} KRW", payment.provider.as_str(), payment.amount_krw);
    let grant = wallet::grant_in_tx(
        &mut *tx,
        &payment.login_id,
        payment.token_amount,
        LedgerEntryType::Charge,
        "TOKEN_PURCHASE",
        PAYMENT_REFERENCE_TYPE,
        &payment_id.to_string(),
        &memo,
    )
    .await?;

    match grant {
        GrantOutcome::Granted { current_tokens } => {
            tx.commit().await?;
            Ok(ConfirmOutcome::Credited { current_tokens })
        }
        GrantOutcome::Duplicate => Ok(ConfirmOutcome::AlreadyConfirmed),
        GrantOutcome::UnknownUser => Err(Error::NotFound(format!(
            "User {} of payment {}",
            payment.login_id, payment_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::profiles::ensure_user;
    use saju_common::db::init_memory_database;
    use serde_json::json;

    async fn setup() -> (SqlitePool, i64) {
        let pool = init_memory_database().await.unwrap();
        ensure_user(&pool, "u1", "Kim").await.unwrap();
        let id = create(&pool, "u1", PaymentProvider::KakaoPay, 3000, 30, &json!({"amount": 3000}))
            .await
            .unwrap();
        (pool, id)
    }

    #[tokio::test]
    async fn test_create_and_mark_pending() {
        let (pool, id) = setup().await;
        let p = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(p.status, PaymentStatus::Requested);
        assert_eq!(p.request_payload["amount"], 3000);

        assert!(mark_pending(&pool, id, "T123", &json!({"tid": "T123"})).await.unwrap());
        assert!(!mark_pending(&pool, id, "T999", &json!({})).await.unwrap());

        let p = get(&pool, id).await.unwrap().unwrap();
        assert_eq!(p.status, PaymentStatus::Pending);
        assert_eq!(p.provider_txn_id, "T123");
    }

    #[tokio::test]
    async fn test_confirm_credits_exactly_once() {
        let (pool, id) = setup().await;
        mark_pending(&pool, id, "T1", &json!({})).await.unwrap();

        let first = confirm_success(&pool, id, "T1", &json!({"ok": true})).await.unwrap();
        assert_eq!(first, ConfirmOutcome::Credited { current_tokens: 30 });

        let second = confirm_success(&pool, id, "T1", &json!({"ok": true})).await.unwrap();
        assert_eq!(second, ConfirmOutcome::AlreadyConfirmed);
        assert_eq!(wallet::current_tokens(&pool, "u1").await.unwrap(), Some(30));

        let summary = wallet::summary(&pool, "u1").await.unwrap().unwrap();
        assert!(summary.sync_ok);
    }

    #[tokio::test]
    async fn test_closed_payment_cannot_be_confirmed() {
        let (pool, id) = setup().await;
        assert!(mark_closed(&pool, id, PaymentStatus::Canceled, "user canceled", None).await.unwrap());
        assert!(!mark_closed(&pool, id, PaymentStatus::Failed, "late", None).await.unwrap());

        let outcome = confirm_success(&pool, id, "", &json!({})).await.unwrap();
        assert_eq!(outcome, ConfirmOutcome::Closed(PaymentStatus::Canceled));
        assert_eq!(wallet::current_tokens(&pool, "u1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_lookup_and_missing() {
        let (pool, id) = setup().await;
        assert_eq!(get(&pool, id).await.unwrap().unwrap().login_id, "u1");
        assert!(get(&pool, 9999).await.unwrap().is_none());
        assert_eq!(
            confirm_success(&pool, 9999, "", &json!({})).await.unwrap(),
            ConfirmOutcome::NotFound
        );
        assert!(mark_closed(&pool, id, PaymentStatus::Success, "", None).await.is_err());
    }
}
