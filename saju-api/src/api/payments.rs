//! Token purchase endpoints and provider callbacks
//!
//! A purchase is `request` (create the row, call the provider's ready API,
//! send the browser to its redirect URL) followed by `confirm` (approve with
//! the provider and credit the tokens). Providers send the browser back to
//! the callback routes, which confirm or close the payment and redirect to
//! the billing pages.

use axum::{
    extract::{Path, State},
    response::Redirect,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::payments::{self as payment_store, ConfirmOutcome};
use crate::db::wallet;
use crate::error::{ok_envelope, ApiError, ApiResult};
use crate::extract::{ApiJson, ApiQuery};
use crate::models::{PaymentProvider, PaymentRecord, PaymentStatus};
use crate::services::payment_gateway::{callback_urls, ApprovalParams, ReadyRequest};
use crate::services::token_policy;
use crate::session::{LoginSession, OptionalLoginSession};
use crate::AppState;

const BILLING_SUCCESS_PATH: &str = "/user/billing/success";
const BILLING_FAILED_PATH: &str = "/user/billing/failed";
const BILLING_CANCELED_PATH: &str = "/user/billing/canceled";

const DEFAULT_CANCEL_MEMO: &str = "USER_CANCELED";
const DEFAULT_FAIL_MEMO: &str = "PAYMENT_FAILED";

/// Accept `12` and `"12"` alike
fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequestBody {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub amount_krw: Value,
}

/// POST /api/payments/request
pub async fn request_payment(
    State(state): State<AppState>,
    session: LoginSession,
    ApiJson(body): ApiJson<PaymentRequestBody>,
) -> ApiResult<Json<Value>> {
    let supported_providers: Vec<&str> = token_policy::SUPPORTED_PROVIDERS.iter().map(|p| p.as_str()).collect();
    let provider = PaymentProvider::parse(&body.provider).ok_or_else(|| {
        ApiError::bad_request_with(
            "INVALID_PROVIDER",
            format!("Unsupported payment provider: {}", body.provider),
            json!({ "supported_providers": supported_providers }),
        )
    })?;

    let amount_krw = integer_value(&body.amount_krw).unwrap_or(0);
    let token_amount = token_policy::package_tokens(amount_krw).ok_or_else(|| {
        ApiError::bad_request_with(
            "UNSUPPORTED_AMOUNT",
            format!("No token package costs {} KRW", amount_krw),
            json!({ "supported_amounts": token_policy::supported_amounts() }),
        )
    })?;

    let request_payload = json!({
        "provider": provider.as_str(),
        "amount_krw": amount_krw,
        "token_amount": token_amount,
        "user_name": session.user_name,
    });
    let payment_id = payment_store::create(
        &state.db,
        &session.login_id,
        provider,
        amount_krw,
        token_amount,
        &request_payload,
    )
    .await?;

    let ready = ReadyRequest {
        payment_id,
        provider,
        login_id: session.login_id.clone(),
        amount_krw,
        token_amount,
        item_name: format!("{} tokens", token_amount),
        callbacks: callback_urls(&state.config.server.public_base_url, provider, payment_id),
    };

    let response = match state.payments.ready(&ready).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(payment_id, provider = provider.as_str(), error = %e, "Payment ready failed");
            let failure = json!({ "error": e.to_string() });
            if let Err(store_err) =
                payment_store::mark_closed(&state.db, payment_id, PaymentStatus::Failed, &e.to_string(), Some(&failure)).await
            {
                tracing::error!(payment_id, error = %store_err, "Failed to mark payment failed");
            }
            return Err(ApiError::BadGateway {
                code: "PAYMENT_PROVIDER_READY_FAILED",
                message: "The payment provider could not start the payment.".to_string(),
            });
        }
    };

    payment_store::mark_pending(&state.db, payment_id, &response.provider_txn_id, &response.raw).await?;
    tracing::info!(
        payment_id,
        login_id = %session.login_id,
        provider = provider.as_str(),
        amount_krw,
        "Payment started"
    );

    Ok(ok_envelope(
        "PAYMENT_READY",
        json!({
            "payment_id": payment_id,
            "provider": provider.as_str(),
            "amount_krw": amount_krw,
            "token_amount": token_amount,
            "provider_txn_id": response.provider_txn_id,
            "redirect_url": response.redirect_url,
        }),
    ))
}

/// Confirm input, from the JSON body or the callback query string
#[derive(Debug, Default, Deserialize)]
pub struct ConfirmParams {
    #[serde(default)]
    pub payment_id: Value,
    #[serde(flatten)]
    pub approval: ApprovalParams,
    /// NaverPay reports the outcome on the return URL
    #[serde(default, rename = "resultCode")]
    pub result_code: String,
}

/// Outcome of a confirm call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmed {
    pub payment_id: i64,
    pub login_id: String,
    pub current_tokens: i64,
    pub granted_tokens: i64,
}

async fn load_payment(state: &AppState, payment_id: Option<i64>) -> ApiResult<PaymentRecord> {
    let payment_id =
        payment_id.ok_or_else(|| ApiError::bad_request("PAYMENT_ID_REQUIRED", "payment_id is required"))?;
    payment_store::get(&state.db, payment_id)
        .await?
        .ok_or_else(|| ApiError::not_found("PAYMENT_NOT_FOUND", format!("Payment {} not found", payment_id)))
}

fn closed_status_error(status: PaymentStatus) -> ApiError {
    let code = match status {
        PaymentStatus::Canceled => "PAYMENT_STATUS_CANCELED",
        _ => "PAYMENT_STATUS_FAILED",
    };
    ApiError::bad_request(code, format!("Payment is {}", status.as_str()))
}

async fn current_balance(state: &AppState, login_id: &str) -> ApiResult<i64> {
    Ok(wallet::current_tokens(&state.db, login_id).await?.unwrap_or(0))
}

/// Approve with the provider and credit tokens; idempotent once `SUCCESS`
async fn confirm(
    state: &AppState,
    payment: PaymentRecord,
    approval: &ApprovalParams,
    session_login: Option<&str>,
) -> ApiResult<Confirmed> {
    if let Some(login_id) = session_login {
        if login_id != payment.login_id {
            return Err(ApiError::Forbidden {
                code: "PAYMENT_OWNER_MISMATCH",
                message: "This payment belongs to another user".to_string(),
            });
        }
    }

    match payment.status {
        PaymentStatus::Success => {
            return Ok(Confirmed {
                payment_id: payment.payment_id,
                current_tokens: current_balance(state, &payment.login_id).await?,
                login_id: payment.login_id,
                granted_tokens: 0,
            });
        }
        PaymentStatus::Failed | PaymentStatus::Canceled => return Err(closed_status_error(payment.status)),
        PaymentStatus::Requested | PaymentStatus::Pending => {}
    }

    let approved = match state.payments.approve(&payment, approval).await {
        Ok(approved) => approved,
        Err(e) => {
            tracing::warn!(payment_id = payment.payment_id, error = %e, "Payment approval failed");
            let failure = json!({ "error": e.to_string() });
            if let Err(store_err) = payment_store::mark_closed(
                &state.db,
                payment.payment_id,
                PaymentStatus::Failed,
                &e.to_string(),
                Some(&failure),
            )
            .await
            {
                tracing::error!(payment_id = payment.payment_id, error = %store_err, "Failed to mark payment failed");
            }
            return Err(ApiError::BadGateway {
                code: "PAYMENT_PROVIDER_APPROVE_FAILED",
                message: "The payment provider could not approve the payment.".to_string(),
            });
        }
    };

    match payment_store::confirm_success(
        &state.db,
        payment.payment_id,
        &approved.provider_txn_id,
        &approved.approved_payload,
    )
    .await?
    {
        ConfirmOutcome::Credited { current_tokens } => {
            tracing::info!(
                payment_id = payment.payment_id,
                login_id = %payment.login_id,
                tokens = payment.token_amount,
                "Payment confirmed"
            );
            Ok(Confirmed {
                payment_id: payment.payment_id,
                login_id: payment.login_id,
                current_tokens,
                granted_tokens: payment.token_amount,
            })
        }
        ConfirmOutcome::AlreadyConfirmed => Ok(Confirmed {
            payment_id: payment.payment_id,
            current_tokens: current_balance(state, &payment.login_id).await?,
            login_id: payment.login_id,
            granted_tokens: 0,
        }),
        ConfirmOutcome::Closed(status) => Err(closed_status_error(status)),
        ConfirmOutcome::NotFound => Err(ApiError::not_found(
            "PAYMENT_NOT_FOUND",
            format!("Payment {} not found", payment.payment_id),
        )),
    }
}

/// POST /api/payments/confirm
pub async fn confirm_payment(
    State(state): State<AppState>,
    OptionalLoginSession(session): OptionalLoginSession,
    ApiQuery(query): ApiQuery<ConfirmParams>,
    body: Option<ApiJson<ConfirmParams>>,
) -> ApiResult<Json<Value>> {
    let body = body.map(|ApiJson(b)| b).unwrap_or_default();
    let payment_id = integer_value(&body.payment_id).or_else(|| integer_value(&query.payment_id));
    let approval = ApprovalParams {
        pg_token: first_non_empty(&body.approval.pg_token, &query.approval.pg_token),
        naver_payment_id: first_non_empty(&body.approval.naver_payment_id, &query.approval.naver_payment_id),
        token: first_non_empty(&body.approval.token, &query.approval.token),
    };

    let payment = load_payment(&state, payment_id).await?;
    let confirmed = confirm(&state, payment, &approval, session.as_ref().map(|s| s.login_id.as_str())).await?;

    Ok(ok_envelope(
        "PAYMENT_CONFIRMED",
        json!({
            "payment_id": confirmed.payment_id,
            "login_id": confirmed.login_id,
            "current_tokens": confirmed.current_tokens,
            "granted_tokens": confirmed.granted_tokens,
        }),
    ))
}

fn first_non_empty(a: &str, b: &str) -> String {
    let chosen = if a.trim().is_empty() { b } else { a };
    chosen.trim().to_string()
}

#[derive(Debug, Deserialize)]
pub struct CloseBody {
    #[serde(default)]
    pub payment_id: Value,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub memo: String,
}

/// Close an open payment; a settled payment keeps its status
async fn close_payment(state: &AppState, body: CloseBody, status: PaymentStatus, default_memo: &str) -> ApiResult<Json<Value>> {
    let payment = load_payment(state, integer_value(&body.payment_id)).await?;

    let message = [body.error_message.trim(), body.memo.trim()]
        .into_iter()
        .find(|m| !m.is_empty())
        .unwrap_or(default_memo)
        .to_string();

    let changed = payment_store::mark_closed(&state.db, payment.payment_id, status, &message, None).await?;
    let current_status = if changed { status } else { payment.status };
    if changed {
        tracing::info!(payment_id = payment.payment_id, status = status.as_str(), "Payment closed");
    }

    Ok(ok_envelope(
        "OK",
        json!({
            "payment_id": payment.payment_id,
            "status": current_status.as_str(),
            "changed": changed,
        }),
    ))
}

/// POST /api/payments/fail
pub async fn fail_payment(State(state): State<AppState>, ApiJson(body): ApiJson<CloseBody>) -> ApiResult<Json<Value>> {
    close_payment(&state, body, PaymentStatus::Failed, DEFAULT_FAIL_MEMO).await
}

/// POST /api/payments/cancel
pub async fn cancel_payment(State(state): State<AppState>, ApiJson(body): ApiJson<CloseBody>) -> ApiResult<Json<Value>> {
    close_payment(&state, body, PaymentStatus::Canceled, DEFAULT_CANCEL_MEMO).await
}

fn provider_or_404(key: &str) -> ApiResult<PaymentProvider> {
    PaymentProvider::parse(key)
        .ok_or_else(|| ApiError::not_found("INVALID_PROVIDER", format!("Unknown payment provider: {}", key)))
}

/// GET /api/payments/callback/:provider
pub async fn success_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ApiQuery(params): ApiQuery<ConfirmParams>,
) -> ApiResult<Redirect> {
    let provider = provider_or_404(&provider)?;
    let payment_id = integer_value(&params.payment_id);

    let outcome: ApiResult<Confirmed> = async {
        let payment = load_payment(&state, payment_id).await?;
        if payment.provider != provider {
            return Err(ApiError::bad_request("INVALID_PROVIDER", "Callback provider does not match the payment"));
        }
        if !params.result_code.is_empty() && !params.result_code.eq_ignore_ascii_case("success") {
            let message = format!("Provider result code {}", params.result_code);
            payment_store::mark_closed(&state.db, payment.payment_id, PaymentStatus::Failed, &message, None).await?;
            return Err(closed_status_error(PaymentStatus::Failed));
        }
        confirm(&state, payment, &params.approval, None).await
    }
    .await;

    match outcome {
        Ok(confirmed) => Ok(Redirect::to(&format!(
            "{}?payment_id={}",
            BILLING_SUCCESS_PATH, confirmed.payment_id
        ))),
        Err(e) => {
            tracing::warn!(?payment_id, provider = provider.as_str(), error = %e, "Payment callback did not confirm");
            Ok(Redirect::to(BILLING_FAILED_PATH))
        }
    }
}

async fn close_from_callback(state: &AppState, params: &ConfirmParams, status: PaymentStatus, memo: &str) {
    let Some(payment_id) = integer_value(&params.payment_id) else {
        return;
    };
    if let Err(e) = payment_store::mark_closed(&state.db, payment_id, status, memo, None).await {
        tracing::error!(payment_id, error = %e, "Failed to close payment from callback");
    }
}

/// GET /api/payments/callback/:provider/cancel
pub async fn cancel_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ApiQuery(params): ApiQuery<ConfirmParams>,
) -> ApiResult<Redirect> {
    provider_or_404(&provider)?;
    close_from_callback(&state, &params, PaymentStatus::Canceled, DEFAULT_CANCEL_MEMO).await;
    Ok(Redirect::to(BILLING_CANCELED_PATH))
}

/// GET /api/payments/callback/:provider/fail
pub async fn fail_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    ApiQuery(params): ApiQuery<ConfirmParams>,
) -> ApiResult<Redirect> {
    provider_or_404(&provider)?;
    close_from_callback(&state, &params, PaymentStatus::Failed, DEFAULT_FAIL_MEMO).await;
    Ok(Redirect::to(BILLING_FAILED_PATH))
}
