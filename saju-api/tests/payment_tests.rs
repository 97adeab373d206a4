//! Integration tests for token purchases and provider callbacks

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;

async fn start_payment(t: &TestApp, login: &str, provider: &str, amount_krw: i64) -> i64 {
    let (status, body) = t
        .call(
            "POST",
            "/api/payments/request",
            Some(login),
            Some(json!({ "provider": provider, "amount_krw": amount_krw })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "payment request failed: {}", body);
    body["payment_id"].as_i64().unwrap()
}

fn first_package(body: &serde_json::Value) -> (i64, i64) {
    let package = &body["packages"][0];
    (
        package["amount_krw"].as_i64().unwrap(),
        package["token_amount"].as_i64().unwrap(),
    )
}

#[tokio::test]
async fn test_payment_request_validation() {
    let t = setup_app().await;

    let (status, body) = t
        .call(
            "POST",
            "/api/payments/request",
            Some(LOGIN),
            Some(json!({ "provider": "bitcoin", "amount_krw": 5000 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "INVALID_PROVIDER");
    assert!(body["supported_providers"].as_array().unwrap().len() == 3);

    let (status, body) = t
        .call(
            "POST",
            "/api/payments/request",
            Some(LOGIN),
            Some(json!({ "provider": "kakaopay", "amount_krw": 1234 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "UNSUPPORTED_AMOUNT");
    assert!(body["supported_amounts"].is_array());

    let (status, _) = t
        .call(
            "POST",
            "/api/payments/request",
            None,
            Some(json!({ "provider": "kakaopay", "amount_krw": 1234 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_payment_confirm_credits_once() {
    let t = setup_app().await;
    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    let (amount_krw, token_amount) = first_package(&summary);

    let (status, ready) = t
        .call(
            "POST",
            "/api/payments/request",
            Some(LOGIN),
            Some(json!({ "provider": "KAKAOPAY", "amount_krw": amount_krw.to_string() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["provider"], "KAKAOPAY");
    assert_eq!(ready["token_amount"], token_amount);
    let payment_id = ready["payment_id"].as_i64().unwrap();
    assert_eq!(ready["provider_txn_id"], format!("T{}", payment_id));
    assert!(ready["redirect_url"].as_str().unwrap().starts_with("https://pay.example.com/"));

    let (status, body) = t
        .call(
            "POST",
            "/api/payments/confirm",
            Some(LOGIN),
            Some(json!({ "payment_id": payment_id, "pg_token": "ok" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["resp_message"], "PAYMENT_CONFIRMED");
    assert_eq!(body["granted_tokens"], token_amount);
    assert_eq!(body["current_tokens"], token_amount);

    // Repeated confirm grants nothing
    let (status, body) = t
        .call(
            "POST",
            "/api/payments/confirm",
            Some(LOGIN),
            Some(json!({ "payment_id": payment_id.to_string() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted_tokens"], 0);
    assert_eq!(t.current_tokens(LOGIN).await, token_amount);

    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    assert_eq!(summary["sync_ok"], true);
}

#[tokio::test]
async fn test_payment_confirm_errors() {
    let t = setup_app().await;
    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    let (amount_krw, _) = first_package(&summary);
    let payment_id = start_payment(&t, LOGIN, "kakaopay", amount_krw).await;

    let (status, body) = t.call("POST", "/api/payments/confirm", Some(LOGIN), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "PAYMENT_ID_REQUIRED");

    let (status, body) = t
        .call("POST", "/api/payments/confirm", Some(LOGIN), Some(json!({ "payment_id": 9999 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["resp_message"], "PAYMENT_NOT_FOUND");

    let (status, body) = t
        .call(
            "POST",
            "/api/payments/confirm",
            Some(OTHER_LOGIN),
            Some(json!({ "payment_id": payment_id })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["resp_message"], "PAYMENT_OWNER_MISMATCH");

    // Provider rejects the approval: payment is closed as failed
    let (status, body) = t
        .call(
            "POST",
            "/api/payments/confirm",
            Some(LOGIN),
            Some(json!({ "payment_id": payment_id, "pg_token": "bad" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["resp_message"], "PAYMENT_PROVIDER_APPROVE_FAILED");

    let (status, body) = t
        .call(
            "POST",
            "/api/payments/confirm",
            Some(LOGIN),
            Some(json!({ "payment_id": payment_id, "pg_token": "ok" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "PAYMENT_STATUS_FAILED");
    assert_eq!(t.current_tokens(LOGIN).await, 0);
}

#[tokio::test]
async fn test_cancel_closes_payment_once() {
    let t = setup_app().await;
    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    let (amount_krw, _) = first_package(&summary);
    let payment_id = start_payment(&t, LOGIN, "naverpay", amount_krw).await;

    let (status, body) = t
        .call("POST", "/api/payments/cancel", None, Some(json!({ "payment_id": payment_id })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELED");
    assert_eq!(body["changed"], true);

    // A later failure report does not overwrite the cancel
    let (status, body) = t
        .call(
            "POST",
            "/api/payments/fail",
            None,
            Some(json!({ "payment_id": payment_id, "error_message": "timeout" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELED");
    assert_eq!(body["changed"], false);

    let (status, body) = t
        .call(
            "POST",
            "/api/payments/confirm",
            Some(LOGIN),
            Some(json!({ "payment_id": payment_id })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "PAYMENT_STATUS_CANCELED");
}

#[tokio::test]
async fn test_success_callback_redirects_and_credits() {
    let t = setup_app().await;
    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    let (amount_krw, token_amount) = first_package(&summary);
    let payment_id = start_payment(&t, LOGIN, "kakaopay", amount_krw).await;

    let uri = format!("/api/payments/callback/kakaopay?payment_id={}&pg_token=ok", payment_id);
    let response = t.send(test_request("GET", &uri, None, None)).await;
    assert!(response.status().is_redirection());
    let location = response.headers().get("location").unwrap().to_str().unwrap();
    assert_eq!(location, format!("/user/billing/success?payment_id={}", payment_id));

    assert_eq!(t.current_tokens(LOGIN).await, token_amount);
}

#[tokio::test]
async fn test_callback_failures_redirect() {
    let t = setup_app().await;
    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    let (amount_krw, _) = first_package(&summary);

    // Approval rejected
    let payment_id = start_payment(&t, LOGIN, "kakaopay", amount_krw).await;
    let uri = format!("/api/payments/callback/kakaopay?payment_id={}&pg_token=bad", payment_id);
    let response = t.send(test_request("GET", &uri, None, None)).await;
    assert_eq!(response.headers().get("location").unwrap().to_str().unwrap(), "/user/billing/failed");

    // Wrong provider in the callback path
    let payment_id = start_payment(&t, LOGIN, "kakaopay", amount_krw).await;
    let uri = format!("/api/payments/callback/paypal?payment_id={}&token=x", payment_id);
    let response = t.send(test_request("GET", &uri, None, None)).await;
    assert_eq!(response.headers().get("location").unwrap().to_str().unwrap(), "/user/billing/failed");

    // User canceled at the provider
    let uri = format!("/api/payments/callback/kakaopay/cancel?payment_id={}", payment_id);
    let response = t.send(test_request("GET", &uri, None, None)).await;
    assert_eq!(response.headers().get("location").unwrap().to_str().unwrap(), "/user/billing/canceled");

    let (_, body) = t
        .call("POST", "/api/payments/confirm", Some(LOGIN), Some(json!({ "payment_id": payment_id })))
        .await;
    assert_eq!(body["resp_message"], "PAYMENT_STATUS_CANCELED");
    assert_eq!(t.current_tokens(LOGIN).await, 0);
}
