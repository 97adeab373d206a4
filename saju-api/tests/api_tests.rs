//! Integration tests for saju-api analysis, history, token and sharing endpoints

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use common::*;
use saju_common::auth::calculate_signature;
use saju_common::config::TomlConfig;
use saju_common::time::now_millis;
use serde_json::json;
use tokio::sync::Semaphore;

// =============================================================================
// Health and session
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let t = setup_app().await;
    let (status, body) = t.call("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "saju-api");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_missing_login_is_401() {
    let t = setup_app().await;
    let (status, body) = t.call("POST", "/api/saju/request", None, Some(saju_body())).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["resp"], "ERROR");
    assert_eq!(body["resp_message"], "LOGIN_REQUIRED");
}

#[tokio::test]
async fn test_signed_session_required_when_secret_set() {
    let mut config = TomlConfig::default();
    config.session.secret = "s3cret".to_string();
    let t = setup_with(config, FakeChart::open(), FakeLlm::answering()).await;

    // Unsigned
    let (status, _) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signed
    let timestamp = now_millis();
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/tokens/summary")
        .header("x-login-id", LOGIN)
        .header("x-session-timestamp", timestamp.to_string())
        .header("x-session-signature", calculate_signature(LOGIN, timestamp, "s3cret"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = t.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Tokens
// =============================================================================

#[tokio::test]
async fn test_token_summary_starts_empty() {
    let t = setup_app().await;
    let response = t.send(test_request("GET", "/api/tokens/summary", Some(LOGIN), None)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let cache_control = response.headers().get("cache-control").unwrap().to_str().unwrap();
    assert!(cache_control.contains("no-store"));

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["current_tokens"], 0);
    assert_eq!(body["sync_ok"], true);
    assert!(body["packages"].as_array().unwrap().len() >= 1);
}

#[tokio::test]
async fn test_grant_event_once_per_code() {
    let t = setup_app().await;

    let body = t.grant(LOGIN, "welcome", 30).await;
    assert_eq!(body["resp_message"], "TOKENS_GRANTED");
    assert_eq!(body["event_code"], "WELCOME");
    assert_eq!(body["current_tokens"], 30);

    let (status, body) = t
        .call(
            "POST",
            "/api/tokens/grant-event",
            Some(LOGIN),
            Some(json!({ "amount": 30, "event_code": "WELCOME" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "EVENT_ALREADY_GRANTED");
    assert_eq!(t.current_tokens(LOGIN).await, 30);

    let (status, body) = t
        .call("POST", "/api/tokens/grant-event", Some(LOGIN), Some(json!({ "amount": 0 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "INVALID_GRANT_AMOUNT");
}

// =============================================================================
// Saju requests
// =============================================================================

#[tokio::test]
async fn test_saju_request_without_tokens_is_402() {
    let t = setup_app().await;
    let (status, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["resp_message"], "INSUFFICIENT_TOKENS");
    assert_eq!(body["current_tokens"], 0);
    assert_eq!(body["required_tokens"], 10);
}

#[tokio::test]
async fn test_saju_request_missing_fields_is_400() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    let (status, body) = t
        .call(
            "POST",
            "/api/saju/request",
            Some(LOGIN),
            Some(json!({ "name": "Kim", "gender": "female" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "INVALID_INPUT");
    let missing: Vec<&str> = body["missing_fields"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(missing, vec!["birth_year", "birth_month", "birth_day"]);
    assert_eq!(t.current_tokens(LOGIN).await, 30);
}

#[tokio::test]
async fn test_saju_balance_is_checked_before_input() {
    let t = setup_app().await;
    let (status, body) = t
        .call(
            "POST",
            "/api/saju/request",
            Some(LOGIN),
            Some(json!({ "name": "Kim", "gender": "female" })),
        )
        .await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["resp_message"], "INSUFFICIENT_TOKENS");
    assert_eq!(body["required_tokens"], 10);
}

#[tokio::test]
async fn test_unreadable_body_uses_error_envelope() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    // No body and no content type
    let (status, body) = t.call("POST", "/api/saju/request", Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp"], "ERROR");
    assert_eq!(body["resp_message"], "INVALID_REQUEST");

    // Truncated JSON
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/tokens/grant-event")
        .header("x-login-id", LOGIN)
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{\"amount\": 5"))
        .unwrap();
    let response = t.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["resp_message"], "INVALID_REQUEST");

    let (status, body) = t.call("GET", "/api/history?limit=many", Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "INVALID_REQUEST");
    assert_eq!(t.current_tokens(LOGIN).await, 30);
}

#[tokio::test]
async fn test_saju_request_completes() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    let (status, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["resp_message"], "REQUEST_ACCEPTED");
    assert_eq!(body["service_type"], "saju");
    assert_eq!(body["analysis_mode"], "PREMIUM");
    assert_eq!(body["consumed_tokens"], 10);
    assert_eq!(body["current_tokens"], 20);

    let status_url = body["status_url"].as_str().unwrap().to_string();
    let done = t.wait_for_terminal(LOGIN, &status_url).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["summary"], "A steady year");
    assert_eq!(t.chart.calls.load(Ordering::SeqCst), 1);

    t.wait_for_idle(LOGIN).await;
    assert_eq!(t.current_tokens(LOGIN).await, 20);
}

#[tokio::test]
async fn test_trial_mode_costs_less() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 5).await;

    let mut body = saju_body();
    body["analysis_mode"] = json!("trial");
    let (status, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(body)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["analysis_mode"], "TRIAL");
    assert_eq!(body["consumed_tokens"], 3);
    assert_eq!(body["current_tokens"], 2);
}

#[tokio::test]
async fn test_second_request_while_running_is_409() {
    let gate = Arc::new(Semaphore::new(0));
    let t = setup_with(TomlConfig::default(), FakeChart::gated(gate.clone()), FakeLlm::answering()).await;
    t.grant(LOGIN, "welcome", 50).await;

    let (status, first) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let result_id = first["result_id"].as_str().unwrap().to_string();

    let (status, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["resp_message"], "ANALYSIS_ALREADY_RUNNING");
    assert_eq!(body["active_result_id"], result_id.as_str());
    assert_eq!(body["active_service_type"], "saju");

    // Rejected request did not debit
    assert_eq!(t.current_tokens(LOGIN).await, 40);

    // Another login is not blocked
    t.grant(OTHER_LOGIN, "welcome", 50).await;
    let (status, _) = t.call("POST", "/api/saju/request", Some(OTHER_LOGIN), Some(saju_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, current) = t.call("GET", "/api/analysis/current-status", Some(LOGIN), None).await;
    assert_eq!(current["has_job"], true);
    assert_eq!(current["is_active"], true);
    assert_eq!(current["result_id"], result_id.as_str());
    assert!(current["eta_seconds"].as_i64().unwrap() >= 5);

    gate.add_permits(2);
    let done = t.wait_for_terminal(LOGIN, first["status_url"].as_str().unwrap()).await;
    assert_eq!(done["status"], "completed");
    t.wait_for_idle(LOGIN).await;

    let (status, _) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    gate.add_permits(1);
}

#[tokio::test]
async fn test_failed_job_refunds_tokens() {
    let t = setup_with(TomlConfig::default(), FakeChart::open(), FakeLlm::failing()).await;
    t.grant(LOGIN, "welcome", 30).await;

    let (status, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["current_tokens"], 20);

    let done = t.wait_for_terminal(LOGIN, body["status_url"].as_str().unwrap()).await;
    assert_eq!(done["status"], "failed");
    assert!(done["error_message"].as_str().unwrap().contains("llm-api"));
    assert!(done["error_code"].is_string());
    assert_eq!(done["token_refund"]["attempted"], true);

    t.wait_for_idle(LOGIN).await;
    assert_eq!(t.current_tokens(LOGIN).await, 30);

    let (_, summary) = t.call("GET", "/api/tokens/summary", Some(LOGIN), None).await;
    assert_eq!(summary["sync_ok"], true);
}

#[tokio::test]
async fn test_status_of_other_users_result_is_404() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    let (_, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    let status_url = body["status_url"].as_str().unwrap().to_string();
    t.wait_for_terminal(LOGIN, &status_url).await;

    let (status, body) = t.call("GET", &status_url, Some(OTHER_LOGIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["resp_message"], "RESULT_NOT_FOUND");
}

#[tokio::test]
async fn test_current_status_without_jobs() {
    let t = setup_app().await;
    let (status, body) = t.call("GET", "/api/analysis/current-status", Some(LOGIN), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_job"], false);
    assert_eq!(body["is_active"], false);
}

// =============================================================================
// Fortune requests
// =============================================================================

#[tokio::test]
async fn test_unknown_fortune_feature_is_404_before_login() {
    let t = setup_app().await;
    let (status, body) = t
        .call("POST", "/api/fortune/tarot/request", None, Some(json!({})))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["resp_message"], "FEATURE_NOT_FOUND");
}

#[tokio::test]
async fn test_fortune_ignores_trial_mode() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 5).await;

    let body = json!({
        "person": person_json("Lee"),
        "focus_area": "career",
        "analysis_mode": "TRIAL"
    });
    let (status, rejected) = t
        .call("POST", "/api/fortune/today/request", Some(LOGIN), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(rejected["required_tokens"], 10);

    t.grant(LOGIN, "spring", 10).await;
    let (status, accepted) = t
        .call("POST", "/api/fortune/today/request", Some(LOGIN), Some(body))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", accepted);
    assert_eq!(accepted["analysis_mode"], "PREMIUM");
    assert_eq!(accepted["consumed_tokens"], 10);
    assert_eq!(accepted["current_tokens"], 5);

    let done = t.wait_for_terminal(LOGIN, accepted["status_url"].as_str().unwrap()).await;
    assert_eq!(done["status"], "completed");
}

#[tokio::test]
async fn test_compatibility_requires_partner() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    let (status, body) = t
        .call(
            "POST",
            "/api/fortune/compatibility/request",
            Some(LOGIN),
            Some(json!({ "person": person_json("Lee"), "relationship": "lover" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "INVALID_INPUT");
    assert_eq!(body["missing_fields"], json!(["partner"]));
}

#[tokio::test]
async fn test_compatibility_request_completes() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    let (status, body) = t
        .call(
            "POST",
            "/api/fortune/compatibility/request",
            Some(LOGIN),
            Some(json!({
                "person": person_json("Lee"),
                "partner": person_json("Park"),
                "relationship": "lover"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    assert_eq!(body["service_type"], "fortune");
    assert_eq!(body["feature"], "compatibility");

    let status_url = body["status_url"].as_str().unwrap().to_string();
    assert!(status_url.starts_with("/api/fortune/compatibility/request/"));

    let done = t.wait_for_terminal(LOGIN, &status_url).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(t.chart.calls.load(Ordering::SeqCst), 2);
    assert_eq!(t.llm.calls.load(Ordering::SeqCst), 1);

    // Polling through another feature's URL is a 404
    let wrong = status_url.replace("/compatibility/", "/today/");
    let (status, _) = t.call("GET", &wrong, Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// History and sharing
// =============================================================================

#[tokio::test]
async fn test_history_and_share() {
    let t = setup_app().await;
    t.grant(LOGIN, "welcome", 30).await;

    let (_, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    let result_id = body["result_id"].as_str().unwrap().to_string();
    t.wait_for_terminal(LOGIN, body["status_url"].as_str().unwrap()).await;

    let (status, history) = t.call("GET", "/api/history?limit=500", Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["limit"], 100);
    assert_eq!(history["count"], 1);
    assert_eq!(history["items"][0]["result_id"], result_id.as_str());
    assert_eq!(history["items"][0]["shared"], false);

    let detail_uri = format!("/api/history/{}", result_id);
    let (status, detail) = t.call("GET", &detail_uri, Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["result"]["body"], "Wood is strong this year.");
    assert_eq!(detail["token_usage"]["amount"], 10);

    let (status, _) = t.call("GET", &detail_uri, Some(OTHER_LOGIN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Share
    let share_uri = format!("/api/saju/request/{}/share", result_id);
    let (status, share) = t.call("POST", &share_uri, Some(LOGIN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(share["resp_message"], "SHARE_ENABLED");
    let token = share["share_token"].as_str().unwrap().to_string();
    assert!(share["share_url"].as_str().unwrap().ends_with(&format!("/saju/shared/{}", token)));

    // Sharing again keeps the token
    let (_, again) = t.call("POST", &share_uri, Some(LOGIN), None).await;
    assert_eq!(again["share_token"], token.as_str());

    let (status, public) = t.call("GET", &format!("/api/shared/{}", token), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(public["summary"], "A steady year");
    assert_eq!(public["name"], "Kim Minji");

    let response = t
        .send(test_request("GET", &format!("/saju/shared/{}", token), None, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = extract_text(response.into_body()).await;
    assert!(page.contains("Wood is strong this year."));

    let (status, body) = t.call("GET", "/api/shared/not-a-token", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["resp_message"], "SHARED_RESULT_NOT_FOUND");
}

#[tokio::test]
async fn test_share_of_running_result_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let t = setup_with(TomlConfig::default(), FakeChart::gated(gate.clone()), FakeLlm::answering()).await;
    t.grant(LOGIN, "welcome", 30).await;

    let (_, body) = t.call("POST", "/api/saju/request", Some(LOGIN), Some(saju_body())).await;
    let result_id = body["result_id"].as_str().unwrap().to_string();

    let (status, body) = t
        .call("POST", &format!("/api/saju/request/{}/share", result_id), Some(LOGIN), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resp_message"], "RESULT_NOT_COMPLETED");

    gate.add_permits(1);
}
