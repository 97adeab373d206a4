//! Shared helpers for saju-api integration tests
//!
//! Every test gets its own in-memory database and in-process fakes for the
//! chart, LLM and payment providers, so no network access is needed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use saju_api::db::slots;
use saju_api::models::PaymentRecord;
use saju_api::services::payment_gateway::{ApprovalParams, ApprovalResult, ReadyRequest, ReadyResponse};
use saju_api::services::{
    ChartProvider, ChartQuery, GenerationRequest, PaymentGateway, ProviderError, TextGenerator,
};
use saju_api::{build_router, AppState};
use saju_common::config::TomlConfig;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tower::util::ServiceExt; // for `oneshot` method

pub const LOGIN: &str = "user1";
pub const OTHER_LOGIN: &str = "user2";

/// What the fake chart API answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartReply {
    Chart,
    /// HTTP 503 from the provider
    Unavailable,
    /// 200 with no `data.saju`
    Malformed,
}

/// Chart provider that waits for a permit when gated
pub struct FakeChart {
    gate: Option<Arc<Semaphore>>,
    reply: ChartReply,
    pub calls: AtomicUsize,
}

impl FakeChart {
    pub fn open() -> Self {
        Self { gate: None, reply: ChartReply::Chart, calls: AtomicUsize::new(0) }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self { gate: Some(gate), reply: ChartReply::Chart, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { gate: None, reply: ChartReply::Unavailable, calls: AtomicUsize::new(0) }
    }

    pub fn malformed() -> Self {
        Self { gate: None, reply: ChartReply::Malformed, calls: AtomicUsize::new(0) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChartProvider for FakeChart {
    async fn fetch_chart(&self, query: &ChartQuery) -> Result<Value, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ProviderError::parse("chart-api", e.to_string()))?;
            permit.forget();
        }
        match self.reply {
            ChartReply::Chart => Ok(json!({
                "data": {
                    "saju": { "birth": query.birth, "day_pillar": "gap-ja" },
                    "daewoon": [{ "age": 3, "pillar": "eul-chuk" }]
                }
            })),
            ChartReply::Unavailable => Err(ProviderError::Api {
                provider: "chart-api".to_string(),
                status: 503,
                body: "maintenance".to_string(),
            }),
            ChartReply::Malformed => Ok(json!({ "data": { "message": "no chart" } })),
        }
    }
}

/// LLM that answers with a fixed report, or fails every call
pub struct FakeLlm {
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn answering() -> Self {
        Self { fail: false, calls: AtomicUsize::new(0) }
    }

    pub fn failing() -> Self {
        Self { fail: true, calls: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl TextGenerator for FakeLlm {
    fn model(&self) -> &str {
        "fake-model"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Api {
                provider: "llm-api".to_string(),
                status: 529,
                body: "overloaded".to_string(),
            });
        }
        Ok("```json\n{\"summary\": \"A steady year\", \"body\": \"Wood is strong this year.\"}\n```".to_string())
    }
}

/// Gateway that approves anything except `pg_token=bad`
pub struct FakeGateway;

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, ProviderError> {
        Ok(ReadyResponse {
            provider_txn_id: format!("T{}", request.payment_id),
            redirect_url: format!("https://pay.example.com/checkout/{}", request.payment_id),
            raw: json!({ "tid": format!("T{}", request.payment_id) }),
        })
    }

    async fn approve(&self, payment: &PaymentRecord, params: &ApprovalParams) -> Result<ApprovalResult, ProviderError> {
        if params.pg_token == "bad" {
            return Err(ProviderError::Api {
                provider: "kakaopay".to_string(),
                status: 400,
                body: "invalid pg_token".to_string(),
            });
        }
        Ok(ApprovalResult {
            provider_txn_id: payment.provider_txn_id.clone(),
            approved_payload: json!({ "approved": true }),
        })
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub chart: Arc<FakeChart>,
    pub llm: Arc<FakeLlm>,
}

pub async fn setup_with(config: TomlConfig, chart: FakeChart, llm: FakeLlm) -> TestApp {
    let db = saju_common::db::init_memory_database()
        .await
        .expect("Should create in-memory database");
    let chart = Arc::new(chart);
    let llm = Arc::new(llm);
    let state = AppState::new(db, config, chart.clone(), llm.clone(), Arc::new(FakeGateway));
    TestApp {
        app: build_router(state.clone()),
        state,
        chart,
        llm,
    }
}

/// Session signing disabled, provider fakes that succeed
pub async fn setup_app() -> TestApp {
    setup_with(TomlConfig::default(), FakeChart::open(), FakeLlm::answering()).await
}

/// Request with a login header and optional JSON body
pub fn test_request(method: &str, uri: &str, login: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(login) = login {
        builder = builder.header("x-login-id", login).header("x-user-name", "Tester");
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

pub async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

pub async fn extract_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8(bytes.to_vec()).expect("Should be UTF-8")
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Send and decode: (status, json body)
    pub async fn call(&self, method: &str, uri: &str, login: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.send(test_request(method, uri, login, body)).await;
        let status = response.status();
        (status, extract_json(response.into_body()).await)
    }

    pub async fn grant(&self, login: &str, event_code: &str, amount: i64) -> Value {
        let (status, body) = self
            .call(
                "POST",
                "/api/tokens/grant-event",
                Some(login),
                Some(json!({ "amount": amount, "event_code": event_code })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "grant failed: {}", body);
        body
    }

    pub async fn current_tokens(&self, login: &str) -> i64 {
        let (_, body) = self.call("GET", "/api/tokens/summary", Some(login), None).await;
        body["current_tokens"].as_i64().expect("current_tokens")
    }

    /// Poll a status URL until the record is completed or failed
    pub async fn wait_for_terminal(&self, login: &str, status_url: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self.call("GET", status_url, Some(login), None).await;
            assert_eq!(status, StatusCode::OK, "status poll failed: {}", body);
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Job at {} did not finish", status_url);
    }

    /// Poll until the login's slot row is gone
    ///
    /// The record turns terminal before the job releases its slot, so this
    /// reads the slot table rather than the record status.
    pub async fn wait_for_idle(&self, login: &str) {
        for _ in 0..200 {
            let active = slots::get_active(&self.state.db, login, self.state.slot_stale_ms())
                .await
                .expect("Should read slot");
            if active.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Slot for {} was never released", login);
    }

    /// Relative ids written to the external API log, oldest first
    pub async fn logged_relative_ids(&self, service_code: &str) -> Vec<i64> {
        sqlx::query_scalar::<_, i64>("SELECT relative_id FROM api_request_log WHERE service_code = ? ORDER BY req_id")
            .bind(service_code)
            .fetch_all(&self.state.db)
            .await
            .expect("Should read api log")
    }
}

pub fn saju_body() -> Value {
    json!({
        "name": "Kim Minji",
        "gender": "female",
        "birth_year": 1990,
        "birth_month": "5",
        "birth_day": 17,
        "birth_time": "10:30",
        "target": "self",
        "counseling_type": "balanced"
    })
}

pub fn person_json(name: &str) -> Value {
    json!({
        "name": name,
        "gender": "male",
        "birth_year": "1988",
        "birth_month": "11",
        "birth_day": "2",
        "birth_time": "23:10",
        "target": "new"
    })
}
