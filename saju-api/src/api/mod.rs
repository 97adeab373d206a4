//! HTTP API handlers for saju-api

pub mod accept;
pub mod analysis;
pub mod fortune;
pub mod health;
pub mod history;
pub mod payments;
pub mod saju;
pub mod shared;
pub mod status;
pub mod tokens;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub use health::health_routes;

/// Saju/fortune request, status and sharing endpoints
pub fn analysis_routes() -> Router<AppState> {
    Router::new()
        .route("/api/saju/request", post(saju::request_saju))
        .route("/api/saju/request/:result_id/status", get(saju::saju_status))
        .route("/api/saju/request/:result_id/share", post(saju::share_result))
        .route("/api/saju/request/:result_id/save-target", post(saju::save_target_from_result))
        .route("/api/saju/target/save", post(saju::save_target))
        .route("/api/fortune/:feature/request", post(fortune::request_fortune))
        .route(
            "/api/fortune/:feature/request/:result_id/status",
            get(fortune::fortune_status),
        )
        .route("/api/analysis/current-status", get(analysis::current_status))
}

pub fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/history", get(history::list_history))
        .route("/api/history/:result_id", get(history::history_detail))
}

pub fn token_routes() -> Router<AppState> {
    Router::new()
        .route("/api/tokens/summary", get(tokens::token_summary))
        .route("/api/tokens/grant-event", post(tokens::grant_event))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/payments/request", post(payments::request_payment))
        .route("/api/payments/confirm", post(payments::confirm_payment))
        .route("/api/payments/fail", post(payments::fail_payment))
        .route("/api/payments/cancel", post(payments::cancel_payment))
        .route("/api/payments/callback/:provider", get(payments::success_callback))
        .route("/api/payments/callback/:provider/cancel", get(payments::cancel_callback))
        .route("/api/payments/callback/:provider/fail", get(payments::fail_callback))
}

pub fn shared_routes() -> Router<AppState> {
    Router::new()
        .route("/api/shared/:token", get(shared::shared_result_json))
        .route("/saju/shared/:token", get(shared::shared_result_page))
}
