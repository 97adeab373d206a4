//! saju-api library - Saju analysis service
//!
//! Accepts saju and fortune analysis requests, runs them as background jobs
//! against the birth-chart and LLM providers, and serves status, history,
//! sharing, the token wallet and token purchases.

use std::sync::Arc;

use axum::Router;
use saju_common::config::TomlConfig;
use sqlx::SqlitePool;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod services;
pub mod session;

use services::{ChartProvider, PaymentGateway, PromptCache, TextGenerator};

/// Application state shared across HTTP handlers and background jobs
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Loaded configuration (immutable after startup)
    pub config: Arc<TomlConfig>,
    pub chart: Arc<dyn ChartProvider>,
    pub llm: Arc<dyn TextGenerator>,
    pub payments: Arc<dyn PaymentGateway>,
    /// Active prompt template cache
    pub prompts: Arc<PromptCache>,
    /// Background analysis jobs, drained on shutdown
    pub jobs: TaskTracker,
    /// Unix ms at startup, reported by /health
    pub startup_time: i64,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        config: TomlConfig,
        chart: Arc<dyn ChartProvider>,
        llm: Arc<dyn TextGenerator>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            chart,
            llm,
            payments,
            prompts: Arc::new(PromptCache::new()),
            jobs: TaskTracker::new(),
            startup_time: saju_common::time::now_millis(),
        }
    }

    /// Slot staleness threshold in milliseconds
    pub fn slot_stale_ms(&self) -> i64 {
        self.config.slot_stale_ms()
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::analysis_routes())
        .merge(api::history_routes())
        .merge(api::token_routes())
        .merge(api::payment_routes())
        .merge(api::shared_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
