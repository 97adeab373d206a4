//! Saju analysis service (saju-api) - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use saju_common::config::TomlConfig;
use saju_api::services::{AnthropicClient, HttpChartProvider, HttpPaymentGateway, PromptCache};
use saju_api::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for saju-api
#[derive(Parser, Debug)]
#[command(name = "saju-api")]
#[command(about = "Saju analysis service")]
#[command(version)]
struct Args {
    /// Configuration file (overrides SAJU_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides [server].port)
    #[arg(short, long, env = "SAJU_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides [server].bind)
    #[arg(short, long, env = "SAJU_BIND")]
    bind: Option<String>,

    /// SQLite database file (overrides [database].path)
    #[arg(short, long, env = "SAJU_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "saju_api=info,saju_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting saju-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(database) = args.database {
        config.database.path = Some(database);
    }

    if config.session.secret.is_empty() {
        warn!("Session secret is empty: login headers are trusted without signature checks");
    }
    if config.analysis.llm_sandbox {
        warn!("LLM sandbox mode is on: reports use a minimal prompt");
    }

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let pool = saju_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    let chart = HttpChartProvider::new(&config.chart_api).context("Failed to create chart API client")?;
    let llm = AnthropicClient::new(&config.llm).context("Failed to create LLM client")?;
    let payments = HttpPaymentGateway::new(&config.payments).context("Failed to create payment gateway")?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.server.bind, config.server.port))?;

    let drain_secs = config.analysis.shutdown_drain_secs;
    let state = AppState::new(pool, config, Arc::new(chart), Arc::new(llm), Arc::new(payments));
    let jobs = state.jobs.clone();
    spawn_reload_handler(state.prompts.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("saju-api listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    jobs.close();
    if !jobs.is_empty() {
        info!("Waiting up to {}s for {} analysis job(s)", drain_secs, jobs.len());
        if tokio::time::timeout(Duration::from_secs(drain_secs), jobs.wait()).await.is_err() {
            warn!(
                "{} analysis job(s) still running at exit; their slots recover once stale",
                jobs.len()
            );
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// SIGHUP drops cached prompt templates so edited rows apply immediately
#[cfg(unix)]
fn spawn_reload_handler(prompts: Arc<PromptCache>) {
    let mut stream = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };
    tokio::spawn(async move {
        while stream.recv().await.is_some() {
            let dropped = prompts.clear().await;
            info!("Received SIGHUP, cleared {} cached prompt template(s)", dropped);
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(_prompts: Arc<PromptCache>) {}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
