//! Background analysis jobs
//!
//! Handlers accept a request, debit tokens and create a queued record, then
//! hand the work to [`spawn`]. The runner owns the rest of the lifecycle:
//!
//! 1. keep the slot alive and mark the record `processing`
//! 2. run the service work, advancing `step` as it goes
//! 3. write `completed`, or refund and write `failed`
//! 4. release the slot, whatever happened in 3
//!
//! Jobs run on the state's `TaskTracker`. No request waits on them and a
//! dropped client connection does not stop them; shutdown closes the tracker
//! and waits for the running jobs to finish.

pub mod fortune;
pub mod saju;

use saju_common::time::now_millis;
use serde_json::{json, Value};
use thiserror::Error;

use crate::db::{api_log, profiles, results, slots, wallet};
use crate::models::{
    AnalysisOutput, AnalysisStatus, InputError, PersonProfile, RecordPatch, ServiceType,
    TargetType, TokenRefundInfo, TokenUsage,
};
use crate::services::chart_client::chart_shape;
use crate::services::{ChartQuery, GenerationRequest, ProviderError, CHART_PROVIDER};
use crate::AppState;

/// Ledger reference type of a job's debit
pub fn reference_type(service: ServiceType) -> &'static str {
    match service {
        ServiceType::Saju => "SAJU_ANALYSIS",
        ServiceType::Fortune => "FORTUNE_ANALYSIS",
    }
}

/// Step labels written to the record
pub mod steps {
    pub const STARTED: &str = "STARTED";
    pub const LOOKUP_CACHE: &str = "LOOKUP_CACHE";
    pub const TARGET_SYNC: &str = "TARGET_SYNC";
    pub const CACHE_HIT: &str = "CACHE_HIT";
    pub const CHART_COMPUTE: &str = "CHART_COMPUTE";
    pub const GENERATE: &str = "GENERATE";
    pub const COMPLETED: &str = "COMPLETED";
    pub const FAILED: &str = "FAILED";
}

/// Job failure; the display text is stored as the record's `error_message`
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Store(#[from] saju_common::Error),
}

/// Successful job output
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub result: AnalysisOutput,
    pub notice: Option<String>,
}

/// An accepted job, ready to run
#[derive(Debug, Clone)]
pub struct AcceptedJob {
    pub result_id: String,
    pub login_id: String,
    pub service_type: ServiceType,
    pub token_usage: TokenUsage,
}

/// Service-specific work
#[derive(Debug, Clone)]
pub enum JobWork {
    Saju(saju::SajuJob),
    Fortune(fortune::FortuneJob),
}

/// Step reporter handed to the work functions
pub struct Progress<'a> {
    state: &'a AppState,
    login_id: &'a str,
    result_id: &'a str,
}

impl<'a> Progress<'a> {
    pub fn new(state: &'a AppState, login_id: &'a str, result_id: &'a str) -> Self {
        Self {
            state,
            login_id,
            result_id,
        }
    }

    /// Record a step boundary and refresh the slot; failures are logged only
    pub async fn step(&self, step: &str, message: &str) {
        if let Err(e) = slots::keep_alive(&self.state.db, self.login_id, self.result_id).await {
            tracing::warn!(result_id = %self.result_id, error = %e, "Slot keep-alive failed");
        }
        if let Err(e) = results::update(&self.state.db, self.result_id, RecordPatch::step(step, message)).await {
            tracing::warn!(result_id = %self.result_id, step, error = %e, "Failed to record job step");
        }
    }
}

/// Run `work` in the background on the state's job tracker
pub fn spawn(state: AppState, job: AcceptedJob, work: JobWork) {
    let tracker = state.jobs.clone();
    tracker.spawn(async move {
        run(&state, &job, work).await;
    });
}

/// Full job lifecycle; never returns an error, every outcome lands in the record
pub async fn run(state: &AppState, job: &AcceptedJob, work: JobWork) {
    let started = now_millis();
    tracing::info!(
        result_id = %job.result_id,
        login_id = %job.login_id,
        service = job.service_type.as_str(),
        "Analysis job started"
    );

    let outcome = execute(state, job, work).await;

    let finished = match outcome {
        Ok(output) => complete(state, job, output).await,
        Err(e) => Err(e.to_string()),
    };

    if let Err(error_message) = finished {
        fail(state, job, &error_message).await;
    }

    match slots::release(&state.db, &job.login_id, Some(&job.result_id)).await {
        Ok(_) => {}
        Err(e) => tracing::error!(result_id = %job.result_id, error = %e, "Failed to release analysis slot"),
    }

    tracing::info!(
        result_id = %job.result_id,
        elapsed_ms = now_millis() - started,
        "Analysis job finished"
    );
}

async fn execute(state: &AppState, job: &AcceptedJob, work: JobWork) -> Result<JobOutput, JobError> {
    if let Err(e) = slots::keep_alive(&state.db, &job.login_id, &job.result_id).await {
        tracing::warn!(result_id = %job.result_id, error = %e, "Slot keep-alive failed");
    }
    results::update(
        &state.db,
        &job.result_id,
        RecordPatch::step(steps::STARTED, "Starting the analysis.").with_status(AnalysisStatus::Processing),
    )
    .await?;

    let progress = Progress::new(state, &job.login_id, &job.result_id);
    match work {
        JobWork::Saju(work) => saju::run(state, &progress, &job.login_id, &work).await,
        JobWork::Fortune(work) => fortune::run(state, &progress, &job.login_id, &work).await,
    }
}

async fn complete(state: &AppState, job: &AcceptedJob, output: JobOutput) -> Result<(), String> {
    let mut patch = RecordPatch::step(steps::COMPLETED, "The analysis is complete.")
        .with_status(AnalysisStatus::Completed)
        .with_result(output.result);
    if let Some(notice) = output.notice {
        patch = patch.with_notice(notice);
    }

    match results::update(&state.db, &job.result_id, patch).await {
        Ok(_) => {
            tracing::info!(result_id = %job.result_id, "Analysis completed");
            Ok(())
        }
        Err(e) => {
            tracing::error!(result_id = %job.result_id, error = %e, "Failed to store completed result");
            Err(format!("Failed to store the result: {}", e))
        }
    }
}

async fn fail(state: &AppState, job: &AcceptedJob, error_message: &str) {
    tracing::warn!(result_id = %job.result_id, error = %error_message, "Analysis failed");

    let refund = refund_tokens(state, job).await;
    let patch = RecordPatch::step(steps::FAILED, "The analysis failed.")
        .with_status(AnalysisStatus::Failed)
        .with_error(error_message)
        .with_refund(refund);

    if let Err(e) = results::update(&state.db, &job.result_id, patch).await {
        tracing::error!(result_id = %job.result_id, error = %e, "Failed to store job failure");
    }
}

/// Return the job's debit; repeated calls never credit twice
async fn refund_tokens(state: &AppState, job: &AcceptedJob) -> TokenRefundInfo {
    let reference_id = job.token_usage.reference_id.clone();
    let memo = format!("Refund for failed analysis {}", job.result_id);

    let message = match wallet::refund(
        &state.db,
        &job.login_id,
        reference_type(job.service_type),
        &reference_id,
        &memo,
    )
    .await
    {
        Ok(wallet::RefundOutcome::Refunded { amount, current_tokens }) => {
            tracing::info!(result_id = %job.result_id, amount, current_tokens, "Tokens refunded");
            format!("Refunded {} tokens", amount)
        }
        Ok(wallet::RefundOutcome::AlreadyRefunded) => "Already refunded".to_string(),
        Ok(wallet::RefundOutcome::NoMatchingDebit) => "No debit to refund".to_string(),
        Err(e) => {
            tracing::error!(result_id = %job.result_id, error = %e, "Token refund failed");
            format!("Token refund failed: {}", e)
        }
    };

    TokenRefundInfo {
        attempted: true,
        reference_id,
        message,
    }
}

/// A person's chart and whether the stored profile was rewritten on the way
#[derive(Debug, Clone)]
pub struct ResolvedChart {
    pub chart: Value,
    pub target_synced: bool,
    /// Target actually used; a foreign relative comes back as `New`
    pub target: TargetType,
}

/// Relative id for the request log, 0 when the target is not a relative
pub fn relative_id_of(target: TargetType) -> i64 {
    match target {
        TargetType::Relative(id) => id,
        _ => 0,
    }
}

/// Chart for `profile`: stored-target sync, then cache, then the chart API
pub async fn resolve_chart(
    state: &AppState,
    progress: &Progress<'_>,
    login_id: &str,
    profile: &PersonProfile,
) -> Result<ResolvedChart, JobError> {
    progress.step(steps::LOOKUP_CACHE, "Checking for a saved chart.").await;

    let snapshot = profiles::load_target_snapshot(&state.db, login_id, profile.target).await?;

    // A relative id that is not the login's own is treated as ad-hoc input
    let target = match (profile.target, &snapshot) {
        (TargetType::Relative(_), None) => TargetType::New,
        (target, _) => target,
    };

    let needs_sync = match (target, &snapshot) {
        (TargetType::New, _) => false,
        (TargetType::SelfProfile, None) => true,
        (_, Some(stored)) => stored.differs_from(profile),
        (TargetType::Relative(_), None) => false,
    };
    let target_synced = needs_sync && snapshot.is_some();

    if needs_sync {
        progress.step(steps::TARGET_SYNC, "Updating saved birth information.").await;
        match target {
            TargetType::SelfProfile => {
                profiles::save_user_birth(&state.db, login_id, profile).await?;
            }
            TargetType::Relative(id) => {
                profiles::update_relative_birth(&state.db, login_id, id, profile).await?;
            }
            TargetType::New => {}
        }
        profiles::invalidate_cached_chart(&state.db, login_id, target).await?;
        tracing::info!(login_id, target = target.as_str(), "Stored birth profile synchronized");
    } else if let Some(chart) = profiles::load_cached_chart(&state.db, login_id, target).await? {
        progress.step(steps::CACHE_HIT, "Using the saved chart.").await;
        return Ok(ResolvedChart {
            chart,
            target_synced,
            target,
        });
    }

    progress.step(steps::CHART_COMPUTE, "Calculating the birth chart.").await;

    let query = ChartQuery::for_profile(profile);
    let request_json = json!({ "birth": query.birth, "gender": query.gender.api_value() });
    let log_id = log_begin(state, login_id, relative_id_of(target), "CHART", &request_json).await;

    let fetched = state.chart.fetch_chart(&query).await.and_then(|chart| {
        let (has_saju, has_daewoon) = chart_shape(&chart);
        if !has_saju {
            return Err(ProviderError::parse(CHART_PROVIDER, "response has no data.saju"));
        }
        if !has_daewoon {
            tracing::warn!(login_id, "Chart response has no data.daewoon");
        }
        Ok(chart)
    });
    let chart = match fetched {
        Ok(chart) => {
            log_finish(state, log_id, Ok(&chart.to_string())).await;
            chart
        }
        Err(e) => {
            log_finish(state, log_id, Err(&e.to_string())).await;
            return Err(e.into());
        }
    };

    if let Err(e) = profiles::save_cached_chart(&state.db, login_id, target, &chart).await {
        tracing::warn!(login_id, error = %e, "Failed to cache chart");
    }

    Ok(ResolvedChart {
        chart,
        target_synced,
        target,
    })
}

/// LLM call wrapped in a request-log row
pub async fn generate_logged(
    state: &AppState,
    login_id: &str,
    relative_id: i64,
    service_code: &str,
    request: &GenerationRequest,
) -> Result<String, JobError> {
    let request_json = json!({
        "model": state.llm.model(),
        "max_tokens": request.max_tokens,
        "system": request.system,
        "user": request.user,
    });
    let log_id = log_begin(state, login_id, relative_id, service_code, &request_json).await;

    match state.llm.generate(request).await {
        Ok(text) => {
            log_finish(state, log_id, Ok(&json!({ "text": text }).to_string())).await;
            Ok(text)
        }
        Err(e) => {
            log_finish(state, log_id, Err(&e.to_string())).await;
            Err(e.into())
        }
    }
}

async fn log_begin(state: &AppState, login_id: &str, relative_id: i64, service_code: &str, request: &Value) -> Option<i64> {
    match api_log::begin(&state.db, login_id, relative_id, service_code, &request.to_string()).await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(service_code, error = %e, "Failed to open API request log");
            None
        }
    }
}

async fn log_finish(state: &AppState, log_id: Option<i64>, outcome: Result<&str, &str>) {
    let Some(log_id) = log_id else {
        return;
    };
    let (status, response, error) = match outcome {
        Ok(response) => (api_log::STATUS_SUCCESS, response, ""),
        Err(error) => (api_log::STATUS_FAILED, "", error),
    };
    if let Err(e) = api_log::finish(&state.db, log_id, status, response, error).await {
        tracing::warn!(log_id, error = %e, "Failed to close API request log");
    }
}

/// Notice shown when a stored profile was rewritten from the request
pub fn target_sync_notice(target: TargetType) -> &'static str {
    match target {
        TargetType::Relative(_) => {
            "The saved relative's birth information was updated to match this request."
        }
        _ => "Your saved birth information was updated to match this request.",
    }
}
