//! Saju report generation

use chrono::Utc;

use super::{generate_logged, relative_id_of, resolve_chart, steps, target_sync_notice, JobError, JobOutput, Progress};
use crate::models::request::life_stage;
use crate::models::{AnalysisMode, AnalysisOutput, CounselingTone, PersonProfile};
use crate::services::prompt_builder::{self, SajuFacts};
use crate::services::prompt_cache::{SERVICE_SAJU, SERVICE_SAJU_TONE};
use crate::services::GenerationRequest;
use crate::AppState;

/// Tokens allowed for the sandbox greeting
const SANDBOX_MAX_TOKENS: u32 = 64;

const SANDBOX_PROMPT: &str = "Greet the customer in one short sentence as a friendly saju counselor.";

#[derive(Debug, Clone)]
pub struct SajuJob {
    pub profile: PersonProfile,
    pub tone: CounselingTone,
    pub mode: AnalysisMode,
}

fn birth_info(profile: &PersonProfile) -> String {
    match profile.birth.time {
        Some(time) => format!("{} {}", profile.birth.display(), time.format("%H:%M")),
        None => format!("{} (time unknown)", profile.birth.display()),
    }
}

async fn build_request(state: &AppState, job: &SajuJob, chart: &serde_json::Value) -> GenerationRequest {
    if state.config.analysis.llm_sandbox {
        return GenerationRequest {
            system: None,
            user: SANDBOX_PROMPT.to_string(),
            max_tokens: SANDBOX_MAX_TOKENS,
        };
    }

    let base = state.prompts.get(&state.db, SERVICE_SAJU, "", "").await;
    let tone = state.prompts.get(&state.db, SERVICE_SAJU_TONE, "", job.tone.key()).await;

    let base_text = base
        .as_ref()
        .map(|t| t.system_prompt.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(prompt_builder::BASE_SAJU_PROMPT);
    let tone_text = tone
        .as_ref()
        .map(|t| t.system_prompt.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| prompt_builder::tone_prompt(job.tone));
    let guide = base.as_ref().map(|t| t.user_prompt_guide.as_str());

    let age = job.profile.birth.age_on(Utc::now().date_naive());
    let facts = SajuFacts {
        name: &job.profile.name,
        gender: job.profile.gender,
        birth_date: job.profile.birth.date_string(),
        birth_time: job.profile.birth.time.map(|t| t.format("%H:%M").to_string()),
        age,
        life_stage: life_stage(age),
        tone_label: job.tone.label(),
    };

    GenerationRequest {
        system: Some(prompt_builder::saju_system_prompt(base_text, tone_text)),
        user: prompt_builder::saju_user_prompt(&facts, chart, guide),
        max_tokens: state.config.llm.max_tokens,
    }
}

pub async fn run(
    state: &AppState,
    progress: &Progress<'_>,
    login_id: &str,
    job: &SajuJob,
) -> Result<JobOutput, JobError> {
    let resolved = resolve_chart(state, progress, login_id, &job.profile).await?;

    progress.step(steps::GENERATE, "Writing your report.").await;

    let request = build_request(state, job, &resolved.chart).await;
    let relative_id = relative_id_of(resolved.target);
    let text = generate_logged(state, login_id, relative_id, "SAJU", &request).await?;

    let fallback = format!("{}'s saju summary", job.profile.name);
    let answer = prompt_builder::parse_structured_answer(&text, &fallback);

    tracing::debug!(
        login_id,
        mode = job.mode.as_str(),
        tone = job.tone.key(),
        body_chars = answer.body.chars().count(),
        "Saju report generated"
    );

    Ok(JobOutput {
        result: AnalysisOutput {
            summary: answer.summary,
            body: answer.body,
            name: Some(job.profile.name.clone()),
            birth_info: Some(birth_info(&job.profile)),
        },
        notice: resolved
            .target_synced
            .then(|| target_sync_notice(job.profile.target).to_string()),
    })
}
