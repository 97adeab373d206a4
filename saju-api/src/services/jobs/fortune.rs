//! Fortune features (compatibility, today, flow, naming, date selection)

use serde_json::{Map, Value};

use super::{generate_logged, relative_id_of, resolve_chart, steps, target_sync_notice, JobError, JobOutput, Progress};
use crate::models::{AnalysisOutput, FortuneFeature, PersonProfile, TargetType};
use crate::services::prompt_builder;
use crate::services::prompt_cache::SERVICE_FORTUNE;
use crate::services::GenerationRequest;
use crate::AppState;

/// Fortune answers are short; the configured limit is capped at this
const FORTUNE_MAX_TOKENS: u32 = 2048;
const SANDBOX_MAX_TOKENS: u32 = 64;

#[derive(Debug, Clone)]
pub struct FortuneJob {
    pub feature: FortuneFeature,
    /// Validated persons, the primary person first
    pub persons: Vec<PersonProfile>,
    /// Submitted request as JSON, passed to the prompt
    pub input: Value,
}

/// Chart keys in the prompt, by position
const PERSON_KEYS: [&str; 2] = ["person", "partner"];

async fn build_request(state: &AppState, job: &FortuneJob, charts: &Value) -> GenerationRequest {
    let label = job.feature.label();
    if state.config.analysis.llm_sandbox {
        return GenerationRequest {
            system: None,
            user: prompt_builder::sandbox_prompt(label),
            max_tokens: SANDBOX_MAX_TOKENS,
        };
    }

    let template = state
        .prompts
        .get(&state.db, SERVICE_FORTUNE, job.feature.key(), "")
        .await;
    let feature_text = template
        .as_ref()
        .map(|t| t.system_prompt.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| prompt_builder::feature_prompt(job.feature));

    GenerationRequest {
        system: Some(prompt_builder::fortune_system_prompt(
            prompt_builder::BASE_FORTUNE_PROMPT,
            feature_text,
            &job.input,
        )),
        user: prompt_builder::fortune_user_prompt(charts, &job.input),
        max_tokens: state.config.llm.max_tokens.min(FORTUNE_MAX_TOKENS),
    }
}

pub async fn run(
    state: &AppState,
    progress: &Progress<'_>,
    login_id: &str,
    job: &FortuneJob,
) -> Result<JobOutput, JobError> {
    let mut charts = Map::new();
    let mut synced_target: Option<TargetType> = None;
    let mut primary_target: Option<TargetType> = None;

    for (key, person) in PERSON_KEYS.iter().zip(&job.persons) {
        let resolved = resolve_chart(state, progress, login_id, person).await?;
        if resolved.target_synced && synced_target.is_none() {
            synced_target = Some(resolved.target);
        }
        primary_target.get_or_insert(resolved.target);
        charts.insert(key.to_string(), resolved.chart);
    }

    progress.step(steps::GENERATE, "Writing your fortune.").await;

    let charts = Value::Object(charts);
    let request = build_request(state, job, &charts).await;
    let relative_id = primary_target.map(relative_id_of).unwrap_or(0);
    let service_code = format!("FORTUNE_{}", job.feature.key().to_ascii_uppercase().replace('-', "_"));
    let text = generate_logged(state, login_id, relative_id, &service_code, &request).await?;

    let label = job.feature.label();
    let body = match text.trim() {
        "" => format!("{} result", label),
        trimmed => trimmed.to_string(),
    };

    Ok(JobOutput {
        result: AnalysisOutput {
            summary: format!("{} analysis complete", label),
            body,
            name: job.persons.first().map(|p| p.name.clone()),
            birth_info: job.persons.first().map(|p| p.birth.display()),
        },
        notice: synced_target.map(|target| target_sync_notice(target).to_string()),
    })
}
