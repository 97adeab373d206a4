//! Prompt assembly and parsing of the model's structured answer
//!
//! Built-in prompts are used unless an active template exists in the
//! database (see [`super::prompt_cache`]).

use serde_json::Value;

use crate::models::{CounselingTone, FortuneFeature, Gender};

pub const BASE_SAJU_PROMPT: &str = "\
You are an experienced saju (Four Pillars of Destiny) counselor.
Interpret the birth chart data you are given faithfully; do not invent pillars,
elements or luck cycles that are not in the data.
Write for a general audience: explain terms briefly when you use them.
Avoid fatalistic or absolute statements. Every section ends with practical,
actionable advice grounded in the customer's age and life stage.";

pub const BASE_FORTUNE_PROMPT: &str = "\
You are a saju-based fortune counselor writing a focused report.
Base every statement on the supplied chart data and the user's input.
Keep the tone warm and concrete; avoid exaggeration and absolute predictions.";

pub fn tone_prompt(tone: CounselingTone) -> &'static str {
    match tone {
        CounselingTone::Soft => {
            "Use a gentle, reassuring voice. Lead with strengths and frame difficulties as things that can be worked through."
        }
        CounselingTone::Balanced => {
            "Balance strengths and weaknesses evenly. Be honest about risks while keeping an encouraging tone."
        }
        CounselingTone::Insight => {
            "Go deep: connect pillars, elements and luck cycles into an explanation of underlying patterns and motivations."
        }
        CounselingTone::Direct => {
            "Be direct and concise. State the key issues plainly and give clear recommendations without softening."
        }
        CounselingTone::Factbomb => {
            "Be blunt. Point out weaknesses and recurring mistakes without sugar-coating, then give firm corrective advice."
        }
    }
}

pub fn feature_prompt(feature: FortuneFeature) -> &'static str {
    match feature {
        FortuneFeature::Compatibility => {
            "Analyse the compatibility of the two people for the stated relationship: complementary and clashing elements, communication style, and advice for each person."
        }
        FortuneFeature::Today => {
            "Write today's fortune for the person, centred on the requested focus area, with one concrete action for the day."
        }
        FortuneFeature::Flow => {
            "Describe the major and yearly luck cycles for the requested period: turning points, favourable timing and cautions."
        }
        FortuneFeature::Naming => {
            "Assess how well the candidate name suits the person's chart (element balance and meaning) and suggest improvements if needed."
        }
        FortuneFeature::DateSelection => {
            "Evaluate the candidate date for the stated event against the person's chart and recommend whether to proceed or pick another date."
        }
    }
}

/// Saju system prompt: base prompt plus the counseling tone adjustment
pub fn saju_system_prompt(base: &str, tone_text: &str) -> String {
    format!("{}\n\n# Counseling tone\n{}", base.trim(), tone_text.trim())
}

/// Customer facts fed to the saju user prompt
#[derive(Debug, Clone)]
pub struct SajuFacts<'a> {
    pub name: &'a str,
    pub gender: Gender,
    /// `YYYY-MM-DD`
    pub birth_date: String,
    /// `HH:MM`, or `None` when unknown
    pub birth_time: Option<String>,
    pub age: i32,
    pub life_stage: &'a str,
    pub tone_label: &'a str,
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

pub fn saju_user_prompt(facts: &SajuFacts<'_>, chart: &Value, guide: Option<&str>) -> String {
    let gender = match facts.gender {
        Gender::Male => "Male",
        Gender::Female => "Female",
    };
    let birth_time = facts.birth_time.as_deref().unwrap_or("unknown");
    let pillars = match &chart["data"]["saju"] {
        Value::Null => chart,
        saju => saju,
    };
    let cycles = match &chart["data"]["daewoon"] {
        Value::Null => Value::Object(Default::default()),
        daewoon => daewoon.clone(),
    };

    let mut prompt = format!(
        "# Customer\n\
         - Name: {name}\n\
         - Gender: {gender}\n\
         - Birth: {date} {time} (solar calendar)\n\
         - Age: {age}\n\
         - Life stage: {stage}\n\
         - Counseling style: {tone}\n\
         \n\
         # Birth chart\n```json\n{pillars}\n```\n\
         \n\
         # Luck cycles\n```json\n{cycles}\n```\n\
         \n\
         # Request\n\
         Write a comprehensive consultation from the chart above. Every piece of advice must\n\
         fit the customer's age ({age}) and current life stage.\n",
        name = facts.name,
        gender = gender,
        date = facts.birth_date,
        time = birth_time,
        age = facts.age,
        stage = facts.life_stage,
        tone = facts.tone_label,
        pillars = pretty(pillars),
        cycles = pretty(&cycles),
    );

    if let Some(guide) = guide.map(str::trim).filter(|g| !g.is_empty()) {
        prompt.push_str("\n# Additional guidance\n");
        prompt.push_str(guide);
        prompt.push('\n');
    }

    prompt.push_str(
        "\n# Output format (required)\n\
         Reply with this JSON object only.\n\
         ```json\n\
         {\n  \"summary\": \"one or two sentence summary (plain text)\",\n  \"body\": \"detailed report (markdown)\"\n}\n\
         ```\n\
         - keep the summary short, ideally under 220 characters\n\
         - structure the body with markdown sections and lists",
    );
    prompt
}

/// Fortune system prompt: base prompt, feature instructions and the submitted input
pub fn fortune_system_prompt(base: &str, feature_text: &str, input: &Value) -> String {
    format!(
        "{}\n\n# Analysis type\n{}\n\n# User input\n```json\n{}\n```\n\n# Output rules\n\
         - Write a result the user can act on.\n\
         - Avoid exaggeration and absolute statements; include practical advice.",
        base.trim(),
        feature_text.trim(),
        pretty(input)
    )
}

pub fn fortune_user_prompt(charts: &Value, input: &Value) -> String {
    format!(
        "Chart data:\n{}\n\nInput:\n{}",
        pretty(charts),
        pretty(input)
    )
}

/// Minimal prompt used in sandbox mode
pub fn sandbox_prompt(label: &str) -> String {
    format!("Give the {} result in a single sentence.", label)
}

/// `{summary, body}` pulled from the model answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredAnswer {
    pub summary: String,
    pub body: String,
}

fn extract_json_block(text: &str) -> Option<&str> {
    let lower = text.to_ascii_lowercase();
    if let Some(start) = lower.find("```json") {
        let rest = &text[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    if text.starts_with('{') && text.ends_with('}') {
        return Some(text);
    }
    None
}

/// Parse the model's JSON answer; falls back to the whole text as the body
pub fn parse_structured_answer(raw: &str, fallback_summary: &str) -> StructuredAnswer {
    let text = raw.trim();

    if let Some(block) = extract_json_block(text) {
        if let Ok(parsed) = serde_json::from_str::<Value>(block) {
            let field = |key: &str| parsed[key].as_str().unwrap_or_default().trim().to_string();
            let body = field("body");
            if !body.is_empty() {
                let summary = field("summary");
                return StructuredAnswer {
                    summary: if summary.is_empty() {
                        fallback_summary.trim().to_string()
                    } else {
                        summary
                    },
                    body,
                };
            }
        }
    }

    StructuredAnswer {
        summary: fallback_summary.trim().to_string(),
        body: text.to_string(),
    }
}
