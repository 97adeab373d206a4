//! User-facing classification of stored job error text
//!
//! Error messages are stored as free text (often a provider's JSON body).
//! JSON is flattened into its string leaves, then matched by substring in a
//! fixed order; the first match wins.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorDisplay {
    pub code: &'static str,
    pub message: &'static str,
    pub hint: &'static str,
    pub maintenance_mode: bool,
}

impl ErrorDisplay {
    const fn new(code: &'static str, message: &'static str, hint: &'static str) -> Self {
        Self {
            code,
            message,
            hint,
            maintenance_mode: false,
        }
    }
}

/// Keys whose values are searched before the rest of an object
const PREFERRED_KEYS: [&str; 7] = ["message", "type", "code", "error", "details", "hint", "status"];

const BILLING_MARKERS: [&str; 9] = [
    "credit balance is too low",
    "insufficient credit",
    "insufficient credits",
    "insufficient_quota",
    "quota exceeded",
    "quota_exceeded",
    "billing",
    "payment required",
    "hard limit",
];

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() {
                out.push(s.to_string());
            }
        }
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => {
            for key in PREFERRED_KEYS {
                if let Some(v) = map.get(key) {
                    collect_strings(v, out);
                }
            }
            for (key, v) in map {
                if !PREFERRED_KEYS.contains(&key.as_str()) {
                    collect_strings(v, out);
                }
            }
        }
    }
}

/// Lower-cased text to match against
fn searchable_text(raw: &str) -> String {
    let text = raw.trim();
    if text.is_empty() {
        return String::new();
    }

    let mut parts = Vec::new();
    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            collect_strings(&parsed, &mut parts);
        }
    }
    parts.push(text.to_string());
    parts.join(" | ").to_lowercase()
}

/// Whether the LLM provider rejected the call for billing or quota reasons
pub fn is_llm_billing_unavailable(raw: &str) -> bool {
    let text = searchable_text(raw);
    !text.is_empty() && BILLING_MARKERS.iter().any(|m| text.contains(m))
}

/// Classify stored error text; empty text yields an empty display
pub fn classify(raw: &str) -> ErrorDisplay {
    let text = searchable_text(raw);
    if text.is_empty() {
        return ErrorDisplay::default();
    }

    if BILLING_MARKERS.iter().any(|m| text.contains(m)) {
        return ErrorDisplay {
            maintenance_mode: true,
            ..ErrorDisplay::new(
                "LLM_BILLING_UNAVAILABLE",
                "The AI analysis server is under maintenance due to a billing limit.",
                "Please try again later. We apologize for the inconvenience.",
            )
        };
    }

    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["invalid_gender"]) {
        ErrorDisplay::new(
            "INVALID_GENDER",
            "The analysis failed because the gender value is invalid.",
            "Check your input and submit again.",
        )
    } else if has(&["invalid_birth_input"]) {
        ErrorDisplay::new(
            "INVALID_BIRTH_INPUT",
            "The analysis failed because the birth date or time is invalid.",
            "Enter year, month, day and time, then try again.",
        )
    } else if has(&["invalid_input"]) {
        ErrorDisplay::new(
            "INVALID_INPUT",
            "Input validation failed.",
            "Check the required fields and submit again.",
        )
    } else if has(&["chart-api", "ablecity"]) {
        ErrorDisplay::new(
            "CHART_API_ERROR",
            "An error occurred while fetching the birth chart.",
            "Please try again later. Contact support if it keeps happening.",
        )
    } else if has(&["llm-api", "anthropic", "claude"]) {
        ErrorDisplay::new(
            "LLM_ERROR",
            "An error occurred while calling the AI analysis server.",
            "Please try again later.",
        )
    } else if has(&["timeout", "timed out", "etimedout"]) {
        ErrorDisplay::new(
            "TIMEOUT",
            "The analysis timed out.",
            "Check your network and try again shortly.",
        )
    } else if has(&["network", "connection", "dns error"]) {
        ErrorDisplay::new(
            "NETWORK",
            "The analysis failed because of a network error.",
            "Check your internet connection and try again.",
        )
    } else if has(&["token"]) {
        ErrorDisplay::new(
            "TOKEN",
            "A problem occurred while processing tokens.",
            "Check your token balance and history, then try again.",
        )
    } else {
        ErrorDisplay::new(
            "UNKNOWN",
            "An error occurred while processing the analysis.",
            "Please try again later.",
        )
    }
}
