//! External provider adapters and the background job pipeline
//!
//! Each outbound integration (chart API, LLM, payment gateways) sits behind an
//! `async_trait` so the handlers and jobs can run against in-process fakes.

pub mod chart_client;
pub mod error_display;
pub mod jobs;
pub mod llm_client;
pub mod payment_gateway;
pub mod prompt_builder;
pub mod prompt_cache;
pub mod token_policy;

pub use chart_client::{ChartProvider, ChartQuery, HttpChartProvider};
pub use llm_client::{AnthropicClient, GenerationRequest, TextGenerator};
pub use payment_gateway::{HttpPaymentGateway, PaymentGateway};
pub use prompt_cache::PromptCache;

use thiserror::Error;

/// Provider name embedded in chart API errors
pub const CHART_PROVIDER: &str = "chart-api";
/// Provider name embedded in LLM errors
pub const LLM_PROVIDER: &str = "llm-api";

/// Outbound call failure
///
/// The display text names the provider so stored error messages can be
/// classified later by [`error_display::classify`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("{provider} network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} timeout: {message}")]
    Timeout { provider: String, message: String },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} parse error: {message}")]
    Parse { provider: String, message: String },

    #[error("{provider} is not configured")]
    NotConfigured { provider: String },

    /// Input rejected before the call, carries a display code (`INVALID_GENDER: ...`)
    #[error("{0}")]
    InvalidInput(String),
}

impl ProviderError {
    /// Map a transport failure, separating timeouts from other network errors
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            ProviderError::Network {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }

    pub fn parse(provider: &str, message: impl Into<String>) -> Self {
        ProviderError::Parse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn not_configured(provider: &str) -> Self {
        ProviderError::NotConfigured {
            provider: provider.to_string(),
        }
    }

    /// Check an HTTP response status, returning the body text as an `Api` error on failure
    pub async fn check_status(provider: &str, response: reqwest::Response) -> Result<reqwest::Response, Self> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Build an HTTP client with the given timeout
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .user_agent(concat!("saju-api/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| ProviderError::Network {
            provider: "http-client".to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_provider() {
        let err = ProviderError::Api {
            provider: LLM_PROVIDER.to_string(),
            status: 400,
            body: "credit balance is too low".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("llm-api"));
        assert!(text.contains("400"));

        let err = ProviderError::not_configured(CHART_PROVIDER);
        assert_eq!(err.to_string(), "chart-api is not configured");
    }
}
