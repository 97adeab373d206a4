//! Birth-chart API client
//!
//! `GET {base_url}/api/v1/saju/fortune?birth=..&gender=male|female` with a
//! bearer key. The response is kept as raw JSON; prompts read its
//! `data.saju` and `data.daewoon` members.

use async_trait::async_trait;
use saju_common::config::ChartApiConfig;
use serde_json::Value;

use super::{http_client, ProviderError, CHART_PROVIDER};
use crate::models::{Gender, PersonProfile};

const CHART_PATH: &str = "/api/v1/saju/fortune";

/// Query parameters of one chart lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartQuery {
    /// `YYYY-MM-DDTHH:MM`, or the bare date when the birth time is unknown
    pub birth: String,
    pub gender: Gender,
}

impl ChartQuery {
    pub fn for_profile(profile: &PersonProfile) -> Self {
        let birth = match profile.birth.time {
            Some(time) => format!("{}T{}", profile.birth.date_string(), time.format("%H:%M")),
            None => profile.birth.date_string(),
        };
        Self {
            birth,
            gender: profile.gender,
        }
    }
}

#[async_trait]
pub trait ChartProvider: Send + Sync {
    async fn fetch_chart(&self, query: &ChartQuery) -> Result<Value, ProviderError>;
}

/// Chart API over HTTP
pub struct HttpChartProvider {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpChartProvider {
    pub fn new(config: &ChartApiConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ChartProvider for HttpChartProvider {
    async fn fetch_chart(&self, query: &ChartQuery) -> Result<Value, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::not_configured(CHART_PROVIDER));
        }

        tracing::debug!(birth = %query.birth, gender = query.gender.api_value(), "Querying chart API");

        let response = self
            .http_client
            .get(format!("{}{}", self.base_url, CHART_PATH))
            .query(&[("birth", query.birth.as_str()), ("gender", query.gender.api_value())])
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(CHART_PROVIDER, e))?;

        let response = ProviderError::check_status(CHART_PROVIDER, response).await?;

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::parse(CHART_PROVIDER, e.to_string()))
    }
}

/// Whether the chart JSON carries the pillars and luck cycles
pub fn chart_shape(chart: &Value) -> (bool, bool) {
    let data = &chart["data"];
    (!data["saju"].is_null(), !data["daewoon"].is_null())
}
