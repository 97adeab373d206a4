//! Configuration loading
//!
//! Configuration file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `SAJU_CONFIG` environment variable
//! 3. Platform config file (`~/.config/saju/config.toml`, then `/etc/saju/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! Secrets may additionally be supplied through environment variables so they
//! never have to live in the TOML file (see [`TomlConfig::apply_env_overrides`]).

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SAJU_CONFIG";

/// Complete service configuration (`config.toml`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub analysis: AnalysisConfig,
    pub chart_api: ChartApiConfig,
    pub llm: LlmConfig,
    pub payments: PaymentsConfig,
}

/// `[server]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Externally visible origin, used to build payment callback and share URLs
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5780,
            public_base_url: "http://127.0.0.1:5780".to_string(),
        }
    }
}

/// `[database]` section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file; `None` resolves to the platform data directory
    pub path: Option<PathBuf>,
}

/// `[session]` section
///
/// An empty secret disables signature checking of login headers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub secret: String,
    pub max_age_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            max_age_secs: 300,
        }
    }
}

/// `[analysis]` section: job slot and token policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Age after which an unreleased job slot is reclaimed
    pub slot_stale_minutes: i64,
    pub premium_token_cost: i64,
    pub trial_token_cost: i64,
    /// Send a minimal prompt to the LLM instead of the full report prompt
    pub llm_sandbox: bool,
    pub saju_expected_seconds: i64,
    pub fortune_expected_seconds: i64,
    /// How long shutdown waits for running jobs before exiting
    pub shutdown_drain_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            slot_stale_minutes: 30,
            premium_token_cost: 10,
            trial_token_cost: 3,
            llm_sandbox: false,
            saju_expected_seconds: 210,
            fortune_expected_seconds: 150,
            shutdown_drain_secs: 60,
        }
    }
}

/// `[chart_api]` section: birth-chart computation service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for ChartApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.ablecity.kr".to_string(),
            api_key: String::new(),
            timeout_secs: 15,
        }
    }
}

/// `[llm]` section: text generation service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: String::new(),
            api_version: "2023-06-01".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 8192,
            timeout_secs: 120,
        }
    }
}

/// `[payments]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    pub timeout_secs: u64,
    pub kakaopay: KakaoPayConfig,
    pub naverpay: NaverPayConfig,
    pub paypal: PayPalConfig,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            kakaopay: KakaoPayConfig::default(),
            naverpay: NaverPayConfig::default(),
            paypal: PayPalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KakaoPayConfig {
    pub cid: String,
    pub secret_key: String,
    pub ready_url: String,
    pub approve_url: String,
}

impl KakaoPayConfig {
    pub fn is_configured(&self) -> bool {
        all_present(&[&self.cid, &self.secret_key, &self.ready_url, &self.approve_url])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NaverPayConfig {
    pub client_id: String,
    pub client_secret: String,
    pub chain_id: String,
    pub ready_url: String,
    pub approve_url: String,
}

impl NaverPayConfig {
    pub fn is_configured(&self) -> bool {
        all_present(&[
            &self.client_id,
            &self.client_secret,
            &self.chain_id,
            &self.ready_url,
            &self.approve_url,
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub create_order_url: String,
    /// Capture endpoint with an `{order_id}` placeholder
    pub capture_order_url: String,
    pub currency: String,
    /// KRW per unit of `currency`, used when `currency` is not KRW
    pub fx_krw_per_unit: f64,
}

impl Default for PayPalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: String::new(),
            create_order_url: String::new(),
            capture_order_url: String::new(),
            currency: "USD".to_string(),
            fx_krw_per_unit: 1400.0,
        }
    }
}

impl PayPalConfig {
    pub fn is_configured(&self) -> bool {
        all_present(&[
            &self.client_id,
            &self.client_secret,
            &self.token_url,
            &self.create_order_url,
            &self.capture_order_url,
        ])
    }
}

fn all_present(values: &[&String]) -> bool {
    values.iter().all(|v| !v.trim().is_empty())
}

impl TomlConfig {
    /// Resolve and load the configuration file, then apply environment overrides
    ///
    /// A missing file is not an error: compiled defaults are used. A file that
    /// exists but fails to parse is an error.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from);
        let mut config = match resolve_config_path(cli_path, env_path.as_deref()) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a specific TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))
    }

    /// Override secrets from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override secrets using an arbitrary lookup (environment in production)
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };

        set("SAJU_SESSION_SECRET", &mut self.session.secret);
        set("SAJU_CHART_API_KEY", &mut self.chart_api.api_key);
        set("SAJU_LLM_API_KEY", &mut self.llm.api_key);
        set("SAJU_KAKAOPAY_SECRET_KEY", &mut self.payments.kakaopay.secret_key);
        set("SAJU_NAVERPAY_CLIENT_SECRET", &mut self.payments.naverpay.client_secret);
        set("SAJU_PAYPAL_CLIENT_SECRET", &mut self.payments.paypal.client_secret);
    }

    /// Database file: configured path, or `<data dir>/saju/saju.db`
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| default_data_folder().join("saju.db"))
    }

    /// Staleness threshold in milliseconds (never below one minute)
    pub fn slot_stale_ms(&self) -> i64 {
        self.analysis.slot_stale_minutes.max(1) * 60_000
    }
}

/// Pick the configuration file to read, if any
fn resolve_config_path(cli_path: Option<&Path>, env_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_path {
        return Some(path.to_path_buf());
    }

    let user_config = dirs::config_dir().map(|d| d.join("saju").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/saju/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// OS-dependent default data folder
fn default_data_folder() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join("saju"),
        None => {
            warn!("Could not determine local data directory, using ./saju_data");
            PathBuf::from("./saju_data")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.analysis.slot_stale_minutes, 30);
        assert_eq!(config.analysis.premium_token_cost, 10);
        assert_eq!(config.analysis.trial_token_cost, 3);
        assert_eq!(config.slot_stale_ms(), 30 * 60 * 1000);
        assert!(config.session.secret.is_empty());
        assert!(!config.payments.kakaopay.is_configured());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [server]
            port = 9000

            [analysis]
            slot_stale_minutes = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.analysis.slot_stale_minutes, 5);
        assert_eq!(config.analysis.premium_token_cost, 10);
        assert_eq!(config.analysis.shutdown_drain_secs, 60);
        assert_eq!(config.llm.max_tokens, 8192);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides_only_non_empty_values() {
        let env: HashMap<&str, &str> = [
            ("SAJU_LLM_API_KEY", "llm-key"),
            ("SAJU_SESSION_SECRET", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = TomlConfig::from_toml_str("[session]\nsecret = \"from-file\"").unwrap();
        config.apply_env_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "llm-key");
        assert_eq!(config.session.secret, "from-file");
    }

    #[test]
    fn test_slot_stale_ms_has_floor() {
        let mut config = TomlConfig::default();
        config.analysis.slot_stale_minutes = 0;
        assert_eq!(config.slot_stale_ms(), 60_000);
    }

    #[test]
    fn test_cli_path_wins_over_env_path() {
        let cli = PathBuf::from("/tmp/cli.toml");
        let env = PathBuf::from("/tmp/env.toml");
        assert_eq!(resolve_config_path(Some(&cli), Some(&env)), Some(cli));
        assert_eq!(resolve_config_path(None, Some(&env)), Some(env));
    }

    #[test]
    fn test_paypal_configured_requires_all_urls() {
        let mut paypal = PayPalConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            token_url: "https://example.test/token".into(),
            create_order_url: "https://example.test/orders".into(),
            ..PayPalConfig::default()
        };
        assert!(!paypal.is_configured());
        paypal.capture_order_url = "https://example.test/orders/{order_id}/capture".into();
        assert!(paypal.is_configured());
    }
}
