//! Inference service configuration.

use std::env;
use std::time::Duration;

use reid_core::defaults::{self, *};
use reid_core::{Error, Result};

/// Where and how to reach the remote collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Base URL serving detection and embedding.
    pub base_url: String,
    /// Embedding models to load, in preference order.
    pub models: Vec<String>,
    pub embed_timeout: Duration,
    pub detect_timeout: Duration,
    /// Web intelligence endpoint; disabled when `None`.
    pub web_intel_url: Option<String>,
    pub web_intel_timeout: Duration,
    /// Report generation endpoint; disabled when `None`.
    pub report_url: Option<String>,
    pub report_timeout: Duration,
    /// Visual verifier endpoint; re-ranking is skipped when `None`.
    pub verifier_url: Option<String>,
    pub verify_timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: INFERENCE_URL.to_string(),
            models: default_models(),
            embed_timeout: Duration::from_secs(EMBED_TIMEOUT_SECS),
            detect_timeout: Duration::from_secs(DETECT_TIMEOUT_SECS),
            web_intel_url: None,
            web_intel_timeout: Duration::from_secs(WEB_INTEL_TIMEOUT_SECS),
            report_url: None,
            report_timeout: Duration::from_secs(REPORT_TIMEOUT_SECS),
            verifier_url: None,
            verify_timeout: Duration::from_secs(VERIFY_TIMEOUT_SECS),
        }
    }
}

/// The cascade models, which double as the default ensemble pool.
fn default_models() -> Vec<String> {
    [
        CASCADE_STAGE1_MODEL,
        CASCADE_STAGE2_MODEL,
        CASCADE_STAGE3_MODEL,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn env_url(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Split a comma-separated model list, dropping blanks.
pub fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl InferenceConfig {
    /// Build from environment variables, falling back to [`reid_core::defaults`].
    pub fn from_env() -> Self {
        let models = env::var(ENV_REID_MODELS)
            .ok()
            .map(|v| parse_model_list(&v))
            .filter(|m| !m.is_empty())
            .unwrap_or_else(default_models);

        Self {
            base_url: env::var(ENV_INFERENCE_URL)
                .unwrap_or_else(|_| defaults::INFERENCE_URL.to_string()),
            models,
            embed_timeout: env_secs(ENV_EMBED_TIMEOUT, EMBED_TIMEOUT_SECS),
            detect_timeout: env_secs(ENV_DETECT_TIMEOUT, DETECT_TIMEOUT_SECS),
            web_intel_url: env_url(ENV_WEB_INTEL_URL),
            web_intel_timeout: env_secs(ENV_WEB_INTEL_TIMEOUT, WEB_INTEL_TIMEOUT_SECS),
            report_url: env_url(ENV_REPORT_URL),
            report_timeout: env_secs(ENV_REPORT_TIMEOUT, REPORT_TIMEOUT_SECS),
            verifier_url: env_url(ENV_VERIFIER_URL),
            verify_timeout: Duration::from_secs(VERIFY_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_web_intel_url(mut self, url: impl Into<String>) -> Self {
        self.web_intel_url = Some(url.into());
        self
    }

    pub fn with_report_url(mut self, url: impl Into<String>) -> Self {
        self.report_url = Some(url.into());
        self
    }

    pub fn with_verifier_url(mut self, url: impl Into<String>) -> Self {
        self.verifier_url = Some(url.into());
        self
    }

    /// Reject configurations that cannot reach any service.
    pub fn validate(&self) -> Result<()> {
        check_url("base_url", &self.base_url)?;
        for (name, url) in [
            ("web_intel_url", &self.web_intel_url),
            ("report_url", &self.report_url),
            ("verifier_url", &self.verifier_url),
        ] {
            if let Some(url) = url {
                check_url(name, url)?;
            }
        }
        if self.models.is_empty() {
            return Err(Error::Config("at least one model must be configured".into()));
        }
        Ok(())
    }
}

fn check_url(name: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must start with http:// or https://, got: {}",
            name, url
        )))
    }
}
