//! Ensemble configuration.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use reid_core::defaults::{
    CASCADE_STAGE1_ACCEPT, CASCADE_STAGE1_MODEL, CASCADE_STAGE1_REJECT, CASCADE_STAGE2_ACCEPT,
    CASCADE_STAGE2_MODEL, CASCADE_STAGE2_REJECT, CASCADE_STAGE3_ACCEPT, CASCADE_STAGE3_MODEL,
    CASCADE_STAGE3_REJECT, ENV_CASCADE_STAGES, ENV_MODEL_WEIGHTS, ENV_SIMILARITY_THRESHOLD,
    ENV_STRATEGY, ENV_TOP_K, MATCH_TOP_K, RERANK_TOP_N, SIMILARITY_THRESHOLD,
};
use reid_core::{Error, Result};

/// How the ensemble combines its models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// One model, top-1.
    Single,
    /// All models in parallel, majority vote.
    #[default]
    Consensus,
    /// Models in configured order with accept/reject thresholds.
    Cascade,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Single => "single",
            MatchStrategy::Consensus => "consensus",
            MatchStrategy::Cascade => "cascade",
        }
    }
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(MatchStrategy::Single),
            "consensus" => Ok(MatchStrategy::Consensus),
            "cascade" => Ok(MatchStrategy::Cascade),
            other => Err(Error::Config(format!("unknown match strategy: {}", other))),
        }
    }
}

/// One cascade stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStage {
    pub model: String,
    /// Top similarity strictly above this accepts.
    pub accept_threshold: f32,
    /// Top similarity strictly below this rejects as a new individual.
    pub reject_threshold: f32,
}

impl CascadeStage {
    pub fn new(model: impl Into<String>, accept_threshold: f32, reject_threshold: f32) -> Result<Self> {
        let model = model.into();
        if model.is_empty() {
            return Err(Error::Config("cascade stage has empty model name".to_string()));
        }
        for (label, value) in [("accept", accept_threshold), ("reject", reject_threshold)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "cascade stage {} {} threshold {} outside [0, 1]",
                    model, label, value
                )));
            }
        }
        if accept_threshold < reject_threshold {
            return Err(Error::Config(format!(
                "cascade stage {} accept threshold {} is below reject threshold {}",
                model, accept_threshold, reject_threshold
            )));
        }
        Ok(Self {
            model,
            accept_threshold,
            reject_threshold,
        })
    }
}

/// Built-in three-stage cascade: fast generalist, backbone, specialist.
pub fn default_cascade() -> Vec<CascadeStage> {
    [
        (CASCADE_STAGE1_MODEL, CASCADE_STAGE1_ACCEPT, CASCADE_STAGE1_REJECT),
        (CASCADE_STAGE2_MODEL, CASCADE_STAGE2_ACCEPT, CASCADE_STAGE2_REJECT),
        (CASCADE_STAGE3_MODEL, CASCADE_STAGE3_ACCEPT, CASCADE_STAGE3_REJECT),
    ]
    .into_iter()
    .map(|(model, accept_threshold, reject_threshold)| CascadeStage {
        model: model.to_string(),
        accept_threshold,
        reject_threshold,
    })
    .collect()
}

/// Parse `model:accept:reject,model:accept:reject,...`.
pub fn parse_cascade_stages(raw: &str) -> Result<Vec<CascadeStage>> {
    let mut stages = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let fields: Vec<&str> = part.split(':').map(str::trim).collect();
        let [model, accept, reject] = fields.as_slice() else {
            return Err(Error::Config(format!(
                "cascade stage '{}' must be model:accept:reject",
                part
            )));
        };
        stages.push(CascadeStage::new(
            *model,
            parse_f32(accept, part)?,
            parse_f32(reject, part)?,
        )?);
    }
    if stages.is_empty() {
        return Err(Error::Config("cascade has no stages".to_string()));
    }
    Ok(stages)
}

/// Parse `model:weight,model:weight,...`. Weights must be finite and non-negative.
pub fn parse_model_weights(raw: &str) -> Result<HashMap<String, f32>> {
    let mut weights = HashMap::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((model, weight)) = part.split_once(':') else {
            return Err(Error::Config(format!(
                "model weight '{}' must be model:weight",
                part
            )));
        };
        let weight = parse_f32(weight.trim(), part)?;
        if weight < 0.0 {
            return Err(Error::Config(format!("negative model weight in '{}'", part)));
        }
        weights.insert(model.trim().to_string(), weight);
    }
    Ok(weights)
}

fn parse_f32(value: &str, context: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::Config(format!("invalid number '{}' in '{}'", value, context)))
}

/// Ensemble matching settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub strategy: MatchStrategy,
    /// Minimum similarity for a hit to count as a match.
    pub threshold: f32,
    /// Neighbours requested per model.
    pub top_k: usize,
    pub cascade: Vec<CascadeStage>,
    /// Per-model consolidation weights. Missing models weigh 1.0.
    pub weights: HashMap<String, f32>,
    /// Model used by the single strategy. Falls back to the first embedder.
    pub primary_model: Option<String>,
    /// Consolidated candidates handed to visual re-ranking.
    pub rerank_top_n: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::default(),
            threshold: SIMILARITY_THRESHOLD,
            top_k: MATCH_TOP_K,
            cascade: default_cascade(),
            weights: HashMap::new(),
            primary_model: None,
            rerank_top_n: RERANK_TOP_N,
        }
    }
}

impl EnsembleConfig {
    /// Load from the environment. Malformed values are logged and replaced by
    /// their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(ENV_STRATEGY) {
            match raw.parse() {
                Ok(strategy) => config.strategy = strategy,
                Err(e) => warn_default(ENV_STRATEGY, &raw, &e),
            }
        }
        if let Ok(raw) = std::env::var(ENV_SIMILARITY_THRESHOLD) {
            match parse_f32(&raw, ENV_SIMILARITY_THRESHOLD) {
                Ok(t) if (0.0..=1.0).contains(&t) => config.threshold = t,
                Ok(t) => warn_default(
                    ENV_SIMILARITY_THRESHOLD,
                    &raw,
                    &Error::Config(format!("{} outside [0, 1]", t)),
                ),
                Err(e) => warn_default(ENV_SIMILARITY_THRESHOLD, &raw, &e),
            }
        }
        if let Ok(raw) = std::env::var(ENV_TOP_K) {
            match raw.trim().parse::<usize>() {
                Ok(k) if k > 0 => config.top_k = k,
                _ => warn_default(
                    ENV_TOP_K,
                    &raw,
                    &Error::Config("expected a positive integer".to_string()),
                ),
            }
        }
        if let Ok(raw) = std::env::var(ENV_CASCADE_STAGES) {
            match parse_cascade_stages(&raw) {
                Ok(stages) => config.cascade = stages,
                Err(e) => warn_default(ENV_CASCADE_STAGES, &raw, &e),
            }
        }
        if let Ok(raw) = std::env::var(ENV_MODEL_WEIGHTS) {
            match parse_model_weights(&raw) {
                Ok(weights) => config.weights = weights,
                Err(e) => warn_default(ENV_MODEL_WEIGHTS, &raw, &e),
            }
        }
        config
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_cascade(mut self, cascade: Vec<CascadeStage>) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn with_weight(mut self, model: impl Into<String>, weight: f32) -> Self {
        self.weights.insert(model.into(), weight);
        self
    }

    pub fn with_primary_model(mut self, model: impl Into<String>) -> Self {
        self.primary_model = Some(model.into());
        self
    }

    pub fn weight_for(&self, model: &str) -> f32 {
        self.weights.get(model).copied().unwrap_or(1.0)
    }
}

fn warn_default(var: &str, raw: &str, error: &Error) {
    warn!(
        subsystem = "ensemble",
        component = "config",
        var,
        value = raw,
        error = %error,
        "Ignoring malformed setting, using default"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parse() {
        assert_eq!("Cascade".parse::<MatchStrategy>().unwrap(), MatchStrategy::Cascade);
        assert_eq!(" single ".parse::<MatchStrategy>().unwrap(), MatchStrategy::Single);
        assert!("vote".parse::<MatchStrategy>().is_err());
        assert_eq!(MatchStrategy::default(), MatchStrategy::Consensus);
    }

    #[test]
    fn test_default_cascade_order() {
        let stages = default_cascade();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[0].model, CASCADE_STAGE1_MODEL);
        assert_eq!(stages[2].model, CASCADE_STAGE3_MODEL);
        assert!(stages.iter().all(|s| s.accept_threshold >= s.reject_threshold));
    }

    #[test]
    fn test_parse_cascade_stages() {
        let stages = parse_cascade_stages("a:0.9:0.6, b:0.8:0.7").unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1], CascadeStage::new("b", 0.8, 0.7).unwrap());

        assert!(parse_cascade_stages("a:0.9").is_err());
        assert!(parse_cascade_stages("a:0.5:0.6").is_err());
        assert!(parse_cascade_stages("a:1.5:0.6").is_err());
        assert!(parse_cascade_stages("a:x:0.6").is_err());
        assert!(parse_cascade_stages(" , ").is_err());
    }

    #[test]
    fn test_parse_model_weights() {
        let weights = parse_model_weights("a:2.0,b:0.5").unwrap();
        assert_eq!(weights["a"], 2.0);
        assert_eq!(weights["b"], 0.5);
        assert!(parse_model_weights("a").is_err());
        assert!(parse_model_weights("a:-1").is_err());
        assert!(parse_model_weights("").unwrap().is_empty());
    }

    #[test]
    fn test_weight_for_defaults_to_one() {
        let config = EnsembleConfig::default().with_weight("a", 3.0);
        assert_eq!(config.weight_for("a"), 3.0);
        assert_eq!(config.weight_for("b"), 1.0);
    }
}
