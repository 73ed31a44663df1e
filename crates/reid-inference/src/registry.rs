//! Model registry and collaborator wiring.

use std::sync::Arc;

use reid_core::{
    Detector, Embedder, Error, ReportGenerator, Result, VisualVerifier, WebIntelligence,
};
use tracing::info;

use crate::config::InferenceConfig;
use crate::detector::RemoteDetector;
use crate::embedder::RemoteEmbedder;
use crate::intel::{RemoteReportGenerator, RemoteWebIntelligence};
use crate::profiles::profile;
use crate::verifier::RemoteVisualVerifier;

/// Ordered set of embedders, one per model name.
#[derive(Clone, Default)]
pub struct EmbedderRegistry {
    embedders: Vec<Arc<dyn Embedder>>,
}

impl EmbedderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`RemoteEmbedder`] per configured model. Names must appear in the
    /// profile table, which supplies the declared dimension.
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        let client = reqwest::Client::new();
        let mut registry = Self::new();
        for name in &config.models {
            let profile = profile(name).ok_or_else(|| {
                Error::Config(format!("unknown re-identification model: {}", name))
            })?;
            registry.register(Arc::new(
                RemoteEmbedder::with_client(
                    client.clone(),
                    config.base_url.clone(),
                    profile.name,
                    profile.dimension,
                )
                .with_timeout(config.embed_timeout),
            ));
        }
        info!(
            subsystem = "inference",
            component = "registry",
            op = "build",
            models = ?registry.names(),
            "Embedder registry ready"
        );
        Ok(registry)
    }

    /// Add an embedder, replacing any existing one with the same model name.
    pub fn register(&mut self, embedder: Arc<dyn Embedder>) {
        let name = embedder.model_name().to_string();
        match self.embedders.iter().position(|e| e.model_name() == name) {
            Some(pos) => self.embedders[pos] = embedder,
            None => self.embedders.push(embedder),
        }
    }

    pub fn with(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.register(embedder);
        self
    }

    pub fn get(&self, model: &str) -> Option<Arc<dyn Embedder>> {
        self.embedders
            .iter()
            .find(|e| e.model_name() == model)
            .cloned()
    }

    /// First registered embedder.
    pub fn primary(&self) -> Option<Arc<dyn Embedder>> {
        self.embedders.first().cloned()
    }

    pub fn embedders(&self) -> &[Arc<dyn Embedder>] {
        &self.embedders
    }

    pub fn names(&self) -> Vec<&str> {
        self.embedders.iter().map(|e| e.model_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.embedders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embedders.is_empty()
    }
}

/// Every remote collaborator built from one [`InferenceConfig`].
#[derive(Clone)]
pub struct RemoteServices {
    pub detector: Arc<dyn Detector>,
    pub embedders: EmbedderRegistry,
    pub web_intel: Option<Arc<dyn WebIntelligence>>,
    pub report: Option<Arc<dyn ReportGenerator>>,
    pub verifier: Option<Arc<dyn VisualVerifier>>,
}

impl RemoteServices {
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        config.validate()?;
        let detector = RemoteDetector::new(config.base_url.clone())
            .with_timeout(config.detect_timeout);
        Ok(Self {
            detector: Arc::new(detector),
            embedders: EmbedderRegistry::from_config(config)?,
            web_intel: config.web_intel_url.as_ref().map(|url| {
                Arc::new(
                    RemoteWebIntelligence::new(url.clone()).with_timeout(config.web_intel_timeout),
                ) as Arc<dyn WebIntelligence>
            }),
            report: config.report_url.as_ref().map(|url| {
                Arc::new(RemoteReportGenerator::new(url.clone()).with_timeout(config.report_timeout))
                    as Arc<dyn ReportGenerator>
            }),
            verifier: config.verifier_url.as_ref().map(|url| {
                Arc::new(RemoteVisualVerifier::new(url.clone()).with_timeout(config.verify_timeout))
                    as Arc<dyn VisualVerifier>
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_default_config() {
        let registry = EmbedderRegistry::from_config(&InferenceConfig::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec!["clip-vit-l14", "dinov2-vitl14", "megadescriptor-l-384"]
        );
        assert_eq!(registry.get("dinov2-vitl14").unwrap().dimension(), 1024);
        assert_eq!(
            registry.primary().unwrap().model_name(),
            "clip-vit-l14"
        );
    }

    #[test]
    fn test_registry_rejects_unknown_model() {
        let config = InferenceConfig::default().with_models(["clip-vit-l14", "mystery-net"]);
        let err = EmbedderRegistry::from_config(&config).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("mystery-net"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = EmbedderRegistry::new();
        registry.register(Arc::new(RemoteEmbedder::new("http://a", "clip-vit-l14", 768)));
        registry.register(Arc::new(RemoteEmbedder::new("http://b", "clip-vit-l14", 768)));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_remote_services_optional_collaborators() {
        let services = RemoteServices::from_config(&InferenceConfig::default()).unwrap();
        assert!(services.web_intel.is_none());
        assert!(services.report.is_none());
        assert!(services.verifier.is_none());

        let config = InferenceConfig::default()
            .with_web_intel_url("http://intel")
            .with_report_url("http://report");
        let services = RemoteServices::from_config(&config).unwrap();
        assert!(services.web_intel.is_some());
        assert!(services.report.is_some());
    }
}
