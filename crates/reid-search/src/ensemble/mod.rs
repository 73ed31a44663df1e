//! Ensemble matching: several re-identification models, one decision.
//!
//! Each model embeds the crop and queries its own partition of the
//! [`SimilarityIndex`]. A [`MatchStrategy`] turns the per-model results into an
//! [`EnsembleDecision`]; consolidation and optional visual re-ranking run for
//! every strategy. A model that fails (error, timeout, degenerate vector) is
//! recorded on its [`ModelRun`] and excluded, never aborting the ensemble.

mod cascade;
pub mod config;
mod consensus;
mod consolidate;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use reid_core::defaults::EMBED_TIMEOUT_SECS;
use reid_core::{
    ConsolidatedCandidate, Embedder, Embedding, Error, IndexFilter, MatchCandidate,
    VisualVerifier,
};

use crate::index::{QueryOptions, SimilarityIndex};

pub use config::{
    default_cascade, parse_cascade_stages, parse_model_weights, CascadeStage, EnsembleConfig,
    MatchStrategy,
};
pub use consensus::decide_consensus;
pub use consolidate::{consolidate, rerank};

/// Result of running one model against the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRun {
    pub model: String,
    /// Ranked matches above the threshold used for this run.
    pub matches: Vec<MatchCandidate>,
    /// Set when the model failed; such runs carry no matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Normalized query embedding, kept so the crop can be enrolled later.
    #[serde(skip)]
    pub embedding: Option<Embedding>,
}

impl ModelRun {
    fn failed(model: &str, error: &Error, started: Instant) -> Self {
        Self {
            model: model.to_string(),
            matches: Vec::new(),
            error: Some(error.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            embedding: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Best match, if any.
    pub fn top(&self) -> Option<&MatchCandidate> {
        self.matches.first()
    }
}

/// Votes for one candidate under consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub item_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub votes: usize,
    /// Mean top-1 similarity of the voting models.
    pub mean_similarity: f32,
    pub models: Vec<String>,
}

/// What the ensemble concluded about the crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnsembleDecision {
    /// The crop shows a known individual.
    Identified {
        item_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        confidence: f32,
        vote_count: usize,
        total_models: usize,
        /// Model whose result settled the decision (single and cascade).
        #[serde(skip_serializing_if = "Option::is_none")]
        deciding_model: Option<String>,
    },
    /// No known individual matched.
    NewIndividual { requires_verification: bool },
    /// Models matched different individuals without a majority.
    Disagreement { candidates: Vec<VoteTally> },
}

impl EnsembleDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            EnsembleDecision::Identified { .. } => "identified",
            EnsembleDecision::NewIndividual { .. } => "new_individual",
            EnsembleDecision::Disagreement { .. } => "disagreement",
        }
    }

    pub fn identified_item(&self) -> Option<Uuid> {
        match self {
            EnsembleDecision::Identified { item_id, .. } => Some(*item_id),
            _ => None,
        }
    }

    /// Whether a human has to look at this outcome.
    pub fn needs_review(&self) -> bool {
        match self {
            EnsembleDecision::Identified { .. } => false,
            EnsembleDecision::NewIndividual { .. } | EnsembleDecision::Disagreement { .. } => true,
        }
    }
}

/// Decision plus everything that led to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleOutcome {
    pub strategy: MatchStrategy,
    pub decision: EnsembleDecision,
    pub runs: Vec<ModelRun>,
    pub consolidated: Vec<ConsolidatedCandidate>,
    /// Human-readable trail of skipped models, inconclusive stages, etc.
    pub audit: Vec<String>,
}

impl EnsembleOutcome {
    /// Any successful run's embedding, preferring `model`.
    pub fn embedding_for(&self, model: Option<&str>) -> Option<&Embedding> {
        model
            .and_then(|m| {
                self.runs
                    .iter()
                    .find(|r| r.model == m)
                    .and_then(|r| r.embedding.as_ref())
            })
            .or_else(|| self.runs.iter().find_map(|r| r.embedding.as_ref()))
    }
}

/// Runs re-identification models against the similarity index.
pub struct MatchEngine {
    index: Arc<SimilarityIndex>,
    embedders: Vec<Arc<dyn Embedder>>,
    config: EnsembleConfig,
    verifier: Option<Arc<dyn VisualVerifier>>,
    embed_timeout: Duration,
}

impl MatchEngine {
    pub fn new(
        index: Arc<SimilarityIndex>,
        embedders: Vec<Arc<dyn Embedder>>,
        config: EnsembleConfig,
    ) -> Self {
        Self {
            index,
            embedders,
            config,
            verifier: None,
            embed_timeout: Duration::from_secs(EMBED_TIMEOUT_SECS),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn VisualVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<SimilarityIndex> {
        &self.index
    }

    pub fn embedders(&self) -> &[Arc<dyn Embedder>] {
        &self.embedders
    }

    fn embedder(&self, model: &str) -> Option<&Arc<dyn Embedder>> {
        self.embedders.iter().find(|e| e.model_name() == model)
    }

    /// Identify a crop with the configured strategy.
    pub async fn identify(&self, crop: &[u8], filter: &IndexFilter) -> EnsembleOutcome {
        self.identify_with(crop, self.config.strategy, filter).await
    }

    /// Identify a crop with an explicit strategy.
    pub async fn identify_with(
        &self,
        crop: &[u8],
        strategy: MatchStrategy,
        filter: &IndexFilter,
    ) -> EnsembleOutcome {
        let start = Instant::now();
        let mut audit = Vec::new();

        let (decision, runs) = match strategy {
            MatchStrategy::Single => self.run_single(crop, filter, &mut audit).await,
            MatchStrategy::Consensus => self.run_consensus(crop, filter).await,
            MatchStrategy::Cascade => self.run_cascade(crop, filter, &mut audit).await,
        };

        for run in runs.iter().filter(|r| !r.is_ok()) {
            audit.push(format!(
                "model {} failed: {}",
                run.model,
                run.error.as_deref().unwrap_or_default()
            ));
        }

        let consolidated = consolidate(&runs, &self.config);
        let consolidated = match &self.verifier {
            Some(verifier) => {
                rerank(consolidated, crop, verifier.as_ref(), self.config.rerank_top_n).await
            }
            None => consolidated,
        };

        info!(
            subsystem = "ensemble",
            component = strategy.as_str(),
            op = "identify",
            decision = decision.kind(),
            models_run = runs.len(),
            models_failed = runs.iter().filter(|r| !r.is_ok()).count(),
            candidates = consolidated.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Ensemble decision"
        );

        EnsembleOutcome {
            strategy,
            decision,
            runs,
            consolidated,
            audit,
        }
    }

    /// Embed with a deadline, validate, and query one model's partition.
    async fn run_model(
        &self,
        embedder: &dyn Embedder,
        crop: &[u8],
        threshold: f32,
        filter: &IndexFilter,
    ) -> ModelRun {
        let model = embedder.model_name();
        let started = Instant::now();

        let raw = match tokio::time::timeout(self.embed_timeout, embedder.embed(crop)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.record_failure(model, e, started),
            Err(_) => {
                let e = Error::Timeout {
                    service: format!("embedding ({})", model),
                    secs: self.embed_timeout.as_secs(),
                };
                return self.record_failure(model, e, started);
            }
        };

        let embedding = match Embedding::new(model, raw) {
            Ok(embedding) => embedding,
            Err(e) => return self.record_failure(model, e, started),
        };

        let options = QueryOptions::new(self.config.top_k, threshold).filter(filter.clone());
        let hits = match self.index.query(model, embedding.vector(), &options).await {
            Ok(hits) => hits,
            Err(e) => return self.record_failure(model, e, started),
        };

        let matches: Vec<MatchCandidate> = hits
            .into_iter()
            .map(|hit| MatchCandidate::from_hit(model, hit))
            .collect();
        debug!(
            subsystem = "ensemble",
            component = "model",
            op = "query",
            model,
            matches = matches.len(),
            top_similarity = matches.first().map(|m| m.similarity),
            "Model run complete"
        );

        ModelRun {
            model: model.to_string(),
            matches,
            error: None,
            duration_ms: started.elapsed().as_millis() as u64,
            embedding: Some(embedding),
        }
    }

    fn record_failure(&self, model: &str, error: Error, started: Instant) -> ModelRun {
        warn!(
            subsystem = "ensemble",
            component = "model",
            op = "embed",
            model,
            error = %error,
            "Model failed, excluding from ensemble"
        );
        ModelRun::failed(model, &error, started)
    }

    async fn run_single(
        &self,
        crop: &[u8],
        filter: &IndexFilter,
        audit: &mut Vec<String>,
    ) -> (EnsembleDecision, Vec<ModelRun>) {
        let embedder = self
            .config
            .primary_model
            .as_deref()
            .and_then(|m| self.embedder(m))
            .or_else(|| self.embedders.first());

        let Some(embedder) = embedder else {
            audit.push("no embedders available".to_string());
            return (
                EnsembleDecision::NewIndividual {
                    requires_verification: true,
                },
                Vec::new(),
            );
        };

        let run = self
            .run_model(embedder.as_ref(), crop, self.config.threshold, filter)
            .await;
        let decision = match run.top() {
            Some(top) => EnsembleDecision::Identified {
                item_id: top.item_id,
                display_name: top.display_name.clone(),
                confidence: top.similarity,
                vote_count: 1,
                total_models: 1,
                deciding_model: Some(run.model.clone()),
            },
            None => EnsembleDecision::NewIndividual {
                requires_verification: true,
            },
        };
        (decision, vec![run])
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use reid_core::ItemMetadata;
    use reid_inference::mock::{MockEmbedder, MockVectors};

    pub const DIM: usize = 64;

    /// Enroll `item_id` for `model` with the base vector of `seed`.
    pub async fn enroll(
        index: &SimilarityIndex,
        model: &str,
        item_id: Uuid,
        seed: u64,
        name: &str,
    ) {
        index
            .store(
                item_id,
                model,
                MockVectors::generate_with_seed(seed, DIM),
                ItemMetadata {
                    display_name: Some(name.to_string()),
                    species: Some("Panthera tigris".to_string()),
                    location: None,
                },
            )
            .await
            .unwrap();
    }

    /// Embedder that answers `crop` with a vector at the given cosine to `seed`'s base.
    ///
    /// Index similarity is `(1 + cosine) / 2`, so cosine `c` yields similarity
    /// `(1 + c) / 2`.
    pub fn embedder_near(model: &str, crop: &[u8], seed: u64, cosine: f32) -> MockEmbedder {
        let base = MockVectors::generate_with_seed(seed, DIM);
        MockEmbedder::new(model, DIM).with_vector(
            crop.to_vec(),
            MockVectors::similar_to(&base, cosine, seed + 1000),
        )
    }

    pub fn cosine_for(similarity: f32) -> f32 {
        2.0 * similarity - 1.0
    }
}
