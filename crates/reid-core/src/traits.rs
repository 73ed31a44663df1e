//! Collaborator and storage traits.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::events::InvestigationEvent;
use crate::models::{
    DetectedSubject, EmbeddingInput, IndexFilter, NewVerificationEntry, StoredEmbedding,
    VerificationEntry, WebIntelReport,
};

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Finds animals in an image.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect subjects in the raw image bytes. Each subject carries its crop.
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectedSubject>>;
}

/// A single re-identification model.
///
/// One implementation per model; callers pick models through a registry
/// rather than probing capabilities at runtime.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one crop. The output is validated by the caller.
    async fn embed(&self, crop: &[u8]) -> Result<EmbeddingInput>;

    /// Declared dimensionality of the vectors this model produces.
    fn dimension(&self) -> usize;

    /// Model name, used as the index partition key.
    fn model_name(&self) -> &str;
}

/// Open-web lookup about an uploaded image.
#[async_trait]
pub trait WebIntelligence: Send + Sync {
    async fn search(&self, query: &str) -> Result<WebIntelReport>;
}

/// Produces the narrative report for an investigation.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Render structured findings for the given audience.
    async fn generate(&self, findings: &JsonValue, audience: &str) -> Result<String>;
}

/// Pairwise visual check of a crop against a stored individual.
#[async_trait]
pub trait VisualVerifier: Send + Sync {
    /// Score in [0, 1] that `crop` shows the individual `item_id`.
    async fn verify(&self, crop: &[u8], item_id: Uuid) -> Result<f32>;
}

// =============================================================================
// STORAGE TRAITS
// =============================================================================

/// Persistent approximate-nearest-neighbour store behind the similarity index.
#[async_trait]
pub trait AnnBackend: Send + Sync {
    /// Insert or replace the `(item_id, model)` record.
    async fn upsert(&self, record: &StoredEmbedding) -> Result<()>;

    /// Nearest records for `model`, as `(item_id, cosine_distance)` pairs
    /// ordered by ascending distance. Distances lie in [0, 2].
    async fn nearest(
        &self,
        model: &str,
        query: &[f32],
        k: usize,
        exclude: Option<Uuid>,
        filter: &IndexFilter,
    ) -> Result<Vec<(Uuid, f32)>>;

    /// Every persisted record, for hydrating the in-process store.
    async fn load_all(&self) -> Result<Vec<StoredEmbedding>>;
}

/// Outcome of an idempotent enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: Uuid,
    /// False when an open entry for the same entity already existed.
    pub created: bool,
}

/// Storage for the human-review queue.
#[async_trait]
pub trait VerificationRepository: Send + Sync {
    /// Insert a pending entry unless an open one exists for
    /// `(entity_type, entity_id)`; either way return the open entry's id.
    async fn insert_if_absent(&self, entry: NewVerificationEntry) -> Result<Enqueued>;

    async fn get(&self, id: Uuid) -> Result<Option<VerificationEntry>>;

    /// Open entries, highest priority first, then oldest first.
    async fn list_pending(&self, limit: i64) -> Result<Vec<VerificationEntry>>;
}

// =============================================================================
// EVENTS
// =============================================================================

/// Fire-and-forget sink for investigation progress events.
///
/// Implementations must not block and must swallow their own failures.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: InvestigationEvent);
}
