//! Similarity index over normalized embeddings.
//!
//! Records are partitioned by model: a query for model `m` only ever compares
//! against vectors produced by `m`. The in-process store is authoritative for
//! metadata and content hashes; an optional [`AnnBackend`] persists records
//! and serves nearest-neighbour queries. When the backend is absent or fails
//! a query, a linear scan over the in-process store answers instead, with the
//! same distance conversion so both paths rank identically.
//!
//! Writes are serialized per content hash and per item through keyed write
//! guards. The shared state lock is only held to read or apply a change, never
//! across backend I/O, so queries and unrelated writes proceed while a record
//! is being persisted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use reid_core::defaults::{MATCH_TOP_K, SIMILARITY_THRESHOLD};
use reid_core::{
    content_hash, distance_to_similarity, dot, new_v7, AnnBackend, Embedding, EmbeddingInput,
    Error, IndexFilter, IndexHit, ItemMetadata, Result, StoredEmbedding,
};

/// Query parameters.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum number of hits.
    pub k: usize,
    /// Minimum similarity, inclusive.
    pub threshold: f32,
    /// Item to leave out (e.g. the query's own record).
    pub exclude: Option<Uuid>,
    pub filter: IndexFilter,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            k: MATCH_TOP_K,
            threshold: SIMILARITY_THRESHOLD,
            exclude: None,
            filter: IndexFilter::default(),
        }
    }
}

impl QueryOptions {
    pub fn new(k: usize, threshold: f32) -> Self {
        Self {
            k,
            threshold,
            ..Default::default()
        }
    }

    pub fn exclude(mut self, item_id: Uuid) -> Self {
        self.exclude = Some(item_id);
        self
    }

    pub fn filter(mut self, filter: IndexFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Default)]
struct IndexState {
    /// Keyed by `(item_id, model)`.
    records: HashMap<(Uuid, String), StoredEmbedding>,
    /// Content hash -> item id.
    hashes: HashMap<String, Uuid>,
    /// Item id -> metadata of its most recent write.
    metadata: HashMap<Uuid, ItemMetadata>,
}

impl IndexState {
    fn insert(&mut self, record: StoredEmbedding) {
        if let Some(hash) = &record.content_hash {
            self.hashes.entry(hash.clone()).or_insert(record.item_id);
        }
        self.metadata.insert(record.item_id, record.metadata.clone());
        self.records
            .insert((record.item_id, record.model.clone()), record);
    }

    fn metadata(&self, item_id: Uuid) -> Option<&ItemMetadata> {
        self.metadata.get(&item_id)
    }
}

/// Keys a write guard can be taken on. Content hashes are always locked
/// before items.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WriteKey {
    Hash(String),
    Item(Uuid),
}

/// Embedding store with nearest-neighbour search.
pub struct SimilarityIndex {
    state: RwLock<IndexState>,
    backend: Option<Arc<dyn AnnBackend>>,
    writers: Mutex<HashMap<WriteKey, Arc<Mutex<()>>>>,
}

/// Held for the duration of one keyed write.
struct WriteGuard<'a> {
    index: &'a SimilarityIndex,
    key: WriteKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl WriteGuard<'_> {
    /// Release the key, dropping its lock entry when nobody else waits on it.
    async fn release(mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let lock = OwnedMutexGuard::mutex(&guard).clone();
        drop(guard);
        let mut writers = self.index.writers.lock().await;
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            writers.remove(&self.key);
        }
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SimilarityIndex {
    /// In-process index with no persistence; every query is a linear scan.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            backend: None,
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Index persisted to, and queried through, an ANN backend.
    pub fn with_backend(backend: Arc<dyn AnnBackend>) -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            backend: Some(backend),
            writers: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Load every persisted record into the in-process store.
    pub async fn hydrate(&self) -> Result<usize> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };
        let start = Instant::now();
        let records = backend.load_all().await?;
        let count = records.len();

        let mut state = self.state.write().await;
        for record in records {
            state.insert(record);
        }
        info!(
            subsystem = "index",
            component = "hydrate",
            op = "load_all",
            records = count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Similarity index hydrated"
        );
        Ok(count)
    }

    /// Store (or replace) the `(item_id, model)` embedding.
    pub async fn store(
        &self,
        item_id: Uuid,
        model: &str,
        embedding: impl Into<EmbeddingInput>,
        metadata: ItemMetadata,
    ) -> Result<()> {
        let embedding = Embedding::new(model, embedding)?;
        let item_guard = self.write_guard(WriteKey::Item(item_id)).await;
        let content_hash = self
            .state
            .read()
            .await
            .records
            .get(&(item_id, model.to_string()))
            .and_then(|r| r.content_hash.clone());
        let record = StoredEmbedding {
            item_id,
            model: model.to_string(),
            content_hash,
            vector: embedding.into_vector(),
            metadata,
        };
        let result = self.persist(record).await;
        item_guard.release().await;
        result
    }

    /// Store an embedding for an image, deduplicated by content hash.
    ///
    /// Known content returns its existing item id. A model that already has an
    /// embedding for that item is left untouched; a new model gets its record
    /// added under the same id.
    pub async fn store_image(
        &self,
        image: &[u8],
        model: &str,
        embedding: impl Into<EmbeddingInput>,
        metadata: ItemMetadata,
    ) -> Result<Uuid> {
        let embedding = Embedding::new(model, embedding)?;
        let hash = content_hash(image);

        // The hash guard makes the check and the insert atomic for this content.
        let hash_guard = self.write_guard(WriteKey::Hash(hash.clone())).await;
        let existing = {
            let state = self.state.read().await;
            state.hashes.get(&hash).map(|id| {
                (*id, state.records.contains_key(&(*id, model.to_string())))
            })
        };
        let item_id = match existing {
            Some((existing, true)) => {
                debug!(
                    subsystem = "index",
                    component = "dedup",
                    op = "store_image",
                    item_id = %existing,
                    model,
                    "Duplicate content, returning existing item"
                );
                hash_guard.release().await;
                return Ok(existing);
            }
            Some((existing, false)) => existing,
            None => new_v7(),
        };

        let item_guard = self.write_guard(WriteKey::Item(item_id)).await;
        let record = StoredEmbedding {
            item_id,
            model: model.to_string(),
            content_hash: Some(hash),
            vector: embedding.into_vector(),
            metadata,
        };
        let result = self.persist(record).await;
        item_guard.release().await;
        hash_guard.release().await;
        result.map(|()| item_id)
    }

    async fn write_guard(&self, key: WriteKey) -> WriteGuard<'_> {
        let lock = self
            .writers
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();
        WriteGuard {
            index: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Write through to the backend, then to memory. A backend failure leaves
    /// the in-process store unchanged. The caller holds the record's write guard.
    async fn persist(&self, record: StoredEmbedding) -> Result<()> {
        if let Some(backend) = &self.backend {
            backend.upsert(&record).await.map_err(|e| {
                Error::Storage(format!(
                    "failed to persist {} for model {}: {}",
                    record.item_id, record.model, e
                ))
            })?;
        }
        trace!(
            subsystem = "index",
            component = "store",
            op = "insert",
            item_id = %record.item_id,
            model = %record.model,
            "Stored embedding"
        );
        self.state.write().await.insert(record);
        Ok(())
    }

    /// Ranked hits for `embedding` among records of `model`.
    pub async fn query(
        &self,
        model: &str,
        embedding: impl Into<EmbeddingInput>,
        options: &QueryOptions,
    ) -> Result<Vec<IndexHit>> {
        let query = Embedding::new(model, embedding)?;
        if options.k == 0 {
            return Ok(Vec::new());
        }

        if let Some(backend) = &self.backend {
            match backend
                .nearest(
                    model,
                    query.vector(),
                    options.k,
                    options.exclude,
                    &options.filter,
                )
                .await
            {
                Ok(neighbours) => {
                    let state = self.state.read().await;
                    let hits = neighbours
                        .into_iter()
                        .map(|(item_id, distance)| IndexHit {
                            item_id,
                            similarity: distance_to_similarity(distance),
                            metadata: state.metadata(item_id).cloned().unwrap_or_default(),
                        })
                        .collect();
                    return Ok(rank(hits, options));
                }
                Err(e) => {
                    warn!(
                        subsystem = "index",
                        component = "ann",
                        op = "query",
                        model,
                        error = %e,
                        "ANN backend query failed, falling back to linear scan"
                    );
                }
            }
        }

        Ok(self.linear_scan(model, query.vector(), options).await)
    }

    async fn linear_scan(&self, model: &str, query: &[f32], options: &QueryOptions) -> Vec<IndexHit> {
        let state = self.state.read().await;
        let hits = state
            .records
            .values()
            .filter(|r| r.model == model && r.vector.len() == query.len())
            .filter(|r| options.exclude != Some(r.item_id))
            .filter(|r| options.filter.matches(&r.metadata))
            .map(|r| IndexHit {
                item_id: r.item_id,
                similarity: distance_to_similarity(1.0 - dot(query, &r.vector)),
                metadata: r.metadata.clone(),
            })
            .collect();
        rank(hits, options)
    }

    /// Number of stored `(item, model)` records.
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Whether an image with this content hash has been stored.
    pub async fn contains_hash(&self, hash: &str) -> bool {
        self.state.read().await.hashes.contains_key(hash)
    }

    /// Item id stored for this content hash.
    pub async fn item_for_hash(&self, hash: &str) -> Option<Uuid> {
        self.state.read().await.hashes.get(hash).copied()
    }

    pub async fn metadata(&self, item_id: Uuid) -> Option<ItemMetadata> {
        self.state.read().await.metadata(item_id).cloned()
    }
}

/// Threshold, sort (similarity desc, item id asc), truncate.
fn rank(mut hits: Vec<IndexHit>, options: &QueryOptions) -> Vec<IndexHit> {
    hits.retain(|h| h.similarity >= options.threshold);
    hits.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    hits.truncate(options.k);
    hits
}
