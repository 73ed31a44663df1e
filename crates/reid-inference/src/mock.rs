//! Mock collaborators for deterministic testing.
//!
//! Enabled by the `mock` feature so downstream crates can drive the ensemble
//! and the orchestrator without an inference service.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use reid_inference::mock::{MockEmbedder, MockVectors};
//!
//! let base = MockVectors::generate_with_seed(7, 768);
//! let embedder = MockEmbedder::new("clip-vit-l14", 768)
//!     .with_vector(b"crop-a".to_vec(), base.clone());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use reid_core::{
    DetectedSubject, Detector, Embedder, EmbeddingInput, Error, ReportGenerator, Result,
    VisualVerifier, WebIntelReport, WebIntelligence,
};

/// Deterministic vector construction.
pub struct MockVectors;

impl MockVectors {
    /// Pseudo-random unit vector from a seed.
    pub fn generate_with_seed(seed: u64, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        let mut state = seed;

        // Simple LCG for deterministic pseudo-random values
        for item in vec.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *item = ((state >> 33) % 1000) as f32 / 1000.0 - 0.5;
        }

        normalize(&mut vec);
        vec
    }

    /// Unit vector whose cosine similarity with `base` is exactly `similarity`
    /// (up to float error). `seed` picks the orthogonal direction.
    pub fn similar_to(base: &[f32], similarity: f32, seed: u64) -> Vec<f32> {
        let mut base = base.to_vec();
        normalize(&mut base);

        // Gram-Schmidt: strip the base component from a random direction.
        let mut orth = Self::generate_with_seed(seed, base.len());
        let proj: f32 = orth.iter().zip(&base).map(|(a, b)| a * b).sum();
        for (o, b) in orth.iter_mut().zip(&base) {
            *o -= proj * b;
        }
        normalize(&mut orth);

        let s = similarity.clamp(-1.0, 1.0);
        let t = (1.0 - s * s).max(0.0).sqrt();
        base.iter().zip(&orth).map(|(b, o)| s * b + t * o).collect()
    }

    /// Stable seed derived from bytes (FNV-1a).
    pub fn seed_for(bytes: &[u8]) -> u64 {
        bytes.iter().fold(0xcbf29ce484222325, |acc, b| {
            (acc ^ *b as u64).wrapping_mul(0x100000001b3)
        })
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Scripted output for a specific crop.
#[derive(Debug, Clone)]
pub enum MockOutput {
    Vector(Vec<f32>),
    Nested(Vec<Vec<f32>>),
    Fail(String),
}

/// Mock [`Embedder`] with per-crop scripted outputs.
///
/// Unscripted crops get a deterministic vector seeded from the crop bytes.
#[derive(Clone)]
pub struct MockEmbedder {
    name: String,
    dimension: usize,
    outputs: Arc<HashMap<Vec<u8>, MockOutput>>,
    fail_all: Option<String>,
    latency_ms: u64,
    failure_rate: f64,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedder {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            outputs: Arc::new(HashMap::new()),
            fail_all: None,
            latency_ms: 0,
            failure_rate: 0.0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_output(mut self, crop: impl Into<Vec<u8>>, output: MockOutput) -> Self {
        Arc::make_mut(&mut self.outputs).insert(crop.into(), output);
        self
    }

    pub fn with_vector(self, crop: impl Into<Vec<u8>>, vector: Vec<f32>) -> Self {
        self.with_output(crop, MockOutput::Vector(vector))
    }

    /// Fail every call with an external-service error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_all = Some(message.into());
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set failure rate (0.0 - 1.0) for testing error handling.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Number of `embed` calls made so far (shared across clones).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        use rand::Rng;
        self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, crop: &[u8]) -> Result<EmbeddingInput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        if let Some(message) = &self.fail_all {
            return Err(Error::external("embedding", message.clone()));
        }
        if self.should_fail() {
            return Err(Error::external("embedding", "simulated failure"));
        }
        match self.outputs.get(crop) {
            Some(MockOutput::Vector(v)) => Ok(EmbeddingInput::Flat(v.clone())),
            Some(MockOutput::Nested(rows)) => Ok(EmbeddingInput::Nested(rows.clone())),
            Some(MockOutput::Fail(message)) => Err(Error::external("embedding", message.clone())),
            None => Ok(EmbeddingInput::Flat(MockVectors::generate_with_seed(
                MockVectors::seed_for(crop),
                self.dimension,
            ))),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Mock [`Detector`] returning a fixed subject list.
#[derive(Clone, Default)]
pub struct MockDetector {
    subjects: Vec<DetectedSubject>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockDetector {
    pub fn new(subjects: Vec<DetectedSubject>) -> Self {
        Self {
            subjects,
            ..Default::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for MockDetector {
    async fn detect(&self, _image: &[u8]) -> Result<Vec<DetectedSubject>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(message) => Err(Error::external("detection", message.clone())),
            None => Ok(self.subjects.clone()),
        }
    }
}

/// Mock [`WebIntelligence`] returning a fixed report.
#[derive(Clone, Default)]
pub struct MockWebIntelligence {
    report: WebIntelReport,
    failure: Option<String>,
    latency_ms: u64,
}

impl MockWebIntelligence {
    pub fn new(report: WebIntelReport) -> Self {
        Self {
            report,
            ..Default::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

#[async_trait]
impl WebIntelligence for MockWebIntelligence {
    async fn search(&self, _query: &str) -> Result<WebIntelReport> {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
        match &self.failure {
            Some(message) => Err(Error::external("web_intel", message.clone())),
            None => Ok(self.report.clone()),
        }
    }
}

/// Mock [`ReportGenerator`] returning fixed text.
#[derive(Clone)]
pub struct MockReportGenerator {
    text: String,
    failure: Option<String>,
}

impl MockReportGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failure: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            failure: Some(message.into()),
        }
    }
}

#[async_trait]
impl ReportGenerator for MockReportGenerator {
    async fn generate(&self, _findings: &JsonValue, audience: &str) -> Result<String> {
        match &self.failure {
            Some(message) => Err(Error::external("report", message.clone())),
            None => Ok(format!("[{}] {}", audience, self.text)),
        }
    }
}

/// Mock [`VisualVerifier`] with per-item scores.
#[derive(Clone, Default)]
pub struct MockVisualVerifier {
    scores: HashMap<Uuid, f32>,
    default_score: f32,
    failure: Option<String>,
}

impl MockVisualVerifier {
    pub fn new(default_score: f32) -> Self {
        Self {
            default_score,
            ..Default::default()
        }
    }

    pub fn with_score(mut self, item_id: Uuid, score: f32) -> Self {
        self.scores.insert(item_id, score);
        self
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl VisualVerifier for MockVisualVerifier {
    async fn verify(&self, _crop: &[u8], item_id: Uuid) -> Result<f32> {
        match &self.failure {
            Some(message) => Err(Error::external("visual_verifier", message.clone())),
            None => Ok(*self.scores.get(&item_id).unwrap_or(&self.default_score)),
        }
    }
}
