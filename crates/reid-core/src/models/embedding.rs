//! Embedding vectors, index records, and match candidates.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults::SUPPORTED_DIMENSIONS;
use crate::error::{Error, Result};
use crate::models::location::Coordinates;

/// Raw vector as produced by a model, before validation.
///
/// Models sometimes answer with a batch-shaped `[[..]]` array; that shape is
/// kept distinct so validation can reject it instead of silently flattening.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingInput {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl From<Vec<f32>> for EmbeddingInput {
    fn from(v: Vec<f32>) -> Self {
        EmbeddingInput::Flat(v)
    }
}

impl From<&[f32]> for EmbeddingInput {
    fn from(v: &[f32]) -> Self {
        EmbeddingInput::Flat(v.to_vec())
    }
}

impl From<Vec<Vec<f32>>> for EmbeddingInput {
    fn from(v: Vec<Vec<f32>>) -> Self {
        EmbeddingInput::Nested(v)
    }
}

impl EmbeddingInput {
    /// Parse a JSON array (or array of arrays) returned by a model endpoint.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| Error::Validation("embedding is not an array".to_string()))?;

        if items.iter().any(JsonValue::is_array) {
            let rows = items
                .iter()
                .map(json_floats)
                .collect::<Result<Vec<_>>>()?;
            return Ok(EmbeddingInput::Nested(rows));
        }
        Ok(EmbeddingInput::Flat(json_floats(value)?))
    }

    /// Number of axes in the input.
    pub fn rank(&self) -> usize {
        match self {
            EmbeddingInput::Flat(_) => 1,
            EmbeddingInput::Nested(_) => 2,
        }
    }
}

fn json_floats(value: &JsonValue) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| Error::Validation("embedding row is not an array".to_string()))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| Error::Validation(format!("non-numeric embedding value: {}", v)))
        })
        .collect()
}

/// Check that a vector can serve as an embedding.
///
/// Rejects rank != 1, empty, non-finite, and all-zero input. An unsupported
/// dimensionality is logged but accepted so unknown models remain usable.
pub fn validate_vector(input: &EmbeddingInput) -> Result<&[f32]> {
    let values = match input {
        EmbeddingInput::Flat(v) => v.as_slice(),
        EmbeddingInput::Nested(rows) => {
            return Err(Error::Validation(format!(
                "embedding must be 1-dimensional, got shape [{}, {}]",
                rows.len(),
                rows.first().map(Vec::len).unwrap_or(0)
            )))
        }
    };

    if values.is_empty() {
        return Err(Error::Validation("embedding is empty".to_string()));
    }
    if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
        return Err(Error::Validation(format!(
            "embedding contains non-finite value at index {}",
            pos
        )));
    }
    if values.iter().all(|v| *v == 0.0) {
        return Err(Error::Validation("embedding is all zeros".to_string()));
    }
    if !SUPPORTED_DIMENSIONS.contains(&values.len()) {
        tracing::warn!(
            subsystem = "index",
            component = "validation",
            dimension = values.len(),
            supported = ?SUPPORTED_DIMENSIONS,
            "Embedding dimensionality outside supported set"
        );
    }
    Ok(values)
}

/// Scale a vector to unit length. The caller guarantees a non-zero input.
///
/// The norm is accumulated in f64 so the squares of any finite f32 neither
/// overflow nor underflow.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v
        .iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return v.to_vec();
    }
    v.iter().map(|x| (f64::from(*x) / norm) as f32).collect()
}

/// Allowed deviation of a normalized vector's length from 1.
const UNIT_NORM_TOLERANCE: f32 = 1e-3;

fn is_unit_length(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite()) && (dot(v, v) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Dot product; equals cosine similarity for unit vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two arbitrary (non-zero) vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    dot(&l2_normalize(a), &l2_normalize(b))
}

/// Map a cosine distance in [0, 2] onto a similarity in [0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Serialize a vector as packed little-endian f32s.
pub fn encode_le(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`encode_le`].
pub fn decode_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Serialization(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// A validated, unit-length embedding tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    model: String,
    vector: Vec<f32>,
}

impl Embedding {
    /// Validate and normalize a raw model output.
    pub fn new(model: impl Into<String>, input: impl Into<EmbeddingInput>) -> Result<Self> {
        let input = input.into();
        let values = validate_vector(&input)?;
        let vector = l2_normalize(values);
        if !is_unit_length(&vector) {
            return Err(Error::Validation(
                "embedding cannot be normalized to unit length".to_string(),
            ));
        }
        Ok(Self {
            model: model.into(),
            vector,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn is_supported_dimension(&self) -> bool {
        SUPPORTED_DIMENSIONS.contains(&self.vector.len())
    }

    pub fn into_vector(self) -> Vec<f32> {
        self.vector
    }
}

/// Location carried by a stored record (where the individual was documented).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    /// Facility, sanctuary, or place name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Descriptive metadata attached to an index item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<RecordLocation>,
}

/// Restricts index queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexFilter {
    /// Only items of this species (case-insensitive).
    pub species: Option<String>,
}

impl IndexFilter {
    pub fn species(species: impl Into<String>) -> Self {
        Self {
            species: Some(species.into()),
        }
    }

    pub fn matches(&self, metadata: &ItemMetadata) -> bool {
        match (&self.species, &metadata.species) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        }
    }
}

/// One persisted `(item, model)` record of the similarity index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub item_id: Uuid,
    pub model: String,
    /// SHA-256 (hex) of the source image, when the item came from an image.
    pub content_hash: Option<String>,
    /// Unit-length vector.
    pub vector: Vec<f32>,
    pub metadata: ItemMetadata,
}

/// Ranked query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub item_id: Uuid,
    pub similarity: f32,
    pub metadata: ItemMetadata,
}

/// A model's proposal that the query subject is a known item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub item_id: Uuid,
    pub model: String,
    /// Similarity in [0, 1].
    pub similarity: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Metadata of the target, used for location hints.
    #[serde(default)]
    pub metadata: ItemMetadata,
}

impl MatchCandidate {
    pub fn from_hit(model: &str, hit: IndexHit) -> Self {
        Self {
            item_id: hit.item_id,
            model: model.to_string(),
            similarity: hit.similarity,
            display_name: hit.metadata.display_name.clone(),
            metadata: hit.metadata,
        }
    }
}

/// Cross-model aggregate for a single target item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedCandidate {
    pub item_id: Uuid,
    /// Weighted-average similarity over the models that matched this item.
    pub similarity: f32,
    pub model_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Score assigned by visual re-ranking, when it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_similarity_is_one() {
        let v = vec![0.3, -1.2, 4.5, 0.0, 7.25];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);

        let e = Embedding::new("m", v).unwrap();
        assert!((dot(e.vector(), e.vector()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_extreme_magnitudes_normalize_to_unit_length() {
        let huge = Embedding::new("m", vec![1e20_f32, 2e20, 3e20, 4e20]).unwrap();
        assert!((dot(huge.vector(), huge.vector()) - 1.0).abs() < 1e-5);
        let scale = 30.0_f32.sqrt();
        for (i, x) in huge.vector().iter().enumerate() {
            assert!((x - (i + 1) as f32 / scale).abs() < 1e-5);
        }

        let tiny = Embedding::new("m", vec![1e-25_f32; 4]).unwrap();
        assert!((dot(tiny.vector(), tiny.vector()) - 1.0).abs() < 1e-5);
        assert!(tiny.vector().iter().all(|x| (x - 0.5).abs() < 1e-6));

        let subnormal = Embedding::new("m", vec![f32::from_bits(1), 0.0]).unwrap();
        assert_eq!(subnormal.vector(), &[1.0, 0.0]);

        assert!((cosine_similarity(&[f32::MAX, f32::MAX], &[1.0, 1.0]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embedding_is_normalized() {
        let e = Embedding::new("m", vec![3.0, 4.0]).unwrap();
        assert!((e.vector()[0] - 0.6).abs() < 1e-6);
        assert!((e.vector()[1] - 0.8).abs() < 1e-6);
        assert_eq!(e.dimension(), 2);
        assert!(!e.is_supported_dimension());
    }

    #[test]
    fn test_rejects_nested_input() {
        let nested = vec![vec![0.1_f32, 0.2], vec![0.3, 0.4]];
        let err = Embedding::new("m", nested).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("1-dimensional"));
    }

    #[test]
    fn test_rejects_all_zero() {
        let err = Embedding::new("m", vec![0.0_f32; 768]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        assert!(Embedding::new("m", Vec::<f32>::new()).is_err());
        assert!(Embedding::new("m", vec![1.0, f32::NAN]).is_err());
        assert!(Embedding::new("m", vec![f32::INFINITY, 1.0]).is_err());
    }

    #[test]
    fn test_accepts_unsupported_dimension() {
        let e = Embedding::new("m", vec![0.5_f32; 100]).unwrap();
        assert_eq!(e.dimension(), 100);
    }

    #[test]
    fn test_from_json_flat_and_nested() {
        let flat = EmbeddingInput::from_json(&serde_json::json!([0.1, 0.2, 0.3])).unwrap();
        assert_eq!(flat.rank(), 1);

        let nested = EmbeddingInput::from_json(&serde_json::json!([[0.1, 0.2]])).unwrap();
        assert_eq!(nested.rank(), 2);
        assert!(validate_vector(&nested).is_err());

        assert!(EmbeddingInput::from_json(&serde_json::json!({"v": 1})).is_err());
        assert!(EmbeddingInput::from_json(&serde_json::json!(["a"])).is_err());
    }

    #[test]
    fn test_distance_to_similarity() {
        assert_eq!(distance_to_similarity(0.0), 1.0);
        assert_eq!(distance_to_similarity(1.0), 0.5);
        assert_eq!(distance_to_similarity(2.0), 0.0);
        assert_eq!(distance_to_similarity(2.5), 0.0);
    }

    #[test]
    fn test_le_encoding() {
        let v = vec![1.0_f32, -0.5, 0.25];
        let bytes = encode_le(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &1.0_f32.to_le_bytes());
        assert_eq!(decode_le(&bytes).unwrap(), v);
        assert!(decode_le(&bytes[..5]).is_err());
    }

    #[test]
    fn test_index_filter_species() {
        let meta = ItemMetadata {
            species: Some("Panthera tigris".to_string()),
            ..Default::default()
        };
        assert!(IndexFilter::default().matches(&meta));
        assert!(IndexFilter::species("panthera TIGRIS").matches(&meta));
        assert!(!IndexFilter::species("Lynx lynx").matches(&meta));
        assert!(!IndexFilter::species("Lynx lynx").matches(&ItemMetadata::default()));
    }
}
