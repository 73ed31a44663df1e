//! Detector and web-intelligence outputs.

use serde::{Deserialize, Serialize};

/// Pixel-space bounding box (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One animal found in an uploaded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSubject {
    /// Position within the image's detection list.
    pub index: usize,
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    /// Encoded crop handed to the embedders. Never serialized.
    #[serde(skip)]
    pub crop: Vec<u8>,
}

/// Source cited by a web-intelligence answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

/// Web-intelligence summary for an uploaded image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebIntelReport {
    pub summary: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl WebIntelReport {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty() && self.citations.is_empty()
    }
}
