//! Location hint types.

use serde::{Deserialize, Serialize};

/// WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within ±90 and longitude within ±180.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Where a location hint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSourceType {
    /// GPS tag embedded in the uploaded image.
    GeoTag,
    /// Location stored on a matched index record.
    MatchedRecord,
    /// Free text the user supplied with the upload.
    UserText,
    /// Place name mentioned in web-intelligence text.
    FreeTextMention,
    /// Sentinel for "no information".
    Unknown,
}

impl std::fmt::Display for LocationSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GeoTag => write!(f, "geo_tag"),
            Self::MatchedRecord => write!(f, "matched_record"),
            Self::UserText => write!(f, "user_text"),
            Self::FreeTextMention => write!(f, "free_text_mention"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Confidence tier attached to a location hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    #[default]
    None,
}

/// A single location hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSource {
    pub source_type: LocationSourceType,
    pub confidence: ConfidenceTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    /// Facility or place name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Similarity of the match that produced this hint (matched records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_similarity: Option<f32>,
}

impl LocationSource {
    pub fn new(source_type: LocationSourceType, confidence: ConfidenceTier) -> Self {
        Self {
            source_type,
            confidence,
            coordinates: None,
            name: None,
            match_similarity: None,
        }
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_match_similarity(mut self, similarity: f32) -> Self {
        self.match_similarity = Some(similarity);
        self
    }

    /// The "no location information" sentinel.
    pub fn unknown() -> Self {
        Self::new(LocationSourceType::Unknown, ConfidenceTier::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_validity() {
        assert!(Coordinates::new(-2.33, 34.83).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, -181.0).is_valid());
        assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_source_builder() {
        let src = LocationSource::new(LocationSourceType::MatchedRecord, ConfidenceTier::Medium)
            .with_name("Kruger NP")
            .with_match_similarity(0.93);
        assert_eq!(src.name.as_deref(), Some("Kruger NP"));
        assert_eq!(src.match_similarity, Some(0.93));
        assert!(src.coordinates.is_none());
    }

    #[test]
    fn test_source_type_serialization() {
        let json = serde_json::to_string(&LocationSourceType::FreeTextMention).unwrap();
        assert_eq!(json, "\"free_text_mention\"");
        assert_eq!(LocationSourceType::GeoTag.to_string(), "geo_tag");
    }
}
