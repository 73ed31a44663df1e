//! Location synthesis: rank location hints from every source and pick one.
//!
//! Each hint is scored additively:
//!
//! ```text
//! score = type_weight + tier_weight
//!       + coordinate_bonus        (valid coordinates present)
//!       + match_bonus             (matched records only, by similarity)
//! ```
//!
//! The highest score becomes the primary location, the first seen winning a
//! tie. Everything else is kept as ranked alternatives.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use reid_core::defaults::{LOCATION_MATCH_STRONG, LOCATION_MATCH_WEAK};
use reid_core::{ConfidenceTier, Coordinates, LocationSource, LocationSourceType, MatchCandidate};

/// Scoring weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationScoring {
    pub geo_tag: u32,
    pub matched_record: u32,
    pub user_text: u32,
    pub free_text_mention: u32,
    pub tier_high: u32,
    pub tier_medium: u32,
    pub tier_low: u32,
    pub coordinate_bonus: u32,
    /// Added for matched records with similarity above [`LOCATION_MATCH_STRONG`].
    pub strong_match_bonus: u32,
    /// Added for matched records with similarity above [`LOCATION_MATCH_WEAK`].
    pub weak_match_bonus: u32,
}

impl Default for LocationScoring {
    fn default() -> Self {
        Self {
            geo_tag: 40,
            matched_record: 30,
            user_text: 20,
            free_text_mention: 10,
            tier_high: 30,
            tier_medium: 20,
            tier_low: 10,
            coordinate_bonus: 15,
            strong_match_bonus: 20,
            weak_match_bonus: 10,
        }
    }
}

/// A hint with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLocation {
    pub source: LocationSource,
    pub score: u32,
}

/// Outcome of location synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSynthesis {
    pub primary: ScoredLocation,
    /// Remaining hints, highest score first.
    pub alternatives: Vec<ScoredLocation>,
}

impl LocationSynthesis {
    /// The "no information" result.
    pub fn unknown() -> Self {
        Self {
            primary: ScoredLocation {
                source: LocationSource::unknown(),
                score: 0,
            },
            alternatives: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.primary.source.source_type == LocationSourceType::Unknown
    }
}

impl LocationScoring {
    pub fn score(&self, source: &LocationSource) -> u32 {
        let type_weight = match source.source_type {
            LocationSourceType::GeoTag => self.geo_tag,
            LocationSourceType::MatchedRecord => self.matched_record,
            LocationSourceType::UserText => self.user_text,
            LocationSourceType::FreeTextMention => self.free_text_mention,
            LocationSourceType::Unknown => 0,
        };
        let tier_weight = match source.confidence {
            ConfidenceTier::High => self.tier_high,
            ConfidenceTier::Medium => self.tier_medium,
            ConfidenceTier::Low => self.tier_low,
            ConfidenceTier::None => 0,
        };
        let coordinate_bonus = match source.coordinates {
            Some(c) if c.is_valid() => self.coordinate_bonus,
            _ => 0,
        };
        let match_bonus = match (source.source_type, source.match_similarity) {
            (LocationSourceType::MatchedRecord, Some(s)) if s > LOCATION_MATCH_STRONG => {
                self.strong_match_bonus
            }
            (LocationSourceType::MatchedRecord, Some(s)) if s > LOCATION_MATCH_WEAK => {
                self.weak_match_bonus
            }
            _ => 0,
        };
        type_weight + tier_weight + coordinate_bonus + match_bonus
    }

    /// Score every source and choose the primary.
    pub fn synthesize(&self, sources: &[LocationSource]) -> LocationSynthesis {
        if sources.is_empty() {
            return LocationSynthesis::unknown();
        }

        let mut scored: Vec<ScoredLocation> = sources
            .iter()
            .map(|source| ScoredLocation {
                score: self.score(source),
                source: source.clone(),
            })
            .collect();

        let mut best = 0;
        for (i, candidate) in scored.iter().enumerate() {
            if candidate.score > scored[best].score {
                best = i;
            }
        }
        let primary = scored.remove(best);
        // Stable sort keeps input order among equal scores.
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        debug!(
            subsystem = "location",
            component = "synthesis",
            op = "synthesize",
            sources = sources.len(),
            primary_type = %primary.source.source_type,
            primary_score = primary.score,
            "Location synthesized"
        );

        LocationSynthesis {
            primary,
            alternatives: scored,
        }
    }
}

/// [`LocationScoring::synthesize`] with default weights.
pub fn synthesize(sources: &[LocationSource]) -> LocationSynthesis {
    LocationScoring::default().synthesize(sources)
}

/// GPS tag from the upload's metadata. Invalid coordinates yield nothing.
pub fn sources_from_geotag(coordinates: Option<Coordinates>) -> Option<LocationSource> {
    coordinates
        .filter(Coordinates::is_valid)
        .map(|c| {
            LocationSource::new(LocationSourceType::GeoTag, ConfidenceTier::High).with_coordinates(c)
        })
}

/// Location text the user typed alongside the upload.
pub fn sources_from_user_text(text: Option<&str>) -> Option<LocationSource> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            LocationSource::new(LocationSourceType::UserText, ConfidenceTier::Medium).with_name(t)
        })
}

/// Locations stored on matched records. The tier follows the match similarity.
pub fn sources_from_matches<'a>(
    matches: impl IntoIterator<Item = &'a MatchCandidate>,
) -> Vec<LocationSource> {
    let mut sources: Vec<LocationSource> = Vec::new();
    for candidate in matches {
        let Some(location) = &candidate.metadata.location else {
            continue;
        };
        if location.coordinates.is_none() && location.name.is_none() {
            continue;
        }
        let tier = if candidate.similarity > LOCATION_MATCH_STRONG {
            ConfidenceTier::High
        } else if candidate.similarity > LOCATION_MATCH_WEAK {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        };
        let mut source = LocationSource::new(LocationSourceType::MatchedRecord, tier)
            .with_match_similarity(candidate.similarity);
        source.coordinates = location.coordinates;
        source.name = location.name.clone();

        // One hint per place; several models matching the same record would
        // otherwise repeat it.
        match sources
            .iter_mut()
            .find(|s| s.name == source.name && s.coordinates == source.coordinates)
        {
            Some(existing) if existing.match_similarity < source.match_similarity => {
                *existing = source
            }
            Some(_) => {}
            None => sources.push(source),
        }
    }
    sources
}

static MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:[Ii]n|[Nn]ear|[Aa]t)\s+((?:the\s+)?[A-Z][\w'-]*(?:\s+(?:of\s+|de\s+)?[A-Z][\w'-]*)*)",
    )
    .expect("mention pattern is valid")
});

/// Place names mentioned in free text ("seen near Kruger National Park").
/// Each distinct name becomes a low-confidence hint.
pub fn extract_mentions(text: &str) -> Vec<LocationSource> {
    let mut names: Vec<String> = Vec::new();
    for capture in MENTION.captures_iter(text) {
        let Some(name) = capture.get(1) else { continue };
        let name = name.as_str().trim_start_matches("the ").trim().to_string();
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    }
    names
        .into_iter()
        .map(|name| {
            LocationSource::new(LocationSourceType::FreeTextMention, ConfidenceTier::Low)
                .with_name(name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reid_core::{ItemMetadata, RecordLocation};
    use uuid::Uuid;

    fn matched(similarity: f32, name: &str) -> MatchCandidate {
        MatchCandidate {
            item_id: Uuid::new_v4(),
            model: "m".to_string(),
            similarity,
            display_name: None,
            metadata: ItemMetadata {
                location: Some(RecordLocation {
                    coordinates: None,
                    name: Some(name.to_string()),
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_geotag_beats_user_text() {
        let sources = vec![
            sources_from_user_text(Some("Serengeti")).unwrap(),
            sources_from_geotag(Some(Coordinates::new(-2.33, 34.83))).unwrap(),
        ];
        let result = synthesize(&sources);
        assert_eq!(result.primary.source.source_type, LocationSourceType::GeoTag);
        // 40 + 30 + 15
        assert_eq!(result.primary.score, 85);
        assert_eq!(result.alternatives.len(), 1);
        assert_eq!(result.alternatives[0].score, 40);
    }

    #[test]
    fn test_no_sources_is_unknown() {
        let result = synthesize(&[]);
        assert!(result.is_unknown());
        assert_eq!(result.primary.score, 0);
        assert_eq!(result.primary.source.confidence, ConfidenceTier::None);
        assert!(result.alternatives.is_empty());
    }

    #[test]
    fn test_match_bonus_thresholds() {
        let scoring = LocationScoring::default();
        let strong = sources_from_matches(&[matched(0.95, "A")]).remove(0);
        let weak = sources_from_matches(&[matched(0.85, "B")]).remove(0);
        let none = sources_from_matches(&[matched(0.78, "C")]).remove(0);
        assert_eq!(scoring.score(&strong), 30 + 30 + 20);
        assert_eq!(scoring.score(&weak), 30 + 20 + 10);
        assert_eq!(scoring.score(&none), 30 + 10);
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let text = |name: &str| {
            LocationSource::new(LocationSourceType::UserText, ConfidenceTier::Medium).with_name(name)
        };
        let result = synthesize(&[text("A"), text("B"), text("C")]);
        assert_eq!(result.primary.source.name.as_deref(), Some("A"));
        let alts: Vec<_> = result
            .alternatives
            .iter()
            .map(|s| s.source.name.clone().unwrap())
            .collect();
        assert_eq!(alts, vec!["B", "C"]);
    }

    #[test]
    fn test_invalid_coordinates_get_no_bonus() {
        assert!(sources_from_geotag(Some(Coordinates::new(120.0, 0.0))).is_none());
        let src = LocationSource::new(LocationSourceType::UserText, ConfidenceTier::Low)
            .with_coordinates(Coordinates::new(f64::NAN, 0.0));
        assert_eq!(LocationScoring::default().score(&src), 30);
    }

    #[test]
    fn test_matches_deduplicated_by_place() {
        let sources =
            sources_from_matches(&[matched(0.82, "Ranthambore"), matched(0.93, "Ranthambore")]);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].confidence, ConfidenceTier::High);
        assert_eq!(sources[0].match_similarity, Some(0.93));
    }

    #[test]
    fn test_extract_mentions() {
        let text = "The tigress was photographed near Ranthambore National Park in 2019, \
                    later seen at the Bandhavgarh reserve and near ranthambore national park.";
        let names: Vec<String> = extract_mentions(text)
            .into_iter()
            .map(|s| s.name.unwrap())
            .collect();
        assert_eq!(names, vec!["Ranthambore National Park", "Bandhavgarh"]);
        assert!(extract_mentions("nothing to see here").is_empty());
    }

    #[test]
    fn test_user_text_blank_ignored() {
        assert!(sources_from_user_text(Some("   ")).is_none());
        assert!(sources_from_user_text(None).is_none());
    }
}
