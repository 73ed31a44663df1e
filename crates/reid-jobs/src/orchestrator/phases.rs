//! Phase implementations. Each turns the request and current state into a
//! [`PhaseUpdate`]; none of them return errors.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use reid_core::{
    content_hash, new_v7, Error, IndexFilter, InvestigationEvent, ItemMetadata, MatchCandidate,
    Phase, RecordLocation, Result,
};
use reid_search::location::{
    extract_mentions, sources_from_geotag, sources_from_matches, sources_from_user_text,
    synthesize,
};
use reid_search::{EnsembleDecision, LocationSynthesis};

use super::state::{InvestigationState, PhaseUpdate, QueuedReview, SubjectMatch};
use super::{InvestigationRequest, Orchestrator};
use crate::gatekeeper::{ENTITY_DISAGREEMENT, ENTITY_INDIVIDUAL};

/// Await `fut` with a deadline, mapping expiry to [`Error::Timeout`].
async fn with_timeout<T>(
    service: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            service: service.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

pub(super) fn upload_parse(request: &InvestigationRequest) -> PhaseUpdate {
    let mut update = PhaseUpdate::new(Phase::UploadParse);
    if request.image.is_empty() {
        return update.error("uploaded image is empty");
    }

    let hash = content_hash(&request.image);
    update = update.reason(format!(
        "accepted image of {} bytes (sha256 {})",
        request.image.len(),
        &hash[..12]
    ));
    update.content_hash = Some(hash);

    match request.geotag {
        Some(coordinates) if !coordinates.is_valid() => {
            update = update.reason(format!(
                "ignored out-of-range geotag ({}, {})",
                coordinates.latitude, coordinates.longitude
            ));
        }
        geotag => {
            if let Some(source) = sources_from_geotag(geotag) {
                update = update.reason("image carries a geotag");
                update.location_sources.push(source);
            }
        }
    }
    if let Some(source) = sources_from_user_text(request.location_text.as_deref()) {
        update = update.reason("user supplied a location");
        update.location_sources.push(source);
    }
    update
}

/// Free-text query sent to the web intelligence service.
fn web_query(request: &InvestigationRequest) -> String {
    let subject = request.species_hint.as_deref().unwrap_or("wild animal");
    match request.location_text.as_deref().map(str::trim) {
        Some(place) if !place.is_empty() => format!("{} individual sighting near {}", subject, place),
        _ => format!("{} individual sighting", subject),
    }
}

/// Metadata recorded with an enrolled crop.
fn enrollment_metadata(
    request: &InvestigationRequest,
    species: Option<&str>,
    location: Option<&LocationSynthesis>,
) -> ItemMetadata {
    let location = location.filter(|l| !l.is_unknown()).map(|l| RecordLocation {
        coordinates: l.primary.source.coordinates,
        name: l.primary.source.name.clone(),
    });
    ItemMetadata {
        display_name: None,
        species: request
            .species_hint
            .clone()
            .or_else(|| species.map(str::to_string)),
        location,
    }
}

impl Orchestrator {
    pub(super) async fn web_intel_phase(&self, request: &InvestigationRequest) -> PhaseUpdate {
        if !self.config.web_intel_enabled {
            return PhaseUpdate::disabled(Phase::WebIntel, "web intelligence disabled");
        }
        let Some(web_intel) = &self.web_intel else {
            return PhaseUpdate::disabled(Phase::WebIntel, "no web intelligence service configured");
        };

        let query = web_query(request);
        let result = with_timeout(
            "web_intel",
            self.config.web_intel_timeout,
            web_intel.search(&query),
        )
        .await;

        let mut update = PhaseUpdate::new(Phase::WebIntel);
        match result {
            Ok(report) => {
                let mentions = extract_mentions(&report.summary);
                update = update.reason(format!(
                    "web search returned {} citation(s) and {} place mention(s)",
                    report.citations.len(),
                    mentions.len()
                ));
                update.location_sources = mentions;
                update.web_intel = Some(report);
                update
            }
            Err(e) => update.error(format!("web intelligence failed: {}", e)),
        }
    }

    pub(super) async fn detect_phase(&self, request: &InvestigationRequest) -> PhaseUpdate {
        let result = with_timeout(
            "detector",
            self.config.detect_timeout,
            self.detector.detect(&request.image),
        )
        .await;

        let update = PhaseUpdate::new(Phase::Detect);
        match result {
            Ok(mut subjects) => {
                // Detectors may omit the crop for whole-frame subjects.
                for subject in subjects.iter_mut().filter(|s| s.crop.is_empty()) {
                    subject.crop = request.image.clone();
                }
                let update = if subjects.is_empty() {
                    update.reason("no animals detected")
                } else {
                    update.reason(format!("detected {} subject(s)", subjects.len()))
                };
                PhaseUpdate {
                    subjects: Some(subjects),
                    ..update
                }
            }
            Err(e) => update.error(format!("detection failed: {}", e)),
        }
    }

    pub(super) async fn match_phase(
        &self,
        request: &InvestigationRequest,
        state: &InvestigationState,
    ) -> PhaseUpdate {
        if state.subjects.is_empty() {
            return PhaseUpdate::disabled(Phase::Match, "no subjects to match");
        }
        if self.engine.embedders().is_empty() {
            return PhaseUpdate::new(Phase::Match).error("no re-identification models configured");
        }

        let strategy = request.strategy.unwrap_or(self.engine.config().strategy);
        let filter = match &request.species_hint {
            Some(species) => IndexFilter::species(species.clone()),
            None => IndexFilter::default(),
        };

        let mut update = PhaseUpdate::new(Phase::Match);
        let mut matches = Vec::with_capacity(state.subjects.len());
        for subject in &state.subjects {
            let outcome = self.engine.identify_with(&subject.crop, strategy, &filter).await;

            if !outcome.runs.is_empty() && outcome.runs.iter().all(|r| !r.is_ok()) {
                update = update.error(format!(
                    "all models failed for subject {}",
                    subject.index
                ));
            }
            update = update.reason(describe_decision(subject.index, &outcome.decision));
            for line in &outcome.audit {
                update = update.reason(format!("subject {}: {}", subject.index, line));
            }
            matches.push(SubjectMatch {
                subject_index: subject.index,
                outcome,
            });
        }
        update.matches = Some(matches);
        update
    }

    pub(super) async fn report_phase(&self, state: &InvestigationState) -> PhaseUpdate {
        let Some(generator) = &self.report else {
            return PhaseUpdate::disabled(Phase::Report, "no report generator configured");
        };

        let findings = json!({
            "investigation_id": state.id(),
            "subjects": state.subjects,
            "matches": state.matches,
            "location_sources": state.location_sources,
            "web_intel": state.web_intel,
        });
        let audience = self.config.report_audience.as_str();
        let result = with_timeout(
            "report",
            self.config.report_timeout,
            generator.generate(&findings, audience),
        )
        .await;

        let update = PhaseUpdate::new(Phase::Report);
        match result {
            Ok(text) => PhaseUpdate {
                report: Some(text),
                ..update.reason(format!("generated {} report", audience))
            },
            Err(e) => update.error(format!("report generation failed: {}", e)),
        }
    }

    /// Location synthesis and review routing. Skipped for failed or cancelled
    /// investigations.
    pub(super) async fn complete_phase(
        &self,
        request: &InvestigationRequest,
        state: &InvestigationState,
    ) -> PhaseUpdate {
        let mut update = PhaseUpdate::new(Phase::Complete);
        if !state.is_running() {
            return update.reason(format!("finished as {}", state.status()));
        }

        let mut sources = state.location_sources.clone();
        sources.extend(sources_from_matches(identified_matches(&state.matches)));
        let location = synthesize(&sources);
        update = if location.is_unknown() {
            update.reason("no usable location hints")
        } else {
            update.reason(format!(
                "primary location from {:?} hint (score {})",
                location.primary.source.source_type, location.primary.score
            ))
        };

        for subject_match in state.matches.iter().filter(|m| m.outcome.decision.needs_review()) {
            let Some(subject) = state
                .subjects
                .iter()
                .find(|s| s.index == subject_match.subject_index)
            else {
                continue;
            };
            // A disputed crop is reviewed against the leading known individual
            // and stays out of the index until a human settles it.
            let leading = match &subject_match.outcome.decision {
                EnsembleDecision::Disagreement { candidates } => {
                    candidates.first().map(|c| c.item_id)
                }
                _ => None,
            };
            let enrolled = match leading {
                Some(item_id) => Ok(Some(item_id)),
                None => {
                    let metadata =
                        enrollment_metadata(request, subject.species.as_deref(), Some(&location));
                    self.enroll(&subject.crop, subject_match, metadata).await
                }
            };

            let entity_id = match enrolled {
                Ok(Some(id)) => id,
                Ok(None) => {
                    update = update.reason(format!(
                        "subject {} has no embedding to enroll",
                        subject.index
                    ));
                    new_v7()
                }
                Err(e) => {
                    update = update.error(format!(
                        "failed to enroll subject {}: {}",
                        subject.index, e
                    ));
                    new_v7()
                }
            };

            let entity_type = match subject_match.outcome.decision {
                EnsembleDecision::Disagreement { .. } => ENTITY_DISAGREEMENT,
                _ => ENTITY_INDIVIDUAL,
            };
            let notes = format!(
                "{} for subject {} via {}",
                subject_match.outcome.decision.kind(),
                subject.index,
                subject_match.outcome.strategy
            );
            match self
                .gatekeeper
                .enqueue_observation(
                    entity_type,
                    entity_id,
                    Some(state.id()),
                    request.source,
                    subject.confidence,
                    Some(notes),
                )
                .await
            {
                Ok((enqueued, priority)) => {
                    self.events().emit(InvestigationEvent::VerificationQueued {
                        investigation_id: state.id(),
                        queue_id: enqueued.id,
                        entity_type: entity_type.to_string(),
                        priority,
                    });
                    update = update.reason(format!(
                        "subject {} queued for {} priority review",
                        subject.index, priority
                    ));
                    update.reviews.push(QueuedReview {
                        queue_id: enqueued.id,
                        entity_type: entity_type.to_string(),
                        entity_id,
                        subject_index: subject.index,
                        priority,
                        created: enqueued.created,
                    });
                }
                Err(e) => {
                    warn!(
                        subsystem = "orchestrator",
                        component = "phase",
                        op = "complete",
                        investigation_id = %state.id(),
                        error = %e,
                        "Verification enqueue failed"
                    );
                    update = update.error(format!(
                        "failed to queue subject {} for review: {}",
                        subject.index, e
                    ));
                }
            }
        }

        update.location = Some(location);
        update
    }

    /// Store every successful model's embedding of the crop under one item.
    /// Returns `None` when no model produced an embedding.
    async fn enroll(
        &self,
        crop: &[u8],
        subject_match: &SubjectMatch,
        metadata: ItemMetadata,
    ) -> Result<Option<Uuid>> {
        let index = self.engine.index();
        let mut item_id = None;
        for run in &subject_match.outcome.runs {
            let Some(embedding) = &run.embedding else {
                continue;
            };
            let id = index
                .store_image(crop, &run.model, embedding.vector().to_vec(), metadata.clone())
                .await?;
            debug!(
                subsystem = "orchestrator",
                component = "phase",
                op = "enroll",
                item_id = %id,
                model = %run.model,
                "Enrolled crop"
            );
            item_id = Some(id);
        }
        Ok(item_id)
    }
}

/// Matches that back an identified subject, across all models.
fn identified_matches(matches: &[SubjectMatch]) -> impl Iterator<Item = &MatchCandidate> {
    matches.iter().flat_map(|m| {
        let identified = m.outcome.decision.identified_item();
        m.outcome
            .runs
            .iter()
            .flat_map(|r| r.matches.iter())
            .filter(move |c| Some(c.item_id) == identified)
    })
}

fn describe_decision(subject: usize, decision: &EnsembleDecision) -> String {
    match decision {
        EnsembleDecision::Identified {
            item_id,
            display_name,
            confidence,
            vote_count,
            total_models,
            ..
        } => format!(
            "subject {} identified as {} ({:.3}, {}/{} models)",
            subject,
            display_name
                .clone()
                .unwrap_or_else(|| item_id.to_string()),
            confidence,
            vote_count,
            total_models
        ),
        EnsembleDecision::NewIndividual { .. } => {
            format!("subject {} matched no known individual", subject)
        }
        EnsembleDecision::Disagreement { candidates } => format!(
            "subject {}: models disagree across {} candidates",
            subject,
            candidates.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reid_core::Coordinates;

    #[test]
    fn test_upload_parse_rejects_empty_image() {
        let update = upload_parse(&InvestigationRequest::new(Vec::new()));
        assert!(update.is_degraded());
        assert!(update.content_hash.is_none());
    }

    #[test]
    fn test_upload_parse_collects_location_hints() {
        let request = InvestigationRequest::new(b"jpeg".to_vec())
            .with_geotag(Coordinates::new(-24.0, 31.5))
            .with_location_text("Kruger National Park");
        let update = upload_parse(&request);
        assert!(!update.is_degraded());
        assert_eq!(update.content_hash.as_deref(), Some(content_hash(b"jpeg").as_str()));
        assert_eq!(update.location_sources.len(), 2);
    }

    #[test]
    fn test_upload_parse_ignores_invalid_geotag() {
        let request =
            InvestigationRequest::new(b"jpeg".to_vec()).with_geotag(Coordinates::new(123.0, 0.0));
        let update = upload_parse(&request);
        assert!(update.location_sources.is_empty());
        assert!(!update.is_degraded());
    }

    #[test]
    fn test_web_query_uses_hints() {
        let request = InvestigationRequest::new(b"x".to_vec())
            .with_species_hint("Panthera pardus")
            .with_location_text("Sabi Sand");
        assert_eq!(
            web_query(&request),
            "Panthera pardus individual sighting near Sabi Sand"
        );
        assert_eq!(
            web_query(&InvestigationRequest::new(b"x".to_vec())),
            "wild animal individual sighting"
        );
    }

    #[test]
    fn test_enrollment_metadata_prefers_species_hint() {
        let request = InvestigationRequest::new(b"x".to_vec()).with_species_hint("Lynx lynx");
        let metadata = enrollment_metadata(&request, Some("cat"), None);
        assert_eq!(metadata.species.as_deref(), Some("Lynx lynx"));
        assert!(metadata.location.is_none());

        let metadata = enrollment_metadata(
            &InvestigationRequest::new(b"x".to_vec()),
            Some("cat"),
            Some(&LocationSynthesis::unknown()),
        );
        assert_eq!(metadata.species.as_deref(), Some("cat"));
        assert!(metadata.location.is_none());
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let err = with_timeout("detector", Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref service, .. } if service == "detector"));
    }
}
