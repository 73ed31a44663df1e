//! Investigation state and the partial updates phases return.
//!
//! Phases never mutate state. Each returns a [`PhaseUpdate`] that
//! [`InvestigationState::merge`] folds into a new state, bumping the version.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reid_core::{
    dedup_errors, DetectedSubject, Investigation, InvestigationStatus, LocationSource, Phase,
    PhaseError, ReasoningStep, VerificationPriority, WebIntelReport,
};
use reid_search::{EnsembleOutcome, LocationSynthesis};

/// Ensemble outcome for one detected subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectMatch {
    pub subject_index: usize,
    #[serde(flatten)]
    pub outcome: EnsembleOutcome,
}

/// Reference to a verification-queue entry created by an investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedReview {
    pub queue_id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub subject_index: usize,
    pub priority: VerificationPriority,
    /// False when an open entry for the same entity already existed.
    pub created: bool,
}

/// Partial update produced by one phase.
#[derive(Debug, Clone)]
pub struct PhaseUpdate {
    pub phase: Phase,
    pub errors: Vec<String>,
    pub reasoning: Vec<String>,
    pub disabled: bool,
    pub status: Option<InvestigationStatus>,
    pub content_hash: Option<String>,
    /// Appended to the collected hints.
    pub location_sources: Vec<LocationSource>,
    pub web_intel: Option<WebIntelReport>,
    pub subjects: Option<Vec<DetectedSubject>>,
    pub matches: Option<Vec<SubjectMatch>>,
    pub report: Option<String>,
    pub location: Option<LocationSynthesis>,
    /// Appended to the review references.
    pub reviews: Vec<QueuedReview>,
}

impl PhaseUpdate {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            errors: Vec::new(),
            reasoning: Vec::new(),
            disabled: false,
            status: None,
            content_hash: None,
            location_sources: Vec::new(),
            web_intel: None,
            subjects: None,
            matches: None,
            report: None,
            location: None,
            reviews: Vec::new(),
        }
    }

    /// A phase that did not run.
    pub fn disabled(phase: Phase, reason: impl Into<String>) -> Self {
        let mut update = Self::new(phase);
        update.disabled = true;
        update.reasoning.push(reason.into());
        update
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }

    pub fn reason(mut self, description: impl Into<String>) -> Self {
        self.reasoning.push(description.into());
        self
    }

    pub fn with_status(mut self, status: InvestigationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Snapshot of an investigation between phases.
#[derive(Debug, Clone)]
pub struct InvestigationState {
    pub investigation: Investigation,
    /// Incremented by every merge.
    pub version: u64,
    pub content_hash: Option<String>,
    pub location_sources: Vec<LocationSource>,
    pub web_intel: Option<WebIntelReport>,
    pub subjects: Vec<DetectedSubject>,
    pub matches: Vec<SubjectMatch>,
    pub report: Option<String>,
    pub location: Option<LocationSynthesis>,
    pub reviews: Vec<QueuedReview>,
}

impl InvestigationState {
    pub fn new(id: Uuid) -> Self {
        Self {
            investigation: Investigation::new(id),
            version: 0,
            content_hash: None,
            location_sources: Vec::new(),
            web_intel: None,
            subjects: Vec::new(),
            matches: Vec::new(),
            report: None,
            location: None,
            reviews: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.investigation.id
    }

    pub fn status(&self) -> InvestigationStatus {
        self.investigation.status
    }

    pub fn is_running(&self) -> bool {
        self.investigation.status == InvestigationStatus::Running
    }

    /// Fold a phase update into a new state.
    ///
    /// Errors and reasoning append, collections append or replace as their
    /// field docs say, and a terminal status is never overwritten.
    pub fn merge(mut self, update: PhaseUpdate) -> Self {
        let phase = update.phase;
        let inv = &mut self.investigation;
        inv.phase = phase;
        inv.errors
            .extend(update.errors.into_iter().map(|m| PhaseError::new(phase, m)));
        inv.reasoning.extend(
            update
                .reasoning
                .into_iter()
                .map(|d| ReasoningStep::new(phase, d)),
        );
        if let Some(status) = update.status {
            if !inv.status.is_terminal() {
                inv.status = status;
            }
        }

        if update.content_hash.is_some() {
            self.content_hash = update.content_hash;
        }
        self.location_sources.extend(update.location_sources);
        if update.web_intel.is_some() {
            self.web_intel = update.web_intel;
        }
        if let Some(subjects) = update.subjects {
            self.subjects = subjects;
        }
        if let Some(matches) = update.matches {
            self.matches = matches;
        }
        if update.report.is_some() {
            self.report = update.report;
        }
        if update.location.is_some() {
            self.location = update.location;
        }
        self.reviews.extend(update.reviews);
        self.version += 1;
        self
    }

    /// Mark terminal and collapse duplicate errors.
    pub fn finalize(mut self) -> Self {
        let inv = &mut self.investigation;
        if inv.status == InvestigationStatus::Running {
            inv.status = InvestigationStatus::Completed;
        }
        inv.phase = Phase::Complete;
        inv.errors = dedup_errors(std::mem::take(&mut inv.errors));
        inv.completed_at = Some(Utc::now());
        self.version += 1;
        self
    }
}

/// Final output of an investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationResult {
    pub investigation_id: Uuid,
    pub status: InvestigationStatus,
    /// First critical error, for failed investigations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PhaseError>,
    pub subjects: Vec<DetectedSubject>,
    pub matches: Vec<SubjectMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationSynthesis>,
    pub verification: Vec<QueuedReview>,
    pub errors: Vec<PhaseError>,
    pub reasoning: Vec<ReasoningStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_intel: Option<WebIntelReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub version: u64,
}

impl From<InvestigationState> for InvestigationResult {
    fn from(state: InvestigationState) -> Self {
        let failure = match state.investigation.status {
            InvestigationStatus::Failed => state.investigation.first_critical_error().cloned(),
            _ => None,
        };
        Self {
            investigation_id: state.investigation.id,
            status: state.investigation.status,
            failure,
            subjects: state.subjects,
            matches: state.matches,
            location: state.location,
            verification: state.reviews,
            errors: state.investigation.errors,
            reasoning: state.investigation.reasoning,
            web_intel: state.web_intel,
            report: state.report,
            version: state.version,
        }
    }
}
