//! Investigation lifecycle types.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow phase of an investigation.
///
/// Phases run in declaration order; `Complete` is the convergence point for
/// both the happy path and the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    UploadParse,
    WebIntel,
    Detect,
    Match,
    Report,
    Complete,
}

impl Phase {
    /// All phases in execution order.
    pub const ORDER: [Phase; 6] = [
        Phase::UploadParse,
        Phase::WebIntel,
        Phase::Detect,
        Phase::Match,
        Phase::Report,
        Phase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::UploadParse => "upload_parse",
            Phase::WebIntel => "web_intel",
            Phase::Detect => "detect",
            Phase::Match => "match",
            Phase::Report => "report",
            Phase::Complete => "complete",
        }
    }

    /// Errors in a critical phase fail the whole investigation.
    pub fn is_critical(&self) -> bool {
        matches!(self, Phase::UploadParse | Phase::Detect)
    }

    /// The phase that follows this one on the linear path, if any.
    pub fn successor(&self) -> Option<Phase> {
        let pos = Self::ORDER.iter().position(|p| p == self)?;
        Self::ORDER.get(pos + 1).copied()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ORDER
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid phase: {}", s))
    }
}

/// Lifecycle status of an investigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InvestigationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvestigationStatus::Running)
    }

    /// Failed or cancelled: the pipeline must route to completion.
    pub fn is_aborted(&self) -> bool {
        matches!(
            self,
            InvestigationStatus::Failed | InvestigationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error recorded against the phase that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
}

impl PhaseError {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

/// One step of the investigation's reasoning trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub phase: Phase,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

impl ReasoningStep {
    pub fn new(phase: Phase, description: impl Into<String>) -> Self {
        Self {
            phase,
            description: description.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Investigation record owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investigation {
    pub id: Uuid,
    pub phase: Phase,
    pub status: InvestigationStatus,
    /// Append-only until completion, when duplicates are collapsed.
    pub errors: Vec<PhaseError>,
    pub reasoning: Vec<ReasoningStep>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Investigation {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            phase: Phase::UploadParse,
            status: InvestigationStatus::Running,
            errors: Vec::new(),
            reasoning: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// The error a failed investigation reports to its user.
    pub fn first_critical_error(&self) -> Option<&PhaseError> {
        self.errors.iter().find(|e| e.phase.is_critical())
    }
}

/// Collapse duplicate `(phase, message)` pairs, keeping first occurrences in order.
pub fn dedup_errors(errors: Vec<PhaseError>) -> Vec<PhaseError> {
    let mut seen = HashSet::new();
    errors
        .into_iter()
        .filter(|e| seen.insert((e.phase, e.message.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_successor() {
        assert_eq!(Phase::UploadParse.successor(), Some(Phase::WebIntel));
        assert_eq!(Phase::WebIntel.successor(), Some(Phase::Detect));
        assert_eq!(Phase::Detect.successor(), Some(Phase::Match));
        assert_eq!(Phase::Match.successor(), Some(Phase::Report));
        assert_eq!(Phase::Report.successor(), Some(Phase::Complete));
        assert_eq!(Phase::Complete.successor(), None);
    }

    #[test]
    fn test_phase_critical_set() {
        let critical: Vec<Phase> = Phase::ORDER
            .iter()
            .copied()
            .filter(Phase::is_critical)
            .collect();
        assert_eq!(critical, vec![Phase::UploadParse, Phase::Detect]);
    }

    #[test]
    fn test_phase_round_trips_through_str() {
        for phase in Phase::ORDER {
            assert_eq!(phase.to_string().parse::<Phase>().unwrap(), phase);
        }
        assert!("bogus".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::UploadParse).unwrap();
        assert_eq!(json, "\"upload_parse\"");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!InvestigationStatus::Running.is_terminal());
        assert!(InvestigationStatus::Completed.is_terminal());
        assert!(InvestigationStatus::Failed.is_aborted());
        assert!(InvestigationStatus::Cancelled.is_aborted());
        assert!(!InvestigationStatus::Completed.is_aborted());
    }

    #[test]
    fn test_dedup_errors_keeps_first_occurrence() {
        let errors = vec![
            PhaseError::new(Phase::WebIntel, "timeout"),
            PhaseError::new(Phase::Match, "model x failed"),
            PhaseError::new(Phase::WebIntel, "timeout"),
            PhaseError::new(Phase::Report, "timeout"),
        ];
        let deduped = dedup_errors(errors);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0], PhaseError::new(Phase::WebIntel, "timeout"));
        assert_eq!(deduped[2], PhaseError::new(Phase::Report, "timeout"));
    }

    #[test]
    fn test_first_critical_error() {
        let mut inv = Investigation::new(Uuid::nil());
        inv.errors.push(PhaseError::new(Phase::WebIntel, "search down"));
        inv.errors.push(PhaseError::new(Phase::Detect, "detector 500"));
        inv.errors.push(PhaseError::new(Phase::UploadParse, "later"));
        assert_eq!(
            inv.first_critical_error().map(|e| e.message.as_str()),
            Some("detector 500")
        );
    }
}
