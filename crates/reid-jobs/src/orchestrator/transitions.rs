//! Phase transition table.
//!
//! ```text
//! upload_parse -> web_intel -> detect -> match -> report -> complete
//!      |              |          |         |        |
//!      +--------------+--- error +---------+--------+--> complete
//! ```

use serde::{Deserialize, Serialize};

use reid_core::{InvestigationStatus, Phase};

/// Outcome of a finished phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Continue,
    /// Phase was disabled or degraded; move on without its output.
    Skip,
    /// Route straight to completion.
    Error,
}

/// What a phase reported about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseReport {
    /// The phase recorded at least one error.
    pub errored: bool,
    /// The phase did not run (collaborator absent or turned off).
    pub disabled: bool,
}

/// Classify a just-finished phase.
pub fn decide(phase: Phase, status: InvestigationStatus, report: PhaseReport) -> Transition {
    if status.is_aborted() {
        return Transition::Error;
    }
    if report.errored && phase.is_critical() {
        return Transition::Error;
    }
    if report.disabled || report.errored {
        return Transition::Skip;
    }
    Transition::Continue
}

/// `(phase, continue | skip) -> successor`, `(phase, error) -> complete`.
pub fn next_phase(phase: Phase, transition: Transition) -> Phase {
    match transition {
        Transition::Error => Phase::Complete,
        Transition::Continue | Transition::Skip => phase.successor().unwrap_or(Phase::Complete),
    }
}
