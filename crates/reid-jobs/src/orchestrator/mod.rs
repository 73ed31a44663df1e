//! Investigation workflow orchestrator.
//!
//! Drives one investigation through
//! `upload_parse -> web_intel -> detect -> match -> report -> complete`.
//! Phases run strictly in sequence; each returns a [`PhaseUpdate`] merged into
//! the [`InvestigationState`], and the [`transitions`] table picks the next
//! phase. Errors never escape a phase: they are recorded on the investigation
//! and, in a critical phase, route it straight to completion as failed.
//! Cancellation is cooperative and checked at phase boundaries only.

mod phases;
pub mod state;
pub mod transitions;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use reid_core::defaults::{
    DETECT_TIMEOUT_SECS, ENV_DETECT_TIMEOUT, ENV_REPORT_AUDIENCE, ENV_REPORT_TIMEOUT,
    ENV_WEB_INTEL_ENABLED, ENV_WEB_INTEL_TIMEOUT, REPORT_AUDIENCE, REPORT_TIMEOUT_SECS,
    WEB_INTEL_TIMEOUT_SECS,
};
use reid_core::{
    new_v7, Coordinates, Detector, EventSink, InvestigationEvent, InvestigationStatus,
    NoOpEventSink, Phase, ReportGenerator, VerificationSource, WebIntelligence,
};
use reid_search::{MatchEngine, MatchStrategy};

use crate::gatekeeper::Gatekeeper;

pub use state::{InvestigationResult, InvestigationState, PhaseUpdate, QueuedReview, SubjectMatch};
pub use transitions::{decide, next_phase, PhaseReport, Transition};

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub web_intel_enabled: bool,
    pub web_intel_timeout: Duration,
    pub detect_timeout: Duration,
    pub report_timeout: Duration,
    pub report_audience: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            web_intel_enabled: true,
            web_intel_timeout: Duration::from_secs(WEB_INTEL_TIMEOUT_SECS),
            detect_timeout: Duration::from_secs(DETECT_TIMEOUT_SECS),
            report_timeout: Duration::from_secs(REPORT_TIMEOUT_SECS),
            report_audience: REPORT_AUDIENCE.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WEB_INTEL_ENABLED` | `true` | Run the web intelligence phase |
    /// | `WEB_INTEL_TIMEOUT_SECS` | `45` | Web intelligence deadline |
    /// | `DETECT_TIMEOUT_SECS` | `60` | Detection deadline |
    /// | `REPORT_TIMEOUT_SECS` | `120` | Report generation deadline |
    /// | `REPORT_AUDIENCE` | `researcher` | Audience passed to the report generator |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let secs = |var: &str, default: Duration| {
            std::env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            web_intel_enabled: std::env::var(ENV_WEB_INTEL_ENABLED)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.web_intel_enabled),
            web_intel_timeout: secs(ENV_WEB_INTEL_TIMEOUT, defaults.web_intel_timeout),
            detect_timeout: secs(ENV_DETECT_TIMEOUT, defaults.detect_timeout),
            report_timeout: secs(ENV_REPORT_TIMEOUT, defaults.report_timeout),
            report_audience: std::env::var(ENV_REPORT_AUDIENCE)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.report_audience),
        }
    }

    pub fn with_web_intel_enabled(mut self, enabled: bool) -> Self {
        self.web_intel_enabled = enabled;
        self
    }

    pub fn with_detect_timeout(mut self, timeout: Duration) -> Self {
        self.detect_timeout = timeout;
        self
    }

    pub fn with_web_intel_timeout(mut self, timeout: Duration) -> Self {
        self.web_intel_timeout = timeout;
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = timeout;
        self
    }

    pub fn with_report_audience(mut self, audience: impl Into<String>) -> Self {
        self.report_audience = audience.into();
        self
    }
}

/// Everything submitted with an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRequest {
    pub id: Uuid,
    #[serde(skip)]
    pub image: Vec<u8>,
    #[serde(default)]
    pub source: VerificationSource,
    /// GPS position from the upload's metadata.
    pub geotag: Option<Coordinates>,
    /// Location the user typed.
    pub location_text: Option<String>,
    /// Restricts matching to this species.
    pub species_hint: Option<String>,
    /// Overrides the configured ensemble strategy.
    pub strategy: Option<MatchStrategy>,
}

impl InvestigationRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            id: new_v7(),
            image,
            source: VerificationSource::default(),
            geotag: None,
            location_text: None,
            species_hint: None,
            strategy: None,
        }
    }

    pub fn with_source(mut self, source: VerificationSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_geotag(mut self, coordinates: Coordinates) -> Self {
        self.geotag = Some(coordinates);
        self
    }

    pub fn with_location_text(mut self, text: impl Into<String>) -> Self {
        self.location_text = Some(text.into());
        self
    }

    pub fn with_species_hint(mut self, species: impl Into<String>) -> Self {
        self.species_hint = Some(species.into());
        self
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// Cooperative cancellation, checked between phases.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs investigations against the configured collaborators.
pub struct Orchestrator {
    detector: Arc<dyn Detector>,
    engine: Arc<MatchEngine>,
    gatekeeper: Gatekeeper,
    web_intel: Option<Arc<dyn WebIntelligence>>,
    report: Option<Arc<dyn ReportGenerator>>,
    events: Arc<dyn EventSink>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(detector: Arc<dyn Detector>, engine: Arc<MatchEngine>, gatekeeper: Gatekeeper) -> Self {
        Self {
            detector,
            engine,
            gatekeeper,
            web_intel: None,
            report: None,
            events: Arc::new(NoOpEventSink),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_web_intel(mut self, web_intel: Arc<dyn WebIntelligence>) -> Self {
        self.web_intel = Some(web_intel);
        self
    }

    pub fn with_report_generator(mut self, report: Arc<dyn ReportGenerator>) -> Self {
        self.report = Some(report);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Run an investigation to completion without external cancellation.
    pub async fn investigate(&self, request: InvestigationRequest) -> InvestigationResult {
        self.run(request, &CancellationFlag::new()).await
    }

    /// Run an investigation, honouring `cancel` at each phase boundary.
    pub async fn run(
        &self,
        request: InvestigationRequest,
        cancel: &CancellationFlag,
    ) -> InvestigationResult {
        let start = Instant::now();
        let id = request.id;
        let mut state = InvestigationState::new(id);
        let mut phase = Phase::UploadParse;

        info!(
            subsystem = "orchestrator",
            component = "fsm",
            op = "start",
            investigation_id = %id,
            source = %request.source,
            "Investigation started"
        );

        loop {
            if cancel.is_cancelled() && state.is_running() {
                warn!(
                    subsystem = "orchestrator",
                    component = "fsm",
                    op = "cancel",
                    investigation_id = %id,
                    phase = %phase,
                    "Investigation cancelled"
                );
                state = state.merge(
                    PhaseUpdate::new(phase)
                        .reason(format!("cancelled before {}", phase))
                        .with_status(InvestigationStatus::Cancelled),
                );
                phase = Phase::Complete;
            }

            let phase_start = Instant::now();
            self.events.emit(InvestigationEvent::PhaseStarted {
                investigation_id: id,
                phase,
            });

            let update = self.run_phase(phase, &request, &state).await;
            let report = PhaseReport {
                errored: update.is_degraded(),
                disabled: update.disabled,
            };
            for message in &update.errors {
                warn!(
                    subsystem = "orchestrator",
                    component = "phase",
                    op = phase.as_str(),
                    investigation_id = %id,
                    phase = %phase,
                    error = %message,
                    "Phase recorded error"
                );
            }
            state = state.merge(update);

            let duration_ms = phase_start.elapsed().as_millis() as u64;
            self.events.emit(InvestigationEvent::PhaseCompleted {
                investigation_id: id,
                phase,
                duration_ms,
                degraded: report.errored,
            });

            if phase == Phase::Complete {
                break;
            }

            let transition = decide(phase, state.status(), report);
            if transition == Transition::Error && state.is_running() {
                state = state.merge(
                    PhaseUpdate::new(phase).with_status(InvestigationStatus::Failed),
                );
            }
            info!(
                subsystem = "orchestrator",
                component = "fsm",
                op = "transition",
                investigation_id = %id,
                phase = %phase,
                transition = ?transition,
                duration_ms,
                "Phase finished"
            );
            phase = next_phase(phase, transition);
        }

        let state = state.finalize();
        let result = InvestigationResult::from(state);

        self.events.emit(InvestigationEvent::InvestigationCompleted {
            investigation_id: id,
            status: result.status,
            error_count: result.errors.len(),
        });
        info!(
            subsystem = "orchestrator",
            component = "fsm",
            op = "complete",
            investigation_id = %id,
            status = %result.status,
            subjects = result.subjects.len(),
            reviews = result.verification.len(),
            error_count = result.errors.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Investigation finished"
        );
        result
    }

    async fn run_phase(
        &self,
        phase: Phase,
        request: &InvestigationRequest,
        state: &InvestigationState,
    ) -> PhaseUpdate {
        match phase {
            Phase::UploadParse => phases::upload_parse(request),
            Phase::WebIntel => self.web_intel_phase(request).await,
            Phase::Detect => self.detect_phase(request).await,
            Phase::Match => self.match_phase(request, state).await,
            Phase::Report => self.report_phase(state).await,
            Phase::Complete => self.complete_phase(request, state).await,
        }
    }
}
