//! # reid-jobs
//!
//! Investigation workflow for animal re-identification.
//!
//! This crate provides:
//! - [`Orchestrator`]: the phase state machine that takes an uploaded image
//!   through parsing, web intelligence, detection, matching, reporting, and
//!   completion
//! - [`Gatekeeper`]: idempotent routing of uncertain results to human review
//! - [`InvestigationWorker`]: a bounded queue with a fixed number of
//!   concurrent investigations and broadcast progress events
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reid_jobs::{InvestigationRequest, InvestigationWorker, Orchestrator, WorkerConfig};
//!
//! let orchestrator = Arc::new(Orchestrator::new(detector, engine, gatekeeper));
//! let handle = InvestigationWorker::new(orchestrator, WorkerConfig::from_env()).start();
//!
//! let ticket = handle.submit(InvestigationRequest::new(image))?;
//! let result = ticket.wait().await?;
//! println!("{}", result.status);
//!
//! handle.shutdown().await?;
//! ```

pub mod gatekeeper;
pub mod orchestrator;
pub mod worker;

// Re-export core types
pub use reid_core::*;

pub use gatekeeper::{derive_priority, Gatekeeper, ENTITY_DISAGREEMENT, ENTITY_INDIVIDUAL};
pub use orchestrator::{
    CancellationFlag, InvestigationRequest, InvestigationResult, InvestigationState,
    Orchestrator, OrchestratorConfig, PhaseUpdate, QueuedReview, SubjectMatch, Transition,
};
pub use worker::{InvestigationTicket, InvestigationWorker, WorkerConfig, WorkerEvent, WorkerHandle};
