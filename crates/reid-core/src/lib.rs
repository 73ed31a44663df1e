//! # reid-core
//!
//! Core types, traits, and abstractions for animal re-identification.
//!
//! This crate provides the data model (investigations, embeddings, match
//! candidates, location hints, review entries), the collaborator traits the
//! pipeline is written against, the event bus, and the defaults every other
//! crate reads its constants from.
//!
//! ## Logging
//!
//! All crates log through `tracing` with the same structured field names:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | `index`, `ensemble`, `location`, `gatekeeper`, `orchestrator`, `worker`, `inference`, `database` |
//! | `component` | module within the subsystem (`ann`, `consensus`, `cascade`, `pool`, ...) |
//! | `op` | operation name (`store`, `query`, `enqueue`, ...) |
//! | `investigation_id` | investigation UUID |
//! | `phase` | workflow phase name |
//! | `model` | embedding model name |
//! | `item_id` | similarity index item UUID |
//! | `duration_ms` | elapsed wall time |
//!
//! Levels: ERROR for degraded service, WARN for a recoverable failure with a
//! fallback (ANN fallback, unsupported dimension, failed model), INFO for
//! lifecycle, DEBUG for decisions, TRACE for per-item detail.

pub mod defaults;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, EventEnvelope, InvestigationEvent, NoOpEventSink};
pub use ids::{content_hash, new_v7};
pub use models::*;
pub use traits::*;
