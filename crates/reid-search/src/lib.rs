//! # reid-search
//!
//! Matching logic for animal re-identification.
//!
//! - [`SimilarityIndex`]: per-model embedding store with nearest-neighbour
//!   queries, content-hash deduplication, and an optional ANN backend with a
//!   linear-scan fallback
//! - [`MatchEngine`]: runs several models against the index and decides with
//!   a [`MatchStrategy`] (single, consensus, or cascade), then consolidates
//!   and optionally re-ranks the candidates
//! - [`location`]: scores location hints and picks a primary location
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reid_search::{EnsembleConfig, MatchEngine, SimilarityIndex};
//! use reid_core::IndexFilter;
//!
//! # async fn run(embedders: Vec<Arc<dyn reid_core::Embedder>>, crop: Vec<u8>) {
//! let index = Arc::new(SimilarityIndex::new());
//! let engine = MatchEngine::new(index, embedders, EnsembleConfig::from_env());
//! let outcome = engine.identify(&crop, &IndexFilter::default()).await;
//! println!("{}", outcome.decision.kind());
//! # }
//! ```

pub mod ensemble;
pub mod index;
pub mod location;

pub use ensemble::{
    CascadeStage, EnsembleConfig, EnsembleDecision, EnsembleOutcome, MatchEngine, MatchStrategy,
    ModelRun, VoteTally,
};
pub use index::{QueryOptions, SimilarityIndex};
pub use location::{LocationScoring, LocationSynthesis, ScoredLocation};
