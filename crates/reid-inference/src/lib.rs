//! # reid-inference
//!
//! Remote collaborators for animal re-identification.
//!
//! This crate provides:
//! - HTTP clients for detection, embedding, web intelligence, report
//!   generation, and visual verification (JSON bodies, base64 images)
//! - The known model profile table
//! - [`EmbedderRegistry`], one [`reid_core::Embedder`] per configured model
//! - [`InferenceConfig`] loaded from the environment
//!
//! # Feature Flags
//!
//! - `mock`: deterministic mock collaborators for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use reid_inference::{InferenceConfig, RemoteServices};
//!
//! let services = RemoteServices::from_config(&InferenceConfig::from_env())
//!     .expect("invalid inference configuration");
//! println!("models: {:?}", services.embedders.names());
//! ```

pub mod client;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod intel;
pub mod profiles;
pub mod registry;
pub mod verifier;

// Mock collaborators for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use reid_core::*;

pub use config::InferenceConfig;
pub use detector::RemoteDetector;
pub use embedder::RemoteEmbedder;
pub use intel::{RemoteReportGenerator, RemoteWebIntelligence};
pub use profiles::{known_profiles, profile, ModelProfile};
pub use registry::{EmbedderRegistry, RemoteServices};
pub use verifier::RemoteVisualVerifier;
