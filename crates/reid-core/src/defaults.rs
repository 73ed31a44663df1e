//! Centralized default constants for the re-identification system.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Every value here can be overridden through the `from_env`
//! constructor of the config struct that consumes it.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Embedding dimensionalities produced by the supported model families.
/// Other sizes are accepted with a warning.
pub const SUPPORTED_DIMENSIONS: [usize; 4] = [768, 1024, 1536, 2048];

/// Default embedding model name.
pub const EMBED_MODEL: &str = "megadescriptor-l-384";

/// Timeout for a single embedding request in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// MATCHING
// =============================================================================

/// Minimum similarity for a query hit to count as a match.
pub const SIMILARITY_THRESHOLD: f32 = 0.75;

/// Number of neighbours requested per model query.
pub const MATCH_TOP_K: usize = 5;

/// Number of consolidated candidates handed to visual re-ranking.
pub const RERANK_TOP_N: usize = 3;

/// Cascade stage 1: fast global descriptor.
pub const CASCADE_STAGE1_MODEL: &str = "clip-vit-l14";
pub const CASCADE_STAGE1_ACCEPT: f32 = 0.90;
pub const CASCADE_STAGE1_REJECT: f32 = 0.60;

/// Cascade stage 2: general self-supervised backbone.
pub const CASCADE_STAGE2_MODEL: &str = "dinov2-vitl14";
pub const CASCADE_STAGE2_ACCEPT: f32 = 0.88;
pub const CASCADE_STAGE2_REJECT: f32 = 0.65;

/// Cascade stage 3: animal re-identification specialist.
pub const CASCADE_STAGE3_MODEL: &str = "megadescriptor-l-384";
pub const CASCADE_STAGE3_ACCEPT: f32 = 0.85;
pub const CASCADE_STAGE3_REJECT: f32 = 0.70;

// =============================================================================
// VERIFICATION
// =============================================================================

/// Detection confidence at or above which auto-discovered entries are high priority.
pub const VERIFY_HIGH_CONFIDENCE: f32 = 0.95;

/// Detection confidence at or above which auto-discovered entries are medium priority.
pub const VERIFY_MEDIUM_CONFIDENCE: f32 = 0.85;

// =============================================================================
// LOCATION SYNTHESIS
// =============================================================================

/// Similarity above which a matched record's location earns the full bonus.
pub const LOCATION_MATCH_STRONG: f32 = 0.90;

/// Similarity above which a matched record's location earns the partial bonus.
pub const LOCATION_MATCH_WEAK: f32 = 0.80;

// =============================================================================
// INFERENCE SERVICE
// =============================================================================

/// Default base URL of the remote inference service.
pub const INFERENCE_URL: &str = "http://127.0.0.1:8080";

/// Timeout for detection requests in seconds.
pub const DETECT_TIMEOUT_SECS: u64 = 60;

/// Timeout for web intelligence requests in seconds.
pub const WEB_INTEL_TIMEOUT_SECS: u64 = 45;

/// Timeout for report generation requests in seconds.
pub const REPORT_TIMEOUT_SECS: u64 = 120;

/// Timeout for a visual verification request in seconds.
pub const VERIFY_TIMEOUT_SECS: u64 = 20;

/// Default audience for generated reports.
pub const REPORT_AUDIENCE: &str = "researcher";

// =============================================================================
// INVESTIGATION WORKER
// =============================================================================

/// Maximum investigations processed concurrently.
pub const INVESTIGATION_MAX_CONCURRENT: usize = 4;

/// Capacity of the bounded investigation queue.
pub const INVESTIGATION_QUEUE_CAPACITY: usize = 64;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_INFERENCE_URL: &str = "INFERENCE_BASE_URL";
pub const ENV_REID_MODELS: &str = "REID_MODELS";
pub const ENV_WEB_INTEL_URL: &str = "WEB_INTEL_URL";
pub const ENV_REPORT_URL: &str = "REPORT_URL";
pub const ENV_VERIFIER_URL: &str = "VISUAL_VERIFIER_URL";
pub const ENV_EMBED_TIMEOUT: &str = "EMBED_TIMEOUT_SECS";
pub const ENV_DETECT_TIMEOUT: &str = "DETECT_TIMEOUT_SECS";
pub const ENV_WEB_INTEL_TIMEOUT: &str = "WEB_INTEL_TIMEOUT_SECS";
pub const ENV_REPORT_TIMEOUT: &str = "REPORT_TIMEOUT_SECS";
pub const ENV_STRATEGY: &str = "REID_STRATEGY";
pub const ENV_SIMILARITY_THRESHOLD: &str = "REID_SIMILARITY_THRESHOLD";
pub const ENV_TOP_K: &str = "REID_TOP_K";
pub const ENV_CASCADE_STAGES: &str = "REID_CASCADE_STAGES";
pub const ENV_MODEL_WEIGHTS: &str = "REID_MODEL_WEIGHTS";
pub const ENV_REPORT_AUDIENCE: &str = "REPORT_AUDIENCE";
pub const ENV_WEB_INTEL_ENABLED: &str = "WEB_INTEL_ENABLED";
