pub mod cache;
pub mod extraction;
pub mod inference;
pub mod matrix;
pub mod router;
pub mod runner; // Run orchestration: routing, extraction, join per component, validation
pub mod usage;
pub mod validation;
pub mod verifier;

pub use cache::{CacheEntry, CacheKey, EvidenceCache, InMemoryEvidenceCache, SqliteEvidenceCache};
pub use matrix::{EntryFlag, EvidenceMatrix, MatrixEntry};
pub use router::{ConfidenceCascadeRouter, Route, RouteDecision};
pub use runner::{EngineOutput, EngineRunner, InferenceMode, RunEvent, RunSummary};
pub use usage::{UsageAccumulator, UsageSummary};
pub use validation::{TypeSummary, ValidationReport};
pub use verifier::CitationVerifier;

use thiserror::Error;

use crate::registry::RegistryError;

/// Run-level failures. Everything else degrades into flags and warnings.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No usable input: {received} document(s) received, none contained readable text")]
    NoUsableInput { received: usize, unreadable: usize },

    #[error("Inference is required but unavailable: {0}")]
    InferenceRequired(String),

    #[error("Invalid requirement registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("Invalid run input: {0}")]
    Input(String),
}
