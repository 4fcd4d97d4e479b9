//! Structured field extraction.
//!
//! Two strategies emit the same pending `EvidenceRecord`: deterministic
//! pattern search (`heuristic`) and backend-assisted extraction over bounded
//! excerpts (`inference`). Both always cite a literal span.

pub mod excerpt;
pub mod heuristic;
pub mod inference;
pub mod names;
pub mod patterns;

pub use heuristic::HeuristicExtractor;
pub use inference::{extract_with_inference, InferenceOutcome, InferenceRequest};
