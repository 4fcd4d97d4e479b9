//! Confidence cascade router.
//!
//! Pure function of (requirement, documents, thresholds): decides whether a
//! requirement is settled by pattern matching alone, likely absent, or worth
//! an inference call. No I/O and no randomness.

use serde::{Deserialize, Serialize};

use crate::models::enums::str_enum;
use crate::models::{IndexedDocument, Requirement};

/// Weight of keyword coverage in the routing confidence.
const KEYWORD_WEIGHT: f32 = 0.7;
/// Weight of the classification-label signal.
const LABEL_WEIGHT: f32 = 0.3;
/// Label signal when a requirement declares no document classes.
const UNDECLARED_LABEL_SIGNAL: f32 = 0.5;

str_enum!(Route {
    Heuristic => "heuristic",
    Inference => "inference",
    LikelyMissing => "likely-missing",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub requirement_id: String,
    pub route: Route,
    pub confidence: f32,
    /// Hashes of documents whose classification matches the requirement.
    pub relevant_documents: Vec<String>,
    pub keyword_coverage: f32,
    pub label_match: bool,
}

pub struct ConfidenceCascadeRouter {
    heuristic_threshold: f32,
    missing_threshold: f32,
}

impl ConfidenceCascadeRouter {
    pub fn new(heuristic_threshold: f32, missing_threshold: f32) -> Self {
        Self {
            heuristic_threshold,
            missing_threshold,
        }
    }

    pub fn route(&self, requirement: &Requirement, documents: &[IndexedDocument]) -> RouteDecision {
        let relevant: Vec<&IndexedDocument> = documents
            .iter()
            .filter(|d| requirement.accepts_class(&d.classification))
            .collect();

        if relevant.is_empty() {
            return RouteDecision {
                requirement_id: requirement.id.clone(),
                route: Route::LikelyMissing,
                confidence: 0.0,
                relevant_documents: Vec::new(),
                keyword_coverage: 0.0,
                label_match: false,
            };
        }

        let keywords = requirement.match_keywords();
        let keyword_coverage = relevant
            .iter()
            .map(|d| keyword_coverage(&keywords, &d.text))
            .fold(0.0_f32, f32::max);

        let label_match = requirement.declares_classes();
        let label_signal = if label_match { 1.0 } else { UNDECLARED_LABEL_SIGNAL };
        let confidence = (KEYWORD_WEIGHT * keyword_coverage + LABEL_WEIGHT * label_signal).clamp(0.0, 1.0);

        let route = if confidence >= self.heuristic_threshold {
            Route::Heuristic
        } else if confidence <= self.missing_threshold {
            Route::LikelyMissing
        } else {
            Route::Inference
        };

        tracing::debug!(
            requirement_id = %requirement.id,
            route = %route,
            confidence,
            keyword_coverage,
            relevant = relevant.len(),
            "Routed requirement"
        );

        RouteDecision {
            requirement_id: requirement.id.clone(),
            route,
            confidence,
            relevant_documents: relevant.iter().map(|d| d.hash.clone()).collect(),
            keyword_coverage,
            label_match,
        }
    }
}

/// Fraction of keywords present in the text (case-insensitive).
pub fn keyword_coverage(keywords: &[String], text: &str) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
    hits as f32 / keywords.len() as f32
}
