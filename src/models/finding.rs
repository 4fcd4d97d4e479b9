use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ValidationOutcome, ValidationType};
use super::evidence::EvidenceRecord;

/// A declared relationship between two requirements. Stored with
/// `from < to` so each undirected edge has one canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
}

impl DependencyEdge {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self { from: a.to_string(), to: b.to_string() }
        } else {
            Self { from: b.to_string(), to: a.to_string() }
        }
    }

    pub fn touches(&self, requirement_id: &str) -> bool {
        self.from == requirement_id || self.to == requirement_id
    }
}

impl std::fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <-> {}", self.from, self.to)
    }
}

/// Reference to a record that took part in a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparedEvidence {
    pub requirement_id: String,
    pub record_id: Uuid,
    pub document_hash: String,
    pub literal: String,
    pub confidence: f32,
}

impl ComparedEvidence {
    pub fn from_record(record: &EvidenceRecord) -> Self {
        Self {
            requirement_id: record.requirement_id.clone(),
            record_id: record.id,
            document_hash: record.document_hash.clone(),
            literal: record
                .value
                .as_ref()
                .map(|v| v.literal().to_string())
                .unwrap_or_else(|| record.span.clone()),
            confidence: record.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePair {
    pub left: ComparedEvidence,
    pub right: ComparedEvidence,
}

/// Outcome of one validation type applied to one dependency edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    pub validation_type: ValidationType,
    pub edge: DependencyEdge,
    pub pairs: Vec<EvidencePair>,
    pub outcome: ValidationOutcome,
    pub explanation: String,
}

impl ValidationFinding {
    pub fn not_checked(validation_type: ValidationType, edge: &DependencyEdge, explanation: String) -> Self {
        Self {
            validation_type,
            edge: edge.clone(),
            pairs: Vec::new(),
            outcome: ValidationOutcome::NotChecked,
            explanation,
        }
    }
}
