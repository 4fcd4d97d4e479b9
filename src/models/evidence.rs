use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::Location;
use super::enums::{AreaUnit, ExtractionMethod, FieldKind, VerificationOutcome};

/// Structured value carried alongside a literal span. `literal` is the exact
/// text inside the span the value was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypedValue {
    Date { date: NaiveDate, literal: String },
    Identifier { value: String, literal: String },
    Name { value: String, literal: String },
    Area { amount: f64, unit: AreaUnit, literal: String },
}

impl TypedValue {
    pub fn literal(&self) -> &str {
        match self {
            Self::Date { literal, .. }
            | Self::Identifier { literal, .. }
            | Self::Name { literal, .. }
            | Self::Area { literal, .. } => literal,
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Date { .. } => FieldKind::Date,
            Self::Identifier { .. } => FieldKind::Identifier,
            Self::Name { .. } => FieldKind::Name,
            Self::Area { .. } => FieldKind::Area,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date { date, .. } => Some(*date),
            _ => None,
        }
    }
}

/// One piece of evidence for one requirement in one document.
///
/// `span` and `location` are fixed at creation. Only the verifier may touch
/// `confidence`, `verification` and `verification_note`, and only once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub requirement_id: String,
    pub document_hash: String,
    /// Exact substring of the source document text.
    pub span: String,
    pub location: Location,
    pub value: Option<TypedValue>,
    pub confidence: f32,
    pub method: ExtractionMethod,
    pub verification: VerificationOutcome,
    #[serde(default)]
    pub verification_note: Option<String>,
}

impl EvidenceRecord {
    pub fn new(
        requirement_id: &str,
        document_hash: &str,
        span: &str,
        location: Location,
        confidence: f32,
        method: ExtractionMethod,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            requirement_id: requirement_id.to_string(),
            document_hash: document_hash.to_string(),
            span: span.to_string(),
            location,
            value: None,
            confidence: confidence.clamp(0.0, 1.0),
            method,
            verification: VerificationOutcome::Pending,
            verification_note: None,
        }
    }

    pub fn with_value(mut self, value: TypedValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn is_settled(&self) -> bool {
        self.verification != VerificationOutcome::Pending
    }

    pub fn is_verified(&self) -> bool {
        self.verification == VerificationOutcome::Verified
    }

    /// Reduce confidence for degraded extraction paths (backend fallback,
    /// heuristic-only runs). Only valid before verification.
    pub(crate) fn discount(&mut self, penalty: f32) {
        if !self.is_settled() {
            self.confidence = (self.confidence - penalty).max(0.0);
        }
    }

    /// Record the verifier's decision. A settled record is left alone.
    pub(crate) fn settle(&mut self, outcome: VerificationOutcome, penalty: f32, note: Option<String>) {
        if self.is_settled() || outcome == VerificationOutcome::Pending {
            return;
        }
        self.confidence = (self.confidence - penalty).clamp(0.0, 1.0);
        self.verification = outcome;
        self.verification_note = note;
    }
}
