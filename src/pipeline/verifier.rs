//! Citation verifier: the only gate between extracted records and output.
//!
//! Three string checks against the source document:
//! (a) the span is a literal substring of the document text,
//! (b) the claimed location is one of the document's locations and is the
//!     nearest preceding marker of some occurrence of the span,
//! (c) the typed value's literal sits inside the span and parses back to
//!     the same value.
//! Failing (a) rejects the record. Failing (b) or (c) keeps it as
//! unverified with reduced confidence. No backend involvement.

use crate::models::{EvidenceRecord, IndexedDocument, TypedValue, VerificationOutcome};

use super::extraction::names::normalize_name;
use super::extraction::patterns::{normalize_identifier, parse_area, parse_date};

pub struct CitationVerifier {
    penalty: f32,
}

/// Records split by outcome. `kept` holds verified and unverified records.
#[derive(Debug, Default)]
pub struct VerificationReport {
    pub kept: Vec<EvidenceRecord>,
    pub rejected: Vec<EvidenceRecord>,
}

impl CitationVerifier {
    pub fn new(penalty: f32) -> Self {
        Self { penalty }
    }

    /// Settle one record. Records that are already settled come back untouched.
    pub fn verify(&self, mut record: EvidenceRecord, document: &IndexedDocument) -> EvidenceRecord {
        if record.is_settled() {
            return record;
        }

        if let Err(reason) = check_span(&record, document) {
            record.settle(VerificationOutcome::Rejected, 0.0, Some(reason));
            return record;
        }

        let mut problems = Vec::new();
        if let Err(reason) = check_location(&record, document) {
            problems.push(reason);
        }
        if let Err(reason) = check_value(&record) {
            problems.push(reason);
        }

        if problems.is_empty() {
            record.settle(VerificationOutcome::Verified, 0.0, None);
        } else {
            tracing::debug!(
                requirement_id = %record.requirement_id,
                document = %record.document_hash,
                problems = ?problems,
                "Citation downgraded to unverified"
            );
            record.settle(VerificationOutcome::Unverified, self.penalty, Some(problems.join("; ")));
        }
        record
    }

    pub fn verify_all(&self, records: Vec<EvidenceRecord>, document: &IndexedDocument) -> VerificationReport {
        let mut report = VerificationReport::default();
        for record in records {
            let record = self.verify(record, document);
            if record.verification == VerificationOutcome::Rejected {
                tracing::warn!(
                    requirement_id = %record.requirement_id,
                    document = %record.document_hash,
                    method = %record.method,
                    "Rejected citation: span not found in source document"
                );
                report.rejected.push(record);
            } else {
                report.kept.push(record);
            }
        }
        report
    }
}

fn check_span(record: &EvidenceRecord, document: &IndexedDocument) -> Result<(), String> {
    if record.document_hash != document.hash {
        return Err("record cites a different document".to_string());
    }
    if record.span.trim().is_empty() {
        return Err("empty span".to_string());
    }
    if !document.text.contains(&record.span) {
        return Err("span is not a substring of the document".to_string());
    }
    Ok(())
}

fn check_location(record: &EvidenceRecord, document: &IndexedDocument) -> Result<(), String> {
    if !document.locations().contains(&record.location) {
        return Err(format!("location {} does not exist in the document", record.location));
    }
    let adjacent = document
        .occurrences(&record.span)
        .into_iter()
        .any(|offset| document.location_at(offset) == record.location);
    if adjacent {
        Ok(())
    } else {
        Err(format!("span does not occur under {}", record.location))
    }
}

fn check_value(record: &EvidenceRecord) -> Result<(), String> {
    let Some(value) = &record.value else {
        return Ok(());
    };
    let literal = value.literal();
    if literal.trim().is_empty() || !record.span.contains(literal) {
        return Err(format!("value '{literal}' not found in span"));
    }

    let consistent = match value {
        TypedValue::Date { date, .. } => parse_date(literal) == Some(*date),
        TypedValue::Identifier { value, .. } => normalize_identifier(literal) == *value,
        TypedValue::Name { value, .. } => normalize_name(literal) == *value,
        TypedValue::Area { amount, unit, .. } => parse_area(literal)
            .is_some_and(|(a, u)| u == *unit && (a - amount).abs() < 1e-9),
    };
    if consistent {
        Ok(())
    } else {
        Err(format!("value does not match literal '{literal}'"))
    }
}
