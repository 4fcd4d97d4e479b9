//! Evidence matrix: one entry per requirement with its status, records and
//! review flags.

use serde::{Deserialize, Serialize};

use crate::models::enums::str_enum;
use crate::models::{EvidenceRecord, ExtractionStatus, VerificationOutcome};

use super::router::Route;

str_enum!(EntryFlag {
    LikelyMissing => "likely-missing",
    ExtractionUncertain => "extraction-uncertain",
    BackendFallback => "backend-fallback",
    InferenceUnavailable => "inference-unavailable",
    UnverifiedEvidence => "unverified-evidence",
    HumanJudgment => "human-judgment",
    RejectedCitations => "rejected-citations",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixEntry {
    pub requirement_id: String,
    pub status: ExtractionStatus,
    /// Verified and unverified records, highest confidence first.
    pub records: Vec<EvidenceRecord>,
    pub flags: Vec<EntryFlag>,
    pub route: Route,
    pub needs_human_review: bool,
    /// Citations discarded by the verifier for this requirement.
    pub rejected_count: usize,
}

impl MatrixEntry {
    /// Assemble an entry from the kept records and flags gathered during
    /// extraction. Rejected records never reach the matrix; only their count.
    pub fn new(
        requirement_id: &str,
        route: Route,
        mut records: Vec<EvidenceRecord>,
        mut flags: Vec<EntryFlag>,
        rejected_count: usize,
    ) -> Self {
        records.retain(|r| r.verification != VerificationOutcome::Rejected);
        records.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.document_hash.cmp(&b.document_hash))
                .then_with(|| a.span.cmp(&b.span))
        });

        if records.iter().any(|r| r.verification == VerificationOutcome::Unverified) {
            flags.push(EntryFlag::UnverifiedEvidence);
        }
        if rejected_count > 0 {
            flags.push(EntryFlag::RejectedCitations);
        }
        flags.sort_by_key(|f| f.as_str());
        flags.dedup();

        let status = derive_status(&records, &flags);
        let needs_human_review = !flags.is_empty() || status != ExtractionStatus::Covered;

        Self {
            requirement_id: requirement_id.to_string(),
            status,
            records,
            flags,
            route,
            needs_human_review,
            rejected_count,
        }
    }

    pub fn has_flag(&self, flag: EntryFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn verified_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_verified()).count()
    }
}

fn derive_status(records: &[EvidenceRecord], flags: &[EntryFlag]) -> ExtractionStatus {
    let verified = records.iter().any(EvidenceRecord::is_verified);
    if flags.contains(&EntryFlag::ExtractionUncertain) && !verified {
        ExtractionStatus::ExtractionUncertain
    } else if verified {
        ExtractionStatus::Covered
    } else if !records.is_empty() {
        ExtractionStatus::Partial
    } else {
        ExtractionStatus::Missing
    }
}

/// Entries in registry order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceMatrix {
    pub entries: Vec<MatrixEntry>,
}

impl EvidenceMatrix {
    pub fn entry(&self, requirement_id: &str) -> Option<&MatrixEntry> {
        self.entries.iter().find(|e| e.requirement_id == requirement_id)
    }

    pub fn count(&self, status: ExtractionStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn needing_review(&self) -> impl Iterator<Item = &MatrixEntry> {
        self.entries.iter().filter(|e| e.needs_human_review)
    }
}
