//! Cross-document consistency checks along dependency edges.
//!
//! Every edge gets exactly one finding per validation type. Only verified
//! records take part; an edge with nothing to compare is `not-checked`.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{
    ComparedEvidence, DependencyEdge, EvidencePair, EvidenceRecord, TypedValue, ValidationFinding,
    ValidationOutcome, ValidationType,
};
use crate::pipeline::extraction::patterns::accepts_identifier;
use crate::registry::{Component, RequirementRegistry};

use super::similarity::{cluster_names, name_similarity};

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub date_tolerance_days: i64,
    pub identity_threshold: f64,
    pub low_confidence_floor: f32,
}

pub struct CrossDocumentValidator<'a> {
    registry: &'a RequirementRegistry,
    settings: ValidationSettings,
}

impl<'a> CrossDocumentValidator<'a> {
    pub fn new(registry: &'a RequirementRegistry, settings: ValidationSettings) -> Self {
        Self { registry, settings }
    }

    /// Validate every edge of a component once all its members are terminal.
    pub fn validate_component(
        &self,
        component: &Component,
        evidence: &HashMap<String, Vec<EvidenceRecord>>,
    ) -> Vec<ValidationFinding> {
        component
            .edges
            .iter()
            .flat_map(|edge| self.validate_edge(edge, evidence))
            .collect()
    }

    pub fn validate_edge(
        &self,
        edge: &DependencyEdge,
        evidence: &HashMap<String, Vec<EvidenceRecord>>,
    ) -> Vec<ValidationFinding> {
        let left = verified(evidence, &edge.from);
        let right = verified(evidence, &edge.to);

        vec![
            self.apply_floor(self.check_dates(edge, &left, &right)),
            self.apply_floor(self.check_identity(edge, &left, &right)),
            self.apply_floor(self.check_identifiers(edge, &left, &right)),
        ]
    }

    // ── Date alignment ──────────────────────────────────────

    fn check_dates(
        &self,
        edge: &DependencyEdge,
        left: &[&EvidenceRecord],
        right: &[&EvidenceRecord],
    ) -> ValidationFinding {
        let kind = ValidationType::DateAlignment;
        let (Some((l, l_date)), Some((r, r_date))) = (primary_date(left), primary_date(right)) else {
            return ValidationFinding::not_checked(
                kind,
                edge,
                format!("No verified date on {}", missing_sides(edge, primary_date(left).is_none(), primary_date(right).is_none())),
            );
        };

        let gap = (l_date - r_date).num_days().abs();
        let tolerance = self.settings.date_tolerance_days;
        let (outcome, explanation) = if gap <= tolerance {
            (
                ValidationOutcome::Pass,
                format!("{l_date} and {r_date} are {gap} days apart (tolerance {tolerance})"),
            )
        } else {
            (
                ValidationOutcome::Fail,
                format!("{l_date} and {r_date} are {gap} days apart, beyond the {tolerance}-day tolerance"),
            )
        };

        ValidationFinding {
            validation_type: kind,
            edge: edge.clone(),
            pairs: vec![pair(l, r)],
            outcome,
            explanation,
        }
    }

    // ── Identity consistency ────────────────────────────────

    fn check_identity(
        &self,
        edge: &DependencyEdge,
        left: &[&EvidenceRecord],
        right: &[&EvidenceRecord],
    ) -> ValidationFinding {
        let kind = ValidationType::IdentityConsistency;
        let left_names = with_names(left);
        let right_names = with_names(right);
        if left_names.is_empty() || right_names.is_empty() {
            return ValidationFinding::not_checked(
                kind,
                edge,
                format!("No verified name on {}", missing_sides(edge, left_names.is_empty(), right_names.is_empty())),
            );
        }

        let all: Vec<&str> = left_names.iter().chain(&right_names).map(|(_, n)| *n).collect();
        let clusters = cluster_names(&all, self.settings.identity_threshold);

        let pairs: Vec<EvidencePair> = left_names
            .iter()
            .flat_map(|(l, _)| right_names.iter().map(move |(r, _)| pair(l, r)))
            .collect();

        let (outcome, explanation) = if clusters.len() == 1 {
            (
                ValidationOutcome::Pass,
                format!("All {} names refer to the same entity", all.len()),
            )
        } else {
            let representatives: Vec<&str> = clusters.iter().map(|c| all[c[0]]).collect();
            let closest = left_names
                .iter()
                .flat_map(|(_, l)| right_names.iter().map(move |(_, r)| name_similarity(l, r)))
                .fold(0.0_f64, f64::max);
            (
                ValidationOutcome::Fail,
                format!(
                    "{} distinct entities ({}); closest cross-document similarity {:.0}%",
                    clusters.len(),
                    representatives.join(" / "),
                    closest * 100.0
                ),
            )
        };

        ValidationFinding {
            validation_type: kind,
            edge: edge.clone(),
            pairs,
            outcome,
            explanation,
        }
    }

    // ── Identifier consistency ──────────────────────────────

    fn check_identifiers(
        &self,
        edge: &DependencyEdge,
        left: &[&EvidenceRecord],
        right: &[&EvidenceRecord],
    ) -> ValidationFinding {
        let kind = ValidationType::IdentifierConsistency;
        let left_ids = with_identifiers(left);
        let right_ids = with_identifiers(right);
        if left_ids.is_empty() || right_ids.is_empty() {
            return ValidationFinding::not_checked(
                kind,
                edge,
                format!("No verified identifier on {}", missing_sides(edge, left_ids.is_empty(), right_ids.is_empty())),
            );
        }

        let pairs: Vec<EvidencePair> = left_ids
            .iter()
            .flat_map(|(l, _, _)| right_ids.iter().map(move |(r, _, _)| pair(l, r)))
            .collect();

        let malformed: Vec<&str> = left_ids
            .iter()
            .chain(&right_ids)
            .filter(|(record, _, literal)| {
                !accepts_identifier(literal, self.registry.identifier_format(&record.requirement_id))
            })
            .map(|(_, _, literal)| *literal)
            .collect();

        let mut distinct: Vec<&str> = left_ids.iter().chain(&right_ids).map(|(_, v, _)| *v).collect();
        distinct.sort_unstable();
        distinct.dedup();

        let (outcome, explanation) = if !malformed.is_empty() {
            (
                ValidationOutcome::Fail,
                format!("Identifiers not in the declared format: {}", malformed.join(", ")),
            )
        } else if distinct.len() == 1 {
            (
                ValidationOutcome::Pass,
                format!("Identifier {} is identical across documents", distinct[0]),
            )
        } else {
            (
                ValidationOutcome::Fail,
                format!("Identifiers differ: {}", distinct.join(", ")),
            )
        };

        ValidationFinding {
            validation_type: kind,
            edge: edge.clone(),
            pairs,
            outcome,
            explanation,
        }
    }

    /// A pass that leans on low-confidence evidence becomes a warning.
    fn apply_floor(&self, mut finding: ValidationFinding) -> ValidationFinding {
        if finding.outcome != ValidationOutcome::Pass {
            return finding;
        }
        let weakest = finding
            .pairs
            .iter()
            .flat_map(|p| [p.left.confidence, p.right.confidence])
            .fold(f32::INFINITY, f32::min);
        if weakest < self.settings.low_confidence_floor {
            finding.outcome = ValidationOutcome::Warning;
            finding.explanation = format!(
                "{} (evidence confidence {:.2} below {:.2})",
                finding.explanation, weakest, self.settings.low_confidence_floor
            );
        }
        finding
    }
}

fn verified<'e>(evidence: &'e HashMap<String, Vec<EvidenceRecord>>, requirement_id: &str) -> Vec<&'e EvidenceRecord> {
    let mut records: Vec<&EvidenceRecord> = evidence
        .get(requirement_id)
        .map(|records| records.iter().filter(|r| r.is_verified()).collect())
        .unwrap_or_default();
    records.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    records
}

fn primary_date<'r>(records: &[&'r EvidenceRecord]) -> Option<(&'r EvidenceRecord, NaiveDate)> {
    records
        .iter()
        .find_map(|r| r.value.as_ref().and_then(|v| v.as_date()).map(|d| (*r, d)))
}

fn with_names<'r>(records: &[&'r EvidenceRecord]) -> Vec<(&'r EvidenceRecord, &'r str)> {
    records
        .iter()
        .filter_map(|r| match &r.value {
            Some(TypedValue::Name { value, .. }) => Some((*r, value.as_str())),
            _ => None,
        })
        .collect()
}

fn with_identifiers<'r>(records: &[&'r EvidenceRecord]) -> Vec<(&'r EvidenceRecord, &'r str, &'r str)> {
    records
        .iter()
        .filter_map(|r| match &r.value {
            Some(TypedValue::Identifier { value, literal }) => Some((*r, value.as_str(), literal.as_str())),
            _ => None,
        })
        .collect()
}

fn pair(left: &EvidenceRecord, right: &EvidenceRecord) -> EvidencePair {
    EvidencePair {
        left: ComparedEvidence::from_record(left),
        right: ComparedEvidence::from_record(right),
    }
}

fn missing_sides(edge: &DependencyEdge, left_missing: bool, right_missing: bool) -> String {
    match (left_missing, right_missing) {
        (true, true) => format!("{} or {}", edge.from, edge.to),
        (true, false) => edge.from.clone(),
        _ => edge.to.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionMethod, Location, Requirement, VerificationOutcome};

    fn registry() -> RequirementRegistry {
        RequirementRegistry::new(
            "v1",
            vec![
                Requirement::new("A", "a").related_to(&["B"]),
                Requirement::new("B", "b").with_identifier_format(r"LR-\d{4}"),
            ],
        )
        .unwrap()
    }

    fn settings() -> ValidationSettings {
        ValidationSettings {
            date_tolerance_days: 120,
            identity_threshold: 0.75,
            low_confidence_floor: 0.5,
        }
    }

    fn rec(req: &str, value: TypedValue, confidence: f32) -> EvidenceRecord {
        let literal = value.literal().to_string();
        let mut r = EvidenceRecord::new(req, "doc", &literal, Location::Preamble, confidence, ExtractionMethod::Heuristic)
            .with_value(value);
        r.settle(VerificationOutcome::Verified, 0.0, None);
        r
    }

    fn date(req: &str, y: i32, m: u32, d: u32, confidence: f32) -> EvidenceRecord {
        rec(
            req,
            TypedValue::Date { date: NaiveDate::from_ymd_opt(y, m, d).unwrap(), literal: format!("{y}-{m:02}-{d:02}") },
            confidence,
        )
    }

    fn name(req: &str, n: &str) -> EvidenceRecord {
        rec(req, TypedValue::Name { value: n.to_lowercase(), literal: n.into() }, 0.8)
    }

    fn ident(req: &str, id: &str) -> EvidenceRecord {
        rec(req, TypedValue::Identifier { value: id.into(), literal: id.into() }, 0.8)
    }

    fn evidence(records: Vec<EvidenceRecord>) -> HashMap<String, Vec<EvidenceRecord>> {
        let mut map: HashMap<String, Vec<EvidenceRecord>> = HashMap::new();
        for r in records {
            map.entry(r.requirement_id.clone()).or_default().push(r);
        }
        map
    }

    fn finding(kind: ValidationType, records: Vec<EvidenceRecord>) -> ValidationFinding {
        let registry = registry();
        let validator = CrossDocumentValidator::new(&registry, settings());
        let edge = DependencyEdge::new("A", "B");
        validator
            .validate_edge(&edge, &evidence(records))
            .into_iter()
            .find(|f| f.validation_type == kind)
            .unwrap()
    }

    #[test]
    fn every_edge_gets_one_finding_per_type() {
        let registry = registry();
        let validator = CrossDocumentValidator::new(&registry, settings());
        let findings = validator.validate_component(&registry.components()[0], &HashMap::new());
        assert_eq!(findings.len(), 3);
        assert!(findings.iter().all(|f| f.outcome == ValidationOutcome::NotChecked));
    }

    #[test]
    fn dates_within_tolerance_pass() {
        let f = finding(ValidationType::DateAlignment, vec![date("A", 2022, 1, 17, 0.85), date("B", 2022, 3, 1, 0.85)]);
        assert_eq!(f.outcome, ValidationOutcome::Pass);
        assert_eq!(f.pairs.len(), 1);
    }

    #[test]
    fn dates_beyond_tolerance_fail() {
        let f = finding(ValidationType::DateAlignment, vec![date("A", 2022, 1, 17, 0.85), date("B", 2023, 1, 17, 0.85)]);
        assert_eq!(f.outcome, ValidationOutcome::Fail);
        assert!(f.explanation.contains("365 days"));
    }

    #[test]
    fn missing_date_is_not_checked() {
        let f = finding(ValidationType::DateAlignment, vec![date("A", 2022, 1, 17, 0.85)]);
        assert_eq!(f.outcome, ValidationOutcome::NotChecked);
        assert!(f.explanation.contains('B'));
    }

    #[test]
    fn highest_confidence_date_is_primary() {
        let f = finding(
            ValidationType::DateAlignment,
            vec![date("A", 2015, 1, 1, 0.70), date("A", 2022, 1, 17, 0.85), date("B", 2022, 2, 1, 0.85)],
        );
        assert_eq!(f.outcome, ValidationOutcome::Pass);
    }

    #[test]
    fn unverified_records_are_ignored() {
        let mut a = date("A", 2022, 1, 17, 0.85);
        a.verification = VerificationOutcome::Unverified;
        let f = finding(ValidationType::DateAlignment, vec![a, date("B", 2022, 1, 17, 0.85)]);
        assert_eq!(f.outcome, ValidationOutcome::NotChecked);
    }

    #[test]
    fn low_confidence_pass_is_warning() {
        let f = finding(ValidationType::DateAlignment, vec![date("A", 2022, 1, 17, 0.4), date("B", 2022, 1, 17, 0.85)]);
        assert_eq!(f.outcome, ValidationOutcome::Warning);
    }

    #[test]
    fn similar_names_pass() {
        let f = finding(ValidationType::IdentityConsistency, vec![name("A", "Green Acres Trust"), name("B", "Green Acre Trust")]);
        assert_eq!(f.outcome, ValidationOutcome::Pass);
    }

    #[test]
    fn dissimilar_names_fail() {
        let f = finding(ValidationType::IdentityConsistency, vec![name("A", "Green Acres Trust"), name("B", "Blue River Holdings")]);
        assert_eq!(f.outcome, ValidationOutcome::Fail);
        assert!(f.explanation.contains("2 distinct entities"));
    }

    #[test]
    fn identical_identifiers_pass() {
        let f = finding(ValidationType::IdentifierConsistency, vec![ident("A", "LR-5521"), ident("B", "LR-5521")]);
        assert_eq!(f.outcome, ValidationOutcome::Pass);
    }

    #[test]
    fn different_identifiers_fail() {
        let f = finding(ValidationType::IdentifierConsistency, vec![ident("A", "LR-5521"), ident("B", "LR-5522")]);
        assert_eq!(f.outcome, ValidationOutcome::Fail);
    }

    #[test]
    fn identifier_outside_declared_format_fails() {
        let f = finding(ValidationType::IdentifierConsistency, vec![ident("A", "PL2045"), ident("B", "PL2045")]);
        assert_eq!(f.outcome, ValidationOutcome::Fail);
        assert!(f.explanation.contains("declared format"));
    }

    #[test]
    fn field_kinds_do_not_cross() {
        let f = finding(ValidationType::IdentityConsistency, vec![date("A", 2022, 1, 1, 0.9), date("B", 2022, 1, 1, 0.9)]);
        assert_eq!(f.outcome, ValidationOutcome::NotChecked);
    }
}
