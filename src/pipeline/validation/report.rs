//! Validation report with explicit checked / not-checked accounting.

use serde::{Deserialize, Serialize};

use crate::models::{ValidationFinding, ValidationOutcome, ValidationType};

/// Counts for one validation type. `checked + not_checked == total_edges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub validation_type: ValidationType,
    pub total_edges: usize,
    pub checked: usize,
    pub not_checked: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    /// `passed / checked`; `None` when nothing was checked.
    pub pass_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<ValidationFinding>,
    pub summaries: Vec<TypeSummary>,
    pub total_edges: usize,
    pub checked: usize,
    pub not_checked: usize,
    pub pass_rate: Option<f64>,
}

impl ValidationReport {
    /// Build the report from every finding of a run. `total_edges` is the
    /// number of dependency edges in the registry.
    pub fn build(mut findings: Vec<ValidationFinding>, total_edges: usize) -> Self {
        findings.sort_by(|a, b| {
            a.edge
                .cmp(&b.edge)
                .then_with(|| a.validation_type.as_str().cmp(b.validation_type.as_str()))
        });

        let summaries: Vec<TypeSummary> = ValidationType::all()
            .iter()
            .map(|&kind| summarize(kind, &findings, total_edges))
            .collect();

        let checked: usize = summaries.iter().map(|s| s.checked).sum();
        let not_checked: usize = summaries.iter().map(|s| s.not_checked).sum();
        let passed: usize = summaries.iter().map(|s| s.passed).sum();

        Self {
            findings,
            summaries,
            total_edges,
            checked,
            not_checked,
            pass_rate: rate(passed, checked),
        }
    }

    pub fn summary(&self, kind: ValidationType) -> Option<&TypeSummary> {
        self.summaries.iter().find(|s| s.validation_type == kind)
    }

    pub fn findings_for(&self, kind: ValidationType) -> impl Iterator<Item = &ValidationFinding> {
        self.findings.iter().filter(move |f| f.validation_type == kind)
    }
}

fn summarize(kind: ValidationType, findings: &[ValidationFinding], total_edges: usize) -> TypeSummary {
    let of_kind: Vec<&ValidationFinding> = findings.iter().filter(|f| f.validation_type == kind).collect();
    let count = |outcome: ValidationOutcome| of_kind.iter().filter(|f| f.outcome == outcome).count();

    let passed = count(ValidationOutcome::Pass);
    let warnings = count(ValidationOutcome::Warning);
    let failed = count(ValidationOutcome::Fail);
    let checked = passed + warnings + failed;
    // Edges that produced no finding at all count as not checked.
    let not_checked = total_edges.saturating_sub(checked);

    TypeSummary {
        validation_type: kind,
        total_edges,
        checked,
        not_checked,
        passed,
        warnings,
        failed,
        pass_rate: rate(passed, checked),
    }
}

fn rate(passed: usize, checked: usize) -> Option<f64> {
    (checked > 0).then(|| passed as f64 / checked as f64)
}
