//! Engine run orchestration.
//!
//! One run = one document set against one registry version:
//! triage → route → extract (per component, concurrently) → verify →
//! cache → validate once every member of a component is terminal.
//!
//! Suspension happens only inside inference calls. Requirements of a
//! component are extracted concurrently, components progress independently,
//! and each component is validated behind its own join barrier.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    EvidenceRecord, ExtractionStatus, IndexedDocument, Requirement, ValidationClass, ValidationFinding,
    VerificationOutcome,
};
use crate::registry::{Component, IdentifierFormat, RequirementRegistry};

use super::cache::{CacheEntry, CacheKey, EvidenceCache};
use super::extraction::{extract_with_inference, HeuristicExtractor, InferenceOutcome, InferenceRequest};
use super::inference::{InferenceGate, LlmClient};
use super::matrix::{EntryFlag, EvidenceMatrix, MatrixEntry};
use super::router::{ConfidenceCascadeRouter, Route, RouteDecision};
use super::usage::{UsageAccumulator, UsageSummary};
use super::validation::{CrossDocumentValidator, ValidationReport, ValidationSettings};
use super::verifier::CitationVerifier;
use super::EngineError;

// ═══════════════════════════════════════════
// Run outputs
// ═══════════════════════════════════════════

/// How the run used the inference backend. Always reported, never implied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InferenceMode {
    Enabled { model: String },
    HeuristicOnly { reason: String },
}

/// Progress events, emitted through the optional callback of [`EngineRunner::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    Started {
        run_id: Uuid,
        requirement_count: usize,
        document_count: usize,
    },
    RequirementCompleted {
        requirement_id: String,
        status: ExtractionStatus,
        completed: usize,
        total: usize,
    },
    ComponentValidated {
        members: Vec<String>,
        findings: Vec<ValidationFinding>,
    },
    Completed {
        covered: usize,
        missing: usize,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub registry_version: String,
    pub documents_received: usize,
    pub documents_used: usize,
    pub documents_excluded: usize,
    /// Non-fatal problems (unreadable or duplicate documents).
    pub warnings: Vec<String>,
    pub inference_mode: InferenceMode,
    pub usage: UsageSummary,
    pub rejected_citations: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    pub matrix: EvidenceMatrix,
    pub report: ValidationReport,
    pub summary: RunSummary,
}

type ProgressFn<'a> = &'a (dyn Fn(RunEvent) + Send + Sync);

// ═══════════════════════════════════════════
// Runner
// ═══════════════════════════════════════════

pub struct EngineRunner {
    config: EngineConfig,
    client: Option<Arc<dyn LlmClient>>,
    cache: Option<Arc<dyn EvidenceCache>>,
    inference_timeout: Duration,
}

impl EngineRunner {
    pub fn new(config: EngineConfig) -> Self {
        let inference_timeout = Duration::from_secs(config.inference_timeout_secs);
        Self {
            config,
            client: None,
            cache: None,
            inference_timeout,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn EvidenceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Override the per-call timeout taken from the configuration.
    pub fn with_inference_timeout(mut self, timeout: Duration) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the engine over a document set.
    ///
    /// Fails only on total input failure or when inference is mandatory
    /// and unavailable; every other problem is reported in the output.
    pub async fn run(
        &self,
        registry: &RequirementRegistry,
        documents: Vec<IndexedDocument>,
        progress_fn: Option<ProgressFn<'_>>,
    ) -> Result<EngineOutput, EngineError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        let documents_received = documents.len();

        let (documents, warnings) = triage(documents)?;

        let router = ConfidenceCascadeRouter::new(self.config.heuristic_threshold, self.config.missing_threshold);
        let decisions: HashMap<String, RouteDecision> = registry
            .requirements()
            .iter()
            .map(|r| (r.id.clone(), router.route(r, &documents)))
            .collect();

        let inference_mode = self.probe_inference().await;
        if let InferenceMode::HeuristicOnly { reason } = &inference_mode {
            if self.config.require_inference {
                return Err(EngineError::InferenceRequired(reason.clone()));
            }
            tracing::warn!(reason = %reason, "Inference unavailable, running heuristic-only");
        }

        let gate = match (&inference_mode, &self.client) {
            (InferenceMode::Enabled { model }, Some(client)) => Some(InferenceGate::new(
                Arc::clone(client),
                model,
                self.config.max_concurrent_inference,
                self.inference_timeout,
                self.config.max_backend_retries,
            )),
            _ => None,
        };

        tracing::info!(
            run_id = %run_id,
            registry_version = registry.version(),
            requirements = registry.len(),
            documents = documents.len(),
            inference = gate.is_some(),
            "Starting evidence run"
        );

        if let Some(progress) = progress_fn {
            progress(RunEvent::Started {
                run_id,
                requirement_count: registry.len(),
                document_count: documents.len(),
            });
        }

        let ctx = RunContext {
            run_id,
            config: &self.config,
            registry,
            documents: documents.iter().map(|d| (d.hash.as_str(), d)).collect(),
            gate,
            cache: self.cache.as_deref(),
            heuristic: HeuristicExtractor::new(self.config.max_records_per_document),
            verifier: CitationVerifier::new(self.config.verification_penalty),
            usage: UsageAccumulator::new(),
            completed: AtomicUsize::new(0),
            total: registry.len(),
            progress_fn,
        };
        let validator = CrossDocumentValidator::new(
            registry,
            ValidationSettings {
                date_tolerance_days: self.config.date_tolerance_days,
                identity_threshold: self.config.identity_threshold,
                low_confidence_floor: self.config.low_confidence_floor,
            },
        );

        let mut pending: FuturesUnordered<_> = registry
            .components()
            .iter()
            .map(|component| ctx.process_component(component, &decisions, &validator))
            .collect();

        let mut entries: HashMap<String, MatrixEntry> = HashMap::new();
        let mut findings: Vec<ValidationFinding> = Vec::new();
        while let Some((component_entries, component_findings)) = pending.next().await {
            entries.extend(component_entries.into_iter().map(|e| (e.requirement_id.clone(), e)));
            findings.extend(component_findings);
        }
        drop(pending);

        let matrix = EvidenceMatrix {
            entries: registry
                .requirements()
                .iter()
                .filter_map(|r| entries.remove(&r.id))
                .collect(),
        };
        let report = ValidationReport::build(findings, registry.edges().len());
        let rejected_citations = matrix.entries.iter().map(|e| e.rejected_count).sum();
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            run_id = %run_id,
            covered = matrix.count(ExtractionStatus::Covered),
            partial = matrix.count(ExtractionStatus::Partial),
            missing = matrix.count(ExtractionStatus::Missing),
            uncertain = matrix.count(ExtractionStatus::ExtractionUncertain),
            checked = report.checked,
            not_checked = report.not_checked,
            rejected_citations,
            duration_ms,
            "Evidence run complete"
        );

        if let Some(progress) = progress_fn {
            progress(RunEvent::Completed {
                covered: matrix.count(ExtractionStatus::Covered),
                missing: matrix.count(ExtractionStatus::Missing),
                duration_ms,
            });
        }

        let summary = RunSummary {
            run_id,
            registry_version: registry.version().to_string(),
            documents_received,
            documents_used: documents.len(),
            documents_excluded: documents_received - documents.len(),
            warnings,
            inference_mode,
            usage: ctx.usage.summary(),
            rejected_citations,
            duration_ms,
        };

        Ok(EngineOutput { matrix, report, summary })
    }

    /// Decide once per run whether the backend can be used.
    async fn probe_inference(&self) -> InferenceMode {
        if !self.config.inference_enabled {
            return InferenceMode::HeuristicOnly {
                reason: "inference disabled by configuration".to_string(),
            };
        }
        let Some(client) = &self.client else {
            return InferenceMode::HeuristicOnly {
                reason: "no inference backend configured".to_string(),
            };
        };

        let model = self.config.model_name.clone();
        let client = Arc::clone(client);
        let probe_model = model.clone();
        let probe = tokio::task::spawn_blocking(move || client.is_model_available(&probe_model));

        match tokio::time::timeout(self.inference_timeout, probe).await {
            Ok(Ok(Ok(true))) => InferenceMode::Enabled { model },
            Ok(Ok(Ok(false))) => InferenceMode::HeuristicOnly {
                reason: format!("model {model} is not available on the backend"),
            },
            Ok(Ok(Err(e))) => InferenceMode::HeuristicOnly { reason: e.to_string() },
            Ok(Err(e)) => InferenceMode::HeuristicOnly {
                reason: format!("backend probe failed: {e}"),
            },
            Err(_) => InferenceMode::HeuristicOnly {
                reason: "backend probe timed out".to_string(),
            },
        }
    }
}

/// Drop unreadable and duplicate documents. Fatal only when nothing is left.
fn triage(documents: Vec<IndexedDocument>) -> Result<(Vec<IndexedDocument>, Vec<String>), EngineError> {
    let received = documents.len();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut unreadable = 0;

    for document in documents {
        if !document.is_readable() {
            unreadable += 1;
            tracing::warn!(document = %document_label(&document), "Excluding document without readable text");
            warnings.push(format!("{}: no readable text, excluded from matching", document_label(&document)));
            continue;
        }
        if !seen.insert(document.hash.clone()) {
            warnings.push(format!("{}: duplicate content, ignored", document_label(&document)));
            continue;
        }
        kept.push(document);
    }

    if kept.is_empty() {
        return Err(EngineError::NoUsableInput { received, unreadable });
    }
    Ok((kept, warnings))
}

fn document_label(document: &IndexedDocument) -> String {
    match &document.source_name {
        Some(name) => name.clone(),
        None => format!("document {}", &document.hash[..document.hash.len().min(12)]),
    }
}

// ═══════════════════════════════════════════
// Per-run context
// ═══════════════════════════════════════════

struct RunContext<'a> {
    run_id: Uuid,
    config: &'a EngineConfig,
    registry: &'a RequirementRegistry,
    documents: HashMap<&'a str, &'a IndexedDocument>,
    gate: Option<InferenceGate>,
    cache: Option<&'a dyn EvidenceCache>,
    heuristic: HeuristicExtractor,
    verifier: CitationVerifier,
    usage: UsageAccumulator,
    completed: AtomicUsize,
    total: usize,
    progress_fn: Option<ProgressFn<'a>>,
}

/// Settled records and flags for one (requirement, document) pair.
#[derive(Default)]
struct DocumentResult {
    records: Vec<EvidenceRecord>,
    flags: Vec<EntryFlag>,
}

impl RunContext<'_> {
    async fn process_component(
        &self,
        component: &Component,
        decisions: &HashMap<String, RouteDecision>,
        validator: &CrossDocumentValidator<'_>,
    ) -> (Vec<MatrixEntry>, Vec<ValidationFinding>) {
        let members = component
            .members
            .iter()
            .filter_map(|id| Some((self.registry.get(id)?, decisions.get(id)?)));
        let entries = join_all(members.map(|(requirement, decision)| self.extract_requirement(requirement, decision))).await;

        // Join barrier: every member is terminal past this point.
        let evidence: HashMap<String, Vec<EvidenceRecord>> = entries
            .iter()
            .map(|e| (e.requirement_id.clone(), e.records.clone()))
            .collect();
        let findings = validator.validate_component(component, &evidence);

        if !component.edges.is_empty() {
            tracing::debug!(members = ?component.members, findings = findings.len(), "Component validated");
            if let Some(progress) = self.progress_fn {
                progress(RunEvent::ComponentValidated {
                    members: component.members.clone(),
                    findings: findings.clone(),
                });
            }
        }

        (entries, findings)
    }

    async fn extract_requirement(&self, requirement: &Requirement, decision: &RouteDecision) -> MatrixEntry {
        let mut flags = Vec::new();
        if requirement.validation == ValidationClass::HumanJudgment {
            flags.push(EntryFlag::HumanJudgment);
        }

        let mut records = Vec::new();
        if decision.route == Route::LikelyMissing {
            flags.push(EntryFlag::LikelyMissing);
        } else {
            let documents = decision
                .relevant_documents
                .iter()
                .filter_map(|hash| self.documents.get(hash.as_str()).copied());
            let results = join_all(documents.map(|d| self.extract_document(requirement, decision.route, d))).await;
            for result in results {
                records.extend(result.records);
                flags.extend(result.flags);
            }
        }

        let rejected_count = records
            .iter()
            .filter(|r| r.verification == VerificationOutcome::Rejected)
            .count();
        let entry = MatrixEntry::new(&requirement.id, decision.route, records, flags, rejected_count);

        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(progress) = self.progress_fn {
            progress(RunEvent::RequirementCompleted {
                requirement_id: entry.requirement_id.clone(),
                status: entry.status,
                completed,
                total: self.total,
            });
        }
        entry
    }

    async fn extract_document(&self, requirement: &Requirement, route: Route, document: &IndexedDocument) -> DocumentResult {
        let key = CacheKey::new(&document.hash, &requirement.id, self.registry.version());
        if let Some(entry) = self.cached(&key) {
            return DocumentResult {
                records: entry.records,
                flags: Vec::new(),
            };
        }

        let format = self.registry.identifier_format(&requirement.id);
        let (pending, flags) = match route {
            Route::LikelyMissing => return DocumentResult::default(),
            Route::Heuristic => (self.heuristic.extract(requirement, format, document), Vec::new()),
            Route::Inference => match &self.gate {
                None => (
                    self.degraded(requirement, format, document),
                    vec![EntryFlag::InferenceUnavailable],
                ),
                Some(gate) => {
                    let request = InferenceRequest {
                        requirement,
                        document,
                        format,
                        char_budget: self.config.excerpt_char_budget,
                        max_segments: self.config.excerpt_max_segments,
                        max_records: self.config.max_records_per_document,
                    };
                    match extract_with_inference(gate, &request, &self.usage).await {
                        InferenceOutcome::Records(records) => (records, Vec::new()),
                        InferenceOutcome::ParseFailed => (
                            self.heuristic.extract(requirement, format, document),
                            vec![EntryFlag::ExtractionUncertain],
                        ),
                        InferenceOutcome::BackendFailed(_) => (
                            self.degraded(requirement, format, document),
                            vec![EntryFlag::BackendFallback],
                        ),
                    }
                }
            },
        };

        let report = self.verifier.verify_all(pending, document);
        let mut records = report.kept;
        records.extend(report.rejected);

        // Degraded results are retried by the next run instead of frozen.
        if flags.is_empty() {
            self.store(key, &records);
        }

        DocumentResult { records, flags }
    }

    /// Heuristic records standing in for an inference call that could not happen.
    fn degraded(
        &self,
        requirement: &Requirement,
        format: Option<&IdentifierFormat>,
        document: &IndexedDocument,
    ) -> Vec<EvidenceRecord> {
        let mut records = self.heuristic.extract(requirement, format, document);
        for record in &mut records {
            record.discount(self.config.fallback_penalty);
        }
        records
    }

    fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        let cache = self.cache?;
        match cache.get(key) {
            Ok(Some(entry)) => {
                self.usage.record_cache(true);
                tracing::debug!(
                    requirement_id = %key.requirement_id,
                    document = %key.document_hash,
                    "Evidence cache hit"
                );
                Some(entry)
            }
            Ok(None) => {
                self.usage.record_cache(false);
                None
            }
            Err(e) => {
                self.usage.record_cache(false);
                tracing::warn!(requirement_id = %key.requirement_id, error = %e, "Evidence cache read failed");
                None
            }
        }
    }

    fn store(&self, key: CacheKey, records: &[EvidenceRecord]) {
        let Some(cache) = self.cache else {
            return;
        };
        let entry = CacheEntry {
            key,
            records: records.to_vec(),
            run_id: self.run_id,
            created_at: Utc::now(),
        };
        if let Err(e) = cache.put(&entry) {
            tracing::warn!(requirement_id = %entry.key.requirement_id, error = %e, "Evidence cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use proptest::prelude::*;
    use serde_json::json;

    use crate::models::{FieldKind, ValidationOutcome, ValidationType};
    use crate::pipeline::cache::InMemoryEvidenceCache;
    use crate::pipeline::inference::MockLlmClient;

    fn start_requirement() -> Requirement {
        Requirement::new("START", "Project start date")
            .with_keywords(&["start date"])
            .with_classes(&["pdd"])
            .with_field(FieldKind::Date)
            .related_to(&["CREDIT"])
    }

    fn credit_requirement() -> Requirement {
        Requirement::new("CREDIT", "Crediting period")
            .with_keywords(&["crediting period"])
            .with_classes(&["monitoring_report"])
            .with_field(FieldKind::Date)
    }

    /// Half its keywords appear in the tenure document, so it routes to inference.
    fn owner_requirement() -> Requirement {
        Requirement::new("OWNER", "Land tenure holder")
            .with_keywords(&["land owner", "title deed"])
            .with_classes(&["tenure"])
    }

    fn pdd() -> IndexedDocument {
        IndexedDocument::new("pdd", "[[page:1]]\nProject start date: 17 January 2022\n")
    }

    fn monitoring_report() -> IndexedDocument {
        IndexedDocument::new(
            "monitoring_report",
            "[[page:4]]\nMonitoring period begins 17 January 2022, crediting period 2022–2032\n",
        )
    }

    fn tenure() -> IndexedDocument {
        IndexedDocument::new("tenure", "[[page:1]]\nThe land owner is listed in annex 3.\n")
    }

    fn registry(requirements: Vec<Requirement>) -> RequirementRegistry {
        RequirementRegistry::new("v1", requirements).unwrap()
    }

    fn runner(client: Arc<MockLlmClient>) -> EngineRunner {
        EngineRunner::new(EngineConfig::default()).with_client(client)
    }

    fn quote_response(quote: &str) -> String {
        json!({"evidence": [{"quote": quote, "location": "page:1", "value": null, "confidence": 0.9}]}).to_string()
    }

    #[tokio::test]
    async fn aligned_dates_pass() {
        let client = Arc::new(MockLlmClient::empty());
        let registry = registry(vec![start_requirement(), credit_requirement()]);
        let output = runner(client.clone())
            .run(&registry, vec![pdd(), monitoring_report()], None)
            .await
            .unwrap();

        let start = output.matrix.entry("START").unwrap();
        let credit = output.matrix.entry("CREDIT").unwrap();
        assert_eq!(start.route, Route::Heuristic);
        assert_eq!(start.status, ExtractionStatus::Covered);
        assert_eq!(credit.status, ExtractionStatus::Covered);
        assert_eq!(client.call_count(), 0, "heuristic routes never call the backend");

        let dates: Vec<_> = output.report.findings_for(ValidationType::DateAlignment).collect();
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].outcome, ValidationOutcome::Pass);

        let summary = output.report.summary(ValidationType::DateAlignment).unwrap();
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.pass_rate, Some(1.0));
        let identity = output.report.summary(ValidationType::IdentityConsistency).unwrap();
        assert_eq!(identity.not_checked, 1);
        assert_eq!(identity.pass_rate, None);
    }

    #[tokio::test]
    async fn missing_requirement_is_not_a_pass() {
        let land = Requirement::new("LAND", "Land registry extract")
            .with_keywords(&["parcel"])
            .with_classes(&["land_registry"])
            .related_to(&["START"]);
        let registry = registry(vec![start_requirement(), credit_requirement(), land]);
        let output = runner(Arc::new(MockLlmClient::empty()))
            .run(&registry, vec![pdd(), monitoring_report()], None)
            .await
            .unwrap();

        let entry = output.matrix.entry("LAND").unwrap();
        assert_eq!(entry.status, ExtractionStatus::Missing);
        assert_eq!(entry.route, Route::LikelyMissing);
        assert!(entry.has_flag(EntryFlag::LikelyMissing));
        assert!(entry.needs_human_review);

        let land_findings: Vec<_> = output
            .report
            .findings
            .iter()
            .filter(|f| f.edge.touches("LAND"))
            .collect();
        assert_eq!(land_findings.len(), 3);
        assert!(land_findings.iter().all(|f| f.outcome == ValidationOutcome::NotChecked));
    }

    #[tokio::test]
    async fn hallucinated_quote_is_rejected() {
        let client = Arc::new(MockLlmClient::new(&quote_response("The land owner is Green Acres Trust")));
        let registry = registry(vec![owner_requirement()]);
        let output = runner(client.clone()).run(&registry, vec![tenure()], None).await.unwrap();

        let entry = output.matrix.entry("OWNER").unwrap();
        assert_eq!(entry.route, Route::Inference);
        assert_eq!(client.call_count(), 1);
        assert!(entry.records.is_empty());
        assert_eq!(entry.verified_count(), 0);
        assert_eq!(entry.rejected_count, 1);
        assert_eq!(entry.status, ExtractionStatus::Missing);
        assert_eq!(output.summary.rejected_citations, 1);
    }

    #[tokio::test]
    async fn verbatim_quote_is_verified() {
        let client = Arc::new(MockLlmClient::new(&quote_response("The land owner is listed in annex 3.")));
        let registry = registry(vec![owner_requirement()]);
        let output = runner(client).run(&registry, vec![tenure()], None).await.unwrap();

        let entry = output.matrix.entry("OWNER").unwrap();
        assert_eq!(entry.status, ExtractionStatus::Covered);
        assert_eq!(entry.records[0].verification, VerificationOutcome::Verified);
        assert_eq!(output.summary.inference_mode, InferenceMode::Enabled { model: "llama3.1:8b".into() });
    }

    #[tokio::test]
    async fn second_run_is_served_from_cache() {
        let client = Arc::new(MockLlmClient::new(&quote_response("The land owner is listed in annex 3.")));
        let cache = Arc::new(InMemoryEvidenceCache::new());
        let registry = registry(vec![owner_requirement()]);

        let first = runner(client.clone())
            .with_cache(cache.clone())
            .run(&registry, vec![tenure()], None)
            .await
            .unwrap();
        assert_eq!(client.call_count(), 1);

        let second = runner(client.clone())
            .with_cache(cache.clone())
            .run(&registry, vec![tenure()], None)
            .await
            .unwrap();
        assert_eq!(client.call_count(), 1, "cached key must not call the backend again");
        assert_eq!(second.summary.usage.cache_hits, 1);
        assert_eq!(second.summary.usage.inference_calls, 0);
        assert_eq!(
            first.matrix.entry("OWNER").unwrap().records,
            second.matrix.entry("OWNER").unwrap().records
        );

        let key = CacheKey::new(&tenure().hash, "OWNER", "v1");
        assert_eq!(cache.history(&key).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn new_registry_version_misses_cache() {
        let client = Arc::new(MockLlmClient::new(&quote_response("The land owner is listed in annex 3.")));
        let cache = Arc::new(InMemoryEvidenceCache::new());

        let v1 = registry(vec![owner_requirement()]);
        let v2 = RequirementRegistry::new("v2", vec![owner_requirement()]).unwrap();
        for registry in [&v1, &v2] {
            runner(client.clone())
                .with_cache(cache.clone())
                .run(registry, vec![tenure()], None)
                .await
                .unwrap();
        }
        assert_eq!(client.call_count(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_heuristic() {
        let slow = MockLlmClient::new(&quote_response("Project start date: 17 January 2022"))
            .with_delay(Duration::from_millis(300));
        let client = Arc::new(slow);
        let cache = Arc::new(InMemoryEvidenceCache::new());
        let requirement = Requirement::new("START", "Project start date")
            .with_keywords(&["start date", "commencement"])
            .with_classes(&["pdd"])
            .with_field(FieldKind::Date);
        let registry = registry(vec![requirement]);

        let config = EngineConfig {
            max_backend_retries: 0,
            ..EngineConfig::default()
        };
        let output = EngineRunner::new(config)
            .with_client(client.clone())
            .with_cache(cache.clone())
            .with_inference_timeout(Duration::from_millis(50))
            .run(&registry, vec![pdd()], None)
            .await
            .unwrap();

        let entry = output.matrix.entry("START").unwrap();
        assert_eq!(entry.route, Route::Inference);
        assert!(entry.has_flag(EntryFlag::BackendFallback));
        assert_eq!(entry.status, ExtractionStatus::Covered);
        assert!((entry.records[0].confidence - 0.65).abs() < 1e-6);
        assert_eq!(output.summary.usage.timeouts, 1);
        assert!(cache.is_empty(), "degraded results are not cached");
    }

    #[tokio::test]
    async fn malformed_answers_mark_extraction_uncertain() {
        let client = Arc::new(MockLlmClient::new("I could not find anything, sorry."));
        let registry = registry(vec![owner_requirement()]);
        let output = runner(client.clone()).run(&registry, vec![tenure()], None).await.unwrap();

        let entry = output.matrix.entry("OWNER").unwrap();
        assert_eq!(client.call_count(), 2, "one simplified retry");
        assert!(entry.has_flag(EntryFlag::ExtractionUncertain));
        assert_eq!(output.summary.usage.parse_failures, 2);
        // The keyword line is still found by the heuristic fallback.
        assert_eq!(entry.status, ExtractionStatus::Covered);
    }

    #[tokio::test]
    async fn unavailable_model_runs_heuristic_only() {
        let client = Arc::new(MockLlmClient::empty().with_models(vec!["mistral:7b".into()]));
        let requirement = Requirement::new("START", "Project start date")
            .with_keywords(&["start date", "commencement"])
            .with_classes(&["pdd"])
            .with_field(FieldKind::Date);
        let registry = registry(vec![requirement]);
        let output = runner(client.clone()).run(&registry, vec![pdd()], None).await.unwrap();

        assert!(matches!(output.summary.inference_mode, InferenceMode::HeuristicOnly { .. }));
        assert_eq!(client.call_count(), 0);
        let entry = output.matrix.entry("START").unwrap();
        assert!(entry.has_flag(EntryFlag::InferenceUnavailable));
        assert!((entry.records[0].confidence - 0.65).abs() < 1e-6);
    }

    #[tokio::test]
    async fn required_inference_aborts_when_unavailable() {
        let config = EngineConfig {
            require_inference: true,
            ..EngineConfig::default()
        };
        let registry = registry(vec![start_requirement(), credit_requirement()]);
        let result = EngineRunner::new(config).run(&registry, vec![pdd()], None).await;
        assert!(matches!(result, Err(EngineError::InferenceRequired(_))));
    }

    #[tokio::test]
    async fn no_readable_documents_is_fatal() {
        let registry = registry(vec![start_requirement(), credit_requirement()]);
        let documents = vec![
            IndexedDocument::new("pdd", ""),
            IndexedDocument::new("pdd", "[[page:1]]\n   \n[[page:2]]\n"),
        ];
        let result = runner(Arc::new(MockLlmClient::empty())).run(&registry, documents, None).await;
        assert!(matches!(
            result,
            Err(EngineError::NoUsableInput { received: 2, unreadable: 2 })
        ));
    }

    #[tokio::test]
    async fn unreadable_and_duplicate_documents_are_excluded_with_warnings() {
        let registry = registry(vec![start_requirement(), credit_requirement()]);
        let documents = vec![
            pdd(),
            pdd(),
            IndexedDocument::new("monitoring_report", "").with_source_name("scan.pdf"),
            monitoring_report(),
        ];
        let output = runner(Arc::new(MockLlmClient::empty())).run(&registry, documents, None).await.unwrap();

        assert_eq!(output.summary.documents_received, 4);
        assert_eq!(output.summary.documents_used, 2);
        assert_eq!(output.summary.documents_excluded, 2);
        assert_eq!(output.summary.warnings.len(), 2);
        assert!(output.summary.warnings.iter().any(|w| w.starts_with("scan.pdf")));
        assert_eq!(output.matrix.entry("START").unwrap().status, ExtractionStatus::Covered);
    }

    #[tokio::test]
    async fn human_judgment_requirement_is_flagged() {
        let registry = registry(vec![start_requirement().human_judgment(), credit_requirement()]);
        let output = runner(Arc::new(MockLlmClient::empty()))
            .run(&registry, vec![pdd(), monitoring_report()], None)
            .await
            .unwrap();
        let entry = output.matrix.entry("START").unwrap();
        assert!(entry.has_flag(EntryFlag::HumanJudgment));
        assert!(entry.needs_human_review);
    }

    #[tokio::test]
    async fn inference_calls_respect_concurrency_ceiling() {
        let client = Arc::new(MockLlmClient::empty().with_delay(Duration::from_millis(40)));
        let requirement = Requirement::new("R", "Evidence").with_keywords(&["alpha", "omega"]);
        let registry = registry(vec![requirement]);
        let documents: Vec<IndexedDocument> = (0..6)
            .map(|i| IndexedDocument::new("report", &format!("[[page:1]]\nalpha section {i}\n")))
            .collect();

        let config = EngineConfig {
            max_concurrent_inference: 2,
            ..EngineConfig::default()
        };
        EngineRunner::new(config)
            .with_client(client.clone())
            .run(&registry, documents, None)
            .await
            .unwrap();

        assert_eq!(client.call_count(), 6);
        assert!(client.peak_in_flight() <= 2);
        assert!(client.peak_in_flight() >= 1);
    }

    #[tokio::test]
    async fn progress_events_bracket_the_run() {
        let events: Mutex<Vec<RunEvent>> = Mutex::new(Vec::new());
        let record = |event: RunEvent| events.lock().unwrap().push(event);
        let registry = registry(vec![start_requirement(), credit_requirement()]);

        runner(Arc::new(MockLlmClient::empty()))
            .run(&registry, vec![pdd(), monitoring_report()], Some(&record))
            .await
            .unwrap();

        let events = events.into_inner().unwrap();
        assert!(matches!(events.first(), Some(RunEvent::Started { requirement_count: 2, .. })));
        assert!(matches!(events.last(), Some(RunEvent::Completed { covered: 2, .. })));
        let completed = events
            .iter()
            .filter(|e| matches!(e, RunEvent::RequirementCompleted { .. }))
            .count();
        assert_eq!(completed, 2);
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::ComponentValidated { findings, .. } if findings.len() == 3
        )));
    }

    #[tokio::test]
    async fn slow_component_does_not_hold_back_validation_of_another() {
        let events: Mutex<Vec<RunEvent>> = Mutex::new(Vec::new());
        let record = |event: RunEvent| events.lock().unwrap().push(event);
        let client = Arc::new(
            MockLlmClient::new(&quote_response("The land owner is listed in annex 3."))
                .with_delay(Duration::from_millis(200)),
        );
        let registry = registry(vec![start_requirement(), credit_requirement(), owner_requirement()]);

        runner(client.clone())
            .run(&registry, vec![pdd(), monitoring_report(), tenure()], Some(&record))
            .await
            .unwrap();
        assert_eq!(client.call_count(), 1);

        let events = events.into_inner().unwrap();
        let validated = events
            .iter()
            .position(|e| matches!(e, RunEvent::ComponentValidated { members, .. } if members.contains(&"START".to_string())))
            .unwrap();
        let owner_done = events
            .iter()
            .position(|e| matches!(e, RunEvent::RequirementCompleted { requirement_id, .. } if requirement_id == "OWNER"))
            .unwrap();
        assert!(validated < owner_done);
    }

    #[test]
    fn run_event_serializes_with_type_tag() {
        let event = RunEvent::Completed {
            covered: 1,
            missing: 0,
            duration_ms: 5,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "Completed");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn surfaced_spans_are_always_substrings(
            body in "[a-z ]{0,120}",
            invented in prop::collection::vec("[a-z ]{1,40}", 0..4),
            start in 0usize..140,
        ) {
            let document = IndexedDocument::new("report", &format!("[[page:1]]\nalpha {body}\n"));
            let from = start.min(document.text.len());
            let mut quotes = invented;
            quotes.push(document.text[from..].chars().take(24).collect());

            let items: Vec<_> = quotes
                .iter()
                .map(|q| json!({"quote": q, "location": "page:1", "value": null, "confidence": 0.9}))
                .collect();
            let client = Arc::new(MockLlmClient::new(&json!({ "evidence": items }).to_string()));
            let requirement = Requirement::new("R", "Evidence").with_keywords(&["alpha", "omega"]);
            let registry = RequirementRegistry::new("v1", vec![requirement]).unwrap();

            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let output = runtime
                .block_on(EngineRunner::new(EngineConfig::default()).with_client(client).run(&registry, vec![document.clone()], None))
                .unwrap();

            for entry in &output.matrix.entries {
                for record in &entry.records {
                    prop_assert!(document.text.contains(&record.span));
                    prop_assert_ne!(record.verification, VerificationOutcome::Rejected);
                }
            }
        }
    }
}
