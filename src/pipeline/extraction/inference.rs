//! Inference-backed extraction strategy.
//!
//! Sends the requirement and a few bounded excerpts to the backend, asks for
//! verbatim quotes, and turns the answer into pending evidence records. A
//! malformed answer is retried once with a shorter instruction.

use serde::Deserialize;

use crate::models::{
    EvidenceRecord, ExtractionMethod, FieldKind, IndexedDocument, Location, Requirement, TypedValue,
};
use crate::pipeline::inference::{extract_json_block, sanitize_llm_output, InferenceError, InferenceGate};
use crate::pipeline::usage::UsageAccumulator;
use crate::registry::IdentifierFormat;

use super::excerpt::{render_excerpts, select_excerpts, Excerpt};
use super::names::{find_names, is_plausible_name, normalize_name};
use super::patterns::{accepts_identifier, find_areas, find_dates, find_identifiers, normalize_identifier, parse_area, parse_date};

pub const SYSTEM_PROMPT: &str =
    "You are a compliance evidence extractor. You quote documents verbatim and never guess. Output valid JSON only.";

/// Confidence assumed when the backend omits one.
const DEFAULT_CONFIDENCE: f32 = 0.7;

/// Result of one inference-backed extraction for a (requirement, document) pair.
#[derive(Debug)]
pub enum InferenceOutcome {
    /// Parsed records (possibly none), pending verification.
    Records(Vec<EvidenceRecord>),
    /// Both the full and the simplified instruction produced unparsable output.
    ParseFailed,
    /// The backend failed (timeout, unreachable, error status) after retries.
    BackendFailed(InferenceError),
}

/// Everything one extraction call needs besides the gate.
pub struct InferenceRequest<'a> {
    pub requirement: &'a Requirement,
    pub document: &'a IndexedDocument,
    pub format: Option<&'a IdentifierFormat>,
    pub char_budget: usize,
    pub max_segments: usize,
    pub max_records: usize,
}

#[derive(Debug, Deserialize)]
struct EvidenceResponse {
    evidence: Vec<EvidenceItem>,
}

#[derive(Debug, Deserialize)]
struct EvidenceItem {
    #[serde(default)]
    quote: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f32>,
}

fn field_instruction(field: FieldKind) -> &'static str {
    match field {
        FieldKind::Date => "\"value\" is the calendar date exactly as written in the quote.",
        FieldKind::Identifier => "\"value\" is the identifier exactly as written in the quote. A year is not an identifier.",
        FieldKind::Name => "\"value\" is the person or organisation name exactly as written after its role label. Never use words like \"Project\" or a file name.",
        FieldKind::Area => "\"value\" is the area with its unit exactly as written (e.g. \"450 ha\").",
        FieldKind::Text => "\"value\" is null.",
    }
}

pub fn build_prompt(requirement: &Requirement, excerpts: &[Excerpt]) -> String {
    format!(
        "Decide whether the document excerpts below contain evidence for this compliance requirement.\n\n\
REQUIREMENT ({id}): {description}\n\n\
RULES:\n\
1. Quote evidence VERBATIM: \"quote\" must be copied character for character from one excerpt.\n\
2. \"location\" is the marker above the excerpt the quote comes from (e.g. \"page:3\").\n\
3. {value_rule}\n\
4. \"confidence\" is a number between 0 and 1.\n\
5. If there is no evidence, return an empty list. Do NOT guess.\n\n\
EXCERPTS:\n\
{excerpts}\n\n\
OUTPUT FORMAT:\n\
```json\n\
{{\n\
  \"evidence\": [\n\
    {{\"quote\": \"exact text\", \"location\": \"page:N\", \"value\": \"value or null\", \"confidence\": 0.0}}\n\
  ]\n\
}}\n\
```",
        id = requirement.id,
        description = requirement.description,
        value_rule = field_instruction(requirement.field()),
        excerpts = render_excerpts(excerpts),
    )
}

/// Shorter instruction used after a malformed answer.
pub fn build_simplified_prompt(requirement: &Requirement, excerpts: &[Excerpt]) -> String {
    format!(
        "Requirement: {description}\n\n\
Text:\n{excerpts}\n\n\
Reply with JSON only: {{\"evidence\": [{{\"quote\": \"exact text copied from the Text\", \"location\": \"page:N\", \"value\": null}}]}}\n\
Use {{\"evidence\": []}} if nothing matches.",
        description = requirement.description,
        excerpts = render_excerpts(excerpts),
    )
}

/// Parse a raw backend answer. `Err` means the answer is not the expected JSON.
pub fn parse_response(raw: &str, request: &InferenceRequest<'_>) -> Result<Vec<EvidenceRecord>, InferenceError> {
    let cleaned = sanitize_llm_output(raw);
    let json = extract_json_block(&cleaned)
        .ok_or_else(|| InferenceError::MalformedResponse("No JSON object in response".to_string()))?;
    let parsed: EvidenceResponse = serde_json::from_str(json)
        .map_err(|e| InferenceError::MalformedResponse(format!("Evidence parse error: {e}")))?;

    let requirement = request.requirement;
    let document = request.document;
    let mut records = Vec::new();

    for item in parsed.evidence {
        let Some(quote) = item.quote.as_deref().map(str::trim).filter(|q| !q.is_empty()) else {
            continue;
        };

        let location = item
            .location
            .as_deref()
            .and_then(Location::parse_claim)
            .unwrap_or_else(|| {
                document
                    .occurrences(quote)
                    .first()
                    .map(|&offset| document.location_at(offset))
                    .unwrap_or(Location::Preamble)
            });

        let raw_value = item.value.as_ref().and_then(value_text);
        let value = match raw_value.as_deref() {
            Some(v) => match typed_value(requirement.field(), v, quote, request) {
                ValueCheck::Keep(value) => value,
                ValueCheck::Drop(reason) => {
                    tracing::debug!(requirement_id = %requirement.id, reason, "Dropped inference item");
                    continue;
                }
            },
            None => None,
        };

        let confidence = item.confidence.filter(|c| c.is_finite()).unwrap_or(DEFAULT_CONFIDENCE);
        let mut record = EvidenceRecord::new(
            &requirement.id,
            &document.hash,
            quote,
            location,
            confidence,
            ExtractionMethod::Inference,
        );
        record.value = value;
        records.push(record);
    }

    records.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    records.truncate(request.max_records.max(1));
    Ok(records)
}

fn value_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("null") => {
            Some(s.trim().to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

enum ValueCheck {
    Keep(Option<TypedValue>),
    Drop(&'static str),
}

/// Build the typed value. When the quote contains the same value, its
/// literal is taken from the quote so the citation can be checked.
fn typed_value(field: FieldKind, raw: &str, quote: &str, request: &InferenceRequest<'_>) -> ValueCheck {
    match field {
        FieldKind::Text => ValueCheck::Keep(None),
        FieldKind::Date => {
            let Some(date) = parse_date(raw).or_else(|| find_dates(raw).first().map(|m| m.date)) else {
                return ValueCheck::Keep(None);
            };
            let literal = find_dates(quote)
                .into_iter()
                .find(|m| m.date == date)
                .map(|m| quote[m.range].to_string())
                .unwrap_or_else(|| raw.to_string());
            ValueCheck::Keep(Some(TypedValue::Date { date, literal }))
        }
        FieldKind::Identifier => {
            let wanted = normalize_identifier(raw);
            let literal = find_identifiers(quote, request.format)
                .into_iter()
                .find(|m| m.value == wanted)
                .map(|m| quote[m.range].to_string())
                .unwrap_or_else(|| raw.to_string());
            if !accepts_identifier(&literal, request.format) {
                return ValueCheck::Drop("identifier rejected by format or year filter");
            }
            ValueCheck::Keep(Some(TypedValue::Identifier {
                value: normalize_identifier(&literal),
                literal,
            }))
        }
        FieldKind::Name => {
            let source = request.document.source_name.as_deref();
            if !is_plausible_name(raw, source) {
                return ValueCheck::Drop("implausible name");
            }
            let wanted = normalize_name(raw);
            let literal = find_names(quote, source)
                .into_iter()
                .find(|m| m.value == wanted)
                .map(|m| quote[m.range].to_string())
                .or_else(|| find_case_insensitive(quote, raw))
                .unwrap_or_else(|| raw.to_string());
            ValueCheck::Keep(Some(TypedValue::Name {
                value: normalize_name(&literal),
                literal,
            }))
        }
        FieldKind::Area => {
            let Some((amount, unit)) = parse_area(raw).or_else(|| find_areas(raw).first().map(|m| (m.amount, m.unit))) else {
                return ValueCheck::Keep(None);
            };
            let literal = find_areas(quote)
                .into_iter()
                .find(|m| m.amount == amount && m.unit == unit)
                .map(|m| quote[m.range].to_string())
                .unwrap_or_else(|| raw.to_string());
            ValueCheck::Keep(Some(TypedValue::Area { amount, unit, literal }))
        }
    }
}

/// The slice of `haystack` equal to `needle` ignoring case. Offsets found in
/// the lowercased text are only trusted when they land on char boundaries and
/// the slice lowercases back to the needle.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<String> {
    let lower_needle = needle.to_lowercase();
    if lower_needle.is_empty() {
        return None;
    }
    let start = haystack.to_lowercase().find(&lower_needle)?;
    let candidate = haystack.get(start..start.checked_add(lower_needle.len())?)?;
    (candidate.to_lowercase() == lower_needle).then(|| candidate.to_string())
}

/// Run one inference-backed extraction: full prompt, then one simplified
/// retry when the answer is malformed.
pub async fn extract_with_inference(
    gate: &InferenceGate,
    request: &InferenceRequest<'_>,
    usage: &UsageAccumulator,
) -> InferenceOutcome {
    let keywords = request.requirement.match_keywords();
    let excerpts = select_excerpts(request.document, &keywords, request.char_budget, request.max_segments);
    if excerpts.is_empty() {
        return InferenceOutcome::Records(Vec::new());
    }

    let prompts = [
        build_prompt(request.requirement, &excerpts),
        build_simplified_prompt(request.requirement, &excerpts),
    ];

    for (attempt, prompt) in prompts.iter().enumerate() {
        let raw = match gate.generate(prompt, SYSTEM_PROMPT, usage).await {
            Ok(raw) => raw,
            Err(e) => {
                usage.record_backend_failure();
                tracing::warn!(
                    requirement_id = %request.requirement.id,
                    document = %request.document.hash,
                    error = %e,
                    "Inference backend failed"
                );
                return InferenceOutcome::BackendFailed(e);
            }
        };

        match parse_response(&raw, request) {
            Ok(records) => return InferenceOutcome::Records(records),
            Err(e) => {
                usage.record_parse_failure();
                tracing::warn!(
                    requirement_id = %request.requirement.id,
                    document = %request.document.hash,
                    attempt = attempt + 1,
                    error = %e,
                    "Failed to parse inference response"
                );
            }
        }
    }

    InferenceOutcome::ParseFailed
}
