//! Deterministic extraction strategy.

use std::ops::Range;

use crate::models::{
    EvidenceRecord, ExtractionMethod, FieldKind, IndexedDocument, Requirement, TypedValue,
};
use crate::registry::IdentifierFormat;

use super::names::find_names;
use super::patterns::{find_areas, find_dates, find_identifiers};

/// Longest span cited for a single match.
const MAX_SPAN_BYTES: usize = 400;
/// Bytes of context kept before a match when a line is longer than `MAX_SPAN_BYTES`.
const LEAD_CONTEXT_BYTES: usize = 150;

const DATE_BASE: f32 = 0.70;
const IDENTIFIER_BASE: f32 = 0.75;
const NAME_BASE: f32 = 0.75;
const AREA_BASE: f32 = 0.70;
const KEYWORD_LINE_BONUS: f32 = 0.15;
const TEXT_BASE: f32 = 0.40;
const TEXT_COVERAGE_WEIGHT: f32 = 0.50;

pub struct HeuristicExtractor {
    max_records: usize,
}

impl HeuristicExtractor {
    pub fn new(max_records: usize) -> Self {
        Self { max_records: max_records.max(1) }
    }

    /// Pattern search for the requirement's field kind. Records are pending
    /// verification, sorted by descending confidence and capped.
    pub fn extract(
        &self,
        requirement: &Requirement,
        format: Option<&IdentifierFormat>,
        document: &IndexedDocument,
    ) -> Vec<EvidenceRecord> {
        let keywords = requirement.match_keywords();
        let text = document.text.as_str();

        let candidates: Vec<(Range<usize>, Option<TypedValue>, f32)> = match requirement.field() {
            FieldKind::Date => find_dates(text)
                .into_iter()
                .map(|m| {
                    let value = TypedValue::Date {
                        date: m.date,
                        literal: text[m.range.clone()].to_string(),
                    };
                    (m.range, Some(value), DATE_BASE)
                })
                .collect(),
            FieldKind::Identifier => find_identifiers(text, format)
                .into_iter()
                .map(|m| {
                    let value = TypedValue::Identifier {
                        value: m.value,
                        literal: text[m.range.clone()].to_string(),
                    };
                    (m.range, Some(value), IDENTIFIER_BASE)
                })
                .collect(),
            FieldKind::Name => find_names(text, document.source_name.as_deref())
                .into_iter()
                .map(|m| {
                    let value = TypedValue::Name {
                        value: m.value,
                        literal: text[m.range.clone()].to_string(),
                    };
                    (m.range, Some(value), NAME_BASE)
                })
                .collect(),
            FieldKind::Area => find_areas(text)
                .into_iter()
                .map(|m| {
                    let value = TypedValue::Area {
                        amount: m.amount,
                        unit: m.unit,
                        literal: text[m.range.clone()].to_string(),
                    };
                    (m.range, Some(value), AREA_BASE)
                })
                .collect(),
            FieldKind::Text => return self.extract_text(requirement, &keywords, document),
        };

        let mut records: Vec<EvidenceRecord> = Vec::new();
        for (range, value, base) in candidates {
            let span = span_around(document, &range);
            let line = &text[span.clone()];
            let confidence = if line_has_keyword(line, &keywords) {
                base + KEYWORD_LINE_BONUS
            } else {
                base
            };

            if records.iter().any(|r| r.span == line && r.value == value) {
                continue;
            }

            let mut record = EvidenceRecord::new(
                &requirement.id,
                &document.hash,
                line,
                document.location_at(span.start),
                confidence,
                ExtractionMethod::Heuristic,
            );
            record.value = value;
            records.push(record);
        }

        self.finish(records)
    }

    /// Lines mentioning the requirement's keywords, scored by how many they mention.
    fn extract_text(
        &self,
        requirement: &Requirement,
        keywords: &[String],
        document: &IndexedDocument,
    ) -> Vec<EvidenceRecord> {
        if keywords.is_empty() {
            return Vec::new();
        }

        let mut records = Vec::new();
        for segment in document.segments() {
            let mut offset = segment.range.start;
            for raw_line in segment.body.split_inclusive('\n') {
                let line_range = trim_range(&document.text, offset..offset + raw_line.len());
                offset += raw_line.len();
                if line_range.is_empty() {
                    continue;
                }
                let line = &document.text[line_range.clone()];
                let lower = line.to_lowercase();
                let hits = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
                if hits == 0 {
                    continue;
                }
                let coverage = hits as f32 / keywords.len() as f32;
                let span = clamp_window(&document.text, line_range.clone(), &line_range);
                records.push(EvidenceRecord::new(
                    &requirement.id,
                    &document.hash,
                    &document.text[span],
                    segment.location.clone(),
                    TEXT_BASE + TEXT_COVERAGE_WEIGHT * coverage,
                    ExtractionMethod::Heuristic,
                ));
            }
        }

        self.finish(records)
    }

    fn finish(&self, mut records: Vec<EvidenceRecord>) -> Vec<EvidenceRecord> {
        records.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        records.truncate(self.max_records);
        records
    }
}

fn line_has_keyword(line: &str, keywords: &[String]) -> bool {
    let lower = line.to_lowercase();
    keywords.iter().any(|k| lower.contains(k.as_str()))
}

/// The line around `matched`, limited to the enclosing marker segment,
/// trimmed, and windowed when too long. Always contains `matched`.
pub(crate) fn span_around(document: &IndexedDocument, matched: &Range<usize>) -> Range<usize> {
    let text = document.text.as_str();
    let segment = document.segment_range_at(matched.start);

    let line_start = text[..matched.start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[matched.end..]
        .find('\n')
        .map(|i| matched.end + i)
        .unwrap_or(text.len());

    let start = line_start.max(segment.start).min(matched.start);
    let end = line_end.min(segment.end).max(matched.end);

    let line = trim_range(text, start..end);
    let line = if line.start > matched.start || line.end < matched.end {
        matched.clone()
    } else {
        line
    };
    clamp_window(text, line, matched)
}

fn trim_range(text: &str, range: Range<usize>) -> Range<usize> {
    let slice = &text[range.clone()];
    let lead = slice.len() - slice.trim_start().len();
    let trail = slice.len() - slice.trim_end().len();
    if lead == slice.len() {
        return range.start..range.start;
    }
    range.start + lead..range.end - trail
}

/// Shrink `range` to at most `MAX_SPAN_BYTES` around `anchor`, on char boundaries.
fn clamp_window(text: &str, range: Range<usize>, anchor: &Range<usize>) -> Range<usize> {
    if range.len() <= MAX_SPAN_BYTES {
        return range;
    }
    let mut start = anchor.start.saturating_sub(LEAD_CONTEXT_BYTES).max(range.start);
    let mut end = (start + MAX_SPAN_BYTES).min(range.end).max(anchor.end);
    while start < anchor.start && !text.is_char_boundary(start) {
        start += 1;
    }
    while end > anchor.end && !text.is_char_boundary(end) {
        end -= 1;
    }
    trim_range(text, start..end)
}
