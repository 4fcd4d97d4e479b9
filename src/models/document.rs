use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inline location markers emitted by the indexer:
/// `[[page:3]]`, `[[sheet:Budget]]`, `[[section:Land Tenure]]`.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[(page|sheet|section):\s*([^\]\n]+?)\s*\]\]").expect("valid regex")
});

/// Looser forms accepted when parsing a location claimed by the inference backend.
static CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:\[\[)?\s*(page|p\.|pg\.?|sheet|section)\s*[:#]?\s*([^\]]+?)\s*(?:\]\])?\s*$")
        .expect("valid regex")
});

// ═══════════════════════════════════════════
// Location
// ═══════════════════════════════════════════

/// Where in a document a span lives, derived from the nearest preceding marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum Location {
    /// Text before the first marker (or the whole of an unmarked document).
    Preamble,
    Page(u32),
    Sheet(String),
    Section(String),
}

impl Location {
    fn from_marker(kind: &str, label: &str) -> Option<Self> {
        match kind.to_lowercase().as_str() {
            "page" | "p." | "pg" | "pg." => label.trim().parse::<u32>().ok().map(Self::Page),
            "sheet" => Some(Self::Sheet(label.trim().to_string())),
            "section" => Some(Self::Section(label.trim().to_string())),
            _ => None,
        }
    }

    /// Parse a location as claimed in an inference response
    /// (`"page:3"`, `"Page 3"`, `"[[sheet:Budget]]"`, `"preamble"`).
    pub fn parse_claim(claim: &str) -> Option<Self> {
        let trimmed = claim.trim();
        if trimmed.eq_ignore_ascii_case("preamble") {
            return Some(Self::Preamble);
        }
        let caps = CLAIM_RE.captures(trimmed)?;
        Self::from_marker(caps.get(1)?.as_str(), caps.get(2)?.as_str())
    }

    /// The marker token form, used when presenting excerpts to the backend.
    pub fn marker(&self) -> String {
        match self {
            Self::Preamble => "preamble".to_string(),
            Self::Page(n) => format!("page:{n}"),
            Self::Sheet(s) => format!("sheet:{s}"),
            Self::Section(s) => format!("section:{s}"),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preamble => write!(f, "preamble"),
            Self::Page(n) => write!(f, "page {n}"),
            Self::Sheet(s) => write!(f, "sheet {s}"),
            Self::Section(s) => write!(f, "section {s}"),
        }
    }
}

/// A marker token found in the document text.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMarker {
    pub location: Location,
    /// Byte range of the marker token itself.
    pub token: Range<usize>,
}

/// Text between two markers.
#[derive(Debug, Clone)]
pub struct Segment<'a> {
    pub location: Location,
    /// Byte range of the body within the document text.
    pub range: Range<usize>,
    pub body: &'a str,
}

// ═══════════════════════════════════════════
// Indexed Document
// ═══════════════════════════════════════════

/// A document as produced by the external indexer. Immutable for a run;
/// a changed file is a new document with a new hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub hash: String,
    pub classification: String,
    /// Plain text with inline location markers.
    pub text: String,
    /// Original file name, when the indexer knows it.
    #[serde(default)]
    pub source_name: Option<String>,
}

impl IndexedDocument {
    /// Build a document whose hash is the SHA-256 of its text.
    pub fn new(classification: &str, text: &str) -> Self {
        Self {
            hash: content_hash(text),
            classification: classification.to_string(),
            text: text.to_string(),
            source_name: None,
        }
    }

    pub fn with_source_name(mut self, name: &str) -> Self {
        self.source_name = Some(name.to_string());
        self
    }

    pub fn text_len(&self) -> usize {
        self.text.len()
    }

    /// A document is unreadable when nothing but markers and whitespace remain.
    pub fn is_readable(&self) -> bool {
        MARKER_RE.replace_all(&self.text, "").trim().chars().any(|c| !c.is_whitespace())
    }

    pub fn markers(&self) -> Vec<LocationMarker> {
        MARKER_RE
            .captures_iter(&self.text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let location = Location::from_marker(caps.get(1)?.as_str(), caps.get(2)?.as_str())?;
                Some(LocationMarker {
                    location,
                    token: whole.start()..whole.end(),
                })
            })
            .collect()
    }

    /// Location of the nearest marker ending at or before `offset`.
    pub fn location_at(&self, offset: usize) -> Location {
        self.markers()
            .into_iter()
            .take_while(|m| m.token.end <= offset)
            .last()
            .map(|m| m.location)
            .unwrap_or(Location::Preamble)
    }

    /// Every location a citation may legitimately claim.
    pub fn locations(&self) -> Vec<Location> {
        self.segments().into_iter().map(|s| s.location).collect()
    }

    /// Split the text on markers. The preamble is only included when it has content
    /// or the document carries no markers at all.
    pub fn segments(&self) -> Vec<Segment<'_>> {
        let markers = self.markers();
        let mut segments = Vec::with_capacity(markers.len() + 1);

        let preamble_end = markers.first().map(|m| m.token.start).unwrap_or(self.text.len());
        let preamble = &self.text[..preamble_end];
        if markers.is_empty() || !preamble.trim().is_empty() {
            segments.push(Segment {
                location: Location::Preamble,
                range: 0..preamble_end,
                body: preamble,
            });
        }

        for (i, marker) in markers.iter().enumerate() {
            let start = marker.token.end;
            let end = markers.get(i + 1).map(|m| m.token.start).unwrap_or(self.text.len());
            segments.push(Segment {
                location: marker.location.clone(),
                range: start..end,
                body: &self.text[start..end],
            });
        }

        segments
    }

    /// Byte range of the segment containing `offset`.
    pub fn segment_range_at(&self, offset: usize) -> Range<usize> {
        self.segments()
            .into_iter()
            .find(|s| s.range.start <= offset && offset < s.range.end)
            .map(|s| s.range)
            .unwrap_or(0..self.text.len())
    }

    /// Start offsets of every occurrence of `needle`.
    pub fn occurrences(&self, needle: &str) -> Vec<usize> {
        if needle.is_empty() {
            return Vec::new();
        }
        self.text.match_indices(needle).map(|(i, _)| i).collect()
    }
}

/// Hex SHA-256 of a document's text.
pub fn content_hash(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGED: &str = "Cover sheet\n[[page:1]]\nProject start date: 17 January 2022\n[[page:2]]\nOwner: Green Acres Trust\n";

    #[test]
    fn markers_are_parsed_in_order() {
        let doc = IndexedDocument::new("pdd", PAGED);
        let markers = doc.markers();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].location, Location::Page(1));
        assert_eq!(markers[1].location, Location::Page(2));
    }

    #[test]
    fn location_at_uses_nearest_preceding_marker() {
        let doc = IndexedDocument::new("pdd", PAGED);
        let start = doc.text.find("Project start").unwrap();
        let owner = doc.text.find("Owner").unwrap();
        assert_eq!(doc.location_at(0), Location::Preamble);
        assert_eq!(doc.location_at(start), Location::Page(1));
        assert_eq!(doc.location_at(owner), Location::Page(2));
    }

    #[test]
    fn segments_cover_marker_bodies() {
        let doc = IndexedDocument::new("pdd", PAGED);
        let segments = doc.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].location, Location::Preamble);
        assert!(segments[1].body.contains("17 January 2022"));
        assert!(segments[2].body.contains("Green Acres"));
    }

    #[test]
    fn empty_preamble_is_not_a_segment() {
        let doc = IndexedDocument::new("sheet", "[[sheet:Budget]]\nTotal 100\n");
        let locations = doc.locations();
        assert_eq!(locations, vec![Location::Sheet("Budget".to_string())]);
    }

    #[test]
    fn unmarked_document_is_all_preamble() {
        let doc = IndexedDocument::new("letter", "Just text.");
        assert_eq!(doc.locations(), vec![Location::Preamble]);
        assert_eq!(doc.location_at(5), Location::Preamble);
    }

    #[test]
    fn marker_only_document_is_unreadable() {
        assert!(!IndexedDocument::new("scan", "[[page:1]]\n  \n[[page:2]]\n").is_readable());
        assert!(!IndexedDocument::new("scan", "").is_readable());
        assert!(IndexedDocument::new("scan", "[[page:1]] text").is_readable());
    }

    #[test]
    fn claimed_locations_parse_loosely() {
        assert_eq!(Location::parse_claim("page:3"), Some(Location::Page(3)));
        assert_eq!(Location::parse_claim("Page 3"), Some(Location::Page(3)));
        assert_eq!(Location::parse_claim("[[page:12]]"), Some(Location::Page(12)));
        assert_eq!(Location::parse_claim("sheet: Budget"), Some(Location::Sheet("Budget".into())));
        assert_eq!(Location::parse_claim("Preamble"), Some(Location::Preamble));
        assert_eq!(Location::parse_claim("somewhere"), None);
        assert_eq!(Location::parse_claim("page:three"), None);
    }

    #[test]
    fn content_hash_is_stable_sha256() {
        let a = IndexedDocument::new("x", "abc");
        assert_eq!(
            a.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(a.hash, IndexedDocument::new("y", "abc").hash);
    }

    #[test]
    fn occurrences_finds_all_matches() {
        let doc = IndexedDocument::new("x", "2022 and 2022");
        assert_eq!(doc.occurrences("2022"), vec![0, 9]);
        assert!(doc.occurrences("").is_empty());
    }
}
