//! Label-anchored name extraction.
//!
//! A name is only taken when a role label ("owner:", "steward -",
//! "proponent is") precedes it, and the captured words survive the
//! boilerplate and filename filters.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static LABELED_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\b(?:land\s*owner|landowner|owner|steward|proponent|holder|title\s+holder|operator|developer|applicant)(?:\s+name)?\s*(?::|-|–|\bis\b))[ \t]*((?:[A-Z][\w'&.,-]*)(?:[ \t]+(?:[A-Z][\w'&.,-]*|of|and|the|de|du|van|von|&)){0,5})",
    )
    .expect("valid regex")
});

static FILE_EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\.(pdf|docx?|xlsx?|csv|txt|png|jpe?g|tiff?|kml|shp|zip)\b").expect("valid regex")
});

/// Words that appear after role labels in templates and must never be read as names.
const BOILERPLATE: &[&str] = &[
    "project", "the project", "this project", "n/a", "na", "none", "tbd", "tba", "unknown",
    "not applicable", "name", "owner", "steward", "proponent", "holder", "operator",
    "developer", "applicant", "see", "see above", "see below", "see annex", "pending",
    "to be confirmed", "company", "organization", "organisation", "government", "yes", "no",
];

/// Trailing connector words dropped from a capture.
const TRAILING_CONNECTORS: &[&str] = &["of", "and", "the", "de", "du", "van", "von", "&"];

#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    /// Normalized form used for comparison.
    pub value: String,
    /// Byte range of the literal name (label excluded).
    pub range: Range<usize>,
}

/// Lowercase, collapse whitespace and strip surrounding punctuation.
pub fn normalize_name(literal: &str) -> String {
    literal
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '&'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Tokens derived from a file name (`Green_Acres_Deed.pdf` -> green, acres, deed).
fn filename_tokens(source_name: Option<&str>) -> Vec<String> {
    let Some(name) = source_name else {
        return Vec::new();
    };
    let stem = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
    stem.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Reject fragments that are boilerplate or look like they came from a file name.
pub fn is_plausible_name(literal: &str, source_name: Option<&str>) -> bool {
    let normalized = normalize_name(literal);
    if normalized.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return false;
    }
    if BOILERPLATE.contains(&normalized.as_str()) {
        return false;
    }
    if normalized.split(' ').all(|w| BOILERPLATE.contains(&w) || TRAILING_CONNECTORS.contains(&w)) {
        return false;
    }
    if literal.contains('_') || FILE_EXTENSION_RE.is_match(literal) {
        return false;
    }
    let tokens = filename_tokens(source_name);
    if !tokens.is_empty() {
        let words: Vec<&str> = normalized.split(' ').collect();
        if words.iter().all(|w| tokens.iter().any(|t| t == w)) {
            return false;
        }
    }
    true
}

/// Trim trailing connectors and punctuation from a raw capture. Returns the
/// length of the kept prefix.
fn trimmed_len(capture: &str) -> usize {
    let mut end = capture.trim_end_matches([',', '.', ';', ':', '-']).len();
    loop {
        let head = capture[..end].trim_end();
        match head.rsplit_once(char::is_whitespace) {
            Some((rest, last)) if TRAILING_CONNECTORS.contains(&last.to_lowercase().as_str()) => {
                end = rest.trim_end().trim_end_matches([',', '.', ';', ':', '-']).len();
            }
            _ => return head.len(),
        }
    }
}

/// Names introduced by a role label.
pub fn find_names(text: &str, source_name: Option<&str>) -> Vec<NameMatch> {
    let mut found = Vec::new();
    for caps in LABELED_NAME_RE.captures_iter(text) {
        let Some(capture) = caps.get(1) else { continue };
        let len = trimmed_len(capture.as_str());
        if len == 0 {
            continue;
        }
        let range = capture.start()..capture.start() + len;
        let literal = &text[range.clone()];
        if !is_plausible_name(literal, source_name) {
            tracing::debug!(candidate = literal, "Rejected implausible name");
            continue;
        }
        found.push(NameMatch {
            value: normalize_name(literal),
            range,
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_labeled_owner() {
        let text = "Owner: Green Acres Trust\nArea: 450 ha";
        let names = find_names(text, None);
        assert_eq!(names.len(), 1);
        assert_eq!(&text[names[0].range.clone()], "Green Acres Trust");
        assert_eq!(names[0].value, "green acres trust");
    }

    #[test]
    fn label_variants() {
        assert_eq!(find_names("The project proponent is Terra Carbon Ltd.", None)[0].value, "terra carbon ltd");
        assert_eq!(find_names("Land owner - Maria Silva", None)[0].value, "maria silva");
        assert_eq!(find_names("STEWARD: Kijani Community Forest Association", None).len(), 1);
    }

    #[test]
    fn unlabeled_names_are_ignored() {
        assert!(find_names("Green Acres Trust owns the land.", None).is_empty());
    }

    #[test]
    fn project_boilerplate_is_rejected() {
        assert!(find_names("Owner: Project", None).is_empty());
        assert!(find_names("Proponent: The Project", None).is_empty());
        assert!(find_names("Owner: N/A", None).is_empty());
    }

    #[test]
    fn filename_tokens_are_rejected() {
        assert!(!is_plausible_name("Green_Acres_Deed", None));
        assert!(!is_plausible_name("Deed.pdf", None));
        assert!(!is_plausible_name("Green Acres Deed", Some("uploads/Green_Acres_Deed.pdf")));
        assert!(is_plausible_name("Green Acres Trust", Some("uploads/Green_Acres_Deed.pdf")));
    }

    #[test]
    fn trailing_connectors_dropped() {
        let text = "Holder: Bank of";
        let names = find_names(text, None);
        assert_eq!(names[0].value, "bank");
    }

    #[test]
    fn lowercase_after_label_is_not_a_name() {
        assert!(find_names("owner: to be confirmed", None).is_empty());
    }

    #[test]
    fn normalize_collapses_spacing_and_case() {
        assert_eq!(normalize_name("  Green   ACRES, Trust. "), "green acres trust");
    }
}
