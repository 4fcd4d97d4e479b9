//! Deterministic field patterns: dates, identifiers and areas.
//!
//! Every match carries the byte range of its literal so callers can cite
//! the exact source text.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::models::AreaUnit;
use crate::registry::IdentifierFormat;

const MONTHS: &str = r"January|February|March|April|May|June|July|August|September|October|November|December|Jan|Feb|Mar|Apr|Jun|Jul|Aug|Sept|Sep|Oct|Nov|Dec";

static DATE_DMY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({MONTHS})\.?,?\s+(\d{{4}})\b"
    ))
    .expect("valid regex")
});

static DATE_MDY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b({MONTHS})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
    ))
    .expect("valid regex")
});

static DATE_ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid regex")
});

static DATE_NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[/.](\d{1,2})[/.](\d{4})\b").expect("valid regex")
});

/// Uppercase prefix followed by digits: `VCS-1234`, `PL2045`, `ABC/00917`.
static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{2,10}[-/]?\d{2,10}\b").expect("valid regex")
});

/// Value introduced by an explicit identifier label: `Registration No: 55-1023`.
static LABELED_IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:id|no\.?|number|ref(?:erence)?|registration|parcel|title)\s*[:#]\s*([A-Za-z0-9][A-Za-z0-9/-]{2,24})")
        .expect("valid regex")
});

static AREA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)\s*(hectares?\b|ha\b|acres?\b|km²|km2\b|sq\.?\s*km\b|square\s+kilomet(?:er|re)s?\b)",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq)]
pub struct DateMatch {
    pub date: NaiveDate,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierMatch {
    /// Normalized form used for comparison.
    pub value: String,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AreaMatch {
    pub amount: f64,
    pub unit: AreaUnit,
    pub range: Range<usize>,
}

// ═══════════════════════════════════════════
// Dates
// ═══════════════════════════════════════════

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn date_from_caps(re_index: usize, caps: &regex::Captures<'_>) -> Option<NaiveDate> {
    let get = |i: usize| caps.get(i).map(|m| m.as_str());
    match re_index {
        0 => {
            let day: u32 = get(1)?.parse().ok()?;
            let month = month_number(get(2)?)?;
            let year: i32 = get(3)?.parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
        1 => {
            let month = month_number(get(1)?)?;
            let day: u32 = get(2)?.parse().ok()?;
            let year: i32 = get(3)?.parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
        2 => {
            let year: i32 = get(1)?.parse().ok()?;
            let month: u32 = get(2)?.parse().ok()?;
            let day: u32 = get(3)?.parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
        }
        _ => {
            let a: u32 = get(1)?.parse().ok()?;
            let b: u32 = get(2)?.parse().ok()?;
            let year: i32 = get(3)?.parse().ok()?;
            // Day-first, then month-first when day-first is impossible.
            NaiveDate::from_ymd_opt(year, b, a).or_else(|| NaiveDate::from_ymd_opt(year, a, b))
        }
    }
}

fn date_patterns() -> [&'static Regex; 4] {
    [&DATE_DMY_RE, &DATE_MDY_RE, &DATE_ISO_RE, &DATE_NUMERIC_RE]
}

/// All calendar dates in the text, in order, without overlaps.
pub fn find_dates(text: &str) -> Vec<DateMatch> {
    let mut found: Vec<DateMatch> = Vec::new();
    for (i, re) in date_patterns().into_iter().enumerate() {
        for caps in re.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let range = whole.start()..whole.end();
            if found.iter().any(|m| m.range.start < range.end && range.start < m.range.end) {
                continue;
            }
            if let Some(date) = date_from_caps(i, &caps) {
                found.push(DateMatch { date, range });
            }
        }
    }
    found.sort_by_key(|m| m.range.start);
    found
}

/// Parse a literal that is exactly one date.
pub fn parse_date(literal: &str) -> Option<NaiveDate> {
    let trimmed = literal.trim();
    find_dates(trimmed)
        .into_iter()
        .find(|m| m.range.start == 0 && m.range.end == trimmed.len())
        .map(|m| m.date)
}

// ═══════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════

/// True for a bare 4-digit token that reads as a calendar year.
pub fn is_plausible_year(token: &str) -> bool {
    token.len() == 4
        && token.bytes().all(|b| b.is_ascii_digit())
        && token.parse::<u32>().map(|y| (1900..=2099).contains(&y)).unwrap_or(false)
}

pub fn normalize_identifier(literal: &str) -> String {
    literal
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_matches(|c: char| c == '.' || c == ',' || c == ';' || c == ':')
        .to_uppercase()
}

/// A candidate survives unless it reads as a year and the declared format
/// does not single out year-shaped identifiers.
fn passes_year_filter(literal: &str, format: Option<&IdentifierFormat>) -> bool {
    let normalized = normalize_identifier(literal);
    if !is_plausible_year(&normalized) {
        return true;
    }
    format.is_some_and(|f| f.admits_years() && f.matches_exactly(literal.trim()))
}

/// Identifier candidates in the text. With a declared format only its
/// matches count; otherwise the generic shapes are used.
pub fn find_identifiers(text: &str, format: Option<&IdentifierFormat>) -> Vec<IdentifierMatch> {
    let mut found: Vec<IdentifierMatch> = Vec::new();
    let push = |range: Range<usize>, found: &mut Vec<IdentifierMatch>| {
        let literal = &text[range.clone()];
        if !passes_year_filter(literal, format) {
            return;
        }
        if found.iter().any(|m| m.range.start < range.end && range.start < m.range.end) {
            return;
        }
        let value = normalize_identifier(literal);
        if !value.is_empty() {
            found.push(IdentifierMatch { value, range });
        }
    };

    match format {
        Some(f) => {
            for m in f.search.find_iter(text) {
                push(m.start()..m.end(), &mut found);
            }
        }
        None => {
            // Labeled values first: they are longer than the generic shape they may contain.
            for caps in LABELED_IDENTIFIER_RE.captures_iter(text) {
                let Some(value) = caps.get(1) else { continue };
                let trimmed = value.as_str().trim_end_matches(['.', '-', '/']);
                if !trimmed.bytes().any(|b| b.is_ascii_digit()) {
                    continue;
                }
                push(value.start()..value.start() + trimmed.len(), &mut found);
            }
            for m in IDENTIFIER_RE.find_iter(text) {
                push(m.start()..m.end(), &mut found);
            }
        }
    }

    found.sort_by_key(|m| m.range.start);
    found
}

/// Whether an identifier value is acceptable for a requirement.
pub fn accepts_identifier(literal: &str, format: Option<&IdentifierFormat>) -> bool {
    if !passes_year_filter(literal, format) {
        return false;
    }
    match format {
        Some(f) => f.matches_exactly(literal.trim()),
        None => true,
    }
}

// ═══════════════════════════════════════════
// Areas
// ═══════════════════════════════════════════

fn unit_from(raw: &str) -> Option<AreaUnit> {
    let lower = raw.to_lowercase();
    if lower.starts_with("hectare") || lower == "ha" {
        Some(AreaUnit::Hectares)
    } else if lower.starts_with("acre") {
        Some(AreaUnit::Acres)
    } else if lower.starts_with("km") || lower.starts_with("sq") || lower.starts_with("square") {
        Some(AreaUnit::SquareKilometres)
    } else {
        None
    }
}

pub fn find_areas(text: &str) -> Vec<AreaMatch> {
    AREA_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let amount: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
            let unit = unit_from(caps.get(2)?.as_str())?;
            Some(AreaMatch {
                amount,
                unit,
                range: whole.start()..whole.end(),
            })
        })
        .collect()
}

/// Parse a literal that is exactly one area.
pub fn parse_area(literal: &str) -> Option<(f64, AreaUnit)> {
    let trimmed = literal.trim();
    find_areas(trimmed)
        .into_iter()
        .find(|m| m.range.start == 0 && m.range.end == trimmed.len())
        .map(|m| (m.amount, m.unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn finds_day_month_year() {
        let text = "Project start date: 17 January 2022";
        let dates = find_dates(text);
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].date, ymd(2022, 1, 17));
        assert_eq!(&text[dates[0].range.clone()], "17 January 2022");
    }

    #[test]
    fn finds_month_day_year() {
        let dates = find_dates("Signed on March 3rd, 2021 by both parties");
        assert_eq!(dates[0].date, ymd(2021, 3, 3));
    }

    #[test]
    fn finds_iso_and_numeric() {
        let dates = find_dates("From 2021-06-01 until 15/08/2023.");
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0].date, ymd(2021, 6, 1));
        assert_eq!(dates[1].date, ymd(2023, 8, 15));
    }

    #[test]
    fn numeric_falls_back_to_month_first() {
        assert_eq!(parse_date("12/31/2022"), Some(ymd(2022, 12, 31)));
        assert_eq!(parse_date("03/04/2022"), Some(ymd(2022, 4, 3)));
    }

    #[test]
    fn invalid_calendar_dates_are_skipped() {
        assert!(find_dates("31 February 2022").is_empty());
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn year_range_is_not_a_date() {
        assert!(find_dates("crediting period 2022–2032").is_empty());
    }

    #[test]
    fn parse_date_requires_whole_literal() {
        assert_eq!(parse_date("17 January 2022"), Some(ymd(2022, 1, 17)));
        assert_eq!(parse_date("on 17 January 2022"), None);
    }

    #[test]
    fn generic_identifiers() {
        let ids = find_identifiers("Registered as VCS-1234 and PL2045.", None);
        let values: Vec<&str> = ids.iter().map(|i| i.value.as_str()).collect();
        assert_eq!(values, vec!["VCS-1234", "PL2045"]);
    }

    #[test]
    fn labeled_identifier_needs_digit() {
        let ids = find_identifiers("Title No: LR-55/1023. Reference: pending", None);
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].value, "LR-55/1023");
    }

    #[test]
    fn labeled_year_is_rejected() {
        assert!(find_identifiers("Registration No: 2022", None).is_empty());
    }

    #[test]
    fn declared_format_can_admit_year_shape() {
        let format = IdentifierFormat::compile(r"\d{4}").unwrap();
        let ids = find_identifiers("Parcel 2022 on the map", Some(&format));
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].value, "2022");
    }

    #[test]
    fn declared_format_filters_other_shapes() {
        let format = IdentifierFormat::compile(r"VCS-\d{4}").unwrap();
        let ids = find_identifiers("VCS-1234 and PL2045", Some(&format));
        assert_eq!(ids.len(), 1);
        assert!(accepts_identifier("VCS-1234", Some(&format)));
        assert!(!accepts_identifier("PL2045", Some(&format)));
    }

    #[test]
    fn areas_in_several_units() {
        let areas = find_areas("Covers 1,250.5 hectares (about 3,090 acres) or 12.5 km²");
        assert_eq!(areas.len(), 3);
        assert_eq!(areas[0].amount, 1250.5);
        assert_eq!(areas[0].unit, AreaUnit::Hectares);
        assert_eq!(areas[1].unit, AreaUnit::Acres);
        assert_eq!(areas[2].unit, AreaUnit::SquareKilometres);
        assert_eq!(parse_area("450 ha"), Some((450.0, AreaUnit::Hectares)));
        assert_eq!(parse_area("450 hats"), None);
    }

    proptest! {
        #[test]
        fn year_tokens_never_accepted_without_format(year in 1900u32..=2099, prefix in "[a-z ]{0,12}") {
            let text = format!("{prefix} No: {year} ref {year}");
            let ids = find_identifiers(&text, None);
            prop_assert!(ids.iter().all(|i| !is_plausible_year(&i.value)));
            prop_assert!(!accepts_identifier(&year.to_string(), None));
        }

        #[test]
        fn year_tokens_accepted_only_when_format_matches(year in 1900u32..=2099) {
            let exact = IdentifierFormat::compile(r"\d{4}").unwrap();
            let other = IdentifierFormat::compile(r"\d{4}-\d{2}").unwrap();
            let literal = year.to_string();
            prop_assert!(accepts_identifier(&literal, Some(&exact)));
            prop_assert!(!accepts_identifier(&literal, Some(&other)));
            let loose = IdentifierFormat::compile(r"\d{4,8}").unwrap();
            prop_assert!(!accepts_identifier(&literal, Some(&loose)));
            let text = format!("Registered in {year}, parcel 5512377");
            let ids: Vec<String> = find_identifiers(&text, Some(&loose)).into_iter().map(|i| i.value).collect();
            prop_assert_eq!(ids, vec!["5512377".to_string()]);
        }
    }
}
