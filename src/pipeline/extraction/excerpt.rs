//! Excerpt selection for inference prompts.
//!
//! Only the marker segments most likely to hold evidence are sent, in
//! document order, each an exact slice of the source text.

use crate::models::{IndexedDocument, Location};

#[derive(Debug, Clone, PartialEq)]
pub struct Excerpt {
    pub location: Location,
    pub text: String,
}

/// Pick up to `max_segments` segments ranked by keyword hits within
/// `char_budget` bytes. Without any hit the leading segments are used.
pub fn select_excerpts(
    document: &IndexedDocument,
    keywords: &[String],
    char_budget: usize,
    max_segments: usize,
) -> Vec<Excerpt> {
    let segments: Vec<_> = document
        .segments()
        .into_iter()
        .filter(|s| !s.body.trim().is_empty())
        .collect();

    let mut ranked: Vec<(usize, usize)> = segments
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let lower = s.body.to_lowercase();
            let hits = keywords.iter().map(|k| lower.matches(k.as_str()).count()).sum();
            (i, hits)
        })
        .collect();

    let any_hits = ranked.iter().any(|&(_, hits)| hits > 0);
    if any_hits {
        ranked.retain(|&(_, hits)| hits > 0);
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    }
    ranked.truncate(max_segments.max(1));
    ranked.sort_by_key(|&(i, _)| i);

    let mut remaining = char_budget;
    let mut excerpts = Vec::new();
    for (i, _) in ranked {
        if remaining == 0 {
            break;
        }
        let body = segments[i].body.trim();
        let slice = window(body, keywords, remaining);
        if slice.is_empty() {
            continue;
        }
        remaining = remaining.saturating_sub(slice.len());
        excerpts.push(Excerpt {
            location: segments[i].location.clone(),
            text: slice.to_string(),
        });
    }
    excerpts
}

/// At most `budget` bytes of `body`, starting a little before the first
/// keyword hit when the body does not fit.
fn window<'a>(body: &'a str, keywords: &[String], budget: usize) -> &'a str {
    if body.len() <= budget {
        return body;
    }
    let lower = body.to_lowercase();
    let first_hit = keywords
        .iter()
        .filter_map(|k| lower.find(k.as_str()))
        .min()
        .unwrap_or(0);
    // Lowercasing can shift byte offsets for non-ASCII text.
    let first_hit = if lower.len() == body.len() { first_hit } else { 0 };

    let mut start = first_hit.saturating_sub(budget / 4);
    while !body.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (start + budget).min(body.len());
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[start..end].trim()
}

/// Render excerpts for a prompt, each under its location marker.
pub fn render_excerpts(excerpts: &[Excerpt]) -> String {
    excerpts
        .iter()
        .map(|e| format!("[[{}]]\n{}", e.location.marker(), e.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    const DOC: &str = "[[page:1]]\nCover page\n[[page:2]]\nLand tenure is held under title deed.\n[[page:3]]\nBudget table\n[[page:4]]\nThe title deed number is LR-55.\n";

    #[test]
    fn picks_keyword_segments_in_document_order() {
        let doc = IndexedDocument::new("title", DOC);
        let excerpts = select_excerpts(&doc, &kw(&["title deed", "tenure"]), 6000, 3);
        let locations: Vec<_> = excerpts.iter().map(|e| e.location.clone()).collect();
        assert_eq!(locations, vec![Location::Page(2), Location::Page(4)]);
    }

    #[test]
    fn excerpts_are_source_slices() {
        let doc = IndexedDocument::new("title", DOC);
        for e in select_excerpts(&doc, &kw(&["title deed"]), 6000, 3) {
            assert!(doc.text.contains(&e.text));
        }
    }

    #[test]
    fn falls_back_to_leading_segments() {
        let doc = IndexedDocument::new("title", DOC);
        let excerpts = select_excerpts(&doc, &kw(&["grievance"]), 6000, 2);
        assert_eq!(excerpts.len(), 2);
        assert_eq!(excerpts[0].location, Location::Page(1));
    }

    #[test]
    fn budget_is_respected() {
        let body = format!("{}tenure clause here{}", "x".repeat(500), "y".repeat(500));
        let doc = IndexedDocument::new("title", &format!("[[page:1]]\n{body}"));
        let excerpts = select_excerpts(&doc, &kw(&["tenure"]), 100, 3);
        assert_eq!(excerpts.len(), 1);
        assert!(excerpts[0].text.len() <= 100);
        assert!(excerpts[0].text.contains("tenure"));
    }

    #[test]
    fn render_uses_markers() {
        let rendered = render_excerpts(&[Excerpt { location: Location::Page(2), text: "abc".into() }]);
        assert_eq!(rendered, "[[page:2]]\nabc");
    }
}
