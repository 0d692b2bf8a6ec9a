use std::collections::HashSet;

use serde::Deserialize;

use theodore_common::types::{Candidate, CandidateSet, UrlSource};
use theodore_common::urlnorm;
use theodore_common::TheodoreError;

use crate::prompts;

/// Cap on URLs listed in the selection prompt.
pub const MAX_PROMPT_CANDIDATES: usize = 300;
/// Cap on URLs a selection (LLM or heuristic) may return.
pub const MAX_SELECTED: usize = 15;

/// Path substrings the deterministic fallback selector looks for, in
/// priority-free insertion-order scanning.
pub const HEURISTIC_PATTERNS: &[&str] = &[
    "about",
    "contact",
    "team",
    "leadership",
    "careers",
    "product",
    "service",
    "pricing",
    "partner",
    "case-stud",
    "insight",
    "foundation",
];

#[derive(Deserialize)]
struct SelectionPayload {
    selections: Vec<SelectionEntry>,
}

#[derive(Deserialize)]
struct SelectionEntry {
    url: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: String,
}

/// The candidate slice shown to the model. Under the cap this is insertion
/// order; over it, sitemap-sourced URLs are kept first before truncating.
pub fn prompt_candidates(candidates: &CandidateSet, cap: usize) -> Vec<Candidate> {
    if candidates.len() <= cap {
        return candidates.entries().to_vec();
    }

    let mut ordered: Vec<Candidate> = Vec::with_capacity(cap);
    ordered.extend(
        candidates
            .iter()
            .filter(|c| c.source == UrlSource::Sitemap)
            .cloned(),
    );
    ordered.extend(
        candidates
            .iter()
            .filter(|c| c.source != UrlSource::Sitemap)
            .cloned(),
    );
    ordered.truncate(cap);
    ordered
}

/// Parse the model's page-selection response. Only URLs that are actually
/// in the candidate set survive; a response yielding none of them is
/// off-contract.
pub fn parse_selection(
    response: &str,
    candidates: &CandidateSet,
) -> Result<Vec<String>, TheodoreError> {
    let payload: SelectionPayload = serde_json::from_str(prompts::extract_json(response))
        .map_err(|e| TheodoreError::invalid_response(format!("selection response: {}", e)))?;

    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for entry in payload.selections {
        let Some(normalized) = urlnorm::normalize_url(&entry.url) else {
            continue;
        };
        if !candidates.contains(&normalized) {
            continue;
        }
        if seen.insert(normalized.clone()) {
            selected.push(normalized);
        }
        if selected.len() >= MAX_SELECTED {
            break;
        }
    }

    if selected.is_empty() {
        return Err(TheodoreError::invalid_response(
            "selection contained no known candidate URLs",
        ));
    }

    Ok(selected)
}

/// Deterministic fallback selector: scan candidates in insertion order and
/// keep same-site URLs whose path matches a heuristic pattern, up to `max`.
/// Falls back to the site root so a non-empty candidate set always yields
/// at least one URL. Byte-identical output for identical input sets.
pub fn heuristic_select(candidates: &CandidateSet, site_root: &str, max: usize) -> Vec<String> {
    let mut selected = Vec::new();

    for candidate in candidates.iter() {
        if selected.len() >= max {
            break;
        }
        if !urlnorm::same_site(&candidate.url, site_root) {
            continue;
        }

        let path = match url::Url::parse(&candidate.url) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => continue,
        };

        if HEURISTIC_PATTERNS.iter().any(|p| path.contains(p)) {
            selected.push(candidate.url.clone());
        }
    }

    if selected.is_empty() {
        if let Some(root) = urlnorm::normalize_url(site_root) {
            if candidates.contains(&root) || !candidates.is_empty() {
                selected.push(root);
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_set() -> CandidateSet {
        let mut set = CandidateSet::new(100);
        set.push("https://acme.example/", UrlSource::Sitemap);
        set.push("https://acme.example/blog/announcing-v2", UrlSource::Sitemap);
        set.push("https://acme.example/about", UrlSource::Sitemap);
        set.push("https://acme.example/pricing", UrlSource::Nav);
        set.push("https://acme.example/careers", UrlSource::Nav);
        set.push("https://acme.example/legal/privacy", UrlSource::Recursive);
        set
    }

    #[test]
    fn test_parse_selection_filters_unknown_urls() {
        let set = candidate_set();
        let response = r#"{"selections": [
            {"url": "https://acme.example/about", "reason": "company overview"},
            {"url": "https://evil.example/phish", "reason": "nope"},
            {"url": "https://ACME.example/pricing#plans", "reason": "pricing"}
        ]}"#;

        let selected = parse_selection(response, &set).unwrap();
        assert_eq!(
            selected,
            vec!["https://acme.example/about", "https://acme.example/pricing"]
        );
    }

    #[test]
    fn test_parse_selection_rejects_prose() {
        let set = candidate_set();
        let err = parse_selection("Sure! I'd pick the about page.", &set).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_parse_selection_rejects_all_unknown() {
        let set = candidate_set();
        let response = r#"{"selections": [{"url": "https://other.example/", "reason": "x"}]}"#;
        assert!(parse_selection(response, &set).is_err());
    }

    #[test]
    fn test_heuristic_is_deterministic_and_ordered() {
        let set = candidate_set();
        let first = heuristic_select(&set, "https://acme.example/", 15);
        let second = heuristic_select(&set, "https://acme.example/", 15);

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                "https://acme.example/about",
                "https://acme.example/pricing",
                "https://acme.example/careers",
            ]
        );
    }

    #[test]
    fn test_heuristic_respects_max() {
        let set = candidate_set();
        let selected = heuristic_select(&set, "https://acme.example/", 1);
        assert_eq!(selected, vec!["https://acme.example/about"]);
    }

    #[test]
    fn test_heuristic_falls_back_to_root() {
        let mut set = CandidateSet::new(10);
        set.push("https://acme.example/xyz", UrlSource::Recursive);

        let selected = heuristic_select(&set, "https://acme.example/", 15);
        assert_eq!(selected, vec!["https://acme.example/"]);
    }

    #[test]
    fn test_prompt_candidates_keeps_sitemap_first_when_truncating() {
        let mut set = CandidateSet::new(1000);
        for i in 0..5 {
            set.push(&format!("https://acme.example/nav/{}", i), UrlSource::Nav);
        }
        for i in 0..5 {
            set.push(&format!("https://acme.example/map/{}", i), UrlSource::Sitemap);
        }

        // Under the cap: insertion order.
        let under = prompt_candidates(&set, 100);
        assert_eq!(under[0].url, "https://acme.example/nav/0");

        // Over the cap: sitemap entries first.
        let over = prompt_candidates(&set, 6);
        assert_eq!(over.len(), 6);
        assert!(over[..5].iter().all(|c| c.source == UrlSource::Sitemap));
        assert_eq!(over[5].url, "https://acme.example/nav/0");
    }
}
