use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::urlnorm;

/// Where a candidate URL was discovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlSource {
    Sitemap,
    Robots,
    Nav,
    Recursive,
}

impl UrlSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Robots => "robots",
            Self::Nav => "nav",
            Self::Recursive => "recursive",
        }
    }
}

/// One discovered URL with its source tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub source: UrlSource,
}

/// Ordered set of distinct candidate URLs for one site.
///
/// Insertion order is preserved with first-occurrence dedup on the
/// normalized URL form; discovery inserts sitemap entries first, so the
/// highest-density sources stay at the front. Pushes beyond the cap are
/// rejected.
#[derive(Clone, Debug)]
pub struct CandidateSet {
    entries: Vec<Candidate>,
    seen: HashSet<String>,
    cap: usize,
}

impl CandidateSet {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    /// Insert a URL. Returns true when the (normalized) URL was added,
    /// false when it was a duplicate, unparsable, or over the cap.
    pub fn push(&mut self, url: &str, source: UrlSource) -> bool {
        let Some(normalized) = urlnorm::normalize_url(url) else {
            return false;
        };

        if self.entries.len() >= self.cap || self.seen.contains(&normalized) {
            return false;
        }

        self.seen.insert(normalized.clone());
        self.entries.push(Candidate {
            url: normalized,
            source,
        });
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        urlnorm::normalize_url(url).is_some_and(|n| self.seen.contains(&n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[Candidate] {
        &self.entries
    }

    /// The candidate URLs, in insertion order.
    pub fn urls(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.url.clone()).collect()
    }
}
