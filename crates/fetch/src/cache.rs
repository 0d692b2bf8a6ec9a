use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::client::FetchedPage;

/// In-memory fetch cache with TTL-based expiration. Consulted before every
/// network fetch during discovery and extraction so repeated passes over
/// the same site (selection retries, surface scrapes) stay cheap.
pub struct UrlCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

struct CacheEntry {
    page: FetchedPage,
    inserted_at: Instant,
}

impl UrlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Get a cached response if it exists and hasn't expired.
    pub fn get(&self, url: &str) -> Option<FetchedPage> {
        if let Some(entry) = self.entries.get(url) {
            if entry.inserted_at.elapsed() < self.ttl {
                metrics::counter!("fetch.cache.hit").increment(1);
                return Some(entry.page.clone());
            }
        }
        metrics::counter!("fetch.cache.miss").increment(1);
        None
    }

    /// Insert a response, evicting expired entries.
    pub fn insert(&mut self, url: String, page: FetchedPage) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);

        self.entries.insert(
            url,
            CacheEntry {
                page,
                inserted_at: Instant::now(),
            },
        );
    }
}
