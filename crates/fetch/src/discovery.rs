use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::{Html, Selector};

use theodore_common::config::DiscoveryConfig;
use theodore_common::types::{CandidateSet, UrlSource};
use theodore_common::urlnorm;

use crate::client::HttpFetcher;

/// Per-fetch ceiling inside discovery; the overall deadline still wins.
const STEP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Page-fetch budget for the recursive crawl step.
const MAX_RECURSIVE_FETCHES: usize = 25;

/// Rules recovered from robots.txt.
#[derive(Debug, Default)]
pub struct RobotsRules {
    pub sitemaps: Vec<String>,
    /// Disallowed path prefixes. Recorded so discovery can exclude them;
    /// they never enter the candidate set.
    pub disallows: Vec<String>,
}

/// Produces a deduplicated candidate URL set for one site from sitemaps,
/// robots directives, navigation anchors, and bounded recursive crawling.
///
/// Never fails: each sub-step is independent, and on deadline whatever has
/// been collected so far is returned.
pub struct LinkDiscoverer {
    fetcher: Arc<HttpFetcher>,
    config: DiscoveryConfig,
}

impl LinkDiscoverer {
    pub fn new(fetcher: Arc<HttpFetcher>, config: DiscoveryConfig) -> Self {
        Self { fetcher, config }
    }

    /// Discover candidates for a site. `deadline` caps the whole pass (the
    /// configured `deadline_secs` clipped by the caller's budget); on expiry
    /// whatever has been collected is returned.
    pub async fn discover(&self, site_root: &str, deadline: Instant) -> CandidateSet {
        let mut set = CandidateSet::new(self.config.max_urls);

        let Some(root) = urlnorm::normalize_url(site_root) else {
            tracing::warn!(site_root = %site_root, "Unparsable site root, empty candidate set");
            return set;
        };

        let start = Instant::now();

        // 1. robots.txt: sitemap directives plus disallow exclusions.
        let rules = self.fetch_robots(&root, deadline).await;

        // 2. Sitemaps, expanding nested indexes breadth-first.
        self.walk_sitemaps(&root, &rules, &mut set, deadline).await;

        // 3 + 4. Root page: navigation anchors, then bounded recursion.
        let root_body = match self.fetch_within(&root, deadline).await {
            Some(body) => body,
            None => {
                tracing::debug!(root = %root, "Root page unavailable during discovery");
                String::new()
            }
        };

        if !root_body.is_empty() {
            for link in extract_nav_anchors(&root_body, &root) {
                if !is_disallowed(&link, &rules.disallows) {
                    set.push(&link, UrlSource::Nav);
                }
            }

            if self.config.recursion_depth > 0 {
                self.recursive_crawl(&root, &root_body, &rules, &mut set, deadline)
                    .await;
            }
        }

        tracing::info!(
            root = %root,
            candidates = set.len(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Link discovery complete"
        );
        metrics::histogram!("discovery.duration").record(start.elapsed().as_secs_f64());
        metrics::histogram!("discovery.candidates").record(set.len() as f64);

        set
    }

    async fn fetch_robots(&self, root: &str, deadline: Instant) -> RobotsRules {
        let Some(robots_url) = urlnorm::resolve_href(root, "/robots.txt") else {
            return RobotsRules::default();
        };

        match self.fetch_within(&robots_url, deadline).await {
            Some(body) => parse_robots(&body, root),
            None => RobotsRules::default(),
        }
    }

    /// Expand sitemaps (discovered + the default /sitemap.xml) into page
    /// candidates, following index files to the configured depth. A visited
    /// set guards against indexes that reference each other.
    async fn walk_sitemaps(
        &self,
        root: &str,
        rules: &RobotsRules,
        set: &mut CandidateSet,
        deadline: Instant,
    ) {
        let mut queue: Vec<(String, u32)> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();

        for sitemap in &rules.sitemaps {
            queue.push((sitemap.clone(), 0));
        }
        if let Some(default) = urlnorm::resolve_href(root, "/sitemap.xml") {
            queue.push((default, 0));
        }

        while let Some((sitemap_url, depth)) = queue.pop() {
            if set.is_full() || Instant::now() >= deadline {
                return;
            }
            let Some(normalized) = urlnorm::normalize_url(&sitemap_url) else {
                continue;
            };
            if !visited.insert(normalized.clone()) {
                continue;
            }

            let Some(body) = self.fetch_within(&normalized, deadline).await else {
                continue;
            };

            let (pages, nested) = extract_sitemap_entries(&body);

            for page in pages {
                if urlnorm::same_site(&page, root) && !is_disallowed(&page, &rules.disallows) {
                    set.push(&page, UrlSource::Sitemap);
                }
            }

            if depth < self.config.sitemap_index_depth {
                for child in nested {
                    queue.push((child, depth + 1));
                }
            }
        }
    }

    /// Bounded same-domain breadth-first crawl seeded from the root page.
    async fn recursive_crawl(
        &self,
        root: &str,
        root_body: &str,
        rules: &RobotsRules,
        set: &mut CandidateSet,
        deadline: Instant,
    ) {
        let mut fetched = 0usize;
        let mut page_visited: HashSet<String> = HashSet::new();
        page_visited.insert(root.to_string());

        let mut frontier: Vec<String> = Vec::new();
        for link in extract_anchors(root_body, root) {
            if is_disallowed(&link, &rules.disallows) {
                continue;
            }
            if set.push(&link, UrlSource::Recursive) {
                frontier.push(link);
            }
        }

        for _depth in 2..=self.config.recursion_depth {
            let mut next = Vec::new();

            for url in frontier {
                if fetched >= MAX_RECURSIVE_FETCHES || set.is_full() || Instant::now() >= deadline
                {
                    return;
                }
                if !page_visited.insert(url.clone()) {
                    continue;
                }

                let Some(body) = self.fetch_within(&url, deadline).await else {
                    continue;
                };
                fetched += 1;

                for link in extract_anchors(&body, &url) {
                    if !urlnorm::same_site(&link, root) || is_disallowed(&link, &rules.disallows) {
                        continue;
                    }
                    if set.push(&link, UrlSource::Recursive) {
                        next.push(link);
                    }
                }
            }

            frontier = next;
            if frontier.is_empty() {
                break;
            }
        }
    }

    /// Fetch a URL clipped to the discovery deadline. Returns the body only
    /// for 2xx responses; any failure is logged and swallowed.
    async fn fetch_within(&self, url: &str, deadline: Instant) -> Option<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }

        match self
            .fetcher
            .get(url, STEP_FETCH_TIMEOUT.min(remaining))
            .await
        {
            Ok(page) if (200..300).contains(&page.status) => Some(page.body),
            Ok(page) => {
                tracing::debug!(url = %url, status = page.status, "Discovery fetch non-2xx");
                None
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Discovery fetch failed");
                None
            }
        }
    }
}

/// Parse robots.txt: `Sitemap:` directives (absolute or root-relative) and
/// `Disallow:` path prefixes.
pub fn parse_robots(body: &str, root: &str) -> RobotsRules {
    let mut rules = RobotsRules::default();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_ascii_lowercase().as_str() {
            "sitemap" => {
                if let Some(url) = urlnorm::resolve_href(root, value) {
                    rules.sitemaps.push(url);
                }
            }
            "disallow" => {
                if !value.is_empty() && value != "/" {
                    rules.disallows.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    rules
}

/// Whether a URL's path falls under any disallowed prefix.
pub fn is_disallowed(url: &str, disallows: &[String]) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let path = parsed.path();

    disallows.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Pull `<loc>` entries out of a sitemap body, split into page URLs and
/// nested sitemap references.
pub fn extract_sitemap_entries(xml: &str) -> (Vec<String>, Vec<String>) {
    let document = Html::parse_document(xml);

    let mut pages = Vec::new();
    let mut nested = Vec::new();

    // <sitemap><loc> entries are index references; <url><loc> are pages.
    if let Ok(selector) = Selector::parse("sitemap > loc") {
        for loc in document.select(&selector) {
            let text: String = loc.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                nested.push(text);
            }
        }
    }

    if let Ok(selector) = Selector::parse("url > loc") {
        for loc in document.select(&selector) {
            let text: String = loc.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                pages.push(text);
            }
        }
    }

    // Minimal sitemaps without wrapper elements: classify by extension.
    if pages.is_empty() && nested.is_empty() {
        if let Ok(selector) = Selector::parse("loc") {
            for loc in document.select(&selector) {
                let text: String = loc.text().collect::<String>().trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if text.ends_with(".xml") || text.ends_with(".xml.gz") {
                    nested.push(text);
                } else {
                    pages.push(text);
                }
            }
        }
    }

    (pages, nested)
}

/// Same-site links from header, footer, and nav elements.
pub fn extract_nav_anchors(html: &str, base: &str) -> Vec<String> {
    anchors_matching(html, base, &["nav a", "header a", "footer a", "[role=\"navigation\"] a"])
}

/// All same-site links on a page.
pub fn extract_anchors(html: &str, base: &str) -> Vec<String> {
    anchors_matching(html, base, &["a"])
}

fn anchors_matching(html: &str, base: &str, selectors: &[&str]) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for sel_str in selectors {
        let Ok(selector) = Selector::parse(sel_str) else {
            continue;
        };
        for anchor in document.select(&selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(resolved) = urlnorm::resolve_href(base, href) else {
                continue;
            };
            if !urlnorm::same_site(&resolved, base) {
                continue;
            }
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "https://acme.example/";

    #[test]
    fn test_parse_robots() {
        let body = r#"
            # robots for acme
            User-agent: *
            Disallow: /admin
            Disallow: /cart/
            Sitemap: https://acme.example/sitemap-main.xml
            Sitemap: /sitemap-blog.xml
        "#;

        let rules = parse_robots(body, ROOT);
        assert_eq!(
            rules.sitemaps,
            vec![
                "https://acme.example/sitemap-main.xml",
                "https://acme.example/sitemap-blog.xml",
            ]
        );
        assert_eq!(rules.disallows, vec!["/admin", "/cart/"]);
    }

    #[test]
    fn test_disallow_matching_is_prefix_based() {
        let disallows = vec!["/admin".to_string()];
        assert!(is_disallowed("https://acme.example/admin/users", &disallows));
        assert!(is_disallowed("https://acme.example/admin", &disallows));
        assert!(!is_disallowed("https://acme.example/about", &disallows));
    }

    #[test]
    fn test_extract_sitemap_pages() {
        let xml = r#"<?xml version="1.0"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <url><loc>https://acme.example/about</loc></url>
                <url><loc>https://acme.example/pricing</loc></url>
            </urlset>
        "#;

        let (pages, nested) = extract_sitemap_entries(xml);
        assert_eq!(
            pages,
            vec!["https://acme.example/about", "https://acme.example/pricing"]
        );
        assert!(nested.is_empty());
    }

    #[test]
    fn test_extract_sitemap_index() {
        let xml = r#"<?xml version="1.0"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
                <sitemap><loc>https://acme.example/sitemap-1.xml</loc></sitemap>
                <sitemap><loc>https://acme.example/sitemap-2.xml</loc></sitemap>
            </sitemapindex>
        "#;

        let (pages, nested) = extract_sitemap_entries(xml);
        assert!(pages.is_empty());
        assert_eq!(
            nested,
            vec![
                "https://acme.example/sitemap-1.xml",
                "https://acme.example/sitemap-2.xml",
            ]
        );
    }

    #[test]
    fn test_nav_anchors_same_site_only() {
        let html = r#"
            <html><body>
                <nav>
                    <a href="/about">About</a>
                    <a href="https://twitter.example/acme">Twitter</a>
                </nav>
                <footer><a href="/careers">Careers</a></footer>
                <div><a href="/blog/post-1">Deep link</a></div>
            </body></html>
        "#;

        let links = extract_nav_anchors(html, ROOT);
        assert_eq!(
            links,
            vec!["https://acme.example/about", "https://acme.example/careers"]
        );

        let all = extract_anchors(html, ROOT);
        assert!(all.contains(&"https://acme.example/blog/post-1".to_string()));
    }
}
