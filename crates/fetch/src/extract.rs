use std::sync::Arc;
use std::time::{Duration, Instant};

use scraper::{Html, Selector};
use tokio::sync::Semaphore;

use theodore_common::backoff;
use theodore_common::config::{ExtractConfig, RetryConfig};
use theodore_common::types::{ExtractionMethod, PageContent};
use theodore_common::urlnorm;

use crate::client::{FetchError, HttpFetcher};
use crate::complexity::SiteComplexity;

/// Fetch/retry parameters for one extraction pass. Owned by the caller so
/// the orchestrator keeps the single point of retry coordination.
#[derive(Clone, Debug)]
pub struct PageFetchPolicy {
    /// Per-request timeout for the first attempt.
    pub request_timeout: Duration,
    /// Ceiling the timeout never grows past.
    pub timeout_cap: Duration,
    /// Multiplier applied to the timeout on each retry.
    pub timeout_increase: f64,
    pub retry: RetryConfig,
}

/// Concurrent page fetcher + text extractor.
///
/// `extract` returns one PageContent per input URL, in input order,
/// regardless of completion order. Stateless across calls apart from the
/// site-complexity feedback.
#[derive(Clone)]
pub struct Extractor {
    fetcher: Arc<HttpFetcher>,
    complexity: Arc<SiteComplexity>,
    config: ExtractConfig,
}

impl Extractor {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        complexity: Arc<SiteComplexity>,
        config: ExtractConfig,
    ) -> Self {
        Self {
            fetcher,
            complexity,
            config,
        }
    }

    /// Fetch all URLs with at most `max_concurrent` in flight, extract main
    /// content from each, and return results in input order. Work not
    /// started before `deadline` resolves as failed pages rather than
    /// blocking past the budget.
    pub async fn extract(
        &self,
        urls: &[String],
        max_concurrent: usize,
        policy: &PageFetchPolicy,
        deadline: Instant,
    ) -> Vec<PageContent> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        let mut handles = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let this = self.clone();
            let policy = policy.clone();
            let url = url.clone();
            let semaphore = Arc::clone(&semaphore);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, this.extract_one(&url, &policy, deadline).await)
            }));
        }

        let mut results: Vec<Option<PageContent>> = (0..urls.len()).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((index, page)) => results[index] = Some(page),
                Err(e) => tracing::error!(error = %e, "Extraction task panicked"),
            }
        }

        let pages: Vec<PageContent> = results
            .into_iter()
            .zip(urls.iter())
            .map(|(page, url)| page.unwrap_or_else(|| PageContent::failed(url.clone(), 0, 0)))
            .collect();

        // Complexity feedback: a slow pass raises future timeouts for the host.
        let elapsed = start.elapsed();
        if elapsed > Duration::from_secs(self.config.complex_site_secs) {
            if let Some(host) = urls.first().and_then(|u| urlnorm::host_of(u)) {
                self.complexity.mark_complex(&host);
            }
        }

        let failed = pages.iter().filter(|p| p.is_failed()).count();
        tracing::info!(
            urls = urls.len(),
            failed,
            elapsed_secs = elapsed.as_secs_f64(),
            "Extraction pass complete"
        );
        metrics::histogram!("extract.pass.duration").record(elapsed.as_secs_f64());

        pages
    }

    /// Fetch one URL with retry on transport/timeout failures and adaptive
    /// per-attempt timeout growth.
    async fn extract_one(
        &self,
        url: &str,
        policy: &PageFetchPolicy,
        deadline: Instant,
    ) -> PageContent {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let retries_so_far = attempt - 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PageContent::failed(url, 0, retries_so_far);
            }

            let grown = policy
                .request_timeout
                .mul_f64(policy.timeout_increase.powi(retries_so_far as i32));
            let timeout = grown.min(policy.timeout_cap).min(remaining);

            match self.fetcher.get(url, timeout).await {
                Ok(page) => {
                    if !(200..300).contains(&page.status) {
                        metrics::counter!("extract.page.http_failure").increment(1);
                        return PageContent::failed(url, page.status, retries_so_far);
                    }

                    let (text, method) = extract_content(
                        &page.body,
                        page.content_type.as_deref(),
                        self.config.primary_threshold_chars,
                    );
                    metrics::counter!("extract.page.method", "method" => method.as_str())
                        .increment(1);
                    return PageContent::extracted(url, page.status, method, text, retries_so_far);
                }
                Err(e) => {
                    let recoverable = matches!(e, FetchError::Timeout(_) | FetchError::Transport(_));
                    if !recoverable || attempt >= policy.retry.max_attempts {
                        metrics::counter!("extract.page.fetch_failure").increment(1);
                        return PageContent::failed(url, 0, retries_so_far);
                    }

                    let delay = backoff::delay_for_attempt(&policy.retry, attempt)
                        .min(deadline.saturating_duration_since(Instant::now()));
                    tracing::debug!(url = %url, attempt, error = %e, "Page fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Extract text from a response body. HTML goes through the primary
/// readability-style extractor, falling back to the permissive converter
/// when the result is below the per-page threshold; non-HTML bodies are
/// taken as-is.
pub fn extract_content(
    body: &str,
    content_type: Option<&str>,
    primary_threshold: usize,
) -> (String, ExtractionMethod) {
    let is_html = match content_type {
        Some(ct) => ct.contains("text/html") || ct.contains("application/xhtml"),
        // No header: sniff for markup.
        None => body.trim_start().starts_with('<'),
    };

    if !is_html {
        let text = collapse_whitespace(body);
        return (text, ExtractionMethod::Primary);
    }

    let primary = primary_extract(body);
    if primary.chars().count() >= primary_threshold {
        return (primary, ExtractionMethod::Primary);
    }

    let fallback = fallback_extract(body);
    // Keep whichever pass recovered more text.
    if fallback.chars().count() > primary.chars().count() {
        (fallback, ExtractionMethod::Fallback)
    } else {
        (primary, ExtractionMethod::Primary)
    }
}

/// Readability-style extraction: prefer `main`/`article` content roots and
/// strip navigation, scripts, styles, and boilerplate.
pub fn primary_extract(html: &str) -> String {
    let document = Html::parse_document(html);

    // If the page declares a content root, harvest only inside it.
    for root_sel in ["main", "article", "[role=\"main\"]"] {
        if let Ok(selector) = Selector::parse(root_sel) {
            if let Some(root) = document.select(&selector).next() {
                let text: Vec<&str> = root.text().map(str::trim).filter(|t| !t.is_empty()).collect();
                let joined = collapse_whitespace(&text.join(" "));
                if !joined.is_empty() {
                    return joined;
                }
            }
        }
    }

    text_with_skipped(
        &document,
        &[
            "script", "style", "nav", "footer", "header", "aside", "form", "noscript", "svg",
        ],
    )
}

/// Permissive HTML-to-text: keeps navigation, headers, and footers; drops
/// only what is never prose.
pub fn fallback_extract(html: &str) -> String {
    let document = Html::parse_document(html);
    text_with_skipped(&document, &["script", "style", "noscript", "svg"])
}

/// Walk the document tree and collect text outside the skipped subtrees.
fn text_with_skipped(document: &Html, remove_selectors: &[&str]) -> String {
    let mut skip_ids = std::collections::HashSet::new();

    for sel_str in remove_selectors {
        if let Ok(selector) = Selector::parse(sel_str) {
            for element in document.select(&selector) {
                skip_ids.insert(element.id());
            }
        }
    }

    let mut text_parts = Vec::new();

    for node in document.tree.nodes() {
        // Skip if this node or any ancestor is in the skip set.
        let mut should_skip = false;
        let mut check_id = Some(node.id());
        while let Some(id) = check_id {
            if skip_ids.contains(&id) {
                should_skip = true;
                break;
            }
            check_id = document
                .tree
                .get(id)
                .and_then(|n| n.parent())
                .map(|p| p.id());
        }

        if should_skip {
            continue;
        }

        if let Some(text) = node.value().as_text() {
            let trimmed = text.text.trim();
            if !trimmed.is_empty() {
                text_parts.push(trimmed.to_string());
            }
        }
    }

    collapse_whitespace(&text_parts.join(" "))
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(c);
            prev_was_space = false;
        }
    }
    result.trim().to_string()
}
