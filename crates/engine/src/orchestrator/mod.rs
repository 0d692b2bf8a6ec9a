pub mod aggregation;
pub mod selection;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use theodore_common::backoff;
use theodore_common::config::SystemConfig;
use theodore_common::types::{
    normalize_name, CandidateSet, CompanyRecord, EmbeddingTask, LlmTask, PageContent, TaskKind,
    UrlSource,
};
use theodore_common::urlnorm;
use theodore_common::{AnalysisId, ErrorKind, TheodoreError};

use theodore_fetch::{
    is_protected, Extractor, HttpFetcher, LinkDiscoverer, PageFetchPolicy, SiteComplexity,
};

use crate::pool::{WorkItem, WorkerPool};
use crate::prompts;
use crate::resolver::SiteResolver;
use crate::store::VectorStore;

/// Guess paths substituted when link discovery comes back empty.
const GUESS_PATHS: &[&str] = &[
    "/",
    "/about",
    "/contact",
    "/careers",
    "/products",
    "/services",
    "/team",
    "/pricing",
];

/// Per-attempt budget for the page-selection task.
const SELECTION_TASK_BUDGET: Duration = Duration::from_secs(30);
const HEAD_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-company result of the analysis pipeline.
#[derive(Clone, Debug)]
pub enum AnalysisOutcome {
    Success(CompanyRecord),
    /// A record was produced, but specific pages or fields were lost along
    /// the way.
    Partial(CompanyRecord, Vec<String>),
    Failure {
        kind: ErrorKind,
        message: String,
    },
}

impl AnalysisOutcome {
    pub fn record(&self) -> Option<&CompanyRecord> {
        match self {
            Self::Success(record) | Self::Partial(record, _) => Some(record),
            Self::Failure { .. } => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// Remaining-time tracking for one analyze() invocation.
#[derive(Clone, Copy)]
struct Budget {
    deadline: Instant,
}

impl Budget {
    fn new(overall: Duration) -> Self {
        Self {
            deadline: Instant::now() + overall,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    fn clip(&self, d: Duration) -> Duration {
        d.min(self.remaining())
    }

    fn deadline_in(&self, d: Duration) -> Instant {
        Instant::now() + self.clip(d)
    }
}

/// Drives the four-phase analysis state machine:
/// discover → select → extract → aggregate.
///
/// Owns every retry, timeout, and budget decision; the pool and extractor
/// below it never retry on their own.
pub struct Orchestrator {
    config: Arc<SystemConfig>,
    pool: Arc<WorkerPool>,
    fetcher: Arc<HttpFetcher>,
    discoverer: LinkDiscoverer,
    extractor: Extractor,
    resolver: Arc<dyn SiteResolver>,
    store: Arc<dyn VectorStore>,
    complexity: Arc<SiteComplexity>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<SystemConfig>,
        pool: Arc<WorkerPool>,
        fetcher: Arc<HttpFetcher>,
        complexity: Arc<SiteComplexity>,
        resolver: Arc<dyn SiteResolver>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        let discoverer = LinkDiscoverer::new(Arc::clone(&fetcher), config.discovery.clone());
        let extractor = Extractor::new(
            Arc::clone(&fetcher),
            Arc::clone(&complexity),
            config.extract.clone(),
        );

        Self {
            config,
            pool,
            fetcher,
            discoverer,
            extractor,
            resolver,
            store,
            complexity,
        }
    }

    /// Analyze one company under the configured overall deadline.
    pub async fn analyze(&self, company_name: &str, website: Option<&str>) -> AnalysisOutcome {
        let overall = Duration::from_secs(self.config.timeout.overall_deadline_secs);
        self.analyze_with_deadline(company_name, website, overall)
            .await
    }

    /// Analyze one company with an explicit overall deadline.
    pub async fn analyze_with_deadline(
        &self,
        company_name: &str,
        website: Option<&str>,
        overall: Duration,
    ) -> AnalysisOutcome {
        let analysis_id = AnalysisId::new();
        let started = Instant::now();
        let budget = Budget::new(overall);
        let mut warnings: Vec<String> = Vec::new();

        tracing::info!(
            analysis_id = %analysis_id,
            company = %company_name,
            "Analysis started"
        );
        metrics::counter!("analyses.started").increment(1);

        let outcome = self
            .run_phases(company_name, website, budget, &mut warnings)
            .await;

        let duration = started.elapsed();
        metrics::histogram!("analyses.duration").record(duration.as_secs_f64());

        match outcome {
            Ok(record) => {
                let outcome = if warnings.is_empty() {
                    metrics::counter!("analyses.completed", "outcome" => "success").increment(1);
                    AnalysisOutcome::Success(record)
                } else {
                    metrics::counter!("analyses.completed", "outcome" => "partial").increment(1);
                    AnalysisOutcome::Partial(record, warnings)
                };
                tracing::info!(
                    analysis_id = %analysis_id,
                    company = %company_name,
                    duration_secs = duration.as_secs_f64(),
                    "Analysis complete"
                );
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    analysis_id = %analysis_id,
                    company = %company_name,
                    error = %e,
                    duration_secs = duration.as_secs_f64(),
                    "Analysis failed"
                );
                metrics::counter!("analyses.completed", "outcome" => "failure", "error" => e.kind.as_str())
                    .increment(1);
                AnalysisOutcome::failure(e.kind, e.message)
            }
        }
    }

    async fn run_phases(
        &self,
        company_name: &str,
        website: Option<&str>,
        budget: Budget,
        warnings: &mut Vec<String>,
    ) -> Result<CompanyRecord, TheodoreError> {
        // --- Phase 1: discovery -------------------------------------------
        let site_root = match website.and_then(urlnorm::coerce_url) {
            Some(url) => url,
            None => self
                .resolver
                .resolve(company_name)
                .await
                .ok_or_else(|| {
                    TheodoreError::new(
                        ErrorKind::NoContent,
                        format!("could not resolve a website for {}", company_name),
                    )
                })?,
        };

        // A protected homepage fails the company outright; protected inner
        // pages later only cost warnings.
        let homepage_timeout = budget.clip(self.initial_request_timeout(&site_root));
        if let Ok(page) = self.fetcher.get(&site_root, homepage_timeout).await {
            if is_protected(&page) {
                return Err(TheodoreError::new(
                    ErrorKind::ProtectedSite,
                    format!("homepage {} is behind a bot challenge", site_root),
                ));
            }
        }

        let discovery_deadline =
            budget.deadline_in(Duration::from_secs(self.config.discovery.deadline_secs));
        let mut candidates = self.discoverer.discover(&site_root, discovery_deadline).await;

        if budget.expired() {
            return Err(deadline_error());
        }

        if candidates.is_empty() {
            warnings.push("link discovery found no URLs; probing heuristic page list".into());
            candidates = self.heuristic_candidates(&site_root, budget).await;
        }

        if candidates.is_empty() {
            return Err(TheodoreError::new(
                ErrorKind::NoContent,
                format!("no crawlable pages found on {}", site_root),
            ));
        }

        // --- Phase 2: page selection --------------------------------------
        let selected = self
            .select_pages(company_name, &candidates, &site_root, budget, warnings)
            .await;
        if budget.expired() {
            return Err(deadline_error());
        }

        // --- Phase 3: content extraction ----------------------------------
        let pages = self
            .extractor
            .extract(
                &selected,
                self.config.extract.max_concurrent as usize,
                &self.page_fetch_policy(&site_root),
                budget.deadline,
            )
            .await;

        let crawled: Vec<&PageContent> = pages.iter().filter(|p| !p.is_failed()).collect();
        if crawled.is_empty() {
            if budget.expired() {
                return Err(deadline_error());
            }
            return Err(TheodoreError::new(
                ErrorKind::NoContent,
                format!("all {} selected page fetches failed", pages.len()),
            ));
        }

        for failed in pages.iter().filter(|p| p.is_failed()) {
            warnings.push(format!(
                "page {} could not be extracted (status {})",
                failed.url, failed.http_status
            ));
        }

        let corpus = build_corpus(&pages, self.config.extract.prompt_budget_chars);

        // --- Phase 4: aggregation -----------------------------------------
        let mut record = self
            .aggregate(company_name, &corpus, budget)
            .await?;

        record.website = Some(site_root.clone());
        record.source_pages = crawled.iter().map(|p| p.url.clone()).collect();

        match self.embed_record(&record, budget).await {
            Ok(vector) => record.embedding = Some(vector),
            Err(e) => warnings.push(format!("embedding unavailable: {}", e)),
        }

        // Hand the finished record to the vector store.
        if let Some(ref vector) = record.embedding {
            let id = normalize_name(company_name);
            let metadata = serde_json::to_value(&record).unwrap_or(Value::Null);
            if let Err(e) = self
                .store
                .upsert(&id, company_name, vector, metadata)
                .await
            {
                warnings.push(format!("vector store upsert failed: {}", e));
            }
        }

        Ok(record)
    }

    /// Empty discovery fallback: probe the usual page paths with HEAD and
    /// keep whatever answers.
    async fn heuristic_candidates(&self, site_root: &str, budget: Budget) -> CandidateSet {
        let mut set = CandidateSet::new(GUESS_PATHS.len());

        for path in GUESS_PATHS {
            if budget.expired() {
                break;
            }
            let Some(url) = urlnorm::resolve_href(site_root, path) else {
                continue;
            };

            let timeout = budget.clip(HEAD_PROBE_TIMEOUT);
            match self.fetcher.probe(&url, timeout).await {
                Ok(status) if status < 400 => {
                    set.push(&url, UrlSource::Nav);
                }
                _ => {}
            }
        }

        set
    }

    /// Phase 2 with retries; always yields a selection thanks to the
    /// deterministic heuristic fallback.
    async fn select_pages(
        &self,
        company_name: &str,
        candidates: &CandidateSet,
        site_root: &str,
        budget: Budget,
        warnings: &mut Vec<String>,
    ) -> Vec<String> {
        let shown = selection::prompt_candidates(candidates, selection::MAX_PROMPT_CANDIDATES);
        let prompt = prompts::selection_prompt(company_name, &shown, selection::MAX_SELECTED);
        let retry_config = &self.config.retry.selection;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if budget.expired() {
                warnings.push("page selection skipped: overall budget exhausted".into());
                break;
            }

            let task = LlmTask::new(
                TaskKind::PageSelection,
                prompt.clone(),
                Some(prompts::ANALYST_SYSTEM.to_string()),
                budget.deadline_in(self.grown_timeout(SELECTION_TASK_BUDGET, attempt)),
            );
            let result = self.pool.submit(WorkItem::Completion(task)).await;

            let parsed = result
                .text()
                .and_then(|text| selection::parse_selection(text, candidates));

            match parsed {
                Ok(urls) => {
                    tracing::info!(company = %company_name, selected = urls.len(), "Pages selected by model");
                    return urls;
                }
                Err(e) if e.is_recoverable() && attempt < retry_config.max_attempts => {
                    let delay = budget.clip(backoff::delay_for_attempt(retry_config, attempt));
                    tracing::warn!(attempt, error = %e, "Page selection failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warnings.push(format!("page selection fell back to heuristics: {}", e));
                    break;
                }
            }
        }

        let selected = selection::heuristic_select(candidates, site_root, selection::MAX_SELECTED);
        tracing::info!(company = %company_name, selected = selected.len(), "Pages selected heuristically");
        selected
    }

    /// Phase 4 with retries. RateLimited surviving the retry budget becomes
    /// QuotaExceeded; anything hitting the overall budget becomes Deadline.
    async fn aggregate(
        &self,
        company_name: &str,
        corpus: &str,
        budget: Budget,
    ) -> Result<CompanyRecord, TheodoreError> {
        let prompt = prompts::aggregation_prompt(company_name, corpus);
        let retry_config = &self.config.retry.aggregation;
        let call_budget = Duration::from_secs(self.config.timeout.llm_aggregation_secs);

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if budget.expired() {
                return Err(deadline_error());
            }

            let task = LlmTask::new(
                TaskKind::Aggregation,
                prompt.clone(),
                Some(prompts::ANALYST_SYSTEM.to_string()),
                budget.deadline_in(self.grown_timeout(call_budget, attempt)),
            );
            let result = self.pool.submit(WorkItem::Completion(task)).await;

            let parsed = result
                .text()
                .and_then(|text| aggregation::parse_aggregation(text, company_name));

            match parsed {
                Ok(record) => return Ok(record),
                Err(e) if e.is_recoverable() && attempt < retry_config.max_attempts => {
                    let delay = budget.clip(backoff::delay_for_attempt(retry_config, attempt));
                    tracing::warn!(attempt, error = %e, "Aggregation failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Exhausted retries or non-recoverable.
                    let kind = match e.kind {
                        ErrorKind::RateLimited => ErrorKind::QuotaExceeded,
                        ErrorKind::Timeout if budget.expired() => ErrorKind::Deadline,
                        kind => kind,
                    };
                    return Err(TheodoreError::new(
                        kind,
                        format!("aggregation failed after {} attempts: {}", attempt, e.message),
                    ));
                }
            }
        }
    }

    async fn embed_record(
        &self,
        record: &CompanyRecord,
        budget: Budget,
    ) -> Result<Vec<f32>, TheodoreError> {
        let call_budget = Duration::from_secs(self.config.timeout.llm_call_secs);
        let task = EmbeddingTask::new(record.embedding_text(), budget.deadline_in(call_budget));

        let result = self.pool.submit(WorkItem::Embedding(task)).await;
        let vector = result.vector()?.to_vec();

        let expected = self.config.embedding.dimension as usize;
        if vector.len() != expected {
            return Err(TheodoreError::invalid_response(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                expected
            )));
        }

        Ok(vector)
    }

    /// Grow a per-call budget by the configured factor on each retry
    /// attempt (1-based), capped at the timeout ceiling.
    fn grown_timeout(&self, base: Duration, attempt: u32) -> Duration {
        let grown = base.mul_f64(
            self.config
                .timeout
                .increase_factor
                .powi(attempt.saturating_sub(1) as i32),
        );
        grown.min(Duration::from_secs(self.config.timeout.max_secs))
    }

    /// Initial per-request timeout for a host, honoring the complexity map.
    fn initial_request_timeout(&self, url: &str) -> Duration {
        let complex = urlnorm::host_of(url)
            .map(|host| self.complexity.is_complex(&host))
            .unwrap_or(false);

        if complex {
            Duration::from_secs(self.config.timeout.complex_secs)
        } else {
            Duration::from_secs(self.config.timeout.default_secs)
        }
    }

    fn page_fetch_policy(&self, site_root: &str) -> PageFetchPolicy {
        PageFetchPolicy {
            request_timeout: self.initial_request_timeout(site_root),
            timeout_cap: Duration::from_secs(self.config.timeout.max_secs),
            timeout_increase: self.config.timeout.increase_factor,
            retry: self.config.retry.extraction.clone(),
        }
    }
}

fn deadline_error() -> TheodoreError {
    TheodoreError::new(ErrorKind::Deadline, "overall analysis budget elapsed")
}

/// Concatenate crawled pages under URL headers, truncated to the prompt
/// budget with earlier pages kept first.
fn build_corpus(pages: &[PageContent], budget_chars: usize) -> String {
    let mut corpus = String::new();
    let mut used = 0usize;

    for page in pages.iter().filter(|p| !p.is_failed()) {
        let header = format!("## {}\n", page.url);
        let header_chars = header.chars().count();

        if used + header_chars >= budget_chars {
            break;
        }

        corpus.push_str(&header);
        used += header_chars;

        let room = budget_chars - used;
        if page.char_count <= room {
            corpus.push_str(&page.text);
            used += page.char_count;
        } else {
            corpus.extend(page.text.chars().take(room));
            used += room;
        }
        corpus.push_str("\n\n");
        used += 2;

        if used >= budget_chars {
            break;
        }
    }

    corpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use theodore_common::types::ExtractionMethod;

    fn page(url: &str, text: &str) -> PageContent {
        PageContent::extracted(url, 200, ExtractionMethod::Primary, text.into(), 0)
    }

    #[test]
    fn test_build_corpus_headers_and_order() {
        let pages = vec![
            page("https://acme.example/about", "About text."),
            PageContent::failed("https://acme.example/404", 404, 0),
            page("https://acme.example/pricing", "Pricing text."),
        ];

        let corpus = build_corpus(&pages, 10_000);
        let about_pos = corpus.find("## https://acme.example/about").unwrap();
        let pricing_pos = corpus.find("## https://acme.example/pricing").unwrap();
        assert!(about_pos < pricing_pos);
        assert!(corpus.contains("About text."));
        assert!(!corpus.contains("404"));
    }

    #[test]
    fn test_build_corpus_truncates_keeping_earlier_pages() {
        let pages = vec![
            page("https://acme.example/a", &"x".repeat(100)),
            page("https://acme.example/b", &"y".repeat(100)),
        ];

        let corpus = build_corpus(&pages, 80);
        assert!(corpus.contains("## https://acme.example/a"));
        assert!(!corpus.contains("## https://acme.example/b"));
        assert!(corpus.chars().count() <= 82);
    }

    #[test]
    fn test_budget_clipping() {
        let budget = Budget::new(Duration::from_secs(10));
        assert!(!budget.expired());
        assert_eq!(budget.clip(Duration::from_secs(60)).as_secs(), 9);

        let spent = Budget::new(Duration::ZERO);
        assert!(spent.expired());
        assert_eq!(spent.clip(Duration::from_secs(5)), Duration::ZERO);
    }
}
