//! Shared harness for engine integration tests: a scripted LLM provider,
//! a loopback site server, and a fully wired engine over the in-memory
//! vector store. No network leaves the host.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use theodore_common::config::{
    BatchConfig, DiscoveryConfig, EmbeddingConfig, ExtractConfig, HttpConfig, LlmConfig,
    PoolConfig, RateLimitConfig, RetryConfig, RetryDefaults, ServerConfig, SystemConfig,
    TimeoutConfig,
};
use theodore_engine::breaker::CircuitBreaker;
use theodore_engine::limiter::RateLimiter;
use theodore_engine::llm::{
    Completion, CompletionRequest, LlmError, LlmProvider, ProviderFactory, ProviderFuture,
};
use theodore_engine::orchestrator::Orchestrator;
use theodore_engine::pool::WorkerPool;
use theodore_engine::resolver::{ResolverFuture, SiteResolver};
use theodore_engine::similarity::SimilarityEngine;
use theodore_engine::store::{MemoryVectorStore, VectorStore};
use theodore_fetch::{Extractor, HttpFetcher, SiteComplexity};

/// Canned provider: routes each completion to a scripted response by
/// recognizing the prompt shape. `None` means "this call was not expected"
/// and errors out.
pub struct ScriptedProvider {
    pub selection: Option<String>,
    pub aggregation: Option<String>,
    pub expansion: Option<String>,
    pub surface: Option<String>,
    pub embed_dim: usize,
    pub delay: Duration,
    pub completion_calls: Arc<AtomicUsize>,
    pub embed_calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new(embed_dim: usize) -> Self {
        Self {
            selection: None,
            aggregation: None,
            expansion: None,
            surface: None,
            embed_dim,
            delay: Duration::from_millis(5),
            completion_calls: Arc::new(AtomicUsize::new(0)),
            embed_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFuture<'a, Completion> {
        Box::pin(async move {
            self.completion_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            let scripted = if request.prompt.contains("Candidate URLs discovered") {
                &self.selection
            } else if request.prompt.contains("Produce a business-intelligence record") {
                &self.aggregation
            } else if request.prompt.contains("companies most similar") {
                &self.expansion
            } else {
                &self.surface
            };

            match scripted {
                Some(text) => Ok(Completion {
                    text: text.clone(),
                    tokens_in: 100,
                    tokens_out: 50,
                    cost_estimate: 0.001,
                }),
                None => Err(LlmError::Api("no scripted response for this prompt".into())),
            }
        })
    }

    fn embed<'a>(&'a self, _text: &'a str) -> ProviderFuture<'a, Vec<f32>> {
        Box::pin(async move {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![0.1; self.embed_dim])
        })
    }

    fn health<'a>(&'a self) -> ProviderFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

pub struct ScriptedFactory(pub Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedFactory {
    fn build(&self) -> theodore_common::Result<Arc<dyn LlmProvider>> {
        let provider: Arc<dyn LlmProvider> = self.0.clone();
        Ok(provider)
    }
}

/// Resolver that never finds a website.
pub struct NoResolver;

impl SiteResolver for NoResolver {
    fn resolve<'a>(&'a self, _company_name: &'a str) -> ResolverFuture<'a> {
        Box::pin(async { None })
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 2,
        base_backoff_ms: 10,
        max_backoff_ms: 50,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Test configuration: generous rate limits, short timeouts, deterministic
/// backoff.
pub fn test_config(embed_dim: u32) -> SystemConfig {
    SystemConfig {
        rate: RateLimitConfig {
            capacity: 100,
            refill_per_sec: 100.0,
        },
        pool: PoolConfig { workers: 2 },
        timeout: TimeoutConfig {
            default_secs: 5,
            complex_secs: 10,
            max_secs: 15,
            increase_factor: 1.5,
            llm_call_secs: 10,
            llm_aggregation_secs: 15,
            overall_deadline_secs: 30,
        },
        retry: RetryDefaults {
            selection: fast_retry(),
            extraction: fast_retry(),
            aggregation: fast_retry(),
        },
        extract: ExtractConfig {
            max_concurrent: 10,
            primary_threshold_chars: 40,
            prompt_budget_chars: 100_000,
            complex_site_secs: 40,
        },
        discovery: DiscoveryConfig {
            max_urls: 1000,
            recursion_depth: 2,
            sitemap_index_depth: 2,
            deadline_secs: 10,
        },
        embedding: EmbeddingConfig {
            model: "stub-embed".into(),
            dimension: embed_dim,
        },
        llm: LlmConfig {
            provider: "bedrock".into(),
            model: "stub-model".into(),
            max_tokens: 1024,
            temperature: None,
            region: "us-east-1".into(),
            api_key_env: None,
        },
        http: HttpConfig {
            insecure_hosts: Vec::new(),
            cache_ttl_secs: 5,
            user_agent: "TheodoreTest/0".into(),
        },
        server: ServerConfig { port: 0 },
        batch: BatchConfig {
            failure_threshold_pct: 50.0,
        },
    }
}

/// Everything a test needs, wired the way main() wires it.
pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub similarity: Arc<SimilarityEngine>,
    pub store: Arc<MemoryVectorStore>,
    pub pool: Arc<WorkerPool>,
}

pub fn harness(config: SystemConfig, provider: Arc<ScriptedProvider>) -> Harness {
    let config = Arc::new(config);
    let fetcher = Arc::new(HttpFetcher::new(&config.http).expect("fetcher"));
    let complexity = Arc::new(SiteComplexity::new());
    let limiter = Arc::new(RateLimiter::new(&config.rate));
    let breaker = Arc::new(CircuitBreaker::new("llm", 100, 60));
    let factory: Arc<dyn ProviderFactory> = Arc::new(ScriptedFactory(provider));

    let pool = Arc::new(
        WorkerPool::start(
            config.pool.workers,
            (&config.timeout).into(),
            limiter,
            breaker,
            factory,
        )
        .expect("pool"),
    );

    let store = Arc::new(MemoryVectorStore::new());
    let dyn_store: Arc<dyn VectorStore> = store.clone();
    let resolver: Arc<dyn SiteResolver> = Arc::new(NoResolver);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        Arc::clone(&pool),
        Arc::clone(&fetcher),
        Arc::clone(&complexity),
        Arc::clone(&resolver),
        Arc::clone(&dyn_store),
    ));

    let similarity = Arc::new(SimilarityEngine::new(
        Arc::clone(&config),
        Arc::clone(&pool),
        dyn_store,
        Extractor::new(fetcher, complexity, config.extract.clone()),
        resolver,
    ));

    Harness {
        orchestrator,
        similarity,
        store,
        pool,
    }
}

/// Bind a loopback listener, let the test build routes that know their own
/// base URL, and serve in the background. Returns the base URL.
pub async fn serve_site<F>(build: F) -> String
where
    F: FnOnce(&str) -> Router,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let base = format!("http://{}", listener.local_addr().expect("local addr"));

    let app = build(&base);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test site server");
    });

    base
}
