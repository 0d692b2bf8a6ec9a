use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, routing::post, Json,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;

use theodore_common::ErrorKind;
use theodore_engine::breaker::CircuitBreaker;
use theodore_engine::config;
use theodore_engine::limiter::RateLimiter;
use theodore_engine::llm::{ConfiguredProviderFactory, LlmProvider, ProviderFactory};
use theodore_engine::orchestrator::{AnalysisOutcome, Orchestrator};
use theodore_engine::pool::WorkerPool;
use theodore_engine::resolver::{GuessingResolver, SiteResolver};
use theodore_engine::similarity::SimilarityEngine;
use theodore_engine::store::{MemoryVectorStore, VectorStore};
use theodore_fetch::{Extractor, HttpFetcher, SiteComplexity};

/// Shared application state accessible from axum handlers.
struct AppState {
    orchestrator: Arc<Orchestrator>,
    similarity: Arc<SimilarityEngine>,
    provider: Arc<dyn LlmProvider>,
    metrics_handle: PrometheusHandle,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Theodore Engine starting");

    // Load configuration — fail loudly on misconfiguration.
    let config_path = std::env::var("THEODORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/theodore.toml"));

    let engine_config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(2);
        }
    };
    let system = Arc::new(engine_config.system);

    // Install Prometheus metrics recorder.
    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let fetcher = match HttpFetcher::new(&system.http) {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP fetcher");
            std::process::exit(2);
        }
    };

    // Provider: build one instance for the startup probe and the health
    // endpoint; pool workers build their own.
    let factory: Arc<dyn ProviderFactory> = Arc::new(ConfiguredProviderFactory::new(
        system.llm.clone(),
        system.embedding.clone(),
    ));

    let provider = match factory.build() {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build LLM provider");
            std::process::exit(2);
        }
    };

    match tokio::time::timeout(Duration::from_secs(15), provider.health()).await {
        Ok(Ok(())) => tracing::info!(provider = provider.name(), "Provider health probe passed"),
        Ok(Err(e)) => {
            tracing::error!(provider = provider.name(), error = %e, "Provider unavailable");
            std::process::exit(3);
        }
        Err(_) => {
            tracing::error!(provider = provider.name(), "Provider health probe timed out");
            std::process::exit(3);
        }
    }

    let limiter = Arc::new(RateLimiter::new(&system.rate));
    let breaker = Arc::new(CircuitBreaker::new("llm", 3, 120));

    let pool = match WorkerPool::start(
        system.pool.workers,
        (&system.timeout).into(),
        Arc::clone(&limiter),
        Arc::clone(&breaker),
        Arc::clone(&factory),
    ) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start worker pool");
            std::process::exit(2);
        }
    };

    // The in-memory store backs store-less deployments; the persistence
    // collaborator swaps in a durable implementation here.
    let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
    let complexity = Arc::new(SiteComplexity::new());
    let resolver: Arc<dyn SiteResolver> = Arc::new(GuessingResolver::new(Arc::clone(&fetcher)));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&system),
        Arc::clone(&pool),
        Arc::clone(&fetcher),
        Arc::clone(&complexity),
        Arc::clone(&resolver),
        Arc::clone(&store),
    ));

    let similarity = Arc::new(SimilarityEngine::new(
        Arc::clone(&system),
        Arc::clone(&pool),
        Arc::clone(&store),
        Extractor::new(
            Arc::clone(&fetcher),
            Arc::clone(&complexity),
            system.extract.clone(),
        ),
        Arc::clone(&resolver),
    ));

    // Periodic circuit-breaker state gauge.
    {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                breaker.report_metrics();
            }
        });
    }

    let state = Arc::new(AppState {
        orchestrator,
        similarity,
        provider,
        metrics_handle,
    });

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/research", post(research_handler))
        .route("/similar", post(similar_handler))
        .with_state(state);

    let port = system.server.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(port = port, "Theodore Engine listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}

/// Health check endpoint: probes the LLM provider.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let provider_ok = tokio::time::timeout(Duration::from_secs(10), state.provider.health())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);

    let status = if provider_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::json!({
        "status": if provider_ok { "healthy" } else { "unhealthy" },
        "services": {
            "llm_provider": if provider_ok { "healthy" } else { "unhealthy" },
        }
    });

    (status, Json(body))
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}

/// Request body for a single-company analysis.
#[derive(Deserialize)]
struct ResearchRequest {
    company_name: String,
    #[serde(default)]
    website: Option<String>,
    /// Optional override of the configured overall deadline.
    #[serde(default)]
    deadline_secs: Option<u64>,
}

/// POST /research — run the four-phase analysis synchronously.
async fn research_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResearchRequest>,
) -> impl IntoResponse {
    let outcome = match req.deadline_secs {
        Some(secs) => {
            state
                .orchestrator
                .analyze_with_deadline(
                    &req.company_name,
                    req.website.as_deref(),
                    Duration::from_secs(secs),
                )
                .await
        }
        None => {
            state
                .orchestrator
                .analyze(&req.company_name, req.website.as_deref())
                .await
        }
    };

    match outcome {
        AnalysisOutcome::Success(record) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "success", "record": record })),
        ),
        AnalysisOutcome::Partial(record, warnings) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "partial",
                "record": record,
                "warnings": warnings,
            })),
        ),
        AnalysisOutcome::Failure { kind, message } => {
            let status = match kind {
                ErrorKind::Deadline => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::RateLimited | ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(serde_json::json!({
                    "status": "failure",
                    "error_kind": kind,
                    "message": message,
                })),
            )
        }
    }
}

/// Request body for similar-company discovery.
#[derive(Deserialize)]
struct SimilarRequest {
    company_name: String,
    #[serde(default)]
    max_results: Option<usize>,
}

/// POST /similar — find companies similar to the target.
async fn similar_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimilarRequest>,
) -> impl IntoResponse {
    let max_results = req.max_results.unwrap_or(10).clamp(1, 50);

    match state
        .similarity
        .find_similar(&req.company_name, max_results)
        .await
    {
        Ok(companies) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "company_name": req.company_name,
                "similar": companies,
            })),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "error_kind": e.kind,
                "message": e.message,
            })),
        ),
    }
}
