use serde::{Deserialize, Serialize};

/// Top-level system configuration, deserialized from theodore.toml.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub rate: RateLimitConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Token-bucket parameters for the shared LLM rate limiter.
///
/// Defaults are a conservative buffer below a 10 req/min provider tier:
/// burst of 3, sustained 8/min.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            refill_per_sec: 8.0 / 60.0,
        }
    }
}

/// Worker pool sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker tasks executing provider calls.
    pub workers: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 3 }
    }
}

/// Adaptive timeout presets. Per-request timeouts start at `default_secs`
/// (`complex_secs` for hosts the complexity map has flagged), grow by
/// `increase_factor` on each retry, and never exceed `max_secs`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub default_secs: u64,
    pub complex_secs: u64,
    pub max_secs: u64,
    pub increase_factor: f64,
    /// Per-call timeout for LLM completions.
    pub llm_call_secs: u64,
    /// Extended per-call timeout for long aggregation prompts.
    pub llm_aggregation_secs: u64,
    /// Overall budget for one analyze() invocation.
    pub overall_deadline_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: 15,
            complex_secs: 60,
            max_secs: 120,
            increase_factor: 1.5,
            llm_call_secs: 30,
            llm_aggregation_secs: 60,
            overall_deadline_secs: 90,
        }
    }
}

/// Per-phase retry parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "RetryConfig::selection_default")]
    pub selection: RetryConfig,
    #[serde(default = "RetryConfig::extraction_default")]
    pub extraction: RetryConfig,
    #[serde(default = "RetryConfig::aggregation_default")]
    pub aggregation: RetryConfig,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            selection: RetryConfig::selection_default(),
            extraction: RetryConfig::extraction_default(),
            aggregation: RetryConfig::aggregation_default(),
        }
    }
}

/// Retry configuration for a specific target.
///
/// `max_attempts` counts total attempts, so 3 means the initial try plus
/// two retries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    fn selection_default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 2_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    fn extraction_default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    fn aggregation_default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 3_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::selection_default()
    }
}

/// Content extractor behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Max in-flight page fetches per extract() call.
    pub max_concurrent: u32,
    /// Per-page minimum for primary extraction; below it the fallback
    /// extractor runs.
    pub primary_threshold_chars: usize,
    /// Corpus budget handed to the aggregation prompt.
    pub prompt_budget_chars: usize,
    /// Total extract duration above which a host is flagged complex.
    pub complex_site_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            primary_threshold_chars: 500,
            prompt_budget_chars: 100_000,
            complex_site_secs: 40,
        }
    }
}

/// Candidate set bounds for link discovery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub max_urls: usize,
    /// Recursive same-domain crawl depth. 0 disables the recursive step.
    pub recursion_depth: u32,
    /// Sitemap index expansion depth.
    pub sitemap_index_depth: u32,
    /// Hard deadline for the whole discovery step.
    pub deadline_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_urls: 1_000,
            recursion_depth: 3,
            sitemap_index_depth: 2,
            deadline_secs: 30,
        }
    }
}

/// Embedding model configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier at the configured provider.
    pub model: String,
    /// Embedding vector dimensions; every response is validated against it.
    pub dimension: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "amazon.titan-embed-text-v2:0".to_string(),
            dimension: 1536,
        }
    }
}

/// LLM provider and model configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name ("bedrock" or "gemini"). Selection happens once at
    /// startup; nothing downstream branches on it.
    pub provider: String,
    /// Model identifier (e.g. "anthropic.claude-3-5-sonnet-20241022-v2:0",
    /// "gemini-2.0-flash").
    pub model: String,
    /// Max tokens in the response.
    pub max_tokens: u32,
    /// Temperature (0.0–1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Region for region-scoped providers (Bedrock).
    #[serde(default = "default_region")]
    pub region: String,
    /// Environment variable name for the API key. Defaults to the
    /// provider's standard env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// HTTP fetcher behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Hosts for which TLS verification is disabled. Every insecure fetch
    /// logs a warning naming the host; there is no global insecure mode.
    #[serde(default)]
    pub insecure_hosts: Vec<String>,
    /// Fetch response cache TTL in seconds.
    pub cache_ttl_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            insecure_hosts: Vec::new(),
            cache_ttl_secs: 3_600,
            user_agent: "Theodore/0.1".to_string(),
        }
    }
}

/// HTTP service parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Batch driver thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Percentage of failed rows above which a batch run exits non-zero.
    pub failure_threshold_pct: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            failure_threshold_pct: 50.0,
        }
    }
}
