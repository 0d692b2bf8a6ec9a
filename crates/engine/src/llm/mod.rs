mod bedrock;
mod gemini;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use theodore_common::config::{EmbeddingConfig, LlmConfig};
use theodore_common::{ErrorKind, TheodoreError};

pub use bedrock::BedrockProvider;
pub use gemini::GeminiProvider;

/// Future type returned by the object-safe provider trait.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

/// One completion request. The core builds these; adapters translate them
/// to provider wire formats.
#[derive(Clone, Debug)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Response token cap; None uses the configured model default.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// Parsed completion with usage accounting.
#[derive(Clone, Debug)]
pub struct Completion {
    pub text: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_estimate: f64,
}

/// Errors from provider calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider HTTP error: {0}")]
    Http(String),

    #[error("provider auth error: {0}")]
    Auth(String),

    #[error("provider rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("provider response parse error: {0}")]
    Parse(String),

    #[error("provider API error: {0}")]
    Api(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: u32, got: usize },
}

impl LlmError {
    /// Map into the orchestrator-facing error taxonomy.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Http(_) => ErrorKind::Transport,
            Self::Auth(_) => ErrorKind::ProviderFatal,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Parse(_) => ErrorKind::InvalidResponse,
            Self::Api(_) => ErrorKind::ProviderFatal,
            Self::DimensionMismatch { .. } => ErrorKind::InvalidResponse,
        }
    }
}

impl From<LlmError> for TheodoreError {
    fn from(e: LlmError) -> Self {
        TheodoreError::new(e.error_kind(), e.to_string())
    }
}

/// Capability interface over an LLM provider: completions, embeddings, and
/// a startup health probe. Object-safe so tests can plug in stubs; the core
/// never branches on provider identity at runtime.
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFuture<'a, Completion>;

    fn embed<'a>(&'a self, text: &'a str) -> ProviderFuture<'a, Vec<f32>>;

    fn health<'a>(&'a self) -> ProviderFuture<'a, ()>;
}

/// Builds provider instances. Each pool worker builds its own so no two
/// workers ever share a network session.
pub trait ProviderFactory: Send + Sync {
    fn build(&self) -> theodore_common::Result<Arc<dyn LlmProvider>>;
}

/// Factory backed by startup configuration.
pub struct ConfiguredProviderFactory {
    llm: LlmConfig,
    embedding: EmbeddingConfig,
}

impl ConfiguredProviderFactory {
    pub fn new(llm: LlmConfig, embedding: EmbeddingConfig) -> Self {
        Self { llm, embedding }
    }
}

impl ProviderFactory for ConfiguredProviderFactory {
    fn build(&self) -> theodore_common::Result<Arc<dyn LlmProvider>> {
        match self.llm.provider.as_str() {
            "bedrock" => Ok(Arc::new(BedrockProvider::new(&self.llm, &self.embedding)?)),
            "gemini" => Ok(Arc::new(GeminiProvider::new(&self.llm, &self.embedding)?)),
            other => Err(TheodoreError::config(format!(
                "unknown LLM provider: {}",
                other
            ))),
        }
    }
}

/// Read the provider API key, honoring a configured env-var override.
fn api_key_from_env(config: &LlmConfig, default_env: &str) -> theodore_common::Result<String> {
    let env_var = config.api_key_env.as_deref().unwrap_or(default_env);

    match std::env::var(env_var) {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(TheodoreError::config(format!(
            "{} not set — cannot reach the {} provider",
            env_var, config.provider
        ))),
    }
}
