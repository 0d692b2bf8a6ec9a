use serde::{Deserialize, Serialize};

use theodore_common::config::{EmbeddingConfig, LlmConfig};

use super::{api_key_from_env, Completion, CompletionRequest, LlmError, LlmProvider, ProviderFuture};

const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_API_KEY_ENV: &str = "AWS_BEARER_TOKEN_BEDROCK";

// Rough per-1K-token prices for cost estimates; accounting, not billing.
const INPUT_COST_PER_1K: f64 = 0.003;
const OUTPUT_COST_PER_1K: f64 = 0.015;

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct InvokeRequest<'a> {
    anthropic_version: &'static str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<InvokeMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct InvokeMessage<'a> {
    role: &'static str,
    content: Vec<InvokeContentBlock<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InvokeContentBlock<'a> {
    Text { text: &'a str },
}

#[derive(Serialize)]
struct TitanEmbedRequest<'a> {
    #[serde(rename = "inputText")]
    input_text: &'a str,
    dimensions: u32,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct InvokeResponse {
    content: Vec<ResponseBlock>,
    usage: InvokeUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct InvokeUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct TitanEmbedResponse {
    embedding: Vec<f32>,
    #[serde(rename = "inputTextTokenCount", default)]
    input_text_token_count: u64,
}

#[derive(Deserialize)]
struct BedrockError {
    message: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Amazon Bedrock adapter using the bearer-token invoke API with Anthropic
/// message bodies for completions and Titan for embeddings.
pub struct BedrockProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    embed_model: String,
    embed_dimensions: u32,
    max_tokens: u32,
    temperature: Option<f64>,
}

impl BedrockProvider {
    pub fn new(config: &LlmConfig, embedding: &EmbeddingConfig) -> theodore_common::Result<Self> {
        let api_key = api_key_from_env(config, DEFAULT_API_KEY_ENV)?;

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: format!("https://bedrock-runtime.{}.amazonaws.com", config.region),
            api_key,
            model: config.model.clone(),
            embed_model: embedding.model.clone(),
            embed_dimensions: embedding.dimension,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn invoke_url(&self, model: &str) -> String {
        format!("{}/model/{}/invoke", self.endpoint, model)
    }

    async fn send_completion(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let start = std::time::Instant::now();

        let body = InvokeRequest {
            anthropic_version: ANTHROPIC_BEDROCK_VERSION,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            system: request.system.as_deref(),
            messages: vec![InvokeMessage {
                role: "user",
                content: vec![InvokeContentBlock::Text {
                    text: &request.prompt,
                }],
            }],
            temperature: request.temperature.or(self.temperature),
        };

        let response = self
            .http
            .post(self.invoke_url(&self.model))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        metrics::histogram!("llm.api.latency", "provider" => "bedrock", "model" => self.model.clone())
            .record(start.elapsed().as_secs_f64());

        check_status(status, &response)?;
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let body: InvokeResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("failed to parse Bedrock response: {}", e)))?;

        let text: String = body
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let tokens_in = body.usage.input_tokens;
        let tokens_out = body.usage.output_tokens;

        metrics::counter!("llm.api.input_tokens", "provider" => "bedrock").increment(tokens_in);
        metrics::counter!("llm.api.output_tokens", "provider" => "bedrock").increment(tokens_out);

        Ok(Completion {
            text,
            tokens_in,
            tokens_out,
            cost_estimate: tokens_in as f64 / 1000.0 * INPUT_COST_PER_1K
                + tokens_out as f64 / 1000.0 * OUTPUT_COST_PER_1K,
        })
    }

    async fn send_embedding(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let start = std::time::Instant::now();

        let body = TitanEmbedRequest {
            input_text: text,
            dimensions: self.embed_dimensions,
        };

        let response = self
            .http
            .post(self.invoke_url(&self.embed_model))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        metrics::histogram!("embedding.api.latency", "provider" => "bedrock")
            .record(start.elapsed().as_secs_f64());

        check_status(status, &response)?;
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let body: TitanEmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("failed to parse Titan response: {}", e)))?;

        if body.embedding.len() != self.embed_dimensions as usize {
            return Err(LlmError::DimensionMismatch {
                expected: self.embed_dimensions,
                got: body.embedding.len(),
            });
        }

        metrics::counter!("embedding.api.tokens", "provider" => "bedrock")
            .increment(body.input_text_token_count);

        Ok(body.embedding)
    }
}

impl LlmProvider for BedrockProvider {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFuture<'a, Completion> {
        Box::pin(self.send_completion(request))
    }

    fn embed<'a>(&'a self, text: &'a str) -> ProviderFuture<'a, Vec<f32>> {
        Box::pin(self.send_embedding(text))
    }

    fn health<'a>(&'a self) -> ProviderFuture<'a, ()> {
        Box::pin(async {
            let probe = CompletionRequest {
                system: None,
                prompt: "Reply with OK.".to_string(),
                max_tokens: Some(8),
                temperature: None,
            };
            self.send_completion(&probe).await.map(|_| ())
        })
    }
}

// ---------------------------------------------------------------------------
// Shared status handling
// ---------------------------------------------------------------------------

fn check_status(status: reqwest::StatusCode, response: &reqwest::Response) -> Result<(), LlmError> {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(LlmError::Auth(format!("{}", status)));
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        return Err(LlmError::RateLimited { retry_after });
    }

    Ok(())
}

async fn api_error(status: reqwest::StatusCode, response: reqwest::Response) -> LlmError {
    let body = response.text().await.unwrap_or_default();
    let msg = serde_json::from_str::<BedrockError>(&body)
        .map(|e| e.message)
        .unwrap_or(body);

    if status.is_server_error() {
        LlmError::Http(format!("{}: {}", status, msg))
    } else {
        LlmError::Api(format!("{}: {}", status, msg))
    }
}
