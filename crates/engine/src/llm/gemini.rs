use serde::{Deserialize, Serialize};

use theodore_common::config::{EmbeddingConfig, LlmConfig};

use super::{api_key_from_env, Completion, CompletionRequest, LlmError, LlmProvider, ProviderFuture};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

const INPUT_COST_PER_1K: f64 = 0.00015;
const OUTPUT_COST_PER_1K: f64 = 0.0006;

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<ContentPart<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct ContentPart<'a> {
    role: &'static str,
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<TextPart<'a>>,
}

#[derive(Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    content: EmbedContent<'a>,
    output_dimensionality: u32,
}

#[derive(Serialize)]
struct EmbedContent<'a> {
    parts: Vec<TextPart<'a>>,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Deserialize)]
struct GenerateCandidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Google Gemini adapter: generateContent for completions, embedContent for
/// embeddings.
pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    embed_model: String,
    embed_dimensions: u32,
    max_tokens: u32,
    temperature: Option<f64>,
}

impl GeminiProvider {
    pub fn new(config: &LlmConfig, embedding: &EmbeddingConfig) -> theodore_common::Result<Self> {
        let api_key = api_key_from_env(config, DEFAULT_API_KEY_ENV)?;

        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            embed_model: embedding.model.clone(),
            embed_dimensions: embedding.dimension,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    async fn send_completion(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let start = std::time::Instant::now();

        let body = GenerateRequest {
            contents: vec![ContentPart {
                role: "user",
                parts: vec![TextPart {
                    text: &request.prompt,
                }],
            }],
            system_instruction: request.system.as_deref().map(|text| SystemInstruction {
                parts: vec![TextPart { text }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: request.max_tokens.unwrap_or(self.max_tokens),
                temperature: request.temperature.or(self.temperature),
            },
        };

        let url = format!("{}/models/{}:generateContent", GEMINI_BASE_URL, self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        metrics::histogram!("llm.api.latency", "provider" => "gemini", "model" => self.model.clone())
            .record(start.elapsed().as_secs_f64());

        check_status(status, &response)?;
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("failed to parse Gemini response: {}", e)))?;

        let text: String = body
            .candidates
            .first()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::Parse("Gemini returned no candidate text".into()));
        }

        let tokens_in = body.usage_metadata.prompt_token_count;
        let tokens_out = body.usage_metadata.candidates_token_count;

        metrics::counter!("llm.api.input_tokens", "provider" => "gemini").increment(tokens_in);
        metrics::counter!("llm.api.output_tokens", "provider" => "gemini").increment(tokens_out);

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

        let body = EmbedRequest {
            content: EmbedContent {
                parts: vec![TextPart { text }],
            },
            output_dimensionality: self.embed_dimensions,
        };

        let url = format!(
            "{}/models/{}:embedContent",
            GEMINI_BASE_URL, self.embed_model
        );
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        metrics::histogram!("embedding.api.latency", "provider" => "gemini")
            .record(start.elapsed().as_secs_f64());

        check_status(status, &response)?;
        if !status.is_success() {
            return Err(api_error(status, response).await);
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("failed to parse embedding response: {}", e)))?;

        if body.embedding.values.len() != self.embed_dimensions as usize {
            return Err(LlmError::DimensionMismatch {
                expected: self.embed_dimensions,
                got: body.embedding.values.len(),
            });
        }

        Ok(body.embedding.values)
    }
}

impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> ProviderFuture<'a, Completion> {
        Box::pin(self.send_completion(request))
    }

    fn embed<'a>(&'a self, text: &'a str) -> ProviderFuture<'a, Vec<f32>> {
        Box::pin(self.send_embedding(text))
    }

    fn health<'a>(&'a self) -> ProviderFuture<'a, ()> {
        Box::pin(async {
            let url = format!("{}/models/{}", GEMINI_BASE_URL, self.model);
            let response = self
                .http
                .get(&url)
                .header("x-goog-api-key", &self.api_key)
                .send()
                .await
                .map_err(|e| LlmError::Http(e.to_string()))?;

            let status = response.status();
            check_status(status, &response)?;
            if !status.is_success() {
                return Err(api_error(status, response).await);
            }
            Ok(())
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
    let msg = serde_json::from_str::<GeminiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    if status.is_server_error() {
        LlmError::Http(format!("{}: {}", status, msg))
    } else {
        LlmError::Api(format!("{}: {}", status, msg))
    }
}
