//! Extraction client: one prompt + one image → raw model text.
//!
//! The model is an unreliable oracle. This module only moves bytes: it sends
//! the request once, maps transport and HTTP failures onto
//! [`AnalysisError`], and returns whatever text came back. Parsing that text
//! is [`crate::pipeline::normalize`]'s job; bounding the call's duration is
//! [`crate::analyze::Analyzer`]'s.
//!
//! Two backends implement [`PrescriptionExtractor`]:
//!
//! * [`GeminiExtractor`] calls the Gemini `generateContent` REST endpoint
//!   directly, with the API key injected from [`AnalyzerConfig`].
//! * [`ProviderExtractor`] adapts any `edgequake_llm` provider (OpenAI,
//!   Anthropic, Ollama, ...).

use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;
use crate::pipeline::prepare::PreparedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Text returned by an extraction call, plus token accounting when known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExtraction {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl RawExtraction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A backend able to read a prescription image.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait PrescriptionExtractor: Send + Sync {
    /// Identifier of the model answering; becomes `model_version`.
    fn model(&self) -> &str;

    /// Send `prompt` and `image` once and return the raw answer.
    async fn extract(
        &self,
        image: &PreparedImage,
        prompt: &str,
    ) -> Result<RawExtraction, AnalysisError>;
}

// ── Native Gemini backend ────────────────────────────────────────────────────

const GEMINI: &str = "gemini";

/// Gemini `generateContent` client.
///
/// Holds one `reqwest::Client`; its connection pool is shared by every
/// request that goes through this extractor.
#[derive(Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl std::fmt::Debug for GeminiExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiExtractor")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiExtractor {
    /// Build a client from the config. Requires `config.api_key`.
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self, AnalysisError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AnalysisError::ProviderNotConfigured {
                provider: GEMINI.to_string(),
                hint: "No API key configured. Set GOOGLE_API_KEY (or GEMINI_API_KEY).".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AnalysisError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Inline {
        inline_data: InlineData<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: u64,
    candidates_token_count: u64,
}

#[async_trait]
impl PrescriptionExtractor for GeminiExtractor {
    fn model(&self) -> &str {
        &self.model
    }

    async fn extract(
        &self,
        image: &PreparedImage,
        prompt: &str,
    ) -> Result<RawExtraction, AnalysisError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::Text { text: prompt },
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: image.mime_type,
                            data: &image.data,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::UpstreamError {
                message: format!("request to {GEMINI} failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            warn!("Gemini returned HTTP {}", status.as_u16());
            return Err(map_http_error(status, retry_after, text));
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| AnalysisError::UpstreamError {
                    message: format!("unreadable {GEMINI} response: {e}"),
                })?;

        extraction_from_response(parsed)
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: String) -> AnalysisError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AnalysisError::AuthError {
            provider: GEMINI.to_string(),
            detail: truncate(&body, 300),
        },
        StatusCode::TOO_MANY_REQUESTS => AnalysisError::RateLimitExceeded {
            provider: GEMINI.to_string(),
            retry_after_secs: retry_after,
        },
        _ => AnalysisError::UpstreamError {
            message: format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300)),
        },
    }
}

/// Concatenate the text parts of the first candidate.
fn extraction_from_response(parsed: GenerateResponse) -> Result<RawExtraction, AnalysisError> {
    let usage = parsed.usage_metadata.unwrap_or_default();
    let block_reason = parsed.prompt_feedback.and_then(|f| f.block_reason);

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        let message = match block_reason {
            Some(reason) => format!("request blocked by {GEMINI}: {reason}"),
            None => format!("{GEMINI} returned no candidates"),
        };
        return Err(AnalysisError::UpstreamError { message });
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AnalysisError::UpstreamError {
            message: format!(
                "{GEMINI} returned an empty answer (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        });
    }

    debug!(
        "Gemini answered: {} input tokens, {} output tokens",
        usage.prompt_token_count, usage.candidates_token_count
    );

    Ok(RawExtraction {
        text,
        input_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Generic provider backend ─────────────────────────────────────────────────

/// Extraction through any `edgequake_llm` vision provider.
pub struct ProviderExtractor {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl ProviderExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalyzerConfig) -> Self {
        Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }
}

#[async_trait]
impl PrescriptionExtractor for ProviderExtractor {
    fn model(&self) -> &str {
        &self.model
    }

    async fn extract(
        &self,
        image: &PreparedImage,
        prompt: &str,
    ) -> Result<RawExtraction, AnalysisError> {
        // Prompt and image travel in a single user turn.
        let messages = vec![ChatMessage::user_with_images(
            prompt,
            vec![ImageData::new(image.data.clone(), image.mime_type).with_detail("high")],
        )];

        let response = self
            .provider
            .chat(&messages, Some(&self.options()))
            .await
            .map_err(|e| AnalysisError::UpstreamError {
                message: format!("{e}"),
            })?;

        debug!(
            "Provider answered: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        Ok(RawExtraction {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}
