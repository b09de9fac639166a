//! Generative model transport: one non-streaming request, one response.
//!
//! [`GenerativeModel`] is the narrow seam the classifier and synthesizer
//! talk to. It reports what the endpoint returned (text plus finish/block
//! reason) and leaves retry and interpretation to the callers; prompt text
//! lives in [`crate::prompts`].
//!
//! Two backends:
//!
//! * [`GeminiModel`]: Gemini `generateContent` over REST. Exposes the
//!   finish reason and prompt block reason exactly as the API reports them.
//! * [`LlmProviderModel`]: any `edgequake_llm::LLMProvider` (OpenAI,
//!   Anthropic, Ollama, …). Provider content filters surface as a blocked
//!   response.

use crate::error::GenerationError;
use crate::pipeline::encode::ImagePayload;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Finish reason name meaning "the model completed normally".
pub const STOP: &str = "STOP";

/// One call to a generative endpoint.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<ImagePayload>,
    /// Ask the endpoint to constrain the output to JSON.
    pub json_mode: bool,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

/// Why the endpoint stopped producing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    /// Any other reason (`SAFETY`, `RECITATION`, `MAX_TOKENS`, a prompt block
    /// reason, `UNKNOWN`, …), verbatim.
    Other(String),
}

impl FinishReason {
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case(STOP) {
            FinishReason::Stop
        } else {
            FinishReason::Other(name.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => STOP,
            FinishReason::Other(s) => s,
        }
    }
}

/// What the endpoint returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Concatenated text parts; `None` when the response had no content.
    pub text: Option<String>,
    pub finish_reason: FinishReason,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: FinishReason::Stop,
        }
    }

    /// An empty response with a non-stop reason, e.g. `SAFETY`.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            text: None,
            finish_reason: FinishReason::Other(reason.into()),
        }
    }

    /// An empty response that nevertheless finished normally.
    pub fn empty_stop() -> Self {
        Self {
            text: None,
            finish_reason: FinishReason::Stop,
        }
    }

    /// True when there is no content at all.
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map(str::is_empty).unwrap_or(true)
    }
}

/// A generative endpoint.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// Gemini `generateContent` client.
#[derive(Debug, Clone)]
pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiModel {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl GenerativeModel for GeminiModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let body = gemini_request_body(request);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::MalformedBody(format!("{e}")))?;
        let generation = interpret_gemini_response(parsed);
        debug!(
            model = %self.model,
            finish_reason = generation.finish_reason.as_str(),
            chars = generation.text.as_deref().map(str::len).unwrap_or(0),
            "Gemini response"
        );
        Ok(generation)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn gemini_request_body(request: &GenerationRequest) -> Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(ref image) = request.image {
        parts.push(json!({
            "inline_data": { "mime_type": image.mime_type, "data": image.data }
        }));
    }

    let mut generation_config = json!({ "temperature": request.temperature });
    if let Some(max) = request.max_tokens {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if request.json_mode {
        generation_config["responseMimeType"] = json!("application/json");
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Text of the first candidate; reason = prompt block reason, else the
/// candidate's finish reason, else `UNKNOWN`.
fn interpret_gemini_response(response: GenerateContentResponse) -> Generation {
    let first = response.candidates.into_iter().next();

    let candidate_reason = first.as_ref().and_then(|c| c.finish_reason.clone());
    let block_reason = response.prompt_feedback.and_then(|f| f.block_reason);
    let reason = block_reason
        .or(candidate_reason)
        .unwrap_or_else(|| "UNKNOWN".to_string());

    let text = first
        .and_then(|c| c.content)
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .filter(|t| !t.is_empty());

    Generation {
        text,
        finish_reason: FinishReason::from_name(&reason),
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Finish reason reported when a provider's content filter refused.
pub const CONTENT_FILTER: &str = "CONTENT_FILTER";

/// Adapter over any `edgequake_llm` chat provider.
pub struct LlmProviderModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl LlmProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

#[async_trait]
impl GenerativeModel for LlmProviderModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if request.json_mode {
            messages.push(ChatMessage::system(
                "Respond with a single JSON object and nothing else.",
            ));
        }
        match request.image {
            Some(ref image) => messages.push(ChatMessage::user_with_images(
                request.prompt.as_str(),
                vec![ImageData::new(image.data.clone(), image.mime_type.clone()).with_detail("high")],
            )),
            None => messages.push(ChatMessage::user(request.prompt.as_str())),
        }

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens,
            ..Default::default()
        };

        match self.provider.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    model = %self.label,
                    input_tokens = response.prompt_tokens,
                    output_tokens = response.completion_tokens,
                    "provider response"
                );
                if response.content.is_empty() {
                    Ok(Generation::empty_stop())
                } else {
                    Ok(Generation::text(response.content))
                }
            }
            Err(e) => map_provider_error(&format!("{e}")),
        }
    }

    fn model_name(&self) -> &str {
        &self.label
    }
}

/// Provider errors are transport failures, except content-filter refusals,
/// which are reported as a blocked (non-retryable) response.
fn map_provider_error(message: &str) -> Result<Generation, GenerationError> {
    if message.to_ascii_lowercase().contains("content_filter") {
        return Ok(Generation::blocked(CONTENT_FILTER));
    }
    Err(GenerationError::Transport(message.to_string()))
}
