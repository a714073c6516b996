//! Google Gemini `generateContent`.

use super::{
    check_status, filter_settings, parse_body, BackendError, BackendKind, Completion,
    CompletionRequest, ModelBackend,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use spout_core::config::{Config, Secret};
use spout_core::tokenizer::TokenizerProfile;

const SUPPORTED_SETTINGS: &[&str] = &["max_tokens", "temperature"];

pub struct GeminiBackend {
    client: Client,
    base_url: String,
    api_key: Option<Secret>,
    tokenizer: TokenizerProfile,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiBackend {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.gemini_base_url.clone(),
            api_key: config.credentials.google_api_key.clone(),
            tokenizer: config.tokenizer(),
        }
    }

    fn url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }

    pub fn build_request(&self, request: &CompletionRequest) -> Value {
        let settings = filter_settings(BackendKind::Gemini, &request.settings, SUPPORTED_SETTINGS);
        let body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                candidate_count: 1,
                max_output_tokens: settings.get_u64("max_tokens"),
                temperature: settings.get_f64("temperature"),
            },
        };
        serde_json::to_value(body).unwrap_or_default()
    }

    fn parse_response(&self, prompt: &str, body: &str) -> Result<Completion, BackendError> {
        let response: GeminiResponse = parse_body(body)?;
        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates in response".to_string());
            BackendError::InvalidResponse(reason)
        })?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();
        let usage = response.usage_metadata.unwrap_or_default();
        Ok(Completion::with_usage(
            text,
            prompt,
            usage.prompt_token_count,
            usage.candidates_token_count,
            self.tokenizer,
        ))
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn supported_settings(&self) -> &'static [&'static str] {
        SUPPORTED_SETTINGS
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(BackendError::MissingCredentials("google_api_key"))?;

        let response = self
            .client
            .post(self.url(&request.model))
            .query(&[("key", api_key.expose())])
            .json(&self.build_request(request))
            .send()
            .await?;

        let body = check_status(response).await?.text().await?;
        self.parse_response(&request.prompt, &body)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    candidate_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}
