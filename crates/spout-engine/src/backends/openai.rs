//! OpenAI chat completions; also serves DeepSeek's compatible API.

use super::{
    check_status, filter_settings, parse_body, BackendError, BackendKind, Completion,
    CompletionRequest, ModelBackend,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use spout_core::config::{Config, Secret};
use spout_core::tokenizer::TokenizerProfile;

const SUPPORTED_SETTINGS: &[&str] = &[
    "max_tokens",
    "temperature",
    "top_p",
    "presence_penalty",
    "frequency_penalty",
];

/// Chat-completions backend.
pub struct OpenAiBackend {
    kind: BackendKind,
    client: Client,
    base_url: String,
    api_key: Option<Secret>,
    credential_key: &'static str,
    organization: Option<String>,
    tokenizer: TokenizerProfile,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("organization", &self.organization)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    pub fn openai(config: &Config, client: Client) -> Self {
        Self {
            kind: BackendKind::OpenAi,
            client,
            base_url: config.openai_base_url.clone(),
            api_key: config.credentials.openai_api_key.clone(),
            credential_key: "openai_api_key",
            organization: config.credentials.openai_org_id.clone(),
            tokenizer: config.tokenizer(),
        }
    }

    pub fn deepseek(config: &Config, client: Client) -> Self {
        Self {
            kind: BackendKind::DeepSeek,
            client,
            base_url: config.deepseek_base_url.clone(),
            api_key: config.credentials.deepseek_api_key.clone(),
            credential_key: "deepseek_api_key",
            organization: None,
            tokenizer: config.tokenizer(),
        }
    }

    /// Request body sent for `request`.
    pub fn build_request(&self, request: &CompletionRequest) -> Value {
        let settings = filter_settings(self.kind, &request.settings, SUPPORTED_SETTINGS);

        let mut body = Map::new();
        body.insert("model".to_string(), json!(request.model));
        body.insert(
            "messages".to_string(),
            json!([{ "role": "user", "content": request.prompt }]),
        );
        for (key, value) in settings.iter() {
            body.insert(key.to_string(), value.clone());
        }
        Value::Object(body)
    }

    /// Organization header value for `request`. The request's context wins.
    fn organization_for<'a>(&'a self, request: &'a CompletionRequest) -> Option<&'a str> {
        if self.kind != BackendKind::OpenAi {
            return None;
        }
        request
            .organization
            .as_deref()
            .or(self.organization.as_deref())
            .filter(|org| !org.is_empty())
    }

    fn parse_response(&self, prompt: &str, body: &str) -> Result<Completion, BackendError> {
        let response: ChatResponse = parse_body(body)?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("no choices in response".to_string()))?;
        let text = choice.message.content.unwrap_or_default();
        let usage = response.usage.unwrap_or_default();
        Ok(Completion::with_usage(
            text,
            prompt,
            usage.prompt_tokens,
            usage.completion_tokens,
            self.tokenizer,
        ))
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supported_settings(&self) -> &'static [&'static str] {
        SUPPORTED_SETTINGS
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(BackendError::MissingCredentials(self.credential_key))?;

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose())
            .json(&self.build_request(request));
        if let Some(org) = self.organization_for(request) {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = check_status(builder.send().await?).await?;
        let body = response.text().await?;
        self.parse_response(&request.prompt, &body)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}
