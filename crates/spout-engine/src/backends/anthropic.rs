//! Anthropic messages API.

use super::{
    check_status, filter_settings, parse_body, BackendError, BackendKind, Completion,
    CompletionRequest, ModelBackend,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use spout_core::config::{Config, Secret};
use spout_core::tokenizer::TokenizerProfile;

const SUPPORTED_SETTINGS: &[&str] = &["max_tokens", "temperature"];
const API_VERSION: &str = "2023-06-01";
/// The API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u64 = 1000;
const DEFAULT_TEMPERATURE: f64 = 0.7;

pub struct AnthropicBackend {
    client: Client,
    base_url: String,
    api_key: Option<Secret>,
    tokenizer: TokenizerProfile,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicBackend {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.anthropic_base_url.clone(),
            api_key: config.credentials.anthropic_api_key.clone(),
            tokenizer: config.tokenizer(),
        }
    }

    pub fn build_request(&self, request: &CompletionRequest) -> Value {
        let settings = filter_settings(BackendKind::Anthropic, &request.settings, SUPPORTED_SETTINGS);
        json!({
            "model": request.model,
            "max_tokens": settings.get_u64("max_tokens").unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": settings.get_f64("temperature").unwrap_or(DEFAULT_TEMPERATURE),
            "messages": [{ "role": "user", "content": request.prompt }],
        })
    }

    fn parse_response(&self, prompt: &str, body: &str) -> Result<Completion, BackendError> {
        let response: MessagesResponse = parse_body(body)?;
        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        let usage = response.usage.unwrap_or_default();
        Ok(Completion::with_usage(
            text,
            prompt,
            usage.input_tokens,
            usage.output_tokens,
            self.tokenizer,
        ))
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn supported_settings(&self) -> &'static [&'static str] {
        SUPPORTED_SETTINGS
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(BackendError::MissingCredentials("anthropic_api_key"))?;

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key.expose())
            .header("anthropic-version", API_VERSION)
            .json(&self.build_request(request))
            .send()
            .await?;

        let body = check_status(response).await?.text().await?;
        self.parse_response(&request.prompt, &body)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessagesUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use spout_core::ExecutionSettings;

    fn request(settings: ExecutionSettings) -> CompletionRequest {
        CompletionRequest {
            model: "claude-3-5-sonnet-latest".to_string(),
            prompt: "Summarize this".to_string(),
            settings,
            organization: Some("ignored".to_string()),
        }
    }

    #[test]
    fn applies_required_defaults() {
        let backend = AnthropicBackend::new(&Config::default(), Client::new());
        let body = backend.build_request(&request(ExecutionSettings::new()));
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["messages"][0]["content"], "Summarize this");
    }

    #[test]
    fn forwards_supported_and_drops_the_rest() {
        let backend = AnthropicBackend::new(&Config::default(), Client::new());
        let mut settings = ExecutionSettings::new();
        settings.insert("max_tokens", json!(64));
        settings.insert("temperature", json!(0.1));
        settings.insert("top_p", json!(0.9));
        settings.insert("presence_penalty", json!(0.5));

        let body = backend.build_request(&request(settings));
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 0.1);
        assert!(body.get("top_p").is_none());
        assert!(body.get("presence_penalty").is_none());
    }

    #[test]
    fn parses_text_blocks_and_usage() {
        let backend = AnthropicBackend::new(&Config::default(), Client::new());
        let body = r#"{
            "content": [
                {"type": "text", "text": "Short "},
                {"type": "text", "text": "summary."}
            ],
            "usage": {"input_tokens": 9, "output_tokens": 3}
        }"#;
        let completion = backend.parse_response("Summarize this", body).unwrap();
        assert_eq!(completion.text, "Short summary.");
        assert_eq!(completion.input_tokens, 9);
        assert_eq!(completion.output_tokens, 3);
    }
}
