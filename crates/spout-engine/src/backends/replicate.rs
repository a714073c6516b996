//! Replicate predictions, the fallback for models no other backend claims.
//!
//! A prediction is created with `Prefer: wait`; if it has not finished when
//! the response comes back, its `urls.get` endpoint is polled until the status
//! is terminal. Replicate reports no usage, so tokens are counted locally.

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
use std::time::Duration;
use tracing::debug;

const SUPPORTED_SETTINGS: &[&str] = &[
    "max_tokens",
    "temperature",
    "top_p",
    "presence_penalty",
    "frequency_penalty",
];
const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ReplicateBackend {
    client: Client,
    base_url: String,
    api_key: Option<Secret>,
    tokenizer: TokenizerProfile,
}

impl std::fmt::Debug for ReplicateBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicateBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ReplicateBackend {
    pub fn new(config: &Config, client: Client) -> Self {
        Self {
            client,
            base_url: config.replicate_base_url.clone(),
            api_key: config.credentials.replicate_api_key.clone(),
            tokenizer: config.tokenizer(),
        }
    }

    /// Prediction endpoint for `model`: `owner/name` runs the latest version,
    /// `owner/name:version` pins one.
    fn create_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if model.contains(':') {
            format!("{base}/predictions")
        } else {
            format!("{base}/models/{model}/predictions")
        }
    }

    pub fn build_request(&self, request: &CompletionRequest) -> Value {
        let mut settings =
            filter_settings(BackendKind::Replicate, &request.settings, SUPPORTED_SETTINGS);
        if request.model.to_lowercase().contains("mixtral") {
            settings.rename("max_tokens", "max_new_tokens");
        }

        let mut input = Map::new();
        input.insert("prompt".to_string(), json!(request.prompt));
        for (key, value) in settings.iter() {
            input.insert(key.to_string(), value.clone());
        }

        match request.model.split_once(':') {
            Some((_, version)) => json!({ "version": version, "input": input }),
            None => json!({ "input": input }),
        }
    }

    async fn fetch(&self, url: &str, api_key: &Secret) -> Result<Prediction, BackendError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(api_key.expose())
            .send()
            .await?;
        parse_body(&check_status(response).await?.text().await?)
    }
}

#[async_trait]
impl ModelBackend for ReplicateBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Replicate
    }

    fn supported_settings(&self) -> &'static [&'static str] {
        SUPPORTED_SETTINGS
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(BackendError::MissingCredentials("replicate_api_key"))?;

        let response = self
            .client
            .post(self.create_url(&request.model))
            .bearer_auth(api_key.expose())
            .header("Prefer", "wait")
            .json(&self.build_request(request))
            .send()
            .await?;
        let mut prediction: Prediction = parse_body(&check_status(response).await?.text().await?)?;

        while !prediction.is_terminal() {
            let Some(url) = prediction.urls.as_ref().and_then(|u| u.get.clone()) else {
                return Err(BackendError::InvalidResponse(
                    "prediction has no polling url".to_string(),
                ));
            };
            debug!(id = %prediction.id, status = %prediction.status, "waiting for prediction");
            tokio::time::sleep(POLL_INTERVAL).await;
            prediction = self.fetch(&url, api_key).await?;
        }

        let text = prediction.into_output()?;
        Ok(Completion::with_usage(
            text,
            &request.prompt,
            None,
            None,
            self.tokenizer,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    /// Output text of a terminal prediction. Streams of tokens are joined.
    fn into_output(self) -> Result<String, BackendError> {
        if self.status != "succeeded" {
            let detail = match self.error {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => "no error detail".to_string(),
            };
            return Err(BackendError::PredictionFailed {
                status: self.status,
                detail,
            });
        }

        Ok(match self.output {
            Some(Value::String(s)) => s,
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }
}
