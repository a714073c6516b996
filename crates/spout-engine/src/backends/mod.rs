//! Model backends behind one completion contract.
//!
//! Each adapter owns its provider's request shaping: it keeps only the
//! generic settings it supports, renames them to the provider's parameter
//! names and reads native usage figures when the provider reports them.

mod anthropic;
mod error;
mod gemini;
mod openai;
mod registry;
mod replicate;

pub use anthropic::AnthropicBackend;
pub use error::BackendError;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;
pub use registry::{BackendDescriptor, BackendRegistry, BackendRegistryBuilder};
pub use replicate::ReplicateBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spout_core::tokenizer::TokenizerProfile;
use spout_core::ExecutionSettings;
use tracing::debug;

/// Closed set of backend implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Gemini,
    Anthropic,
    OpenAi,
    DeepSeek,
    Replicate,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Replicate => "replicate",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    /// Generic settings as declared by the skill; unfiltered.
    pub settings: ExecutionSettings,
    /// Organization context, for backends that support it.
    pub organization: Option<String>,
}

/// Generated text and token accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Completion {
    /// Build from provider usage, counting locally whatever is missing.
    pub fn with_usage(
        text: String,
        prompt: &str,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
        tokenizer: TokenizerProfile,
    ) -> Self {
        let input_tokens = input_tokens.unwrap_or_else(|| tokenizer.count(prompt));
        let output_tokens = output_tokens.unwrap_or_else(|| tokenizer.count(&text));
        Self {
            text,
            input_tokens,
            output_tokens,
        }
    }
}

/// Uniform completion contract.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Generic setting names this backend forwards.
    fn supported_settings(&self) -> &'static [&'static str];

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError>;
}

impl std::fmt::Debug for dyn ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModelBackend({})", self.kind())
    }
}

/// Keep the settings in `supported`, logging the names of the rest.
pub fn filter_settings(
    kind: BackendKind,
    settings: &ExecutionSettings,
    supported: &[&str],
) -> ExecutionSettings {
    let (kept, dropped) = settings.partition(supported);
    if !dropped.is_empty() {
        debug!(backend = %kind, dropped = ?dropped, "dropping unsupported settings");
    }
    kept
}

/// Turn a non-success response into a [`BackendError`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::from_http_status(status.as_u16(), &body))
}

/// Parse a JSON response body.
fn parse_body<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, BackendError> {
    serde_json::from_str(body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
}
