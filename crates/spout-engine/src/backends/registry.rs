//! Model-id routing to backends.

use super::{
    AnthropicBackend, BackendKind, GeminiBackend, ModelBackend, OpenAiBackend, ReplicateBackend,
};
use reqwest::Client;
use spout_core::config::Config;
use std::sync::Arc;
use tracing::debug;

/// A model-id fragment and the backend it selects.
#[derive(Clone)]
pub struct BackendDescriptor {
    pub fragment: String,
    pub backend: Arc<dyn ModelBackend>,
}

impl std::fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("fragment", &self.fragment)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

/// Ordered routes plus a fallback. Built once at startup.
#[derive(Clone)]
pub struct BackendRegistry {
    routes: Vec<BackendDescriptor>,
    fallback: Arc<dyn ModelBackend>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("routes", &self.routes)
            .field("fallback", &self.fallback.kind())
            .finish()
    }
}

impl BackendRegistry {
    pub fn builder(fallback: Arc<dyn ModelBackend>) -> BackendRegistryBuilder {
        BackendRegistryBuilder {
            routes: Vec::new(),
            fallback,
        }
    }

    /// Standard routes: gemini, claude, gpt, o1-, deepseek; Replicate otherwise.
    pub fn from_config(config: &Config) -> Self {
        let client = Client::new();
        let openai: Arc<dyn ModelBackend> =
            Arc::new(OpenAiBackend::openai(config, client.clone()));

        Self::builder(Arc::new(ReplicateBackend::new(config, client.clone())))
            .route("gemini", Arc::new(GeminiBackend::new(config, client.clone())))
            .route("claude", Arc::new(AnthropicBackend::new(config, client.clone())))
            .route("gpt", Arc::clone(&openai))
            .route("o1-", openai)
            .route("deepseek", Arc::new(OpenAiBackend::deepseek(config, client)))
            .build()
    }

    /// Backend for `model`: the first route whose fragment occurs in the
    /// lower-cased model id, else the fallback.
    pub fn select(&self, model: &str) -> Arc<dyn ModelBackend> {
        let model = model.to_lowercase();
        let backend = self
            .routes
            .iter()
            .find(|route| model.contains(&route.fragment))
            .map_or(&self.fallback, |route| &route.backend);
        debug!(model = %model, backend = %backend.kind(), "selected backend");
        Arc::clone(backend)
    }

    pub fn routes(&self) -> &[BackendDescriptor] {
        &self.routes
    }

    pub fn fallback_kind(&self) -> BackendKind {
        self.fallback.kind()
    }
}

#[derive(Debug)]
pub struct BackendRegistryBuilder {
    routes: Vec<BackendDescriptor>,
    fallback: Arc<dyn ModelBackend>,
}

impl BackendRegistryBuilder {
    /// Append a route. Earlier routes take priority.
    pub fn route(mut self, fragment: &str, backend: Arc<dyn ModelBackend>) -> Self {
        self.routes.push(BackendDescriptor {
            fragment: fragment.to_lowercase(),
            backend,
        });
        self
    }

    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            routes: self.routes,
            fallback: self.fallback,
        }
    }
}
