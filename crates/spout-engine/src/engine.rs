//! Skill execution: resolve, render, dispatch.
//!
//! `execute` is the only place the resolver, the renderer and the backends
//! meet. Their failures pass through unchanged apart from added context, and
//! every registered observer sees the start and the end of each invocation.

use crate::backends::{BackendError, BackendKind, BackendRegistry, CompletionRequest};
use crate::metrics::MetricsRecorder;
use crate::observer::{Invocation, InvocationObserver, InvocationTrace};
use crate::policy::CallPolicy;
use crate::resolver::{PluginResolver, ResolveError};
use spout_core::config::Config;
use spout_core::fingerprint::fingerprint;
use spout_core::skills::SkillDefinition;
use spout_core::template::render;
use spout_core::tokenizer::TokenizerProfile;
use spout_core::{ExecutionRequest, ExecutionResult, SkillRef, Variables};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{kind} backend failed for model {model}: {source}")]
    Backend {
        kind: BackendKind,
        model: String,
        #[source]
        source: BackendError,
    },
}

impl ExecutionError {
    /// Underlying backend error, if the backend failed.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Backend { source, .. } => Some(source),
            Self::Resolve(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// A resolved skill and its rendered prompt.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub skill: SkillDefinition,
    pub variables: Variables,
    pub prompt: String,
}

pub struct ExecutionEngine {
    resolver: PluginResolver,
    registry: BackendRegistry,
    policy: CallPolicy,
    tokenizer: TokenizerProfile,
    observers: Vec<Arc<dyn InvocationObserver>>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("resolver", &self.resolver)
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("tokenizer", &self.tokenizer)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ExecutionEngine {
    pub fn builder(resolver: PluginResolver, registry: BackendRegistry) -> EngineBuilder {
        EngineBuilder {
            resolver,
            registry,
            policy: CallPolicy::default(),
            tokenizer: TokenizerProfile::default(),
            observers: Vec::new(),
        }
    }

    /// Engine with the standard backends, the configured call policy and,
    /// when enabled, the metrics recorder.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::builder(
            PluginResolver::from_config(config),
            BackendRegistry::from_config(config),
        )
        .policy(CallPolicy::from_config(config))
        .tokenizer(config.tokenizer());

        if config.metrics_enabled {
            builder = builder.observer(Arc::new(MetricsRecorder::new(config.metrics_path())));
        }
        builder.build()
    }

    pub fn resolver(&self) -> &PluginResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Convenience form of [`execute`](Self::execute).
    pub async fn run(
        &self,
        category: &str,
        skill: &str,
        variables: Variables,
        model: &str,
    ) -> Result<ExecutionResult> {
        let request = ExecutionRequest::new(SkillRef::new(category, skill), model)
            .with_variables(variables);
        self.execute(&request).await
    }

    /// Resolve the skill and render its prompt without calling a backend.
    pub fn prepare(&self, skill: &SkillRef, variables: &Variables) -> Result<PreparedPrompt> {
        let definition = self.resolver.resolve(&skill.category, &skill.skill)?;
        let variables = definition.bind(variables);
        let prompt = render(&definition.template, &variables);
        Ok(PreparedPrompt {
            skill: definition,
            variables,
            prompt,
        })
    }

    /// Execute one skill invocation.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let invocation = Invocation::start(request);
        for observer in &self.observers {
            observer.on_start(&invocation).await;
        }

        let span = info_span!(
            "execute",
            invocation = %invocation.id,
            category = %request.skill.category,
            skill = %request.skill.skill,
            model = %request.model,
        );
        let mut trace = InvocationTrace::default();
        let outcome = self.invoke(&invocation, &mut trace).instrument(span).await;
        trace.duration = invocation.elapsed();

        for observer in &self.observers {
            observer
                .on_finish(&invocation, &trace, outcome.as_ref())
                .await;
        }
        outcome
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        trace: &mut InvocationTrace,
    ) -> Result<ExecutionResult> {
        let request = &invocation.request;
        let prepared = self.prepare(&request.skill, &request.variables)?;
        let qualified_name = prepared.skill.qualified_name();
        trace.qualified_name = Some(qualified_name.clone());
        trace.prompt_tokens = Some(self.tokenizer.count(&prepared.prompt));
        debug!(skill = %qualified_name, prompt_bytes = prepared.prompt.len(), "rendered prompt");

        let backend = self.registry.select(&request.model);
        trace.model = Some(request.model.clone());
        trace.backend = Some(backend.kind());

        let completion_request = CompletionRequest {
            model: request.model.clone(),
            prompt: prepared.prompt,
            settings: prepared.skill.execution_settings.clone(),
            organization: request.organization.clone(),
        };
        let completion = self
            .policy
            .call(backend.as_ref(), &completion_request)
            .await
            .map_err(|source| ExecutionError::Backend {
                kind: backend.kind(),
                model: request.model.clone(),
                source,
            })?;

        let duration = invocation.elapsed();
        info!(
            skill = %qualified_name,
            backend = %backend.kind(),
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            duration_ms = duration.as_millis() as u64,
            "skill executed"
        );

        Ok(ExecutionResult {
            invocation_id: invocation.id.clone(),
            output_hash: fingerprint(&completion.text),
            output: completion.text,
            model: request.model.clone(),
            qualified_name,
            skill: request.skill.clone(),
            tier: prepared.skill.tier,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            input_hash: invocation.input_hash.clone(),
            started_at: invocation.started_at,
            duration,
        })
    }
}

/// Composes an engine. Observers run in the order they are added.
#[derive(Debug)]
pub struct EngineBuilder {
    resolver: PluginResolver,
    registry: BackendRegistry,
    policy: CallPolicy,
    tokenizer: TokenizerProfile,
    observers: Vec<Arc<dyn InvocationObserver>>,
}

impl EngineBuilder {
    pub fn policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn tokenizer(mut self, tokenizer: TokenizerProfile) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn InvocationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> ExecutionEngine {
        ExecutionEngine {
            resolver: self.resolver,
            registry: self.registry,
            policy: self.policy,
            tokenizer: self.tokenizer,
            observers: self.observers,
        }
    }
}
