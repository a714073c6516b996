//! Before/after hooks around each invocation.

use crate::backends::BackendKind;
use crate::engine::ExecutionError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use spout_core::fingerprint::fingerprint_variables;
use spout_core::{ExecutionRequest, ExecutionResult, Id};
use std::time::{Duration, Instant};

/// One invocation as seen at its start.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: Id,
    pub request: ExecutionRequest,
    pub started_at: DateTime<Utc>,
    /// Fingerprint of the request's variable bindings.
    pub input_hash: String,
    started: Instant,
}

impl Invocation {
    pub fn start(request: &ExecutionRequest) -> Self {
        Self {
            id: Id::new(),
            request: request.clone(),
            started_at: Utc::now(),
            input_hash: fingerprint_variables(&request.variables),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// What the engine learned before the invocation finished or failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationTrace {
    pub qualified_name: Option<String>,
    /// Set once a backend has been selected.
    pub model: Option<String>,
    pub backend: Option<BackendKind>,
    /// Local token count of the rendered prompt.
    pub prompt_tokens: Option<u64>,
    pub duration: Duration,
}

/// Invocation hooks. Must not fail. Blocking work belongs on
/// `tokio::task::spawn_blocking`.
#[async_trait]
pub trait InvocationObserver: Send + Sync {
    async fn on_start(&self, _invocation: &Invocation) {}

    async fn on_finish(
        &self,
        invocation: &Invocation,
        trace: &InvocationTrace,
        outcome: Result<&ExecutionResult, &ExecutionError>,
    );
}

impl std::fmt::Debug for dyn InvocationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InvocationObserver")
    }
}
