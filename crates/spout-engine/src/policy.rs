//! Timeout and retry policy around backend calls.
//!
//! The defaults (no timeout, no retries) leave a backend call exactly as the
//! backend performs it.

use crate::backends::{BackendError, Completion, CompletionRequest, ModelBackend};
use spout_core::config::Config;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    /// Bound on each attempt. `None` is unbounded.
    pub timeout: Option<Duration>,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            retries: 0,
            backoff: Duration::from_secs(5),
        }
    }
}

impl CallPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: (config.backend_timeout_sec > 0)
                .then(|| Duration::from_secs(u64::from(config.backend_timeout_sec))),
            retries: config.backend_retries,
            backoff: Duration::from_secs(u64::from(config.backend_retry_backoff_sec)),
        }
    }

    /// Run `request` against `backend` under this policy.
    pub async fn call(
        &self,
        backend: &dyn ModelBackend,
        request: &CompletionRequest,
    ) -> Result<Completion, BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.timeout {
                Some(limit) => tokio::time::timeout(limit, backend.complete(request))
                    .await
                    .unwrap_or(Err(BackendError::Timeout(limit))),
                None => backend.complete(request).await,
            };

            match result {
                Err(e) if e.is_transient() && attempt <= self.retries => {
                    warn!(
                        backend = %backend.kind(),
                        model = %request.model,
                        attempt,
                        retries = self.retries,
                        error = %e,
                        "backend call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::BackendKind;
    use async_trait::async_trait;
    use spout_core::ExecutionSettings;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times with `error`, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: BackendError,
        delay: Duration,
    }

    impl Flaky {
        fn new(failures: u32, error: BackendError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ModelBackend for Flaky {
        fn kind(&self) -> BackendKind {
            BackendKind::OpenAi
        }

        fn supported_settings(&self) -> &'static [&'static str] {
            &[]
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if call <= self.failures {
                return Err(self.error.clone());
            }
            Ok(Completion {
                text: "ok".to_string(),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".to_string(),
            prompt: "p".to_string(),
            settings: ExecutionSettings::new(),
            organization: None,
        }
    }

    fn policy(retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: None,
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn default_policy_does_not_retry() {
        let backend = Flaky::new(1, BackendError::Network("reset".to_string()));
        let err = CallPolicy::default().call(&backend, &request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let backend = Flaky::new(2, BackendError::from_http_status(503, "busy"));
        let completion = policy(2).call(&backend, &request()).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let backend = Flaky::new(1, BackendError::from_http_status(401, "bad key"));
        let err = policy(3).call(&backend, &request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Authentication(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_bounds_each_attempt() {
        let mut backend = Flaky::new(0, BackendError::Network(String::new()));
        backend.delay = Duration::from_secs(5);
        let policy = CallPolicy {
            timeout: Some(Duration::from_millis(10)),
            retries: 0,
            backoff: Duration::ZERO,
        };
        let err = policy.call(&backend, &request()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
    }

    #[test]
    fn from_config_maps_zero_timeout_to_unbounded() {
        let mut config = Config::default();
        assert_eq!(CallPolicy::from_config(&config), CallPolicy::default());

        config.backend_timeout_sec = 30;
        config.backend_retries = 2;
        let policy = CallPolicy::from_config(&config);
        assert_eq!(policy.timeout, Some(Duration::from_secs(30)));
        assert_eq!(policy.retries, 2);
    }
}
