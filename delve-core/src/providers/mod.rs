//! Completion provider implementations.
//!
//! Provides the OpenAI-compatible implementation of the `LlmProvider` trait
//! (OpenAI, Azure, Ollama, vLLM, LM Studio) plus the shared retry policy.
//!
//! Use `create_provider()` to instantiate a provider from config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::{LlmConfig, resolve_secret};
use crate::error::LlmError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use crate::config::RetryConfig;
pub use openai_compat::OpenAiCompatibleProvider;

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`),
/// `LlmError::Connection`, and `LlmError::Timeout`. Permanent errors (auth, parse)
/// return immediately. A backoff sleep is abandoned as soon as `cancel` fires.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        let computed = compute_exponential_backoff(config, attempt);
        return server_ms.max(computed);
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // up to 25%
        let jitter = (capped as f64 * 0.25 * rand_simple()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random fraction in `[0, 1)` for jitter.
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

/// Resolve the API key for a provider: the inline `api_key` wins, then the
/// environment variable named by `api_key_env`.
pub fn resolve_api_key(config: &LlmConfig) -> Option<String> {
    resolve_secret(config.api_key.clone(), &config.api_key_env)
}

/// Create a completion provider based on the configuration.
///
/// Returns an error if no API key can be resolved for a non-local endpoint.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> LlmConfig {
        LlmConfig {
            model: "test-model".to_string(),
            api_key_env: "DELVE_TEST_NONEXISTENT_KEY".to_string(),
            api_key: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_provider_with_inline_key() {
        let config = LlmConfig {
            api_key: Some("test-key-123".into()),
            ..test_config()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "test-model");
    }

    #[test]
    fn test_create_provider_missing_key() {
        let result = create_provider(&test_config());
        match result.err() {
            Some(LlmError::AuthFailed { provider }) => {
                assert!(provider.contains("DELVE_TEST_NONEXISTENT_KEY"));
            }
            other => panic!("Expected AuthFailed, got {:?}", other.map(|e| e.to_string())),
        }
    }

    #[test]
    fn test_create_provider_local_without_key() {
        let config = LlmConfig {
            base_url: Some("http://localhost:11434/v1".into()),
            ..test_config()
        };
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn test_resolve_api_key_ignores_blank() {
        let config = LlmConfig {
            api_key: Some("   ".into()),
            ..test_config()
        };
        assert_eq!(resolve_api_key(&config), None);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&LlmError::RateLimited {
            retry_after_secs: 1
        }));
        assert!(is_retryable(&LlmError::Timeout { timeout_secs: 30 }));
        assert!(is_retryable(&LlmError::Connection {
            message: "reset".into()
        }));
        assert!(!is_retryable(&LlmError::AuthFailed {
            provider: "x".into()
        }));
        assert!(!is_retryable(&LlmError::Cancelled));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 1000);
        assert_eq!(compute_exponential_backoff(&config, 1), 2000);
        assert_eq!(compute_exponential_backoff(&config, 2), 4000);
        assert_eq!(compute_exponential_backoff(&config, 3), 5000);
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let config = RetryConfig {
            jitter: true,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
            backoff_multiplier: 2.0,
            max_retries: 3,
        };
        let backoff = compute_exponential_backoff(&config, 0);
        assert!((1000..=1250).contains(&backoff));
    }

    #[test]
    fn test_backoff_respects_retry_after() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(compute_backoff(&config, 0, &err), 30000);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_first_try() {
        let config = RetryConfig::default();
        let cancel = CancellationToken::new();
        let result = with_retry(&config, &cancel, || async { Ok::<_, LlmError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient() {
        let config = RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            backoff_multiplier: 1.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result = with_retry(&config, &cancel, || {
            let cc = cc.clone();
            async move {
                if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(LlmError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_no_retry() {
        let config = RetryConfig {
            max_retries: 3,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result = with_retry(&config, &cancel, || {
            let cc = cc.clone();
            async move {
                cc.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(LlmError::AuthFailed {
                    provider: "test".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_cancelled_during_backoff() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
            backoff_multiplier: 1.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let result = with_retry(&config, &cancel, || {
            trigger.cancel();
            async { Err::<i32, _>(LlmError::Timeout { timeout_secs: 1 }) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
