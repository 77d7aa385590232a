//! Timeouts and bounded retries for collaborator calls.
//!
//! Every summarizer, embedding and re-ranker call goes through
//! [`CallPolicy::run`]. A call that exceeds the timeout, or fails with an
//! error that [`ModelError::is_retryable`] classifies as transient, is retried
//! after a linear backoff until `max_attempts` is reached.

use finrag_models::ModelError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Timeout and retry settings shared by all collaborator calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    /// Attempts before giving up, including the first one
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * backoff_ms` before the next try
    pub backoff_ms: u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Why a collaborator call ultimately failed
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("{operation} timed out after {attempts} attempt(s)")]
    Timeout {
        operation: &'static str,
        attempts: u32,
    },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Failed {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: ModelError,
    },
}

impl CallError {
    /// A failure that did not come from a timeout or transport problem, e.g. a
    /// model that answered with unusable output.
    pub fn rejected(operation: &'static str, source: ModelError) -> Self {
        Self::Failed {
            operation,
            attempts: 1,
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Timeout { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

impl CallPolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Run `call` under the timeout, retrying transient failures.
    ///
    /// `call` is invoked once per attempt so each attempt gets a fresh future.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = finrag_models::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match tokio::time::timeout(self.timeout(), call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(source)) => {
                    if !source.is_retryable() || attempt >= max_attempts {
                        return Err(CallError::Failed {
                            operation,
                            attempts: attempt,
                            source,
                        });
                    }
                    warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation, attempt, max_attempts, source
                    );
                }
                Err(_) => {
                    if attempt >= max_attempts {
                        return Err(CallError::Timeout {
                            operation,
                            attempts: attempt,
                        });
                    }
                    warn!(
                        "{} timed out after {:?} (attempt {}/{})",
                        operation,
                        self.timeout(),
                        attempt,
                        max_attempts
                    );
                }
            }

            tokio::time::sleep(self.backoff() * attempt).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(attempts: u32) -> CallPolicy {
        CallPolicy::new(Duration::from_millis(20), attempts).with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let value = fast_policy(3)
            .run("probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ModelError>(7) }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let calls = AtomicU32::new(0);
        let value = fast_policy(3)
            .run("probe", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ModelError::Endpoint {
                            status: 503,
                            body: String::new(),
                        })
                    } else {
                        Ok("done")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(3)
            .run("probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ModelError::EmptyOutput { what: "summary" }) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.is_timeout());
        assert_eq!(err.attempts(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_attempts() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(2)
            .run("probe", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, ModelError>(())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "probe timed out after 2 attempt(s)");
    }
}
