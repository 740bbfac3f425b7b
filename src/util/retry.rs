//! Retry policy applied around daemon operations
//!
//! Transient daemon and network failures are never propagated past the
//! operation that can meaningfully retry them; they are logged through a
//! standardized diagnostic and the operation is re-attempted after a fixed
//! delay. Operations that already printed their own operator-facing
//! diagnostic fail "silently" so the same condition is not logged twice.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Implemented by the error types of retryable operations.
pub trait Retryable {
    /// When true, the retry loop skips its own diagnostic line; the
    /// operation has already told the operator what is wrong.
    fn is_silent(&self) -> bool {
        false
    }
}

/// Fixed-delay retry with an optional attempt bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    label: &'static str,
    delay: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever. Used for operations the node cannot run without,
    /// like the initial daemon check and work fetch.
    pub fn unbounded(label: &'static str, delay: Duration) -> Self {
        Self {
            label,
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` tries.
    pub fn attempts(label: &'static str, delay: Duration, max_attempts: u32) -> Self {
        Self {
            label,
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    /// Run `op` until it succeeds or the attempt bound is exhausted.
    ///
    /// Returns `None` only for bounded policies. With no bound the loop
    /// runs until success, so unbounded callers can safely unwrap.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Option<T>
    where
        E: Display + Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    if !e.is_silent() {
                        warn!("{} {}", self.label, e);
                    }
                    attempt += 1;
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            warn!("{} giving up after {} attempts", self.label, attempt);
                            return None;
                        }
                    }
                }
            }
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky;

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky")
        }
    }

    impl Retryable for Flaky {}

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::unbounded("test op:", Duration::from_secs(1));
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(Flaky)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_gives_up() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::attempts("test op:", Duration::from_secs(1), 3);
        let result: Option<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky) }
            })
            .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
