//! Bounded retry for synchronous generation calls.
//!
//! One helper shared by every adapter: a fixed delay schedule, and a success
//! predicate so that an `Ok` carrying an empty or unusable payload is retried
//! the same way as an error. Exhausting the schedule yields `None` rather than
//! an error; callers treat that as a failed generation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Delay schedule for retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before each retry; its length is the retry count
    pub delays: Vec<Duration>,
    /// Operation name for logging
    pub operation_name: String,
}

impl RetryPolicy {
    /// Three retries at 1s, 2s and 4s.
    pub fn standard(operation_name: impl Into<String>) -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            operation_name: operation_name.into(),
        }
    }

    /// Single attempt, no retries.
    pub fn none(operation_name: impl Into<String>) -> Self {
        Self {
            delays: Vec::new(),
            operation_name: operation_name.into(),
        }
    }

    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.delays.len() as u32 + 1
    }
}

/// Run `op` until it returns a value accepted by `is_success`.
///
/// Returns `None` after the schedule is exhausted.
pub async fn retry_until<T, E, F, Fut, P>(policy: &RetryPolicy, op: F, is_success: P) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&T) -> bool,
{
    let attempts = policy.max_attempts();

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) if is_success(&value) => return Some(value),
            Ok(_) => warn!(
                operation = %policy.operation_name,
                attempt,
                "Generation returned an empty or invalid result"
            ),
            Err(e) => warn!(
                operation = %policy.operation_name,
                attempt,
                error = %e,
                "Generation call failed"
            ),
        }

        if let Some(delay) = policy.delays.get(attempt as usize - 1) {
            debug!(
                operation = %policy.operation_name,
                delay_ms = delay.as_millis() as u64,
                "Retrying generation call"
            );
            tokio::time::sleep(*delay).await;
        }
    }

    warn!(
        operation = %policy.operation_name,
        attempts,
        "Generation retries exhausted"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(name: &str) -> RetryPolicy {
        RetryPolicy::standard(name).with_delays(vec![Duration::from_millis(1); 3])
    }

    #[test]
    fn test_standard_schedule() {
        let policy = RetryPolicy::standard("image");
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(
            policy.delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test]
    async fn test_retries_empty_payload_until_valid() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_until(
            &quick("image"),
            || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(if n < 2 { String::new() } else { "url".to_string() })
            },
            |url: &String| !url.is_empty(),
        )
        .await;
        assert_eq!(result.as_deref(), Some("url"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Option<String> = retry_until(
            &quick("audio"),
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>("boom")
            },
            |_| true,
        )
        .await;
        assert!(result.is_none());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_delays_are_applied() {
        let start = tokio::time::Instant::now();
        let result: Option<()> = retry_until(
            &RetryPolicy::standard("image"),
            || async { Err::<(), _>("down") },
            |_| true,
        )
        .await;
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_secs(7));
        assert!(start.elapsed() < Duration::from_secs(8));
    }
}
