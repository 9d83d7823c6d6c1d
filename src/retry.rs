//! Bounded exponential-backoff retry for provider calls.
//!
//! - HTTP 408, 429 and 5xx → retry
//! - Other HTTP 4xx → fail immediately
//! - Network errors and timeouts → retry
//! - Malformed response bodies → fail immediately
//! - Backoff: `base_delay × 2^(attempt-1)`, capped at `max_delay`

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use crate::error::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Outcome classification of a single failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    Transient(String),
    Fatal(String),
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Run `op` until it succeeds, fails fatally, or the policy is exhausted.
///
/// Both fatal failures and exhaustion surface as
/// [`RagError::ExternalService`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, service: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let mut last_err = String::new();
    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            warn!(
                service,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %last_err,
                "retrying"
            );
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(CallError::Fatal(msg)) => return Err(RagError::external(msg)),
            Err(CallError::Transient(msg)) => last_err = msg,
        }
    }
    Err(RagError::external(format!(
        "{} failed after {} attempts: {}",
        service,
        policy.max_retries + 1,
        last_err
    )))
}

/// Send a JSON request and classify the outcome.
pub async fn send_json(
    request: reqwest::RequestBuilder,
    service: &str,
) -> std::result::Result<serde_json::Value, CallError> {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) if e.is_builder() => {
            return Err(CallError::Fatal(format!("{} request invalid: {}", service, e)))
        }
        Err(e) => {
            return Err(CallError::Transient(format!(
                "{} request failed: {}",
                service, e
            )))
        }
    };

    let status = response.status();
    if status.is_success() {
        return response.json::<serde_json::Value>().await.map_err(|e| {
            CallError::Fatal(format!("{} returned a malformed response: {}", service, e))
        });
    }

    let body = response.text().await.unwrap_or_default();
    let msg = format!("{} API error {}: {}", service, status, body);
    if is_transient_status(status) {
        Err(CallError::Transient(msg))
    } else {
        Err(CallError::Fatal(msg))
    }
}
