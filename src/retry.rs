//! Retry policy: attempt budget, exponential backoff and retry predicates.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::{Content, RequestError, Result};

/// Content-based retry predicate.
///
/// Returning `true` retries the attempt regardless of its status, which
/// covers APIs that answer `200` with an application-level error payload.
pub trait ContentRetryStrategy: Send + Sync {
    fn should_retry(&self, content: &Content) -> bool;
}

impl<F> ContentRetryStrategy for F
where
    F: Fn(&Content) -> bool + Send + Sync,
{
    fn should_retry(&self, content: &Content) -> bool {
        self(content)
    }
}

/// Decision returned by [`Retryer::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Attempt budget exhausted.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Retry logic with an exponential backoff schedule.
///
/// The delay before retry `n` (1-based attempt that just failed) is
/// `clamp(backoff_base * 2^(n-1), min_delay, max_delay)`.
#[derive(Clone)]
pub struct Retryer {
    attempts: u32,
    min_delay: Duration,
    max_delay: Duration,
    backoff_base: Duration,
    retryable_status_codes: Option<BTreeSet<u16>>,
    retry_on_transport: bool,
    content_strategy: Option<Arc<dyn ContentRetryStrategy>>,
}

impl Default for Retryer {
    fn default() -> Self {
        Self {
            attempts: 1,
            min_delay: Duration::ZERO,
            max_delay: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            retryable_status_codes: None,
            retry_on_transport: true,
            content_strategy: None,
        }
    }
}

impl fmt::Debug for Retryer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retryer")
            .field("attempts", &self.attempts)
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_base", &self.backoff_base)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("retry_on_transport", &self.retry_on_transport)
            .field("content_strategy", &self.content_strategy.is_some())
            .finish()
    }
}

impl Retryer {
    /// Creates a retryer; `attempts = 1` means a single try with no retry.
    pub fn new(attempts: u32, min_delay: Duration, max_delay: Duration) -> Result<Self> {
        if attempts == 0 {
            return Err(RequestError::InvalidConfig(
                "retry attempts must be at least 1".to_owned(),
            ));
        }
        if min_delay > max_delay {
            return Err(RequestError::InvalidConfig(format!(
                "retry min_delay {min_delay:?} exceeds max_delay {max_delay:?}"
            )));
        }
        Ok(Self {
            attempts,
            min_delay,
            max_delay,
            ..Self::default()
        })
    }

    /// Sets the multiplier of the exponential schedule.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Restricts status-based retries to the given codes.
    ///
    /// Rejected statuses outside this set fail immediately. Without a set,
    /// every rejected status is retried.
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = Some(codes.into_iter().collect());
        self
    }

    /// Disables retries of transport failures (connect, reset, body read).
    pub fn without_transport_retry(mut self) -> Self {
        self.retry_on_transport = false;
        self
    }

    pub fn with_content_retry<S>(mut self, strategy: S) -> Self
    where
        S: ContentRetryStrategy + 'static,
    {
        self.content_strategy = Some(Arc::new(strategy));
        self
    }

    /// Retries when `predicate` holds for the body decoded as `T`.
    ///
    /// Bodies that do not decode as `T` never trigger a retry; the decoder
    /// reports them instead.
    pub fn with_typed_content_retry<T, F>(self, predicate: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.with_content_retry(move |content: &Content| {
            content
                .decode::<T>()
                .map(|value| predicate(&value))
                .unwrap_or(false)
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn has_content_strategy(&self) -> bool {
        self.content_strategy.is_some()
    }

    pub(crate) fn retries_transport(&self) -> bool {
        self.retry_on_transport
    }

    pub(crate) fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_status_codes
            .as_ref()
            .map_or(true, |codes| codes.contains(&status))
    }

    pub(crate) fn content_requests_retry(&self, content: &Content) -> bool {
        self.content_strategy
            .as_ref()
            .is_some_and(|strategy| strategy.should_retry(content))
    }

    /// Backoff delay after the given 1-based attempt failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.backoff_base.saturating_mul(1u32 << exp);
        raw.clamp(self.min_delay, self.max_delay)
    }

    /// Decides what happens after a retryable failure of `attempt`.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.attempts {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff_delay(attempt))
    }
}
