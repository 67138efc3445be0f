//! Repeated structured requests until a condition on the decoded body holds.
//!
//! A poll cycle is one full `request_structured` call, retries included.
//! Cycle errors are returned as is; only an unmet condition keeps polling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::cancel::Interrupt;
use crate::{Client, RequestConfig, RequestError, Result, StructuredResponse};

type Condition<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Polling policy around a [`RequestConfig`].
pub struct PollConfig<T> {
    pub request: RequestConfig,
    /// Sleep between cycles.
    pub interval: Duration,
    /// Total time budget; no new cycle starts once it is spent.
    ///
    /// `request.deadline`, when set, bounds the whole poll and ends it with
    /// [`RequestError::Cancelled`].
    pub timeout: Duration,
    pub max_cycles: Option<u32>,
    condition: Condition<T>,
}

impl<T> Clone for PollConfig<T> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            interval: self.interval,
            timeout: self.timeout,
            max_cycles: self.max_cycles,
            condition: self.condition.clone(),
        }
    }
}

impl<T> fmt::Debug for PollConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollConfig")
            .field("request", &self.request)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("max_cycles", &self.max_cycles)
            .finish_non_exhaustive()
    }
}

impl<T> PollConfig<T> {
    /// Polls with `request` until `condition` accepts the decoded body.
    ///
    /// Defaults: one cycle per second for at most a minute.
    pub fn new<F>(request: RequestConfig, condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            request,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
            max_cycles: None,
            condition: Arc::new(condition),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_cycles(mut self, cycles: u32) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    pub(crate) fn is_satisfied(&self, value: &T) -> bool {
        (self.condition)(value)
    }
}

pub(crate) async fn poll<T: DeserializeOwned>(
    client: &Client,
    target: &str,
    config: &PollConfig<T>,
) -> Result<StructuredResponse<T>> {
    if config.max_cycles == Some(0) {
        return Err(RequestError::InvalidConfig(
            "poll max_cycles must be at least 1".to_owned(),
        ));
    }

    // The request deadline bounds the whole poll, sleeps included.
    let interrupt = Interrupt::new(
        config.request.cancel_token.clone(),
        config.request.deadline,
    );
    let started = Instant::now();
    let mut cycles = 0u32;

    loop {
        let response = interrupt
            .guard(client.request_structured::<T>(target, &config.request, None))
            .await??;
        cycles += 1;

        if config.is_satisfied(&response.data) {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = target, cycles, "poll condition met");

            return Ok(response);
        }

        let last = response.response.content.to_json();
        let out_of_cycles = config.max_cycles.is_some_and(|max| cycles >= max);
        if out_of_cycles || started.elapsed() >= config.timeout {
            return Err(exhausted(target, cycles, started, last));
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            url = target,
            cycles,
            interval = ?config.interval,
            "poll condition not met"
        );

        interrupt.guard(tokio::time::sleep(config.interval)).await?;
        if started.elapsed() >= config.timeout {
            return Err(exhausted(target, cycles, started, last));
        }
    }
}

fn exhausted(
    target: &str,
    cycles: u32,
    started: Instant,
    last: Option<serde_json::Value>,
) -> RequestError {
    let elapsed = started.elapsed();

    #[cfg(feature = "tracing")]
    tracing::debug!(url = target, cycles, ?elapsed, "poll budget exhausted");
    #[cfg(not(feature = "tracing"))]
    let _ = target;

    RequestError::PollExhausted {
        cycles,
        elapsed,
        last,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::PollConfig;
    use crate::RequestConfig;

    #[test]
    fn builders_override_defaults() {
        let config = PollConfig::new(RequestConfig::default(), |done: &bool| *done)
            .with_interval(Duration::from_millis(250))
            .with_timeout(Duration::from_secs(5))
            .with_max_cycles(3);

        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_cycles, Some(3));
        assert!(config.is_satisfied(&true));
        assert!(!config.clone().is_satisfied(&false));
    }

    #[test]
    fn debug_omits_condition() {
        let config = PollConfig::new(RequestConfig::default(), |_: &u8| true);
        let debug = format!("{config:?}");
        assert!(debug.starts_with("PollConfig"));
        assert!(debug.contains("interval"));
    }
}
