use std::time::Duration;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// The attempt did not complete within the configured timeout.
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },
    /// Status or content policy rejected the final response.
    #[error("response evaluation failed: status={status}, body: {body}")]
    ResponseEvaluation {
        status: u16,
        /// Truncated body snapshot for diagnostics.
        body: String,
        /// Set when the content retry strategy, not the status, rejected it.
        content_rejected: bool,
    },
    /// No rate-limit token became available within `max_delay`.
    #[error("rate limit exceeded for '{identity}' (max delay {max_delay:?})")]
    RateLimitExceeded {
        identity: String,
        max_delay: Duration,
    },
    /// Response body could not be decoded into the requested shape.
    #[error("decode error: {0}")]
    Decode(String),
    /// Poll budget spent without the stop condition being met.
    #[error("poll exhausted after {cycles} cycle(s) in {elapsed:?}")]
    PollExhausted {
        cycles: u32,
        elapsed: Duration,
        /// JSON body of the last observed response, if any.
        last: Option<serde_json::Value>,
    },
    /// Cancelled by the caller or by a deadline.
    #[error("request cancelled")]
    Cancelled,
    /// Configuration rejected before any request was issued.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RequestError {
    /// Final HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ResponseEvaluation { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Whether this condition is absorbed by the retry loop while attempts remain.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::ResponseEvaluation { .. } => true,
            Self::Transport(err) => is_retryable_transport(err),
            _ => false,
        }
    }
}

pub(crate) fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_request() || err.is_body() || err.is_connect()
}
