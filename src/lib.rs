//! `steady-http` is an async request-execution engine on top of `reqwest`.
//!
//! Every call goes through one executor that retries per a [`Retryer`],
//! waits on a shared token-bucket [`RateLimiter`] and classifies each attempt
//! as an [`AttemptOutcome`]. Entry points live on [`Client`]:
//! - [`Client::request`] and [`Client::request_structured`]
//! - [`Client::request_many`] and [`Client::request_structured_many`]
//! - [`Client::poll`]

mod batch;
mod cancel;
mod client;
mod decode;
mod error;
mod evaluate;
mod executor;
mod options;
mod payload;
mod poll;
mod rate_limit;
mod retry;
mod transport;
mod types;
mod user_agent;

pub use batch::{AbortStrategy, BatchOptions, FailurePolicy};
pub use cancel::CancelToken;
pub use client::Client;
pub use error::RequestError;
pub use evaluate::AttemptOutcome;
pub use options::{DownloadContent, ProxyConfig, ProxyCredentials, RequestConfig};
pub use payload::Payload;
pub use poll::PollConfig;
pub use rate_limit::{RateLimiter, RateLimiterRegistry};
pub use retry::{ContentRetryStrategy, RetryDecision, Retryer};
pub use transport::is_host_reachable;
pub use types::{Content, Response, StructuredResponse};
pub use user_agent::USER_AGENTS;

pub type Result<T> = std::result::Result<T, RequestError>;
