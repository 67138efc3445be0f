//! Per-request state machine: attempt, evaluate, then retry or return.
//!
//! ```text
//! Pending -> Attempting -> Evaluating -> Pending    (retryable, budget left)
//!                                     -> Succeeded
//!                                     -> Failed     (fatal or budget spent)
//! ```
//!
//! Attempts are strictly sequential. Rate-limit waits, I/O and backoff
//! sleeps all observe the call's cancel token and deadline.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use tokio::time::Instant;

use crate::cancel::Interrupt;
use crate::evaluate::{evaluate_response, evaluate_transport_error, AttemptOutcome, RawAttempt};
use crate::rate_limit::RateLimiterRegistry;
use crate::transport::TransportPool;
use crate::user_agent::next_user_agent;
use crate::{
    Content, DownloadContent, Payload, RequestConfig, RequestError, Response, Result,
    RetryDecision,
};

/// What came back from the transport for one attempt.
enum Exchange {
    Received(RawAttempt),
    Failed(AttemptOutcome),
}

enum State {
    Pending,
    Attempting,
    Evaluating(Exchange),
}

pub(crate) struct Executor<'a> {
    pub(crate) transport: &'a TransportPool,
    pub(crate) registry: &'a RateLimiterRegistry,
}

impl Executor<'_> {
    /// Drives one logical request to `Succeeded` or `Failed`.
    ///
    /// `structured` forces a JSON body for the decoder that runs afterwards.
    pub(crate) async fn execute(
        &self,
        target: &str,
        config: &RequestConfig,
        payload: Option<&Payload>,
        structured: bool,
    ) -> Result<Response> {
        let interrupt = Interrupt::new(config.cancel_token.clone(), config.deadline);
        let client = self.transport.client_for(config)?;
        let headers = request_headers(config, payload)?;
        let mode = download_mode(config, structured);
        let started = Instant::now();
        let mut attempt = 0u32;
        let mut state = State::Pending;

        #[cfg(feature = "tracing")]
        tracing::debug!(url = target, method = %config.method, "request started");

        loop {
            state = match state {
                State::Pending => State::Attempting,
                State::Attempting => {
                    if let Some(limiter) = &config.rate_limiter {
                        // Never reaches the transport on failure, so no attempt is spent.
                        interrupt.guard(self.registry.acquire(limiter)).await??;
                    }
                    attempt += 1;
                    let request = build_request(&client, target, config, &headers, payload);
                    match interrupt.guard(send(request, config)).await {
                        Ok(exchange) => State::Evaluating(exchange),
                        Err(cancelled) => State::Evaluating(Exchange::Failed(
                            AttemptOutcome::FatalFailure(cancelled),
                        )),
                    }
                }
                State::Evaluating(exchange) => {
                    let outcome = match exchange {
                        Exchange::Received(raw) => evaluate_response(raw, config, mode),
                        Exchange::Failed(outcome) => outcome,
                    };
                    record_attempt(target, attempt, &outcome);

                    match outcome {
                        AttemptOutcome::Success(mut response) => {
                            if config.download_content == DownloadContent::None && !structured {
                                response.content = Content::Empty;
                            }
                            response.attempts = attempt;
                            response.elapsed = started.elapsed();

                            #[cfg(feature = "tracing")]
                            tracing::debug!(
                                url = target,
                                attempts = attempt,
                                status = response.status,
                                "request finished"
                            );

                            return Ok(response);
                        }
                        AttemptOutcome::FatalFailure(err) => return Err(err),
                        AttemptOutcome::RetryableFailure(err) => {
                            let RetryDecision::RetryAfter(delay) = config.retryer.decide(attempt)
                            else {
                                return Err(err);
                            };

                            #[cfg(feature = "tracing")]
                            tracing::debug!(
                                url = target,
                                attempt,
                                ?delay,
                                "retrying after backoff"
                            );

                            interrupt.guard(tokio::time::sleep(delay)).await?;
                            State::Pending
                        }
                    }
                }
            };
        }
    }
}

fn download_mode(config: &RequestConfig, structured: bool) -> DownloadContent {
    if structured {
        return DownloadContent::Json;
    }
    match config.download_content {
        // The content strategy needs something to look at.
        DownloadContent::None if config.retryer.has_content_strategy() => DownloadContent::Bytes,
        mode => mode,
    }
}

/// Final header set of a call: configured headers, then the user agent,
/// bearer token and payload content type, each replacing what was there.
fn request_headers(config: &RequestConfig, payload: Option<&Payload>) -> Result<HeaderMap> {
    let mut headers = config.headers.clone();

    if config.use_random_user_agent && !headers.contains_key(USER_AGENT) {
        let agent = next_user_agent(config.user_agents.as_deref());
        headers.insert(USER_AGENT, header_value("User-Agent", agent)?);
    }
    if let Some(token) = &config.bearer_token {
        let value = normalize_bearer_authorization(token);
        let mut value = header_value("Authorization", &value)?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    if let Some(content_type) = payload.and_then(Payload::content_type) {
        headers.insert(CONTENT_TYPE, header_value("Content-Type", content_type)?);
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| {
        RequestError::InvalidConfig(format!("invalid value for header '{name}': {err}"))
    })
}

fn build_request(
    client: &reqwest::Client,
    target: &str,
    config: &RequestConfig,
    headers: &HeaderMap,
    payload: Option<&Payload>,
) -> reqwest::RequestBuilder {
    let mut builder = client
        .request(config.method.clone(), target)
        .headers(headers.clone());

    if !config.query.is_empty() {
        builder = builder.query(&config.query);
    }
    match payload {
        Some(payload) => payload.apply(builder),
        None => builder,
    }
}

/// Sends the request and reads the whole body within `config.timeout`.
async fn send(request: reqwest::RequestBuilder, config: &RequestConfig) -> Exchange {
    let exchange = async {
        let response = request.send().await?;
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok::<_, reqwest::Error>(RawAttempt {
            url,
            status,
            headers,
            body,
        })
    };

    match tokio::time::timeout(config.timeout, exchange).await {
        Ok(Ok(raw)) => Exchange::Received(raw),
        Ok(Err(err)) => Exchange::Failed(evaluate_transport_error(err, config)),
        Err(_) => Exchange::Failed(AttemptOutcome::RetryableFailure(RequestError::Timeout {
            timeout: config.timeout,
        })),
    }
}

fn record_attempt(target: &str, attempt: u32, outcome: &AttemptOutcome) {
    #[cfg(feature = "tracing")]
    match outcome {
        AttemptOutcome::Success(response) => tracing::debug!(
            url = target,
            attempt,
            outcome = outcome.label(),
            status = response.status,
            "attempt finished"
        ),
        AttemptOutcome::RetryableFailure(err) | AttemptOutcome::FatalFailure(err) => {
            tracing::debug!(
                url = target,
                attempt,
                outcome = outcome.label(),
                error = %err,
                "attempt finished"
            )
        }
    }

    #[cfg(not(feature = "tracing"))]
    let _ = (target, attempt, outcome);
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}
