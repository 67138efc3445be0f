use std::fmt;

use serde::de::DeserializeOwned;

use crate::{
    batch::{self, BatchOptions},
    executor::Executor,
    poll,
    rate_limit::RateLimiterRegistry,
    transport::TransportPool,
    Payload, PollConfig, RequestConfig, Response, Result, StructuredResponse,
};

/// Entry point for every request operation.
///
/// Cloning is cheap; clones share the connection pool and the rate-limiter
/// registry.
#[derive(Clone)]
pub struct Client {
    transport: TransportPool,
    registry: RateLimiterRegistry,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("rate_limited_identities", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Creates a client with its own connection pool and rate-limiter registry.
    pub fn new() -> Self {
        Self::from_reqwest(reqwest::Client::new())
    }

    /// Wraps an existing `reqwest` client, e.g. one with custom pool settings.
    pub fn from_reqwest(http: reqwest::Client) -> Self {
        Self {
            transport: TransportPool::new(http),
            registry: RateLimiterRegistry::new(),
        }
    }

    /// Shares `registry` with this client so limits apply across clients.
    pub fn with_registry(mut self, registry: RateLimiterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &RateLimiterRegistry {
        &self.registry
    }

    /// Issues one request, retrying per `config.retryer`.
    pub async fn request(
        &self,
        target: &str,
        config: &RequestConfig,
        payload: Option<&Payload>,
    ) -> Result<Response> {
        self.executor().execute(target, config, payload, false).await
    }

    /// Issues one request and decodes its JSON body into `T`.
    ///
    /// Decoding runs once after the request succeeded and is never retried.
    pub async fn request_structured<T: DeserializeOwned>(
        &self,
        target: &str,
        config: &RequestConfig,
        payload: Option<&Payload>,
    ) -> Result<StructuredResponse<T>> {
        let response = self.executor().execute(target, config, payload, true).await?;
        let data = response.content.decode::<T>()?;
        Ok(StructuredResponse { response, data })
    }

    /// Issues one request per target concurrently.
    ///
    /// The i-th result belongs to the i-th target. Failures stay per item;
    /// the outer error only reports invalid input such as a payload count
    /// that differs from the target count.
    pub async fn request_many<I, S>(
        &self,
        targets: I,
        config: &RequestConfig,
        payloads: Option<Vec<Payload>>,
    ) -> Result<Vec<Result<Response>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_many_with(targets, config, payloads, &BatchOptions::default())
            .await
    }

    /// [`Client::request_many`] with explicit aggregation options.
    ///
    /// In fail-fast mode the first item error is returned as the outer error.
    pub async fn request_many_with<I, S>(
        &self,
        targets: I,
        config: &RequestConfig,
        payloads: Option<Vec<Payload>>,
        options: &BatchOptions,
    ) -> Result<Vec<Result<Response>>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = targets.into_iter().map(Into::into).collect();
        batch::execute_many(
            self,
            targets,
            config,
            payloads,
            options,
            |client, target, config, payload| async move {
                client.request(&target, &config, payload.as_ref()).await
            },
        )
        .await
    }

    /// Structured variant of [`Client::request_many`].
    pub async fn request_structured_many<T, I, S>(
        &self,
        targets: I,
        config: &RequestConfig,
        payloads: Option<Vec<Payload>>,
    ) -> Result<Vec<Result<StructuredResponse<T>>>>
    where
        T: DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request_structured_many_with(targets, config, payloads, &BatchOptions::default())
            .await
    }

    pub async fn request_structured_many_with<T, I, S>(
        &self,
        targets: I,
        config: &RequestConfig,
        payloads: Option<Vec<Payload>>,
        options: &BatchOptions,
    ) -> Result<Vec<Result<StructuredResponse<T>>>>
    where
        T: DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let targets = targets.into_iter().map(Into::into).collect();
        batch::execute_many(
            self,
            targets,
            config,
            payloads,
            options,
            |client, target, config, payload| async move {
                client
                    .request_structured::<T>(&target, &config, payload.as_ref())
                    .await
            },
        )
        .await
    }

    /// Polls `target` until `poll_config`'s condition holds for the decoded body.
    pub async fn poll<T: DeserializeOwned>(
        &self,
        target: &str,
        poll_config: &PollConfig<T>,
    ) -> Result<StructuredResponse<T>> {
        poll::poll(self, target, poll_config).await
    }

    fn executor(&self) -> Executor<'_> {
        Executor {
            transport: &self.transport,
            registry: &self.registry,
        }
    }
}
