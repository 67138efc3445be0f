//! Concurrent fan-out of independent requests.
//!
//! Each item runs as its own task with its own child cancel token, so one
//! item's failure or cancellation never reaches its siblings. Results are
//! written back by input position.
//!
//! Aggregation is chosen by [`FailurePolicy`]:
//! - `CollectAll` (default): wait for every item, return one result per item.
//! - `FailFast(Cancel)`: return the first item error and cancel the rest.
//! - `FailFast(LetFinish)`: return the first item error; remaining items keep
//!   running detached until their own terminal state.

use std::future::Future;
use std::sync::Arc;

use futures_util::{stream::FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::{CancelToken, Client, Payload, RequestConfig, RequestError, Result};

/// What a fail-fast batch does with items still in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AbortStrategy {
    /// Cancel remaining items; they unwind with [`RequestError::Cancelled`].
    #[default]
    Cancel,
    /// Leave remaining items running; their results are discarded.
    LetFinish,
}

/// How per-item results are aggregated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    CollectAll,
    FailFast(AbortStrategy),
}

/// Configuration for batch requests.
#[derive(Clone, Debug, Default)]
pub struct BatchOptions {
    pub failure_policy: FailurePolicy,
    /// Maximum number of items in flight; unbounded when unset.
    pub max_concurrency: Option<usize>,
}

impl BatchOptions {
    pub fn fail_fast(strategy: AbortStrategy) -> Self {
        Self {
            failure_policy: FailurePolicy::FailFast(strategy),
            ..Self::default()
        }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}

/// Cancels the batch if its future is dropped before completing.
struct CancelOnDrop {
    token: CancelToken,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.token.cancel();
        }
    }
}

pub(crate) async fn execute_many<R, F, Fut>(
    client: &Client,
    targets: Vec<String>,
    config: &RequestConfig,
    payloads: Option<Vec<Payload>>,
    options: &BatchOptions,
    run: F,
) -> Result<Vec<Result<R>>>
where
    R: Send + 'static,
    F: Fn(Client, String, RequestConfig, Option<Payload>) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    if let Some(payloads) = &payloads {
        if payloads.len() != targets.len() {
            return Err(RequestError::InvalidConfig(format!(
                "number of targets ({}) and payloads ({}) must be the same",
                targets.len(),
                payloads.len()
            )));
        }
    }
    if options.max_concurrency == Some(0) {
        return Err(RequestError::InvalidConfig(
            "batch max_concurrency must be at least 1".to_owned(),
        ));
    }

    let total = targets.len();
    let batch_token = config
        .cancel_token
        .as_ref()
        .map_or_else(CancelToken::new, CancelToken::child_token);
    let mut guard = CancelOnDrop {
        token: batch_token.clone(),
        armed: true,
    };
    let limit = options.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));

    #[cfg(feature = "tracing")]
    tracing::debug!(items = total, policy = ?options.failure_policy, "batch started");

    let mut payloads = payloads.map(Vec::into_iter);
    let pending = FuturesUnordered::new();
    for (index, target) in targets.into_iter().enumerate() {
        let payload = payloads.as_mut().and_then(Iterator::next);
        let item_token = batch_token.child_token();
        let mut item_config = config.clone();
        item_config.cancel_token = Some(item_token.clone());

        let task = run(client.clone(), target, item_config, payload);
        let limit = limit.clone();
        let handle = tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => tokio::select! {
                    biased;
                    _ = item_token.cancelled() => return Err(RequestError::Cancelled),
                    permit = semaphore.acquire_owned() => permit.ok(),
                },
                None => None,
            };
            task.await
        });
        pending.push(async move { (index, handle.await) });
    }

    let mut slots: Vec<Option<Result<R>>> = (0..total).map(|_| None).collect();
    let mut pending = pending;
    while let Some((index, joined)) = pending.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(RequestError::Cancelled),
        };

        match (options.failure_policy, result) {
            (FailurePolicy::FailFast(strategy), Err(err)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(index, error = %err, ?strategy, "batch aborted by item failure");

                if strategy == AbortStrategy::LetFinish {
                    guard.armed = false;
                }
                return Err(err);
            }
            (_, result) => slots[index] = Some(result),
        }
    }
    guard.armed = false;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        items = total,
        failed = slots.iter().filter(|slot| matches!(slot, Some(Err(_)))).count(),
        "batch finished"
    );

    Ok(slots
        .into_iter()
        .map(|slot| slot.unwrap_or(Err(RequestError::Cancelled)))
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    use super::{execute_many, AbortStrategy, BatchOptions};
    use crate::{Client, Payload, RequestConfig, RequestError};

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    fn latency(target: &str) -> Duration {
        match target {
            "slow" => Duration::from_millis(300),
            "medium" => Duration::from_millis(200),
            _ => Duration::from_millis(100),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_follow_input_order() {
        let results = execute_many(
            &Client::new(),
            targets(&["slow", "fast", "medium", "fast"]),
            &RequestConfig::default(),
            None,
            &BatchOptions::default(),
            |_, target, _, _| async move {
                tokio::time::sleep(latency(&target)).await;
                Ok(target)
            },
        )
        .await
        .expect("batch must run");

        let names: Vec<_> = results
            .into_iter()
            .map(|result| result.expect("item must succeed"))
            .collect();
        assert_eq!(names, ["slow", "fast", "medium", "fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn item_failures_stay_isolated() {
        let results = execute_many(
            &Client::new(),
            targets(&["ok", "bad", "ok"]),
            &RequestConfig::default(),
            None,
            &BatchOptions::default(),
            |_, target, _, _| async move {
                if target == "bad" {
                    Err(RequestError::Decode("bad item".to_owned()))
                } else {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(target)
                }
            },
        )
        .await
        .expect("batch must run");

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(RequestError::Decode(_))));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn payload_count_must_match_targets() {
        let err = execute_many(
            &Client::new(),
            targets(&["a", "b"]),
            &RequestConfig::default(),
            Some(vec![Payload::Empty]),
            &BatchOptions::default(),
            |_, target, _, _| async move { Ok(target) },
        )
        .await
        .expect_err("must reject");
        assert!(matches!(err, RequestError::InvalidConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn payloads_are_paired_by_position() {
        let results = execute_many(
            &Client::new(),
            targets(&["a", "b"]),
            &RequestConfig::default(),
            Some(vec![Payload::form([("k", "1")]), Payload::form([("k", "2")])]),
            &BatchOptions::default(),
            |_, target, _, payload| async move {
                match payload {
                    Some(Payload::Form(fields)) => Ok(format!("{target}={}", fields[0].1)),
                    _ => Err(RequestError::InvalidConfig("missing payload".to_owned())),
                }
            },
        )
        .await
        .expect("batch must run");

        assert_eq!(results[0].as_deref().ok(), Some("a=1"));
        assert_eq!(results[1].as_deref().ok(), Some("b=2"));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_cancels_siblings() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let observed = cancelled.clone();

        let err = execute_many(
            &Client::new(),
            targets(&["bad", "slow", "slow"]),
            &RequestConfig::default(),
            None,
            &BatchOptions::fail_fast(AbortStrategy::Cancel),
            move |_, target, config: RequestConfig, _| {
                let observed = observed.clone();
                async move {
                    if target == "bad" {
                        return Err(RequestError::Decode("bad item".to_owned()));
                    }
                    let token = config.cancel_token.expect("batch assigns a token");
                    tokio::select! {
                        _ = token.cancelled() => {
                            observed.fetch_add(1, Ordering::SeqCst);
                            Err(RequestError::Cancelled)
                        }
                        _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(target),
                    }
                }
            },
        )
        .await
        .expect_err("batch must fail fast");

        assert!(matches!(err, RequestError::Decode(_)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_let_finish_keeps_siblings_running() {
        let finished = Arc::new(AtomicUsize::new(0));
        let observed = finished.clone();

        let err = execute_many(
            &Client::new(),
            targets(&["bad", "slow"]),
            &RequestConfig::default(),
            None,
            &BatchOptions::fail_fast(AbortStrategy::LetFinish),
            move |_, target, _, _| {
                let observed = observed.clone();
                async move {
                    if target == "bad" {
                        return Err(RequestError::Decode("bad item".to_owned()));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok(target)
                }
            },
        )
        .await
        .expect_err("batch must fail fast");

        assert!(matches!(err, RequestError::Decode(_)));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn max_concurrency_bounds_in_flight_items() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (counter, high_water) = (in_flight.clone(), peak.clone());

        let results = execute_many(
            &Client::new(),
            targets(&["a", "b", "c", "d", "e"]),
            &RequestConfig::default(),
            None,
            &BatchOptions::default().with_max_concurrency(2),
            move |_, target, _, _| {
                let (counter, high_water) = (counter.clone(), high_water.clone());
                async move {
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                    Ok(target)
                }
            },
        )
        .await
        .expect("batch must run");

        assert_eq!(results.len(), 5);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn items_get_independent_cancel_tokens() {
        let results = execute_many(
            &Client::new(),
            targets(&["self-cancel", "other"]),
            &RequestConfig::default(),
            None,
            &BatchOptions::default(),
            |_, target, config: RequestConfig, _| async move {
                let token = config.cancel_token.expect("batch assigns a token");
                if target == "self-cancel" {
                    token.cancel();
                    return Err(RequestError::Cancelled);
                }
                tokio::task::yield_now().await;
                if token.is_cancelled() {
                    Err(RequestError::Cancelled)
                } else {
                    Ok(target)
                }
            },
        )
        .await
        .expect("batch must run");

        assert!(matches!(results[0], Err(RequestError::Cancelled)));
        assert_eq!(results[1].as_deref().ok(), Some("other"));
    }
}
