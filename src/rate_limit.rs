//! Token-bucket rate limiting keyed by identity.
//!
//! A [`RateLimiterRegistry`] owns one bucket per identity. It is created by
//! the application, cloned into every [`Client`](crate::Client) that should
//! share limits, and lives as long as its last clone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::{RequestError, Result};

/// Rate-limit settings for one identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimiter {
    identity: String,
    rate: u32,
    time_frame: Duration,
    max_delay: Duration,
}

impl RateLimiter {
    /// Allows `rate` requests per `time_frame` for callers sharing `identity`.
    ///
    /// The same identity can cover every endpoint of a host with a global
    /// limit; distinct identities are fully independent.
    pub fn new(identity: impl Into<String>, rate: u32, time_frame: Duration) -> Result<Self> {
        if rate == 0 {
            return Err(RequestError::InvalidConfig(
                "rate limiter rate must be positive".to_owned(),
            ));
        }
        if time_frame.is_zero() {
            return Err(RequestError::InvalidConfig(
                "rate limiter time frame must be positive".to_owned(),
            ));
        }
        Ok(Self {
            identity: identity.into(),
            rate,
            time_frame,
            max_delay: Duration::from_secs(60),
        })
    }

    /// Longest a caller waits for a token before failing.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn time_frame(&self) -> Duration {
        self.time_frame
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

/// Shared registry of token buckets.
#[derive(Clone, Debug, Default)]
pub struct RateLimiterRegistry {
    buckets: Arc<Mutex<HashMap<String, Arc<TokenBucket>>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for a token of `limiter.identity()`.
    ///
    /// Returns how long the caller waited. The bucket for an identity is
    /// created on first use; its settings come from that first limiter.
    pub async fn acquire(&self, limiter: &RateLimiter) -> Result<Duration> {
        let bucket = self.bucket(limiter);
        let wait = bucket
            .reserve()
            .ok_or_else(|| RequestError::RateLimitExceeded {
                identity: limiter.identity.clone(),
                max_delay: bucket.max_delay,
            })?;
        if wait.is_zero() {
            return Ok(wait);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(identity = %limiter.identity, ?wait, "waiting for rate limit token");

        // Dropping this future mid-wait hands the token back.
        let reservation = Reservation {
            bucket: bucket.as_ref(),
            armed: true,
        };
        tokio::time::sleep(wait).await;
        reservation.commit();
        Ok(wait)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn bucket(&self, limiter: &RateLimiter) -> Arc<TokenBucket> {
        self.lock()
            .entry(limiter.identity.clone())
            .or_insert_with(|| Arc::new(TokenBucket::new(limiter)))
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<TokenBucket>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    max_delay: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Negative while callers hold reservations for future tokens.
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(limiter: &RateLimiter) -> Self {
        let capacity = f64::from(limiter.rate);
        Self {
            capacity,
            refill_per_sec: capacity / limiter.time_frame.as_secs_f64(),
            max_delay: limiter.max_delay,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes one token, possibly on credit. Returns the wait until it is
    /// covered, or `None` when that wait exceeds `max_delay`.
    fn reserve(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        let remaining = state.tokens - 1.0;
        let wait = if remaining >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-remaining / self.refill_per_sec)
        };
        if wait > self.max_delay {
            return None;
        }
        state.tokens = remaining;
        Some(wait)
    }

    fn refund(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tokens = (state.tokens + 1.0).min(self.capacity);
    }
}

struct Reservation<'a> {
    bucket: &'a TokenBucket,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.bucket.refund();
        }
    }
}
