//! Cooperative cancellation.
//!
//! A [`CancelToken`] is observed at every suspension point of a request:
//! rate-limit waits, in-flight I/O and backoff sleeps. Child tokens are
//! cancelled with their parent but never cancel the parent or siblings.

use std::future::{self, Future};
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{RequestError, Result};

/// Shareable cancellation signal.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled whenever `self` is.
    pub fn child_token(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            loop {
                let notified = self.inner.notify.notified();
                tokio::pin!(notified);
                // Register before checking the flag so a concurrent cancel is not missed.
                notified.as_mut().enable();
                if self.is_cancelled() {
                    return;
                }
                match &self.inner.parent {
                    Some(parent) => {
                        tokio::select! {
                            _ = notified => {}
                            _ = parent.cancelled() => return,
                        }
                    }
                    None => notified.await,
                }
            }
        })
    }
}

/// Cancellation token plus an absolute deadline for one top-level call.
#[derive(Clone, Debug, Default)]
pub(crate) struct Interrupt {
    token: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl Interrupt {
    pub(crate) fn new(token: Option<CancelToken>, deadline: Option<Duration>) -> Self {
        Self {
            token,
            deadline: deadline.map(|budget| Instant::now() + budget),
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.token.as_ref().is_some_and(CancelToken::is_cancelled)
            || self.deadline.is_some_and(|at| Instant::now() >= at)
    }

    /// Runs `fut` unless the token fires or the deadline passes first.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_interrupted() {
            return Err(RequestError::Cancelled);
        }

        let cancelled = async {
            match &self.token {
                Some(token) => token.cancelled().await,
                None => future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(RequestError::Cancelled),
            _ = expired => Err(RequestError::Cancelled),
            output = fut => Ok(output),
        }
    }
}
