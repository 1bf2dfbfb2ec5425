//! Cooperative cancellation tokens.
//!
//! A [`CancelToken`] is a shared, one-way signal. Computations poll it at
//! their own yield points; nothing is ever interrupted preemptively. Once
//! fired a token stays fired.
//!
//! Tokens form a tree: a child fires when it is cancelled directly or when any
//! ancestor fires, while cancelling a child leaves its parent untouched. Fan-out
//! entry points use this to scope "first error cancels the group" to a single
//! call without cancelling the caller's token.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;

use crate::errors::{WeaveError, WeaveResult};

/// Shared, irreversible, cooperative cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<TokenNode>,
}

#[derive(Debug)]
struct TokenNode {
    cancelled_tx: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    /// Create a root token that only fires when cancelled directly.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelToken>) -> Self {
        let (cancelled_tx, _cancelled_rx) = watch::channel(false);
        Self {
            inner: Arc::new(TokenNode {
                cancelled_tx,
                parent,
            }),
        }
    }

    /// Derive a child token that also fires whenever this token fires.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Derive a child token that fires on its own after `deadline` elapses.
    ///
    /// Must be called from within a tokio runtime. The timer runs as a
    /// background task holding only a weak handle to the child; it exits
    /// early once the child fires or every handle to the child is dropped.
    pub fn child_with_deadline(&self, deadline: Duration) -> Self {
        let child = self.child();
        let node = Arc::downgrade(&child.inner);
        let mut own_rx = child.inner.cancelled_tx.subscribe();
        let parent = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    if let Some(inner) = node.upgrade() {
                        tracing::debug!(?deadline, "Cancellation deadline reached");
                        CancelToken { inner }.cancel();
                    }
                }
                // Errors out once the child's sender is dropped.
                _ = own_rx.wait_for(|cancelled| *cancelled).map(drop) => {}
                _ = parent.cancelled() => {}
            }
        });
        child
    }

    /// Fire the token.
    ///
    /// Returns `true` if this call performed the transition; later calls are
    /// no-ops that return `false`.
    pub fn cancel(&self) -> bool {
        self.inner.cancelled_tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    /// Non-blocking cancellation check, including ancestors.
    pub fn is_cancelled(&self) -> bool {
        if *self.inner.cancelled_tx.borrow() {
            return true;
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    /// Return `Err(WeaveError::Cancelled)` if the token has fired.
    pub fn check(&self) -> WeaveResult<()> {
        if self.is_cancelled() {
            Err(WeaveError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once this token or any ancestor fires.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        let this = self.clone();
        async move {
            let mut cancelled_rx = this.inner.cancelled_tx.subscribe();
            // The sender lives as long as `this`, so this only completes once
            // the flag flips.
            let fired = cancelled_rx.wait_for(|cancelled| *cancelled).map(drop);
            match this.inner.parent.clone() {
                None => fired.await,
                Some(parent) => {
                    tokio::select! {
                        _ = fired => {}
                        _ = parent.cancelled() => {}
                    }
                }
            }
        }
        .boxed()
    }

    /// Drive `fut` until it completes or the token fires, whichever is first.
    ///
    /// A future abandoned this way is dropped at its current await point.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> WeaveResult<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(WeaveError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(WeaveError::Cancelled),
            output = fut => Ok(output),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
