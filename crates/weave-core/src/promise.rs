//! Single-assignment result cells.
//!
//! A [`Promise`] is the read side of a write-once cell; the matching
//! [`Resolver`] is its only writer. The result is stored before the readiness
//! signal fires, so any reader that observed readiness sees the final value.
//!
//! There is no way to cancel a promise directly. Producers are handed a
//! [`CancelToken`](crate::CancelToken) and stop on their own when it fires.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio::sync::watch;

use crate::errors::{WeaveError, WeaveResult};

struct Shared<T> {
    slot: OnceLock<WeaveResult<T>>,
    ready_tx: watch::Sender<bool>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        let (ready_tx, _ready_rx) = watch::channel(false);
        Self {
            slot: OnceLock::new(),
            ready_tx,
        }
    }

    fn store(&self, result: WeaveResult<T>) -> bool {
        if self.slot.set(result).is_err() {
            return false;
        }
        self.ready_tx.send_replace(true);
        true
    }
}

/// Read handle for a write-once result.
///
/// Cloning a promise is cheap; every clone observes the same result.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

/// The single writer for a [`Promise`].
///
/// Dropping a resolver that never resolved settles the promise with
/// [`WeaveError::Abandoned`] so readers cannot wait forever.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    /// Create a pending promise together with its resolver.
    pub fn pending() -> (Resolver<T>, Promise<T>) {
        let shared = Arc::new(Shared::new());
        (
            Resolver {
                shared: Arc::clone(&shared),
            },
            Promise { shared },
        )
    }

    /// Create a promise that is already settled.
    pub fn ready(result: WeaveResult<T>) -> Self {
        let shared = Shared::new();
        shared.store(result);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Whether the result has been written.
    pub fn is_ready(&self) -> bool {
        self.shared.slot.get().is_some()
    }

    /// Readiness signal, for use in `tokio::select!` or other multi-way waits.
    ///
    /// The returned future owns a handle to the cell and may outlive `self`.
    pub fn done(&self) -> impl Future<Output = ()> + Send + 'static
    where
        T: Send + Sync + 'static,
    {
        let shared = Arc::clone(&self.shared);
        async move {
            let mut ready_rx = shared.ready_tx.subscribe();
            ready_rx.wait_for(|ready| *ready).map(drop).await;
        }
    }
}

impl<T: Clone> Promise<T> {
    /// Wait until the result is ready and return it.
    ///
    /// An `Err` means the producer failed; there is no meaningful value in
    /// that case.
    pub async fn get(&self) -> WeaveResult<T> {
        let mut ready_rx = self.shared.ready_tx.subscribe();
        ready_rx.wait_for(|ready| *ready).map(drop).await;
        self.read()
    }

    /// Non-blocking read; `None` while the promise is pending.
    pub fn try_get(&self) -> Option<WeaveResult<T>> {
        self.shared.slot.get().cloned()
    }

    /// Block the current thread until the result is ready.
    ///
    /// Intended for plain threads. Calling this on an async worker thread
    /// stalls that worker until the producer finishes.
    pub fn wait(&self) -> WeaveResult<T> {
        futures::executor::block_on(self.get())
    }

    fn read(&self) -> WeaveResult<T> {
        match self.shared.slot.get() {
            Some(result) => result.clone(),
            None => Err(WeaveError::Abandoned),
        }
    }
}

impl<T> Resolver<T> {
    /// Write the result and fire the readiness signal.
    ///
    /// A promise settles exactly once. Any later write is rejected with
    /// [`WeaveError::AlreadyResolved`] and the first result is kept.
    pub fn resolve(&self, result: WeaveResult<T>) -> WeaveResult<()> {
        if self.shared.store(result) {
            Ok(())
        } else {
            tracing::error!("Attempted to resolve a promise twice; keeping first result");
            Err(WeaveError::AlreadyResolved)
        }
    }

    /// Shorthand for resolving with a value.
    pub fn fulfill(&self, value: T) -> WeaveResult<()> {
        self.resolve(Ok(value))
    }

    /// Shorthand for resolving with an error.
    pub fn reject(&self, error: WeaveError) -> WeaveResult<()> {
        self.resolve(Err(error))
    }

    /// Whether a result has already been written.
    pub fn is_resolved(&self) -> bool {
        self.shared.slot.get().is_some()
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.shared.store(Err(WeaveError::Abandoned)) {
            tracing::warn!("Resolver dropped without a result; promise abandoned");
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.slot.get() {
            Some(result) => f.debug_tuple("Promise").field(result).finish(),
            None => f.write_str("Promise(<pending>)"),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
