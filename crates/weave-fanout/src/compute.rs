//! Single computations backed by a promise.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use weave_core::{Promise, WeaveError, WeaveResult};

/// Spawn `fut` on the current tokio runtime and return a promise for its result.
///
/// A panic inside `fut` settles the promise with [`WeaveError::Panicked`].
pub fn compute<V, Fut>(fut: Fut) -> Promise<V>
where
    V: Send + Sync + 'static,
    Fut: Future<Output = WeaveResult<V>> + Send + 'static,
{
    let (resolver, promise) = Promise::pending();
    tokio::spawn(async move {
        let result = AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(WeaveError::from_panic(payload.as_ref())));
        let _ = resolver.resolve(result);
    });
    promise
}

/// Run a blocking closure on the runtime's blocking pool and return a promise
/// for its result.
pub fn compute_blocking<V, F>(f: F) -> Promise<V>
where
    V: Send + Sync + 'static,
    F: FnOnce() -> WeaveResult<V> + Send + 'static,
{
    let (resolver, promise) = Promise::pending();
    tokio::task::spawn_blocking(move || {
        let result = std::panic::catch_unwind(AssertUnwindSafe(f))
            .unwrap_or_else(|payload| Err(WeaveError::from_panic(payload.as_ref())));
        let _ = resolver.resolve(result);
    });
    promise
}
