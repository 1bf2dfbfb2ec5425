//! Per-key worker body shared by fan-out and reduction.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::{Semaphore, SemaphorePermit};
use weave_core::{CancelToken, WeaveError, WeaveResult};

/// Run one keyed computation under the shared concurrency cap.
///
/// Waiting for a permit is abandoned as soon as the group fires, and a worker
/// that gets its permit after cancellation never starts its computation.
/// Panics inside the computation are reported as [`WeaveError::Panicked`].
///
/// The permit comes back with the result. A caller that still has to hand
/// the result on keeps it until then, so finished-but-undelivered results
/// count against the cap.
pub(crate) async fn run_keyed<'a, K, V, F, Fut>(
    f: &F,
    group: &CancelToken,
    permits: &'a Semaphore,
    key: K,
) -> (WeaveResult<V>, Option<SemaphorePermit<'a>>)
where
    F: Fn(CancelToken, K) -> Fut,
    Fut: Future<Output = WeaveResult<V>>,
{
    let permit = tokio::select! {
        biased;
        _ = group.cancelled() => return (Err(WeaveError::Cancelled), None),
        permit = permits.acquire() => match permit {
            Ok(permit) => permit,
            Err(_) => return (Err(WeaveError::Cancelled), None),
        },
    };
    if let Err(err) = group.check() {
        return (Err(err), Some(permit));
    }

    let result = AssertUnwindSafe(async { f(group.clone(), key).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(WeaveError::from_panic(payload.as_ref())));
    (result, Some(permit))
}
