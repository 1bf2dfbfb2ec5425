//! Bounded keyed fan-out.
//!
//! [`compute_all`] runs one computation per key, at most `concurrency` at a
//! time, and settles a single promise with either the complete key→value map
//! or the first error any computation reported.
//!
//! All computations share one group token derived from the caller's token. The
//! first failure fires the group; siblings notice on their next cancellation
//! check and their (cancellation) errors are discarded. Only the first error
//! surfaces.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use weave_core::{
    CancelToken, ConfigValidation, DuplicateKeyPolicy, FanOutConfig, Promise, Resolver,
    WeaveError, WeaveResult,
};

use crate::worker::run_keyed;

/// Run `f` for every key and collect the results into a map.
///
/// Must be called from within a tokio runtime. The returned promise settles
/// once every spawned computation has finished, so no work outlives the call
/// except through computations that ignore their token.
pub fn compute_all<K, V, F, Fut>(
    token: &CancelToken,
    keys: impl IntoIterator<Item = K>,
    f: F,
    config: FanOutConfig,
) -> Promise<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    F: Fn(CancelToken, K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WeaveResult<V>> + Send + 'static,
{
    if let Err(err) = config.validate() {
        return Promise::ready(Err(err));
    }

    let keys: Vec<K> = keys.into_iter().collect();
    if config.duplicate_keys == DuplicateKeyPolicy::Reject {
        if let Some(position) = first_duplicate(&keys) {
            return Promise::ready(Err(WeaveError::invalid(format!(
                "duplicate key at position {position}"
            ))));
        }
    }

    let concurrency = config.effective_concurrency(keys.len());
    tracing::debug!(keys = keys.len(), concurrency, "Starting keyed fan-out");

    let (resolver, promise) = Promise::pending();
    let group = token.child();
    let permits = Arc::new(Semaphore::new(concurrency));
    let f = Arc::new(f);

    let mut workers = JoinSet::new();
    for (index, key) in keys.iter().cloned().enumerate() {
        let f = Arc::clone(&f);
        let group = group.clone();
        let permits = Arc::clone(&permits);
        workers.spawn(async move {
            let (result, _permit) = run_keyed(&*f, &group, &permits, key).await;
            (index, result)
        });
    }

    tokio::spawn(collect_results(resolver, workers, keys, group));
    promise
}

/// Join every worker, keep the first error, and fold successes into the map.
///
/// Results land in an index-aligned slot vector owned by this task alone, so
/// workers never contend on the output.
async fn collect_results<K, V>(
    resolver: Resolver<HashMap<K, V>>,
    mut workers: JoinSet<(usize, WeaveResult<V>)>,
    keys: Vec<K>,
    group: CancelToken,
) where
    K: Eq + Hash,
    V: Send + 'static,
{
    let mut slots: Vec<Option<V>> = std::iter::repeat_with(|| None).take(keys.len()).collect();
    let mut first_error: Option<WeaveError> = None;

    while let Some(joined) = workers.join_next().await {
        let error = match joined {
            Ok((index, Ok(value))) => {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(value);
                }
                continue;
            }
            Ok((_, Err(error))) => error,
            Err(join_error) => worker_failure(join_error),
        };

        if first_error.is_none() {
            tracing::debug!(%error, "Fan-out computation failed; cancelling group");
            group.cancel();
            first_error = Some(error);
        } else {
            tracing::trace!(%error, "Discarding error after first failure");
        }
    }

    let result = match first_error {
        Some(error) => Err(error),
        None => Ok(keys
            .into_iter()
            .zip(slots)
            .filter_map(|(key, slot)| slot.map(|value| (key, value)))
            .collect()),
    };
    tracing::debug!(ok = result.is_ok(), "Keyed fan-out finished");
    let _ = resolver.resolve(result);
}

fn worker_failure(join_error: JoinError) -> WeaveError {
    if join_error.is_panic() {
        WeaveError::from_panic(join_error.into_panic().as_ref())
    } else {
        WeaveError::Cancelled
    }
}

fn first_duplicate<K: Eq + Hash>(keys: &[K]) -> Option<usize> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().position(|key| !seen.insert(key))
}
