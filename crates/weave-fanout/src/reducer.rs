//! Streaming fan-in reduction.
//!
//! [`reduce_all`] runs keyed computations like [`compute_all`](crate::compute_all)
//! but folds each result into an accumulator as soon as it arrives instead of
//! collecting everything first. Workers hand results to a dedicated folding
//! task through a bounded channel; only that task ever touches the
//! accumulator, so `merge` need not be thread-safe.
//!
//! Results are folded in arrival order. Callers that need a deterministic
//! accumulator must supply an associative and commutative `merge`.
//!
//! A worker holds its concurrency permit until its result is in the handoff.
//! Results computed but not yet folded therefore never exceed the handoff
//! capacity plus the concurrency cap, however slow `merge` is.
//!
//! # Publishing after cancellation
//!
//! Once the folding task sees an error it stops draining and drops the
//! receiving half of the handoff. A worker therefore checks the group token
//! before publishing and publishes with a `select!` against cancellation, so
//! a worker blocked on a full handoff is released when the group fires rather
//! than waiting on a reader that is gone.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use weave_core::{
    CancelToken, ConfigValidation, Promise, ReducerConfig, Resolver, WeaveError, WeaveResult,
};

use crate::worker::run_keyed;

/// Run `f` for every key and fold each success into `initial` with `merge`.
///
/// Must be called from within a tokio runtime. On the first error the
/// promise settles with that error, the group token fires and any results
/// still in flight are discarded.
pub fn reduce_all<K, V, A, F, Fut, M>(
    token: &CancelToken,
    keys: impl IntoIterator<Item = K>,
    f: F,
    initial: A,
    merge: M,
    config: ReducerConfig,
) -> Promise<A>
where
    K: Send + 'static,
    V: Send + 'static,
    A: Send + Sync + 'static,
    F: Fn(CancelToken, K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WeaveResult<V>> + Send + 'static,
    M: FnMut(A, V) -> A + Send + 'static,
{
    if let Err(err) = config.validate() {
        return Promise::ready(Err(err));
    }

    let keys: Vec<K> = keys.into_iter().collect();
    let expected = keys.len();
    let concurrency = config.effective_concurrency(expected);
    tracing::debug!(
        keys = expected,
        concurrency,
        handoff_capacity = config.handoff_capacity,
        "Starting streaming reduction"
    );

    let (resolver, promise) = Promise::pending();
    let group = token.child();
    let permits = Arc::new(Semaphore::new(concurrency));
    let f = Arc::new(f);
    let (handoff_tx, handoff_rx) = mpsc::channel(config.handoff_capacity);

    for key in keys {
        let f = Arc::clone(&f);
        let group = group.clone();
        let permits = Arc::clone(&permits);
        let handoff_tx = handoff_tx.clone();
        tokio::spawn(async move {
            let (result, permit) = run_keyed(&*f, &group, &permits, key).await;
            publish(&group, &handoff_tx, result).await;
            drop(permit);
        });
    }
    drop(handoff_tx);

    tokio::spawn(fold_results(
        resolver, handoff_rx, initial, merge, group, expected,
    ));
    promise
}

/// Hand one result to the folding task unless the group already fired.
async fn publish<V>(
    group: &CancelToken,
    handoff_tx: &mpsc::Sender<WeaveResult<V>>,
    result: WeaveResult<V>,
) {
    if group.is_cancelled() {
        tracing::trace!("Group cancelled before publish; dropping result");
        return;
    }
    tokio::select! {
        biased;
        _ = group.cancelled() => {
            tracing::trace!("Group cancelled while publishing; dropping result");
        }
        sent = handoff_tx.send(result) => {
            if sent.is_err() {
                tracing::trace!("Folding task stopped draining; dropping result");
            }
        }
    }
}

/// Drain the handoff, folding successes and stopping at the first error.
async fn fold_results<V, A, M>(
    resolver: Resolver<A>,
    mut handoff_rx: mpsc::Receiver<WeaveResult<V>>,
    initial: A,
    mut merge: M,
    group: CancelToken,
    expected: usize,
) where
    M: FnMut(A, V) -> A,
{
    let mut acc = initial;
    let mut folded = 0usize;

    let outcome: WeaveResult<A> = loop {
        let next = tokio::select! {
            biased;
            next = handoff_rx.recv() => next,
            _ = group.cancelled() => break Err(WeaveError::Cancelled),
        };
        match next {
            Some(Ok(value)) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| merge(acc, value))) {
                    Ok(merged) => acc = merged,
                    Err(payload) => break Err(WeaveError::from_panic(payload.as_ref())),
                }
                folded += 1;
            }
            Some(Err(error)) => break Err(error),
            // Every worker is gone. Anything short of a full count means some
            // workers withdrew after cancellation.
            None if folded == expected => break Ok(acc),
            None => break Err(WeaveError::Cancelled),
        }
    };

    let result = match outcome {
        Ok(acc) => {
            tracing::debug!(folded, "Streaming reduction finished");
            Ok(acc)
        }
        Err(error) => {
            tracing::debug!(%error, folded, expected, "Streaming reduction failed");
            group.cancel();
            handoff_rx.close();
            drop(handoff_rx);
            Err(error)
        }
    };
    let _ = resolver.resolve(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_reduction_yields_initial() {
        let promise = reduce_all(
            &CancelToken::new(),
            Vec::<u32>::new(),
            |_, key| async move { Ok(key) },
            100u32,
            |acc, v| acc + v,
            ReducerConfig::default(),
        );
        assert_eq!(promise.get().await, Ok(100));
    }

    #[tokio::test]
    async fn test_invalid_config_settles_immediately() {
        let promise = reduce_all(
            &CancelToken::new(),
            [1u32],
            |_, key| async move { Ok(key) },
            0u32,
            |acc, v| acc + v,
            ReducerConfig::default().with_handoff_capacity(0),
        );
        assert!(matches!(
            promise.get().await,
            Err(WeaveError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_panicking_merge_is_reported() {
        let promise = reduce_all(
            &CancelToken::new(),
            [1u32, 2, 3],
            |_, key| async move { Ok(key) },
            0u32,
            |acc, v| {
                if v == 2 {
                    panic!("merge rejected 2");
                }
                acc + v
            },
            ReducerConfig::default(),
        );
        assert_eq!(
            promise.get().await,
            Err(WeaveError::Panicked {
                message: "merge rejected 2".to_string()
            })
        );
    }
}
