//! Keyed Fan-Out Tests
//!
//! Covers the result map, first-error semantics, cancellation of siblings,
//! the concurrency cap and duplicate key handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use weave_core::DuplicateKeyPolicy;
use weave_fanout::{compute_all, CancelToken, FanOutConfig, WeaveError};

fn expected_lengths() -> HashMap<&'static str, usize> {
    [("a", 1), ("ab", 2), ("abc", 3), ("abcd", 4)]
        .into_iter()
        .collect()
}

// ============================================================================
// Success paths
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_success_yields_one_entry_per_key() {
    weave_testkit::init_tracing();

    let promise = compute_all(
        &CancelToken::new(),
        ["a", "ab", "abc", "abcd"],
        |token, key: &'static str| async move {
            token.check()?;
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, WeaveError>(key.len())
        },
        FanOutConfig::default(),
    );

    assert_eq!(promise.get().await, Ok(expected_lengths()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn result_is_independent_of_completion_order() {
    let keys: Vec<u64> = (0..32).collect();
    let delays = weave_testkit::jittered_delays(keys.len(), 15, 7);

    let promise = compute_all(
        &CancelToken::new(),
        keys.clone(),
        move |_, key: u64| {
            let delay = delays[key as usize];
            async move {
                tokio::time::sleep(delay).await;
                Ok(key * key)
            }
        },
        FanOutConfig::default(),
    );

    let result = promise.get().await.expect("all computations succeed");
    assert_eq!(result.len(), keys.len());
    for key in keys {
        assert_eq!(result.get(&key), Some(&(key * key)));
    }
}

#[tokio::test]
async fn done_signal_fires_once_all_complete() {
    let release = Arc::new(Notify::new());
    let promise = compute_all(
        &CancelToken::new(),
        ["a", "ab", "abc", "abcd"],
        {
            let release = Arc::clone(&release);
            move |token: CancelToken, key: &'static str| {
                let release = Arc::clone(&release);
                async move {
                    tokio::select! {
                        _ = token.cancelled() => Err(WeaveError::Cancelled),
                        _ = release.notified() => Ok(key.len()),
                    }
                }
            }
        },
        FanOutConfig::default(),
    );

    tokio::select! {
        _ = promise.done() => panic!("fan-out should wait for its workers"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }
    assert!(!promise.is_ready());

    release.notify_waiters();
    tokio::time::timeout(Duration::from_secs(1), promise.done())
        .await
        .expect("fan-out completes after release");
    assert_eq!(promise.get().await, Ok(expected_lengths()));
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_failure_returns_that_error() {
    let promise = compute_all(
        &CancelToken::new(),
        1..=20u32,
        |_, key| async move {
            if key == 13 {
                Err(WeaveError::computation("unlucky"))
            } else {
                Ok(key)
            }
        },
        FanOutConfig::default(),
    );

    assert_eq!(promise.get().await, Err(WeaveError::computation("unlucky")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_failure_cancels_siblings() {
    let observed_cancel = Arc::new(AtomicUsize::new(0));

    let promise = compute_all(
        &CancelToken::new(),
        0..8u32,
        {
            let observed_cancel = Arc::clone(&observed_cancel);
            move |token: CancelToken, key| {
                let observed_cancel = Arc::clone(&observed_cancel);
                async move {
                    if key == 0 {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        return Err::<u32, _>(WeaveError::computation("first"));
                    }
                    token.cancelled().await;
                    observed_cancel.fetch_add(1, Ordering::SeqCst);
                    Err(WeaveError::Cancelled)
                }
            }
        },
        FanOutConfig::default(),
    );

    let result = tokio::time::timeout(Duration::from_secs(2), promise.get())
        .await
        .expect("siblings observe cancellation and stop");
    assert_eq!(result, Err(WeaveError::computation("first")));
    assert_eq!(observed_cancel.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn caller_token_is_not_cancelled_by_group_failure() {
    let caller = CancelToken::new();
    let promise = compute_all(
        &caller,
        [1, 2],
        |_, _key: i32| async { Err::<(), _>(WeaveError::computation("nope")) },
        FanOutConfig::default(),
    );

    assert!(promise.get().await.is_err());
    assert!(!caller.is_cancelled());
}

#[tokio::test]
async fn caller_cancellation_surfaces_as_cancelled() {
    let caller = CancelToken::new();
    let promise = compute_all(
        &caller,
        0..4u8,
        |token: CancelToken, key| async move {
            token.run_until_cancelled(futures::future::pending::<()>()).await?;
            Ok::<_, WeaveError>(key)
        },
        FanOutConfig::default(),
    );

    tokio::time::sleep(Duration::from_millis(5)).await;
    caller.cancel();
    assert_eq!(promise.get().await, Err(WeaveError::Cancelled));
}

#[tokio::test]
async fn panicking_computation_fails_the_fan_out() {
    let promise = compute_all(
        &CancelToken::new(),
        [1u8, 2, 3],
        |_, key| async move {
            if key == 2 {
                panic!("worker two exploded");
            }
            Ok(key)
        },
        FanOutConfig::default(),
    );

    assert_eq!(
        promise.get().await,
        Err(WeaveError::Panicked {
            message: "worker two exploded".to_string()
        })
    );
}

// ============================================================================
// Concurrency cap
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_cap_is_respected() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let promise = compute_all(
        &CancelToken::new(),
        0..24u32,
        {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            move |_, key| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(key)
                }
            }
        },
        FanOutConfig::default().with_concurrency(3),
    );

    let result = promise.get().await.expect("all computations succeed");
    assert_eq!(result.len(), 24);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

// ============================================================================
// Duplicate keys
// ============================================================================

/// Key that compares by name only, so two entries can collide while still
/// telling the computation which position it came from.
#[derive(Debug, Clone, Copy)]
struct Tagged {
    name: &'static str,
    position: usize,
}

impl PartialEq for Tagged {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Tagged {}

impl std::hash::Hash for Tagged {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_keys_last_wins_by_default() {
    let keys = ["x", "y", "x"]
        .into_iter()
        .enumerate()
        .map(|(position, name)| Tagged { name, position });

    let promise = compute_all(
        &CancelToken::new(),
        keys,
        |_, key: Tagged| async move { Ok(key.position) },
        FanOutConfig::default(),
    );

    let result = promise.get().await.expect("all computations succeed");
    assert_eq!(result.len(), 2);
    let x = Tagged {
        name: "x",
        position: 0,
    };
    assert_eq!(result.get(&x), Some(&2));
}

#[tokio::test]
async fn duplicate_keys_rejected_when_configured() {
    let calls = Arc::new(AtomicUsize::new(0));
    let promise = compute_all(
        &CancelToken::new(),
        ["x", "y", "x"],
        {
            let calls = Arc::clone(&calls);
            move |_, key: &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(key) }
            }
        },
        FanOutConfig::default().with_duplicate_keys(DuplicateKeyPolicy::Reject),
    );

    assert!(matches!(
        promise.get().await,
        Err(WeaveError::Invalid { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
