//! Shared test helpers for weave crates.
//!
//! Kept free of weave dependencies so every crate can pull it in as a
//! dev-dependency without cycles.

#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

static TRACING: Once = Once::new();

/// Install a fmt subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic pseudo-random delays in `0..=max_ms` milliseconds.
pub fn jittered_delays(count: usize, max_ms: u64, seed: u64) -> Vec<Duration> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| Duration::from_millis(rng.gen_range(0..=max_ms)))
        .collect()
}

/// Read a channel to completion.
pub async fn collect_receiver<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Some(item) = rx.recv().await {
        out.push(item);
    }
    out
}

/// Read a channel to completion, pausing `delay` before each receive.
pub async fn collect_slowly<T>(mut rx: mpsc::Receiver<T>, delay: Duration) -> Vec<T> {
    let mut out = Vec::new();
    loop {
        tokio::time::sleep(delay).await;
        match rx.recv().await {
            Some(item) => out.push(item),
            None => return out,
        }
    }
}

/// Counts how many tracked sources have been dropped.
#[derive(Debug, Clone, Default)]
pub struct DropCounter {
    dropped: Arc<AtomicUsize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Wrap a value so dropping it bumps this counter.
    pub fn track<T>(&self, inner: T) -> Tracked<T> {
        Tracked {
            inner,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// A value whose drop is recorded by a [`DropCounter`].
///
/// Forwards `Iterator` and `Stream` to the wrapped value.
#[derive(Debug)]
pub struct Tracked<T> {
    inner: T,
    dropped: Arc<AtomicUsize>,
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl<I: Iterator> Iterator for Tracked<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<S: futures::Stream + Unpin> futures::Stream for Tracked<S> {
    type Item = S::Item;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}
