//! Multi-consumer broadcast.
//!
//! [`tee`] forwards every source element to every sink and moves at the pace
//! of the slowest consumer. [`buffered_tee`] lets each consumer fall up to
//! `lag_bound` elements behind before it stalls the source:
//!
//! - one shared buffer holds the newest `max(lag)` elements
//! - a consumer with lag `L` still owes the last `L` buffered elements
//! - a consumer at the bound receives its oldest owed element with a blocking
//!   send before the next element is admitted
//! - between elements, lagging consumers are caught up without blocking
//!
//! When the source ends, each consumer's owed suffix is drained concurrently
//! and every sink is closed by dropping it. Consumers whose receiver is gone
//! are removed from the broadcast; once none remain the source is no longer
//! read.

use std::collections::VecDeque;

use futures::future::{self, join_all, select_all};
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use weave_core::{ConfigValidation, TeeConfig, WeaveResult};

/// Counters reported by a finished broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeeStats {
    /// Elements read from the source
    pub forwarded: u64,
    /// Blocking deliveries to consumers that hit the lag bound
    pub forced_deliveries: u64,
    /// Largest shared buffer length observed
    pub peak_buffered: usize,
    /// Largest lag any consumer reached
    pub peak_lag: usize,
    /// Consumers removed because their receiver was dropped
    pub consumers_dropped: usize,
}

/// Forward every element of `source` to every sink, in sink order.
///
/// Each send blocks until that sink has room, so the slowest consumer sets
/// the pace for all of them.
pub async fn tee<T, S>(source: S, sinks: Vec<mpsc::Sender<T>>) -> TeeStats
where
    T: Clone,
    S: Stream<Item = T>,
{
    let mut source = std::pin::pin!(source);
    let mut sinks = sinks;
    let mut stats = TeeStats::default();

    while !sinks.is_empty() {
        let Some(item) = source.next().await else {
            break;
        };
        stats.forwarded += 1;

        let mut open = Vec::with_capacity(sinks.len());
        for sink in sinks {
            if sink.send(item.clone()).await.is_ok() {
                open.push(sink);
            } else {
                stats.consumers_dropped += 1;
                tracing::debug!(forwarded = stats.forwarded, "Tee consumer dropped");
            }
        }
        sinks = open;
    }

    tracing::debug!(?stats, "Tee finished");
    stats
}

/// Forward every element of `source` to every sink, letting each consumer
/// fall at most `lag_bound` elements behind.
///
/// A `lag_bound` of 0 allows no lag at all and behaves like [`tee`].
pub async fn buffered_tee<T, S>(lag_bound: usize, source: S, sinks: Vec<mpsc::Sender<T>>) -> TeeStats
where
    T: Clone,
    S: Stream<Item = T>,
{
    if lag_bound == 0 {
        return tee(source, sinks).await;
    }

    let mut source = std::pin::pin!(source);
    let mut state = LagState::new(lag_bound, sinks);

    loop {
        state.catch_up();
        if state.all_gone() {
            tracing::debug!("All tee consumers dropped; releasing source");
            break;
        }

        let next = tokio::select! {
            biased;
            next = source.next() => next,
            _ = wait_for_capacity(&state.consumers) => continue,
        };
        match next {
            Some(item) => state.admit(item).await,
            None => break,
        }
    }

    state.drain().await
}

/// Broadcast `source` into `n` fresh channels from a spawned task.
///
/// Must be called from within a tokio runtime. Channels are created with
/// `config.sink_capacity`; `config.lag_bound` is not used.
pub fn tee_n<T, S>(
    source: S,
    n: usize,
    config: &TeeConfig,
) -> WeaveResult<(Vec<mpsc::Receiver<T>>, JoinHandle<TeeStats>)>
where
    T: Clone + Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    config.validate()?;
    let (sinks, receivers) = sink_channels(n, config.sink_capacity);
    let handle = tokio::spawn(tee(source, sinks));
    Ok((receivers, handle))
}

/// Bounded-lag broadcast of `source` into `n` fresh channels from a spawned
/// task.
///
/// Must be called from within a tokio runtime.
pub fn buffered_tee_n<T, S>(
    source: S,
    n: usize,
    config: &TeeConfig,
) -> WeaveResult<(Vec<mpsc::Receiver<T>>, JoinHandle<TeeStats>)>
where
    T: Clone + Send + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    config.validate()?;
    let (sinks, receivers) = sink_channels(n, config.sink_capacity);
    let handle = tokio::spawn(buffered_tee(config.lag_bound, source, sinks));
    Ok((receivers, handle))
}

fn sink_channels<T>(n: usize, capacity: usize) -> (Vec<mpsc::Sender<T>>, Vec<mpsc::Receiver<T>>) {
    (0..n).map(|_| mpsc::channel(capacity)).unzip()
}

/// Outcome of a non-blocking delivery attempt.
enum Offer {
    Sent,
    Full,
    Closed,
}

/// Deliver `item()` to `sink` if it has room right now.
fn offer<T>(sink: &mpsc::Sender<T>, item: impl FnOnce() -> Option<T>) -> Offer {
    match sink.try_reserve() {
        Ok(permit) => {
            if let Some(item) = item() {
                permit.send(item);
            }
            Offer::Sent
        }
        Err(TrySendError::Full(())) => Offer::Full,
        Err(TrySendError::Closed(())) => Offer::Closed,
    }
}

/// One broadcast consumer. `sink` is `None` once the receiver is gone.
struct Consumer<T> {
    sink: Option<mpsc::Sender<T>>,
    lag: usize,
}

/// Buffer and lag bookkeeping, owned by the coordinating task alone.
struct LagState<T> {
    bound: usize,
    buffer: VecDeque<T>,
    consumers: Vec<Consumer<T>>,
    stats: TeeStats,
}

impl<T: Clone> LagState<T> {
    fn new(bound: usize, sinks: Vec<mpsc::Sender<T>>) -> Self {
        Self {
            bound,
            buffer: VecDeque::with_capacity(bound),
            consumers: sinks
                .into_iter()
                .map(|sink| Consumer {
                    sink: Some(sink),
                    lag: 0,
                })
                .collect(),
            stats: TeeStats::default(),
        }
    }

    fn all_gone(&self) -> bool {
        self.consumers.iter().all(|consumer| consumer.sink.is_none())
    }

    /// Oldest element `lag` consumers still owe.
    fn owed(&self, lag: usize) -> Option<T> {
        let index = self.buffer.len().checked_sub(lag)?;
        self.buffer.get(index).cloned()
    }

    /// Deliver owed elements to lagging consumers until each would block.
    fn catch_up(&mut self) {
        for index in 0..self.consumers.len() {
            while self.consumers[index].lag > 0 {
                let lag = self.consumers[index].lag;
                let Some(sink) = self.consumers[index].sink.as_ref() else {
                    break;
                };
                match offer(sink, || self.owed(lag)) {
                    Offer::Sent => self.consumers[index].lag -= 1,
                    Offer::Full => break,
                    Offer::Closed => self.drop_consumer(index),
                }
            }
        }
        self.trim();
    }

    /// Hand a new source element to every consumer.
    async fn admit(&mut self, item: T) {
        self.stats.forwarded += 1;

        for index in 0..self.consumers.len() {
            if self.consumers[index].sink.is_none() {
                continue;
            }

            if self.consumers[index].lag == self.bound {
                self.force_oldest(index).await;
            }

            let consumer = &mut self.consumers[index];
            if consumer.lag > 0 {
                consumer.lag += 1;
                continue;
            }
            let offered = match consumer.sink.as_ref() {
                Some(sink) => offer(sink, || Some(item.clone())),
                None => continue,
            };
            match offered {
                Offer::Sent => {}
                Offer::Full => self.consumers[index].lag = 1,
                Offer::Closed => self.drop_consumer(index),
            }
        }

        if self.max_lag() > 0 {
            self.buffer.push_back(item);
        }
        self.trim();
    }

    /// Blocking delivery of the oldest owed element to a consumer at the bound.
    async fn force_oldest(&mut self, index: usize) {
        let lag = self.consumers[index].lag;
        let (Some(sink), Some(item)) = (self.consumers[index].sink.clone(), self.owed(lag)) else {
            return;
        };
        self.stats.forced_deliveries += 1;
        tracing::trace!(consumer = index, lag, "Forcing delivery to consumer at lag bound");
        if sink.send(item).await.is_ok() {
            self.consumers[index].lag -= 1;
        } else {
            self.drop_consumer(index);
        }
    }

    fn drop_consumer(&mut self, index: usize) {
        let consumer = &mut self.consumers[index];
        consumer.sink = None;
        consumer.lag = 0;
        self.stats.consumers_dropped += 1;
        tracing::debug!(consumer = index, "Tee consumer dropped");
    }

    fn max_lag(&self) -> usize {
        self.consumers
            .iter()
            .map(|consumer| consumer.lag)
            .max()
            .unwrap_or(0)
    }

    /// Keep only the elements some consumer still owes.
    fn trim(&mut self) {
        let max_lag = self.max_lag();
        let excess = self.buffer.len().saturating_sub(max_lag);
        self.buffer.drain(..excess);
        self.stats.peak_lag = self.stats.peak_lag.max(max_lag);
        self.stats.peak_buffered = self.stats.peak_buffered.max(self.buffer.len());
    }

    /// Deliver every consumer's owed suffix concurrently, then close all sinks.
    async fn drain(self) -> TeeStats {
        let Self {
            buffer,
            consumers,
            mut stats,
            ..
        } = self;

        let deliveries = consumers.into_iter().filter_map(|consumer| {
            let sink = consumer.sink?;
            let start = buffer.len().saturating_sub(consumer.lag);
            let owed: Vec<T> = buffer.iter().skip(start).cloned().collect();
            Some(async move {
                for item in owed {
                    if sink.send(item).await.is_err() {
                        return false;
                    }
                }
                true
            })
        });
        let dropped_while_draining = join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| !delivered)
            .count();
        stats.consumers_dropped += dropped_while_draining;

        tracing::debug!(?stats, "Buffered tee finished");
        stats
    }
}

/// Resolves once some lagging consumer has room (or has gone away).
async fn wait_for_capacity<T>(consumers: &[Consumer<T>]) {
    let waiting: Vec<_> = consumers
        .iter()
        .filter(|consumer| consumer.lag > 0)
        .filter_map(|consumer| consumer.sink.as_ref())
        .map(|sink| Box::pin(sink.reserve()))
        .collect();
    if waiting.is_empty() {
        future::pending::<()>().await;
    } else {
        select_all(waiting).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn sinks<T>(n: usize, capacity: usize) -> (Vec<mpsc::Sender<T>>, Vec<mpsc::Receiver<T>>) {
        sink_channels(n, capacity)
    }

    #[tokio::test]
    async fn test_simple_tee_delivers_everything() {
        let (txs, rxs) = sinks(3, 8);
        let stats = tee(stream::iter(1..=5), txs).await;
        assert_eq!(stats.forwarded, 5);
        for rx in rxs {
            assert_eq!(weave_testkit::collect_receiver(rx).await, vec![1, 2, 3, 4, 5]);
        }
    }

    #[tokio::test]
    async fn test_simple_tee_removes_closed_sink() {
        let (txs, mut rxs) = sinks(2, 8);
        drop(rxs.remove(1));
        let stats = tee(stream::iter(1..=3), txs).await;
        assert_eq!(stats.consumers_dropped, 1);
        assert_eq!(
            weave_testkit::collect_receiver(rxs.remove(0)).await,
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_buffered_tee_absorbs_lag_without_readers() {
        // Nobody reads until the broadcast finishes: with capacity 1 and a
        // bound of 4, each consumer takes one element into its channel and
        // owes the rest from the shared buffer.
        let (txs, rxs) = sinks(2, 1);
        let handle = tokio::spawn(buffered_tee(4, stream::iter(1..=4), txs));
        tokio::task::yield_now().await;

        let mut outputs = Vec::new();
        for rx in rxs {
            outputs.push(weave_testkit::collect_receiver(rx));
        }
        let outputs = join_all(outputs).await;
        let stats = handle.await.expect("tee task");

        for output in outputs {
            assert_eq!(output, vec![1, 2, 3, 4]);
        }
        assert!(stats.peak_lag <= 4);
        assert_eq!(stats.forwarded, 4);
    }

    #[tokio::test]
    async fn test_zero_bound_falls_back_to_simple_tee() {
        let (txs, rxs) = sinks(2, 4);
        let stats = buffered_tee(0, stream::iter(vec!['a', 'b']), txs).await;
        assert_eq!(stats.peak_buffered, 0);
        for rx in rxs {
            assert_eq!(weave_testkit::collect_receiver(rx).await, vec!['a', 'b']);
        }
    }

    #[tokio::test]
    async fn test_buffered_tee_stops_when_all_consumers_gone() {
        let (txs, rxs) = sinks::<u32>(2, 1);
        drop(rxs);
        let stats = buffered_tee(3, stream::iter(0..), txs).await;
        assert_eq!(stats.consumers_dropped, 2);
        assert!(stats.forwarded <= 1);
    }

    #[tokio::test]
    async fn test_count_variant_rejects_invalid_config() {
        let config = TeeConfig::default().with_sink_capacity(0);
        let result = tee_n(stream::iter(vec![1u8]), 2, &config);
        assert!(result.is_err());
    }
}
