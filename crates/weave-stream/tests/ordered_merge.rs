//! Ordered Merge Tests
//!
//! Output must be non-decreasing, must contain every input element exactly
//! once, and stopping early must release every source.

use std::time::Duration;

use futures::StreamExt;
use proptest::prelude::*;
use tokio::sync::mpsc;
use weave_stream::{merge_ordered, merge_ordered_channels, merge_ordered_streams, Cursor};
use weave_testkit::DropCounter;

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn interleaved_sources_merge_in_order() {
    let merged: Vec<u32> = merge_ordered(vec![
        Cursor::buffered(vec![0, 2, 4, 6, 8]),
        Cursor::pull(vec![1, 3, 5, 7, 9]),
        Cursor::buffered(vec![3, 6, 9]),
    ])
    .collect();
    assert_eq!(merged, vec![0, 1, 2, 3, 3, 4, 5, 6, 6, 7, 8, 9, 9]);
}

proptest! {
    #[test]
    fn merge_is_sorted_permutation(
        mut sources in prop::collection::vec(prop::collection::vec(-50i32..50, 0..20), 0..6)
    ) {
        for source in &mut sources {
            source.sort_unstable();
        }
        let mut expected: Vec<i32> = sources.iter().flatten().copied().collect();
        expected.sort_unstable();

        let merged: Vec<i32> = merge_ordered(sources).collect();
        prop_assert_eq!(merged, expected);
    }
}

#[tokio::test]
async fn channel_sources_merge_in_order() {
    weave_testkit::init_tracing();

    let mut receivers = Vec::new();
    for (start, step) in [(0u64, 3u64), (1, 3), (2, 3)] {
        let (tx, rx) = mpsc::channel(2);
        tokio::spawn(async move {
            for value in (0..10).map(|i| start + i * step) {
                if tx.send(value).await.is_err() {
                    return;
                }
            }
        });
        receivers.push(rx);
    }

    let merged = weave_testkit::collect_receiver(merge_ordered_channels(receivers, 4)).await;
    assert_eq!(merged, (0..30).collect::<Vec<_>>());
}

#[tokio::test]
async fn slow_stream_source_holds_back_output() {
    let (slow_tx, slow_rx) = mpsc::channel(1);
    let fast = futures::stream::iter(vec![2, 4, 6]).boxed();
    let slow = tokio_stream::wrappers::ReceiverStream::new(slow_rx).boxed();
    let mut merged = merge_ordered_streams(vec![fast, slow]);

    // Nothing can be emitted while the slow source has not produced a head.
    let early = tokio::time::timeout(Duration::from_millis(20), merged.next()).await;
    assert!(early.is_err());

    slow_tx.send(1).await.expect("merge holds the receiver");
    drop(slow_tx);
    assert_eq!(merged.next().await, Some(1));
    assert_eq!(merged.collect::<Vec<_>>().await, vec![2, 4, 6]);
}

// ============================================================================
// Early termination
// ============================================================================

#[test]
fn stopping_early_releases_every_source() {
    let counter = DropCounter::new();
    let merge = merge_ordered(vec![
        Cursor::pull(counter.track(0u64..)),
        Cursor::pull(counter.track((0u64..).map(|n| n * 2))),
        Cursor::pull(counter.track((0u64..).map(|n| n * 5))),
    ]);

    let first: Vec<u64> = merge.take(6).collect();
    assert_eq!(first, vec![0, 0, 0, 1, 2, 2]);
    assert_eq!(counter.dropped(), 3);
}

#[test]
fn exhausted_sources_are_released_before_the_merge_ends() {
    let counter = DropCounter::new();
    let mut merge = merge_ordered(vec![
        Cursor::pull(counter.track(vec![1u8].into_iter())),
        Cursor::pull(counter.track(vec![2u8, 3, 4].into_iter())),
    ]);

    assert_eq!(merge.next(), Some(1));
    assert_eq!(merge.next(), Some(2));
    assert_eq!(counter.dropped(), 1);
    assert_eq!(merge.live_sources(), 1);
}

#[tokio::test]
async fn dropping_merged_channel_releases_inputs() {
    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = mpsc::channel::<u32>(4);
        senders.push(tx);
        receivers.push(rx);
    }

    let merged = merge_ordered_channels(receivers, 1);
    drop(merged);

    for tx in senders {
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("input receiver dropped after output is gone");
    }
}
