//! Order-preserving k-way merge.
//!
//! Every source must already be non-decreasing. The merge keeps one pulled
//! element per live source in a min-heap keyed by `(element, source index)`,
//! emits the minimum, and refills from the source that produced it. Output is
//! non-decreasing, and equal elements come out in source-index order.
//!
//! Two front ends share the algorithm:
//!
//! - [`merge_ordered`] over [`Cursor`]s, a synchronous pull interface that
//!   covers both in-memory buffers and live iterators
//! - [`merge_ordered_streams`] over async [`Stream`]s, e.g. channel receivers
//!
//! Dropping a merge before it is exhausted drops every source it still holds.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Heap entry: the pulled element and the source it came from.
///
/// Field order matters: the derived `Ord` compares the element first and
/// breaks ties on the source index.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Head<T> {
    value: T,
    source: usize,
}

/// Pull state for one merge source.
pub enum Cursor<T> {
    /// A finite, in-memory sequence
    Buffered(std::vec::IntoIter<T>),
    /// A live source pulled on demand
    Pull(Box<dyn Iterator<Item = T> + Send>),
}

impl<T> Cursor<T> {
    /// Cursor over an in-memory sequence.
    pub fn buffered(items: Vec<T>) -> Self {
        Self::Buffered(items.into_iter())
    }

    /// Cursor over any iterator.
    pub fn pull<I>(source: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self::Pull(Box::new(source.into_iter()))
    }

    fn exhausted() -> Self {
        Self::Buffered(Vec::new().into_iter())
    }

    /// Next element, or `None` once the source is exhausted.
    pub fn pull_next(&mut self) -> Option<T> {
        match self {
            Self::Buffered(items) => items.next(),
            Self::Pull(source) => source.next(),
        }
    }
}

impl<T> From<Vec<T>> for Cursor<T> {
    fn from(items: Vec<T>) -> Self {
        Self::buffered(items)
    }
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(items) => f.debug_tuple("Buffered").field(&items.len()).finish(),
            Self::Pull(_) => f.write_str("Pull(..)"),
        }
    }
}

/// Merge non-decreasing cursors into one non-decreasing iterator.
///
/// Sources are not touched until the first call to `next`.
pub fn merge_ordered<T, I>(sources: I) -> MergeOrdered<T>
where
    T: Ord,
    I: IntoIterator,
    I::Item: Into<Cursor<T>>,
{
    MergeOrdered {
        cursors: sources.into_iter().map(Into::into).collect(),
        heap: BinaryHeap::new(),
        primed: false,
    }
}

/// Iterator returned by [`merge_ordered`].
///
/// After priming, a source is live exactly while its head sits in the heap,
/// so the heap length doubles as the live-source count.
#[derive(Debug)]
pub struct MergeOrdered<T: Ord> {
    cursors: Vec<Cursor<T>>,
    heap: BinaryHeap<Reverse<Head<T>>>,
    primed: bool,
}

impl<T: Ord> MergeOrdered<T> {
    /// Number of sources that have not reported exhaustion yet.
    pub fn live_sources(&self) -> usize {
        if self.primed {
            self.heap.len()
        } else {
            self.cursors.len()
        }
    }

    fn prime(&mut self) {
        self.primed = true;
        for source in 0..self.cursors.len() {
            self.refill(source);
        }
    }

    /// Pull the next element of `source` into the heap, releasing the source
    /// once it runs dry.
    fn refill(&mut self, source: usize) {
        let Some(cursor) = self.cursors.get_mut(source) else {
            return;
        };
        match cursor.pull_next() {
            Some(value) => self.heap.push(Reverse(Head { value, source })),
            None => *cursor = Cursor::exhausted(),
        }
    }
}

impl<T: Ord> Iterator for MergeOrdered<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if !self.primed {
            self.prime();
        }
        let Reverse(Head { value, source }) = self.heap.pop()?;
        self.refill(source);
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.primed {
            (self.heap.len(), None)
        } else {
            (0, None)
        }
    }
}

/// Merge non-decreasing async streams into one non-decreasing stream.
///
/// The merge cannot emit until every live source has either produced its
/// next element or finished, so a slow source delays the whole output.
pub fn merge_ordered_streams<S, I>(sources: I) -> MergeOrderedStream<S>
where
    I: IntoIterator<Item = S>,
    S: Stream + Unpin,
    S::Item: Ord,
{
    let sources: Vec<Option<S>> = sources.into_iter().map(Some).collect();
    MergeOrderedStream {
        awaiting: (0..sources.len()).collect(),
        sources,
        heap: BinaryHeap::new(),
    }
}

/// Merge channel receivers into a new receiver fed by a background task.
///
/// The task stops, dropping every input receiver, as soon as the returned
/// receiver is dropped. A `capacity` of 0 is treated as 1.
pub fn merge_ordered_channels<T>(
    receivers: Vec<mpsc::Receiver<T>>,
    capacity: usize,
) -> mpsc::Receiver<T>
where
    T: Ord + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let sources = receivers.into_iter().map(ReceiverStream::new);
    tokio::spawn(async move {
        let mut merged = merge_ordered_streams(sources);
        loop {
            let next = tokio::select! {
                _ = out_tx.closed() => None,
                next = merged.next() => next,
            };
            let Some(item) = next else {
                break;
            };
            if out_tx.send(item).await.is_err() {
                break;
            }
        }
        tracing::debug!(
            live_sources = merged.live_sources(),
            "Ordered channel merge stopped"
        );
    });
    out_rx
}

/// Stream returned by [`merge_ordered_streams`].
#[must_use = "streams do nothing unless polled"]
pub struct MergeOrderedStream<S: Stream> {
    sources: Vec<Option<S>>,
    heap: BinaryHeap<Reverse<Head<S::Item>>>,
    /// Sources whose next element must be pulled before anything is emitted.
    awaiting: Vec<usize>,
}

impl<S: Stream> MergeOrderedStream<S> {
    /// Number of sources that have not finished yet.
    pub fn live_sources(&self) -> usize {
        self.sources.iter().filter(|source| source.is_some()).count()
    }
}

impl<S: Stream + Unpin> Unpin for MergeOrderedStream<S> {}

impl<S> Stream for MergeOrderedStream<S>
where
    S: Stream + Unpin,
    S::Item: Ord,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let mut i = 0;
        while i < this.awaiting.len() {
            let source = this.awaiting[i];
            let Some(stream) = this.sources.get_mut(source).and_then(Option::as_mut) else {
                this.awaiting.swap_remove(i);
                continue;
            };
            match Pin::new(stream).poll_next(cx) {
                Poll::Ready(Some(value)) => {
                    this.heap.push(Reverse(Head { value, source }));
                    this.awaiting.swap_remove(i);
                }
                Poll::Ready(None) => {
                    if let Some(slot) = this.sources.get_mut(source) {
                        *slot = None;
                    }
                    this.awaiting.swap_remove(i);
                }
                Poll::Pending => i += 1,
            }
        }

        if !this.awaiting.is_empty() {
            return Poll::Pending;
        }

        match this.heap.pop() {
            Some(Reverse(Head { value, source })) => {
                this.awaiting.push(source);
                Poll::Ready(Some(value))
            }
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.heap.len(), None)
    }
}

impl<S> FusedStream for MergeOrderedStream<S>
where
    S: Stream + Unpin,
    S::Item: Ord,
{
    fn is_terminated(&self) -> bool {
        self.awaiting.is_empty() && self.heap.is_empty()
    }
}

impl<S: Stream> fmt::Debug for MergeOrderedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeOrderedStream")
            .field("sources", &self.sources.len())
            .field("buffered", &self.heap.len())
            .field("awaiting", &self.awaiting.len())
            .finish()
    }
}
