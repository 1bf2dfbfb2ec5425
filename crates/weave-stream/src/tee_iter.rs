//! Pull-based tee for plain iterators.
//!
//! [`tee_iter`] splits one iterator into `n` independent readers. Elements
//! pulled by the fastest reader are kept in a shared buffer until the slowest
//! reader has seen them. The source is dropped as soon as every reader is.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Split `source` into `n` iterators that each yield the full sequence.
pub fn tee_iter<I>(source: I, n: usize) -> Vec<TeeIter<I>>
where
    I: Iterator,
    I::Item: Clone,
{
    let shared = Arc::new(Mutex::new(Shared {
        source: Some(source),
        buffer: VecDeque::new(),
        base: 0,
        positions: vec![Some(0); n],
    }));
    (0..n)
        .map(|reader| TeeIter {
            shared: Arc::clone(&shared),
            reader,
        })
        .collect()
}

struct Shared<I: Iterator> {
    /// `None` once exhausted or once every reader is gone.
    source: Option<I>,
    buffer: VecDeque<I::Item>,
    /// Absolute position of `buffer[0]`.
    base: usize,
    /// Next absolute position per reader; `None` for dropped readers.
    positions: Vec<Option<usize>>,
}

impl<I> Shared<I>
where
    I: Iterator,
    I::Item: Clone,
{
    fn next_for(&mut self, reader: usize) -> Option<I::Item> {
        let position = self.positions.get(reader).copied().flatten()?;
        let offset = position - self.base;

        let item = match self.buffer.get(offset) {
            Some(item) => item.clone(),
            None => {
                let item = self.pull()?;
                self.buffer.push_back(item.clone());
                item
            }
        };

        self.positions[reader] = Some(position + 1);
        self.trim();
        Some(item)
    }

    fn pull(&mut self) -> Option<I::Item> {
        let item = self.source.as_mut()?.next();
        if item.is_none() {
            self.source = None;
        }
        item
    }
}

impl<I: Iterator> Shared<I> {
    /// Drop buffered elements every live reader has already passed.
    fn trim(&mut self) {
        let Some(slowest) = self.positions.iter().flatten().min().copied() else {
            return;
        };
        while self.base < slowest && self.buffer.pop_front().is_some() {
            self.base += 1;
        }
    }

    fn release(&mut self, reader: usize) {
        if let Some(position) = self.positions.get_mut(reader) {
            *position = None;
        }
        if self.positions.iter().all(Option::is_none) {
            self.source = None;
            self.buffer.clear();
        } else {
            self.trim();
        }
    }
}

/// One reader returned by [`tee_iter`].
pub struct TeeIter<I: Iterator> {
    shared: Arc<Mutex<Shared<I>>>,
    reader: usize,
}

impl<I: Iterator> TeeIter<I> {
    /// Elements held for slower readers.
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len()
    }
}

impl<I> Iterator for TeeIter<I>
where
    I: Iterator,
    I::Item: Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.shared.lock().next_for(self.reader)
    }
}

impl<I: Iterator> Drop for TeeIter<I> {
    fn drop(&mut self) {
        self.shared.lock().release(self.reader);
    }
}

impl<I: Iterator> std::fmt::Debug for TeeIter<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeeIter")
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}
