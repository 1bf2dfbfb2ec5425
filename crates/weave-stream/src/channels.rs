//! Channel pipeline stages.
//!
//! Each stage spawns a task that reads one `mpsc::Receiver`, writes to a
//! fresh bounded channel and returns that channel's receiver. The output
//! closes when the input closes. A stage whose output receiver is dropped
//! stops and drops its input, even while it is idle waiting for input, so
//! shutting down the tail of a pipeline winds down every stage before it.
//!
//! Stage constructors must be called from within a tokio runtime. A capacity
//! of 0 is treated as 1.
//!
//! Terminal helpers (`reduce`, `collect`, `tail`, `find`, ...) consume a
//! receiver directly.

use std::collections::VecDeque;
use std::future::Future;

use tokio::sync::mpsc;
use weave_core::{CancelToken, WeaveError, WeaveResult};

fn channel<T>(capacity: usize) -> (mpsc::Sender<T>, mpsc::Receiver<T>) {
    mpsc::channel(capacity.max(1))
}

/// Spawn a stage body that writes into a fresh channel.
fn stage<T, F, Fut>(capacity: usize, body: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnOnce(mpsc::Sender<T>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = channel(capacity);
    tokio::spawn(body(tx));
    rx
}

/// Next input element, or `None` once the input closes or nobody reads the
/// output any more.
async fn next_input<T, U>(input: &mut mpsc::Receiver<T>, output: &mpsc::Sender<U>) -> Option<T> {
    tokio::select! {
        biased;
        _ = output.closed() => None,
        item = input.recv() => item,
    }
}

/// Emit every element of `items`.
pub fn from_iter<T, I>(capacity: usize, items: I) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let items = items.into_iter();
    stage(capacity, |tx| async move {
        for item in items {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    })
}

/// Emit `initial`, then `f(0, &initial)`, then `f(1, &that)`, and so on
/// until `token` is cancelled or the receiver is dropped.
pub fn generate<T, F>(token: &CancelToken, capacity: usize, initial: T, mut f: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnMut(usize, &T) -> T + Send + 'static,
{
    let token = token.clone();
    stage(capacity, |tx| async move {
        let mut current = initial;
        for index in 0.. {
            if token.is_cancelled() {
                break;
            }
            let next = f(index, &current);
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                sent = tx.send(current) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
            current = next;
        }
        tracing::trace!("Generator stopped");
    })
}

/// Like [`generate`], but stops at the first value for which `keep_going`
/// returns false.
pub fn generate_while<T, F, C>(
    capacity: usize,
    initial: T,
    mut f: F,
    mut keep_going: C,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnMut(usize, &T) -> T + Send + 'static,
    C: FnMut(usize, &T) -> bool + Send + 'static,
{
    stage(capacity, |tx| async move {
        let mut current = initial;
        let mut index = 0;
        while keep_going(index, &current) {
            let next = f(index, &current);
            if tx.send(current).await.is_err() {
                return;
            }
            current = next;
            index += 1;
        }
    })
}

/// Re-buffer `input` through a channel of `capacity`.
pub fn buffered<T>(capacity: usize, mut input: mpsc::Receiver<T>) -> mpsc::Receiver<T>
where
    T: Send + 'static,
{
    stage(capacity, |tx| async move {
        while let Some(item) = next_input(&mut input, &tx).await {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    })
}

/// Apply `f(index, item)` to every element.
pub fn map<T, V, F>(capacity: usize, mut input: mpsc::Receiver<T>, mut f: F) -> mpsc::Receiver<V>
where
    T: Send + 'static,
    V: Send + 'static,
    F: FnMut(usize, T) -> V + Send + 'static,
{
    stage(capacity, |tx| async move {
        let mut index = 0;
        while let Some(item) = next_input(&mut input, &tx).await {
            if tx.send(f(index, item)).await.is_err() {
                return;
            }
            index += 1;
        }
    })
}

/// Keep the elements for which `keep(index, &item)` holds. Indices count
/// every input element, kept or not.
pub fn filter<T, F>(capacity: usize, mut input: mpsc::Receiver<T>, mut keep: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnMut(usize, &T) -> bool + Send + 'static,
{
    stage(capacity, |tx| async move {
        let mut index = 0;
        while let Some(item) = next_input(&mut input, &tx).await {
            if keep(index, &item) && tx.send(item).await.is_err() {
                return;
            }
            index += 1;
        }
    })
}

/// Forward elements until the first one failing `pred`, then close.
pub fn take_while<T, F>(capacity: usize, mut input: mpsc::Receiver<T>, mut pred: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnMut(usize, &T) -> bool + Send + 'static,
{
    stage(capacity, |tx| async move {
        let mut index = 0;
        while let Some(item) = next_input(&mut input, &tx).await {
            if !pred(index, &item) || tx.send(item).await.is_err() {
                return;
            }
            index += 1;
        }
    })
}

/// Skip elements while `pred` holds, then forward the rest unconditionally.
pub fn drop_while<T, F>(capacity: usize, mut input: mpsc::Receiver<T>, mut pred: F) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    F: FnMut(usize, &T) -> bool + Send + 'static,
{
    stage(capacity, |tx| async move {
        let mut index = 0;
        let mut dropping = true;
        while let Some(item) = next_input(&mut input, &tx).await {
            if dropping && pred(index, &item) {
                index += 1;
                continue;
            }
            dropping = false;
            if tx.send(item).await.is_err() {
                return;
            }
        }
    })
}

/// Fold the whole channel into one value.
pub async fn reduce<T, A, F>(mut input: mpsc::Receiver<T>, initial: A, mut f: F) -> A
where
    F: FnMut(A, T) -> A,
{
    let mut acc = initial;
    while let Some(item) = input.recv().await {
        acc = f(acc, item);
    }
    acc
}

/// Fold the channel, giving up with [`WeaveError::Cancelled`] once `token`
/// fires.
pub async fn reduce_cancellable<T, A, F>(
    token: &CancelToken,
    mut input: mpsc::Receiver<T>,
    initial: A,
    mut f: F,
) -> WeaveResult<A>
where
    F: FnMut(A, T) -> A,
{
    let mut acc = initial;
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(WeaveError::Cancelled),
            next = input.recv() => next,
        };
        match next {
            Some(item) => acc = f(acc, item),
            None => return Ok(acc),
        }
    }
}

/// Read the whole channel into a vector.
pub async fn collect<T>(input: mpsc::Receiver<T>) -> Vec<T> {
    reduce(input, Vec::new(), |mut items, item| {
        items.push(item);
        items
    })
    .await
}

/// The last `n` elements of the channel, oldest first.
pub async fn tail<T>(mut input: mpsc::Receiver<T>, n: usize) -> Vec<T> {
    let mut window = VecDeque::with_capacity(n);
    while let Some(item) = input.recv().await {
        if n == 0 {
            continue;
        }
        if window.len() == n {
            window.pop_front();
        }
        window.push_back(item);
    }
    window.into()
}

/// The first element matching `pred`. Stops reading as soon as it is found.
pub async fn find<T, F>(mut input: mpsc::Receiver<T>, mut pred: F) -> Option<T>
where
    F: FnMut(&T) -> bool,
{
    while let Some(item) = input.recv().await {
        if pred(&item) {
            return Some(item);
        }
    }
    None
}

/// The last element matching `pred`. Reads the channel to the end.
pub async fn find_last<T, F>(input: mpsc::Receiver<T>, mut pred: F) -> Option<T>
where
    F: FnMut(&T) -> bool,
{
    reduce(input, None, |found, item| if pred(&item) { Some(item) } else { found }).await
}
