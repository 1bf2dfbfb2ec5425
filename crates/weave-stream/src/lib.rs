#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
//! # Weave Stream
//!
//! Streaming building blocks over iterators, async streams and tokio
//! channels:
//!
//! - [`merge_ordered`] / [`merge_ordered_streams`]: k-way merge of
//!   non-decreasing sources into one non-decreasing sequence
//! - [`tee`] / [`buffered_tee`]: broadcast one source to many consumers,
//!   either in lock-step or with a bounded per-consumer lag
//! - [`tee_iter`]: the pull-based counterpart of `tee` for plain iterators
//! - [`channels`]: small pipeline stages over `mpsc` channels
//!
//! Sources signal the end of data by finishing; none of these primitives
//! models a failing source.

pub mod channels;
pub mod merge;
pub mod tee;
pub mod tee_iter;

pub use merge::{
    merge_ordered, merge_ordered_channels, merge_ordered_streams, Cursor, MergeOrdered,
    MergeOrderedStream,
};
pub use tee::{buffered_tee, buffered_tee_n, tee, tee_n, TeeStats};
pub use tee_iter::{tee_iter, TeeIter};
pub use weave_core::{CancelToken, TeeConfig, WeaveError, WeaveResult};
