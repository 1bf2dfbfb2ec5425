#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
//! # Weave Fan-Out
//!
//! Two ways to run many keyed computations concurrently under one
//! concurrency cap and one shared cancellation token:
//!
//! - [`compute_all`]: collect every result into a key→value map, or fail with
//!   the first error
//! - [`reduce_all`]: fold results into an accumulator as they arrive, or fail
//!   with the first error
//!
//! plus [`compute`] / [`compute_blocking`] for a single computation.
//!
//! Both fan-out entry points fire a group token derived from the caller's
//! token on the first failure. Cancellation is cooperative: computations are
//! expected to check the token they are handed (see
//! [`CancelToken::check`](weave_core::CancelToken::check) and
//! [`CancelToken::run_until_cancelled`](weave_core::CancelToken::run_until_cancelled)).
//! A computation that never checks keeps running after the group fires and
//! delays the final result.

pub mod compute;
pub mod fan_out;
pub mod reducer;
mod worker;

pub use compute::{compute, compute_blocking};
pub use fan_out::compute_all;
pub use reducer::reduce_all;

pub use weave_core::{CancelToken, FanOutConfig, Promise, ReducerConfig, WeaveError, WeaveResult};
