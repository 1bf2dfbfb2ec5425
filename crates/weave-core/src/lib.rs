#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
//! # Weave Core
//!
//! Foundation types shared by every weave primitive:
//!
//! - [`Promise`] / [`Resolver`]: a write-once, read-many result cell with a
//!   readiness signal
//! - [`CancelToken`]: a shared, irreversible, cooperative cancellation signal
//! - [`WeaveError`]: the unified error type
//! - Configuration structs for fan-out, reduction and broadcast
//!
//! ## Design Principles
//!
//! - **Single writer**: a promise has exactly one resolver; readers only
//!   observe the result after readiness fires
//! - **Cooperative cancellation**: nothing is interrupted preemptively;
//!   computations poll their token
//! - **Loud misuse**: resolving twice is reported, never silently applied

pub mod cancel;
pub mod config;
pub mod errors;
pub mod promise;

pub use cancel::CancelToken;
pub use config::{
    ConfigValidation, DuplicateKeyPolicy, FanOutConfig, ReducerConfig, TeeConfig, WeaveConfig,
    WeaveSettings,
};
pub use errors::{WeaveError, WeaveResult};
pub use promise::{Promise, Resolver};
