//! Unified error type for weave operations
//!
//! Every primitive in the workspace reports failures through [`WeaveError`].
//! Worker computations return it directly, so the error a caller reads from a
//! promise is exactly the one the failing computation produced.

use serde::{Deserialize, Serialize};

/// Unified error type for all weave operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum WeaveError {
    /// A caller-supplied computation failed
    #[error("Computation failed: {message}")]
    Computation {
        /// Error message describing the failure
        message: String,
    },

    /// The shared cancellation token fired before the work completed
    #[error("Cancelled")]
    Cancelled,

    /// A worker panicked while running its computation
    #[error("Worker panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text, when it was a string
        message: String,
    },

    /// A promise was resolved a second time
    #[error("Promise already resolved")]
    AlreadyResolved,

    /// The resolver was dropped without ever resolving its promise
    #[error("Promise abandoned before resolution")]
    Abandoned,

    /// Invalid input or configuration
    #[error("Invalid: {message}")]
    Invalid {
        /// Error message describing the invalid input
        message: String,
    },
}

impl WeaveError {
    /// Create a computation error
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Create a panic error from a `catch_unwind` payload
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }

    /// Whether this error only reports that work was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error signals a contract violation rather than a runtime failure
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::AlreadyResolved | Self::Abandoned)
    }
}

/// Standard result type for weave operations
pub type WeaveResult<T> = Result<T, WeaveError>;
