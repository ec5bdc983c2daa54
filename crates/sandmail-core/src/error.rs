//! Error types for the delivery core.

use thiserror::Error;

use crate::stream::StreamState;

/// Errors from stream state machine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Invalid state transition attempted
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidTransition {
        /// Current state when error occurred
        state: StreamState,
        /// Operation that was attempted
        operation: &'static str,
    },
}

impl StreamError {
    pub(crate) fn invalid(state: StreamState, operation: &'static str) -> Self {
        Self::InvalidTransition { state, operation }
    }
}
