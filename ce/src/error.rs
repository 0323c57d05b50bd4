//! Executor errors

use thiserror::Error;

/// Errors from the executor
///
/// Task failures are not errors: they fold into the chain's own retry
/// bookkeeping. Suspension on budget exhaustion is a normal transition.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Store(#[from] chainstore::StoreError),

    /// The host rejected a continuation request
    #[error("Continuation request failed: {0}")]
    Continuation(String),
}
