//! Collaborator traits consumed by the executor
//!
//! The executor never owns transport or business logic; it is handed a
//! worker-lookup collaborator at construction (explicitly, never as ambient
//! global state) and an optional continuation scheduler for the host.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ExecError;

/// Result of executing one task
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// The task succeeded, optionally producing opaque output
    Success { output: Option<Value> },
    /// The task failed; folded into the chain's retry bookkeeping
    Failure { reason: String },
}

impl WorkerOutcome {
    /// Success with no output
    pub fn ok() -> Self {
        Self::Success { output: None }
    }

    /// Failure with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failure { reason: reason.into() }
    }

    /// Whether this outcome is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Performs one unit of work
///
/// May be arbitrarily slow; the executor never assumes latency bounded
/// tighter than its remaining budget and races every execution against the
/// activation deadline.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute with opaque input and optional execution constraints
    async fn execute(&self, input: &Value, constraints: Option<&Value>) -> WorkerOutcome;
}

/// Resolves a worker identifier to an executable instance
///
/// Returns `None` for unknown identifiers rather than raising an error; the
/// executor treats an unresolvable worker as a task failure.
pub trait WorkerResolver: Send + Sync {
    fn resolve(&self, worker: &str) -> Option<Arc<dyn Worker>>;
}

/// Host hook for requesting a future activation
///
/// Invoked only after progress has been persisted, so a failing hook can
/// never corrupt already-durable state.
pub trait ContinuationScheduler: Send + Sync {
    fn request_continuation(&self) -> Result<(), ExecError>;
}
