//! ChainExec - time-budgeted executor for resumable work chains
//!
//! Drains the [`chainstore`] queue and advances each chain's progress under a
//! hard wall-clock ceiling imposed by the host. Enough state is persisted
//! before the deadline that a chain can resume exactly where it left off on
//! a later activation.
//!
//! # Core Concepts
//!
//! - **Budgeted work**: each activation gets a fraction of the host's
//!   ceiling, with an adaptive safety margin reserved for persistence
//! - **Explicit suspension**: running out of budget is not an error; the
//!   executor persists progress, re-enqueues the chain, and asks the host
//!   for a continuation
//! - **At-least-once**: a task interrupted mid-flight simply reruns on the
//!   next activation
//! - **Cooperative supersession**: a tombstoned chain aborts at the next
//!   step boundary instead of touching its replacement's files

pub mod config;
pub mod error;
pub mod executor;
pub mod worker;

pub use config::ExecutorConfig;
pub use error::ExecError;
pub use executor::{ActivationReport, ChainExecutor, ChainReport, ChainState};
pub use worker::{ContinuationScheduler, Worker, WorkerOutcome, WorkerResolver};
