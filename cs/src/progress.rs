//! Chain progress model
//!
//! Pure, serializable value type tracking per-step and per-task completion
//! and retry state. No I/O; every transition returns a new value, so a
//! caller can persist the previous snapshot until the new one is durable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::ChainId;

/// Progress of a chain through its steps
///
/// Invariants:
/// - `completed_steps` is sorted and unique
/// - a step index in `completed_steps` never appears as a key in
///   `completed_tasks_in_steps`
/// - values of `completed_tasks_in_steps` are sorted, unique, and proper
///   subsets of the step's task set
/// - `retry_count` only increases (retries are counted per chain)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainProgress {
    /// Chain this progress belongs to
    pub chain_id: ChainId,
    /// Total number of steps in the chain definition
    pub total_steps: u32,
    /// Fully completed step indices, sorted and unique
    #[serde(default)]
    pub completed_steps: Vec<u32>,
    /// Per-task completion for steps not yet fully complete.
    ///
    /// Decoders reading snapshots written before this field existed default
    /// it to empty rather than fail.
    #[serde(default)]
    pub completed_tasks_in_steps: BTreeMap<u32, Vec<u32>>,
    /// Step index of the most recent failure, cleared on step completion
    #[serde(default)]
    pub last_failed_step: Option<u32>,
    /// Failures recorded so far, per chain
    #[serde(default)]
    pub retry_count: u32,
    /// Ceiling after which the chain is permanently failed
    pub max_retries: u32,
}

impl ChainProgress {
    /// Fresh progress for a chain with `total_steps` steps
    pub fn new(chain_id: impl Into<ChainId>, total_steps: u32, max_retries: u32) -> Self {
        Self {
            chain_id: chain_id.into(),
            total_steps,
            completed_steps: Vec::new(),
            completed_tasks_in_steps: BTreeMap::new(),
            last_failed_step: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Record step `step` as fully complete
    ///
    /// Idempotent. Clears `last_failed_step` and any per-task bookkeeping
    /// for the step.
    pub fn with_completed_step(mut self, step: u32) -> Self {
        if let Err(pos) = self.completed_steps.binary_search(&step) {
            self.completed_steps.insert(pos, step);
        }
        self.completed_tasks_in_steps.remove(&step);
        self.last_failed_step = None;
        self
    }

    /// Record one parallel task's success without completing the step
    ///
    /// Idempotent. Enables retrying only the tasks that did not previously
    /// succeed. No-op for steps already fully complete.
    pub fn with_completed_task_in_step(mut self, step: u32, task: u32) -> Self {
        if self.completed_steps.binary_search(&step).is_ok() {
            return self;
        }
        let tasks = self.completed_tasks_in_steps.entry(step).or_default();
        if let Err(pos) = tasks.binary_search(&task) {
            tasks.insert(pos, task);
        }
        self
    }

    /// Record a failure at `step`
    ///
    /// Increments the per-chain retry count and remembers the failed step.
    /// Previously recorded per-task successes are kept.
    pub fn with_failure(mut self, step: u32) -> Self {
        self.retry_count += 1;
        self.last_failed_step = Some(step);
        self
    }

    /// First step index not yet complete, or `None` when the chain is done
    pub fn next_step_index(&self) -> Option<u32> {
        (0..self.total_steps).find(|i| self.completed_steps.binary_search(i).is_err())
    }

    /// Whether `task` within `step` has already been recorded complete
    pub fn is_task_in_step_completed(&self, step: u32, task: u32) -> bool {
        if self.completed_steps.binary_search(&step).is_ok() {
            return true;
        }
        self.completed_tasks_in_steps
            .get(&step)
            .is_some_and(|tasks| tasks.binary_search(&task).is_ok())
    }

    /// Whether every step is complete
    pub fn is_complete(&self) -> bool {
        self.next_step_index().is_none()
    }

    /// Whether the chain has used up its retry budget
    pub fn has_exceeded_retries(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Completed steps as a percentage; 100 for empty chains
    pub fn completion_percentage(&self) -> u32 {
        if self.total_steps == 0 {
            return 100;
        }
        self.completed_steps.len() as u32 * 100 / self.total_steps
    }
}
