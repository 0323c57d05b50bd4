//! Chain domain types
//!
//! Pure value types shared by the queue, the persistence layer, and the
//! executor. A chain is an ordered list of steps; a step holds one
//! (sequential) or several (parallel) tasks; a task is a worker reference
//! plus opaque input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique identifier for a chain, supplied by the caller
pub type ChainId = String;

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The smallest unit of work: a worker reference plus opaque input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Worker identifier, resolved by the executor's lookup collaborator
    pub worker: String,
    /// Opaque input handed to the worker
    pub input: Value,
    /// Optional execution constraints, opaque to the storage layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
}

impl Task {
    /// Create a task with no constraints
    pub fn new(worker: impl Into<String>, input: Value) -> Self {
        Self {
            worker: worker.into(),
            input,
            constraints: None,
        }
    }

    /// Attach execution constraints
    pub fn with_constraints(mut self, constraints: Value) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

/// One stage of a chain: a single task, or several executed in parallel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    /// Tasks in this step; more than one means parallel execution
    pub tasks: Vec<Task>,
}

impl Step {
    /// Create a sequential step holding exactly one task
    pub fn single(task: Task) -> Self {
        Self { tasks: vec![task] }
    }

    /// Create a parallel step from multiple tasks
    pub fn parallel(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    /// Whether this step fans out to parallel tasks
    pub fn is_parallel(&self) -> bool {
        self.tasks.len() > 1
    }
}

/// An ordered sequence of steps submitted as one logical unit of deferred work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chain {
    /// Caller-supplied id, unique within a store
    pub id: ChainId,
    /// Steps, executed in index order
    pub steps: Vec<Step>,
}

impl Chain {
    /// Create a new chain
    pub fn new(id: impl Into<ChainId>, steps: Vec<Step>) -> Self {
        Self { id: id.into(), steps }
    }
}

/// Marker recording that a chain was superseded before completion
///
/// An executor running the old definition observes the tombstone between
/// steps and aborts cooperatively. Tombstones are garbage-collected by the
/// maintenance sweep once older than the configured age.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tombstone {
    /// Chain that was superseded
    pub chain_id: ChainId,
    /// Unix timestamp (ms) when the tombstone was written
    pub created_at_ms: i64,
}

impl Tombstone {
    /// Create a tombstone for a chain, stamped with the current time
    pub fn new(chain_id: impl Into<ChainId>) -> Self {
        Self {
            chain_id: chain_id.into(),
            created_at_ms: now_ms(),
        }
    }

    /// Age of this tombstone in milliseconds
    pub fn age_ms(&self) -> i64 {
        now_ms() - self.created_at_ms
    }
}

/// One-off task metadata, reclaimed by the maintenance sweep once expired
///
/// Records without an explicit TTL are still aged out by the sweep once
/// older than the configured metadata age cap, so the meta directory never
/// grows without bound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMetadata {
    /// Opaque metadata payload
    pub value: Value,
    /// Unix timestamp (ms) when the record was written
    #[serde(default)]
    pub created_at_ms: i64,
    /// Unix timestamp (ms) after which the record may be reclaimed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

impl TaskMetadata {
    /// Create metadata with no explicit expiry
    pub fn new(value: Value) -> Self {
        Self {
            value,
            created_at_ms: now_ms(),
            expires_at_ms: None,
        }
    }

    /// Create metadata that expires after `ttl_ms`
    pub fn with_ttl(value: Value, ttl_ms: i64) -> Self {
        Self {
            value,
            created_at_ms: now_ms(),
            expires_at_ms: Some(now_ms() + ttl_ms),
        }
    }

    /// Whether the record has passed its explicit expiry
    pub fn is_expired(&self) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms() >= at)
    }

    /// Age of this record in milliseconds
    pub fn age_ms(&self) -> i64 {
        now_ms() - self.created_at_ms
    }
}

/// Kind of transaction-log entry written during chain replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnKind {
    /// Replacement started: tombstone and deletions follow
    ReplaceBegin,
    /// Replacement finished: new definition is durable
    ReplaceCommit,
}

/// One line of the replacement transaction log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxnEntry {
    /// Unique entry id
    pub id: String,
    /// Chain being replaced
    pub chain_id: ChainId,
    /// Entry kind
    pub kind: TxnKind,
    /// Unix timestamp (ms)
    pub at_ms: i64,
}

impl TxnEntry {
    /// Create a log entry for a chain, stamped with the current time
    pub fn new(chain_id: impl Into<ChainId>, kind: TxnKind) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            chain_id: chain_id.into(),
            kind,
            at_ms: now_ms(),
        }
    }
}
