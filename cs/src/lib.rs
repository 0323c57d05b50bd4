//! ChainStore - crash-safe storage for resumable work chains
//!
//! Persists ordered/parallel sequences of deferred work ("chains") so they
//! survive process death and abrupt termination, and can resume exactly where
//! they left off.
//!
//! # Architecture
//!
//! ```text
//! .chainstore/
//! ├── queue.cq             # framed, CRC32-checksummed FIFO of chain ids
//! ├── queue.meta           # head pointer + counters (atomically replaced)
//! ├── chains/{id}.json     # chain definitions
//! ├── progress/{id}.json   # chain progress snapshots
//! ├── meta/{id}.json       # one-off task metadata
//! ├── tombstones/{id}.json # supersession markers
//! └── txn.log              # replacement transaction log (jsonl)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use chainstore::{Chain, ChainStore, StoreConfig, Step, Task};
//!
//! let store = ChainStore::open(".chainstore", StoreConfig::default()).await?;
//! let chain = Chain::new("sync-42", vec![Step::single(Task::new("upload", payload))]);
//! store.enqueue_chain(chain, 3).await?;
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod progress;
pub mod queue;
mod store;

pub use config::{QueueConfig, StoreConfig};
pub use domain::{Chain, ChainId, Step, Task, TaskMetadata, Tombstone, TxnEntry, TxnKind, now_ms};
pub use error::StoreError;
pub use progress::ChainProgress;
pub use queue::{DurableQueue, count_lines};
pub use store::{ChainStore, MaintenanceReport, StoreStats};

/// Magic bytes at the start of a framed queue file
pub const QUEUE_MAGIC: &[u8; 4] = b"CQ01";
