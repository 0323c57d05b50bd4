//! Core ChainStore implementation
//!
//! Single authority for one storage root: the durable queue, per-chain
//! definitions, per-chain progress, one-off task metadata, tombstones, and
//! the replacement transaction log. All multi-step writes go through
//! write-temp-then-atomic-rename, so no reader ever observes a partial file.
//!
//! Concurrency: one inner mutex serializes queue mutation, progress-buffer
//! mutation, and replace transactions; a separate flush lock makes a flush
//! already in progress awaitable by concurrent flush requests instead of
//! raced.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use fs2::available_space;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::domain::{Chain, ChainId, Step, TaskMetadata, Tombstone, TxnEntry, TxnKind};
use crate::error::StoreError;
use crate::progress::ChainProgress;
use crate::queue::DurableQueue;

/// State guarded by the store's single mutex
struct Inner {
    queue: DurableQueue,
    /// Progress values saved but not yet flushed to disk
    dirty: HashMap<ChainId, ChainProgress>,
    last_maintenance: Instant,
}

/// Counts from one maintenance sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Tombstones older than the configured age that were removed
    pub tombstones_purged: usize,
    /// Expired one-off metadata records that were reclaimed
    pub metadata_reclaimed: usize,
}

/// Point-in-time statistics for a store
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Chains waiting in the queue
    pub queued: u64,
    /// Chain definitions on disk
    pub definitions: usize,
    /// Progress snapshots on disk
    pub progress_files: usize,
    /// Tombstones on disk
    pub tombstones: usize,
    /// Progress values buffered but not yet flushed
    pub dirty: usize,
}

/// The durable persistence layer for chains
///
/// Owns a single root directory exclusively. Concurrent callers within one
/// process are serialized internally; concurrent processes against the same
/// directory are not supported.
pub struct ChainStore {
    root: PathBuf,
    config: StoreConfig,
    inner: Mutex<Inner>,
    /// Held for the duration of a flush so concurrent flushes wait, not race
    flush_lock: Mutex<()>,
}

impl ChainStore {
    /// Open or create a store at `root`
    ///
    /// Any pending legacy queue migration runs to completion here, before
    /// the first operation can be served, followed by one maintenance sweep.
    pub async fn open(root: impl AsRef<Path>, config: StoreConfig) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("chains"))?;
        fs::create_dir_all(root.join("progress"))?;
        fs::create_dir_all(root.join("meta"))?;
        fs::create_dir_all(root.join("tombstones"))?;

        // Migration happens inside the queue open, so every later operation
        // observes the framed format.
        let queue = DurableQueue::open(&root, config.queue.clone())?;

        let store = Self {
            root: root.clone(),
            config,
            inner: Mutex::new(Inner {
                queue,
                dirty: HashMap::new(),
                last_maintenance: Instant::now(),
            }),
            flush_lock: Mutex::new(()),
        };
        let report = store.run_maintenance().await?;
        debug!(?root, ?report, "Opened chain store");
        Ok(store)
    }

    // ---------------------------------------------------------------------
    // Queue
    // ---------------------------------------------------------------------

    /// Persist a chain definition plus fresh progress and enqueue its id
    ///
    /// Fails fast with a capacity error when the queue is at its ceiling or
    /// the definition exceeds the serialized-size ceiling; nothing is
    /// written in either case.
    pub async fn enqueue_chain(&self, chain: Chain, max_retries: u32) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        if inner.queue.len() >= self.config.max_queued_chains {
            return Err(StoreError::Capacity {
                what: "queued chains",
                limit: self.config.max_queued_chains,
                actual: inner.queue.len() + 1,
            });
        }

        let progress = ChainProgress::new(chain.id.clone(), chain.steps.len() as u32, max_retries);
        let id = chain.id.clone();
        self.write_definition(&chain)?;
        write_json_atomic(&self.progress_path(&id), &progress)?;
        inner.queue.enqueue(&id)?;
        info!(chain_id = %id, steps = chain.steps.len(), "Enqueued chain");
        Ok(())
    }

    /// Pop the next chain id in strict enqueue order
    pub async fn dequeue_chain(&self) -> Result<Option<ChainId>, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.queue.dequeue()
    }

    /// Put an existing chain's id back at the tail of the queue
    ///
    /// Used when a chain suspends or fails with retries remaining; the
    /// definition and progress stay untouched.
    pub async fn requeue(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.queue.len() >= self.config.max_queued_chains {
            return Err(StoreError::Capacity {
                what: "queued chains",
                limit: self.config.max_queued_chains,
                actual: inner.queue.len() + 1,
            });
        }
        inner.queue.enqueue(id)
    }

    /// Chains currently waiting in the queue. O(1).
    pub async fn queue_len(&self) -> u64 {
        self.inner.lock().await.queue.len()
    }

    // ---------------------------------------------------------------------
    // Definitions
    // ---------------------------------------------------------------------

    /// Write a chain definition, overwriting any prior value for the id
    pub async fn save_chain_definition(&self, chain: &Chain) -> Result<(), StoreError> {
        let _inner = self.inner.lock().await;
        self.write_definition(chain)
    }

    /// Load a chain definition; `None` for unknown ids, never an error
    pub async fn load_chain_definition(&self, id: &str) -> Result<Option<Chain>, StoreError> {
        read_json_opt(&self.definition_path(id))
    }

    /// Delete a chain definition if present
    pub async fn delete_chain_definition(&self, id: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.definition_path(id))
    }

    fn write_definition(&self, chain: &Chain) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(chain)?;
        if encoded.len() as u64 > self.config.max_chain_bytes {
            return Err(StoreError::Capacity {
                what: "chain definition",
                limit: self.config.max_chain_bytes,
                actual: encoded.len() as u64,
            });
        }
        self.ensure_free_space(encoded.len() as u64)?;
        write_bytes_atomic(&self.definition_path(&chain.id), &encoded)
    }

    // ---------------------------------------------------------------------
    // Progress
    // ---------------------------------------------------------------------

    /// Buffer a progress snapshot; durable on the next flush
    pub async fn save_chain_progress(&self, progress: ChainProgress) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.dirty.insert(progress.chain_id.clone(), progress);
        Ok(())
    }

    /// Load progress, preferring the buffered value over disk
    pub async fn load_chain_progress(&self, id: &str) -> Result<Option<ChainProgress>, StoreError> {
        {
            let inner = self.inner.lock().await;
            if let Some(progress) = inner.dirty.get(id) {
                return Ok(Some(progress.clone()));
            }
        }
        read_json_opt(&self.progress_path(id))
    }

    /// Drop only the buffered progress entry for a chain, leaving disk alone
    ///
    /// Used by an execution aborting after supersession: its stale snapshot
    /// must not be flushed over the replacement chain's fresh progress file.
    pub async fn discard_buffered_progress(&self, id: &str) {
        let mut inner = self.inner.lock().await;
        inner.dirty.remove(id);
    }

    /// Drop buffered and persisted progress for a chain
    pub async fn delete_chain_progress(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.dirty.remove(id);
        remove_if_exists(&self.progress_path(id))
    }

    /// Write every buffered progress value to disk
    ///
    /// A flush already in progress is awaited, never raced: callers queue on
    /// the flush lock and each sees a consistent snapshot. A failed write
    /// keeps its buffered value for a future retry.
    pub async fn flush_progress(&self) -> Result<(), StoreError> {
        let _flush = self.flush_lock.lock().await;

        let snapshot: Vec<(ChainId, ChainProgress)> = {
            let inner = self.inner.lock().await;
            inner.dirty.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if snapshot.is_empty() {
            return Ok(());
        }

        self.ensure_free_space(self.config.max_chain_bytes)?;

        let mut written = Vec::with_capacity(snapshot.len());
        for (id, progress) in &snapshot {
            if let Err(e) = write_json_atomic(&self.progress_path(id), progress) {
                // Retain everything not yet persisted for a later retry
                error!(chain_id = %id, error = %e, "Progress flush failed");
                self.retire_flushed(&written).await;
                return Err(e);
            }
            written.push((id.clone(), progress.clone()));
        }

        self.retire_flushed(&written).await;
        debug!(flushed = written.len(), "Flushed progress buffer");
        Ok(())
    }

    /// Remove flushed entries from the dirty buffer unless they changed
    /// again while the flush was writing
    async fn retire_flushed(&self, written: &[(ChainId, ChainProgress)]) {
        let mut inner = self.inner.lock().await;
        for (id, flushed) in written {
            if inner.dirty.get(id) == Some(flushed) {
                inner.dirty.remove(id);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Tombstones and replacement
    // ---------------------------------------------------------------------

    /// Write a supersession marker for a chain
    pub async fn tombstone(&self, id: &str) -> Result<(), StoreError> {
        write_json_atomic(&self.tombstone_path(id), &Tombstone::new(id))
    }

    /// Whether a supersession marker exists for a chain
    pub async fn has_tombstone(&self, id: &str) -> bool {
        self.tombstone_path(id).exists()
    }

    /// Remove a supersession marker if present
    pub async fn clear_tombstone(&self, id: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.tombstone_path(id))
    }

    /// Atomically replace a chain with a new definition
    ///
    /// Transaction order: log a begin entry, tombstone the prior chain,
    /// delete its definition and progress (buffer included), write the new
    /// definition plus fresh progress, re-enqueue the id, log a commit. A
    /// chain currently executing under the old definition observes the
    /// tombstone between steps and aborts cooperatively instead of touching
    /// the new chain's files. Fails fast with a capacity error when the
    /// queue is at its ceiling, before any of the above happens.
    pub async fn replace_chain_atomic(
        &self,
        id: &str,
        new_steps: Vec<Step>,
        max_retries: u32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        // The replacement adds its own queue entry; check the ceiling before
        // anything destructive happens.
        if inner.queue.len() >= self.config.max_queued_chains {
            return Err(StoreError::Capacity {
                what: "queued chains",
                limit: self.config.max_queued_chains,
                actual: inner.queue.len() + 1,
            });
        }

        self.append_txn(&TxnEntry::new(id, TxnKind::ReplaceBegin))?;
        write_json_atomic(&self.tombstone_path(id), &Tombstone::new(id))?;

        inner.dirty.remove(id);
        remove_if_exists(&self.definition_path(id))?;
        remove_if_exists(&self.progress_path(id))?;

        let chain = Chain::new(id, new_steps);
        let progress = ChainProgress::new(id, chain.steps.len() as u32, max_retries);
        self.write_definition(&chain)?;
        write_json_atomic(&self.progress_path(id), &progress)?;
        inner.queue.enqueue(id)?;

        self.append_txn(&TxnEntry::new(id, TxnKind::ReplaceCommit))?;
        info!(chain_id = %id, "Replaced chain");
        Ok(())
    }

    fn append_txn(&self, entry: &TxnEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("txn.log"))?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // One-off task metadata
    // ---------------------------------------------------------------------

    /// Store one-off metadata, optionally expiring after `ttl_ms`
    pub async fn save_task_metadata(&self, key: &str, value: Value, ttl_ms: Option<i64>) -> Result<(), StoreError> {
        let record = match ttl_ms {
            Some(ttl) => TaskMetadata::with_ttl(value, ttl),
            None => TaskMetadata::new(value),
        };
        write_json_atomic(&self.metadata_path(key), &record)
    }

    /// Load one-off metadata; expired records read as absent
    pub async fn load_task_metadata(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let record: Option<TaskMetadata> = read_json_opt(&self.metadata_path(key))?;
        Ok(record.filter(|r| !r.is_expired()).map(|r| r.value))
    }

    /// Delete one-off metadata if present
    pub async fn delete_task_metadata(&self, key: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.metadata_path(key))
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Remove a chain's definition and progress entirely
    ///
    /// Completion, permanent failure, and supersession all end here; the
    /// queue entry has its own shorter lifetime.
    pub async fn remove_chain(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.dirty.remove(id);
        remove_if_exists(&self.definition_path(id))?;
        remove_if_exists(&self.progress_path(id))?;
        debug!(chain_id = %id, "Removed chain");
        Ok(())
    }

    /// Run the maintenance sweep now
    ///
    /// Purges tombstones past the configured age and reclaims one-off
    /// metadata that is explicitly expired or, for records without a TTL,
    /// older than the metadata age cap. Deterministic: driven purely by
    /// timestamps.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, StoreError> {
        let mut report = MaintenanceReport::default();
        let tombstone_cutoff_ms = self.config.tombstone_max_age_secs as i64 * 1000;
        let metadata_cutoff_ms = self.config.metadata_max_age_secs as i64 * 1000;

        for entry in fs::read_dir(self.root.join("tombstones"))? {
            let path = entry?.path();
            let tombstone: Option<Tombstone> = read_json_opt(&path)?;
            let expired = match tombstone {
                Some(t) => t.age_ms() >= tombstone_cutoff_ms,
                // Unreadable tombstone: reclaim rather than keep junk
                None => true,
            };
            if expired {
                remove_if_exists(&path)?;
                report.tombstones_purged += 1;
            }
        }

        for entry in fs::read_dir(self.root.join("meta"))? {
            let path = entry?.path();
            let record: Option<TaskMetadata> = read_json_opt(&path)?;
            let expired = match record {
                Some(r) => {
                    r.is_expired() || (r.expires_at_ms.is_none() && r.age_ms() >= metadata_cutoff_ms)
                }
                None => true,
            };
            if expired {
                remove_if_exists(&path)?;
                report.metadata_reclaimed += 1;
            }
        }

        let mut inner = self.inner.lock().await;
        inner.last_maintenance = Instant::now();
        if report != MaintenanceReport::default() {
            info!(?report, "Maintenance sweep complete");
        }
        Ok(report)
    }

    /// Run the sweep only when the configured interval has elapsed
    pub async fn maybe_run_maintenance(&self) -> Result<Option<MaintenanceReport>, StoreError> {
        let due = {
            let inner = self.inner.lock().await;
            inner.last_maintenance.elapsed().as_secs() >= self.config.maintenance_interval_secs
        };
        if !due {
            return Ok(None);
        }
        self.run_maintenance().await.map(Some)
    }

    /// Point-in-time statistics
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.lock().await;
        Ok(StoreStats {
            queued: inner.queue.len(),
            definitions: count_dir(&self.root.join("chains"))?,
            progress_files: count_dir(&self.root.join("progress"))?,
            tombstones: count_dir(&self.root.join("tombstones"))?,
            dirty: inner.dirty.len(),
        })
    }

    // ---------------------------------------------------------------------
    // Paths and guards
    // ---------------------------------------------------------------------

    fn definition_path(&self, id: &str) -> PathBuf {
        self.root.join("chains").join(format!("{id}.json"))
    }

    fn progress_path(&self, id: &str) -> PathBuf {
        self.root.join("progress").join(format!("{id}.json"))
    }

    fn tombstone_path(&self, id: &str) -> PathBuf {
        self.root.join("tombstones").join(format!("{id}.json"))
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.root.join("meta").join(format!("{key}.json"))
    }

    /// Refuse a large write up front when free space is below the buffer
    fn ensure_free_space(&self, needed: u64) -> Result<(), StoreError> {
        let available = match available_space(&self.root) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Stat failure must not block writes; the write itself will
                // report a real shortage.
                warn!(error = %e, "Could not determine free disk space");
                return Ok(());
            }
        };
        let required = self.config.min_free_bytes.saturating_add(needed);
        if available < required {
            return Err(StoreError::InsufficientDisk {
                needed: required,
                available,
            });
        }
        Ok(())
    }
}

/// Serialize a value and atomically replace `path` with it
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    write_bytes_atomic(path, &serde_json::to_vec(value)?)
}

fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "value".to_string());
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_data()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read and decode a JSON file; absent files are `None`, unreadable files
/// are logged and treated as absent rather than crashing the caller
fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Unreadable record treated as absent");
            Ok(None)
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn count_dir(path: &Path) -> Result<usize, StoreError> {
    Ok(fs::read_dir(path)?.count())
}
