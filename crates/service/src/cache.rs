use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::fingerprint::Fingerprint;
use crate::lock::FingerprintLock;
use crate::metrics::{Metrics, TimedOperation};
use crate::persist::{DiskRead, DiskTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from this process, including callers that waited on an
    /// in-flight computation.
    MemoryHit,
    DiskHit,
    Computed,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store is closed")]
    Closed,

    #[error("Cache directory {path:?} is unusable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist cache entry {fingerprint}: {source}")]
    Persist {
        fingerprint: Fingerprint,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache background task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub dir: PathBuf,
    pub memory_entries: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
}

enum LockWait {
    Acquired(FingerprintLock),
    /// Another owner finished while we waited.
    Ready(CacheEntry),
}

/// Content-addressed, two-tier store in front of the parser.
///
/// The memory tier maps each fingerprint to a `OnceCell`: the first caller
/// runs the computation inside it and every concurrent caller for the same
/// fingerprint awaits the same cell. Across processes the same guarantee
/// comes from a lock file per fingerprint. Entries are never evicted.
pub struct CacheStore {
    memory: DashMap<Fingerprint, Arc<OnceCell<Arc<CacheEntry>>>>,
    disk: DiskTier,
    config: CacheConfig,
    metrics: Arc<Metrics>,
    open: AtomicBool,
}

impl CacheStore {
    pub fn open(config: CacheConfig, metrics: Arc<Metrics>) -> Result<Self, CacheError> {
        let disk = DiskTier::open(&config.dir).map_err(|source| CacheError::Io {
            path: config.dir.clone(),
            source,
        })?;
        info!(dir = %config.dir.display(), "Cache store opened");

        Ok(Self {
            memory: DashMap::new(),
            disk,
            config,
            metrics,
            open: AtomicBool::new(true),
        })
    }

    /// Drop the memory tier and refuse further lookups. Disk entries stay.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let entries = self.memory.len();
            self.memory.clear();
            info!(dir = %self.config.dir.display(), memory_entries = entries, "Cache store closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn disk(&self) -> &DiskTier {
        &self.disk
    }

    /// Return the entry for `fp`, running `compute` only if neither tier
    /// has it and no other caller (in this process or another) is already
    /// computing it. A failed or cancelled computation leaves nothing
    /// behind, so the next caller retries.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fp: &Fingerprint,
        compute: F,
    ) -> Result<(Arc<CacheEntry>, CacheStatus), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, E>>,
        E: From<CacheError>,
    {
        if !self.is_open() {
            return Err(CacheError::Closed.into());
        }

        let cell = self
            .memory
            .entry(fp.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        if let Some(entry) = cell.get() {
            self.metrics.record_lookup(CacheStatus::MemoryHit);
            return Ok((entry.clone(), CacheStatus::MemoryHit));
        }

        let mut status = CacheStatus::MemoryHit;
        let status_slot = &mut status;
        let entry = match cell
            .get_or_try_init(move || async move {
                let (entry, found) = self.load_or_compute(fp, compute).await?;
                *status_slot = found;
                Ok::<_, E>(Arc::new(entry))
            })
            .await
        {
            Ok(entry) => entry.clone(),
            Err(e) => {
                // Failed fingerprints do not keep a slot in the memory tier
                self.memory.remove_if(fp, |_, slot| !slot.initialized());
                return Err(e);
            }
        };

        self.metrics.record_lookup(status);
        Ok((entry, status))
    }

    async fn load_or_compute<F, Fut, E>(&self, fp: &Fingerprint, compute: F) -> Result<(CacheEntry, CacheStatus), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheEntry, E>>,
        E: From<CacheError>,
    {
        // Step 1: persistent tier
        if let Some(entry) = self.read_disk(fp).await? {
            return Ok((entry, CacheStatus::DiskHit));
        }

        // Step 2: exclude other processes
        let lock = match self.acquire_lock(fp).await? {
            LockWait::Acquired(lock) => lock,
            LockWait::Ready(entry) => return Ok((entry, CacheStatus::DiskHit)),
        };

        // Step 3: compute
        let timer = TimedOperation::start();
        let entry = compute().await?;
        self.metrics.record_compute_time(timer.elapsed());

        // Step 4: write through before anyone sees the result
        let entry = self.write_disk(entry).await?;
        drop(lock);

        info!(
            fingerprint = %fp,
            completeness = entry.header.completeness,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Computed and cached"
        );
        Ok((entry, CacheStatus::Computed))
    }

    async fn probe_disk(&self, fp: &Fingerprint) -> Result<DiskRead, CacheError> {
        let disk = self.disk.clone();
        let fp = fp.clone();
        tokio::task::spawn_blocking(move || disk.read(&fp))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))
    }

    /// Disk lookup that treats damaged entries as a miss.
    async fn read_disk(&self, fp: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        match self.probe_disk(fp).await? {
            DiskRead::Hit(entry) => Ok(Some(entry)),
            DiskRead::Missing => Ok(None),
            DiskRead::Corrupt(reason) => {
                self.metrics.record_corrupt_entry();
                warn!(
                    fingerprint = %fp,
                    reason = %reason,
                    "Corrupt cache entry, recomputing"
                );
                Ok(None)
            }
        }
    }

    async fn acquire_lock(&self, fp: &Fingerprint) -> Result<LockWait, CacheError> {
        let path = self.disk.lock_path(fp);
        let stale_after = Duration::from_secs(self.config.lock_stale_secs);
        let poll = Duration::from_millis(self.config.lock_poll_ms.max(1));
        let mut waiting = false;

        loop {
            let acquired = FingerprintLock::try_acquire(&path).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;

            if let Some(mut lock) = acquired {
                // The previous owner may have written just before releasing
                if let DiskRead::Hit(entry) = self.probe_disk(fp).await? {
                    return Ok(LockWait::Ready(entry));
                }
                lock.keep_alive(stale_after / 4);
                return Ok(LockWait::Acquired(lock));
            }

            if !waiting {
                debug!(fingerprint = %fp, "Fingerprint locked by another process, waiting");
                waiting = true;
            }
            if let DiskRead::Hit(entry) = self.probe_disk(fp).await? {
                return Ok(LockWait::Ready(entry));
            }
            if !FingerprintLock::break_if_stale(&path, stale_after) {
                tokio::time::sleep(poll).await;
            }
        }
    }

    async fn write_disk(&self, entry: CacheEntry) -> Result<CacheEntry, CacheError> {
        let disk = self.disk.clone();
        let fingerprint = entry.fingerprint().clone();
        tokio::task::spawn_blocking(move || disk.write(entry))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
            .map_err(|source| CacheError::Persist { fingerprint, source })
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let memory_entries = self.memory.iter().filter(|c| c.value().initialized()).count();
        let disk = self.disk.clone();
        let (disk_entries, disk_bytes) = tokio::task::spawn_blocking(move || disk.usage())
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
            .map_err(|source| CacheError::Io {
                path: self.config.dir.clone(),
                source,
            })?;

        Ok(CacheStats {
            dir: self.config.dir.clone(),
            memory_entries,
            disk_entries,
            disk_bytes,
        })
    }
}
