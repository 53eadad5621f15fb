use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::persist::TEMP_EXTENSION;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Advisory per-fingerprint lock shared between processes using the same
/// cache directory. Held while the owner computes; removed on drop, so a
/// cancelled computation frees the fingerprint for the next caller.
///
/// The file holds a stamp unique to this owner. Waiters only break a lock
/// whose stamp they judged stale, and the owner only removes its own stamp.
#[derive(Debug)]
pub struct FingerprintLock {
    path: PathBuf,
    stamp: String,
    heartbeat: Option<JoinHandle<()>>,
}

/// What a waiter saw when it looked at somebody else's lock.
#[derive(Debug, Clone, PartialEq)]
pub struct LockObservation {
    pub stamp: String,
    pub age: Duration,
}

impl FingerprintLock {
    /// Create the lock file if nobody holds it. `Ok(None)` means another
    /// owner has it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e),
        };

        let stamp = format!(
            "pid={} at={} id={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339(),
            uuid::Uuid::new_v4()
        );
        if let Err(e) = file.write_all(stamp.as_bytes()).and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(path);
            return Err(e);
        }

        debug!(lock = %path.display(), "Fingerprint lock acquired");
        Ok(Some(Self {
            path: path.to_path_buf(),
            stamp,
            heartbeat: None,
        }))
    }

    /// Refresh the lock's modification time every `every` until dropped, so
    /// a long computation is never mistaken for an abandoned one. Must be
    /// called from within a Tokio runtime.
    pub fn keep_alive(&mut self, every: Duration) {
        if let Some(previous) = self.heartbeat.take() {
            previous.abort();
        }
        let path = self.path.clone();
        let stamp = self.stamp.clone();
        let mut ticker = tokio::time::interval(every.max(MIN_HEARTBEAT));

        self.heartbeat = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                // A waiter may have the file moved aside for a moment
                if fs::read_to_string(&path).ok().as_deref() != Some(stamp.as_str()) {
                    debug!(lock = %path.display(), "Fingerprint lock not ours at refresh time");
                    continue;
                }
                if let Err(e) = touch(&path) {
                    debug!(lock = %path.display(), error = %e, "Failed to refresh fingerprint lock");
                }
            }
        }));
    }

    /// Read another owner's lock. `None` when there is no lock to look at.
    pub fn observe(path: &Path) -> Option<LockObservation> {
        let stamp = fs::read_to_string(path).ok()?;
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(LockObservation {
            stamp,
            age: age_of(modified),
        })
    }

    /// Remove a lock file older than `stale_after`; its owner is presumed dead.
    /// Returns whether a lock was removed.
    pub fn break_if_stale(path: &Path, stale_after: Duration) -> bool {
        match Self::observe(path) {
            Some(observed) if observed.age >= stale_after => Self::break_observed(path, &observed, stale_after),
            _ => false,
        }
    }

    /// Break the lock described by `observed`, and only that one. The file is
    /// first moved aside under a unique name; if what was moved turns out to
    /// be a different or refreshed lock, it is put back.
    pub fn break_observed(path: &Path, observed: &LockObservation, stale_after: Duration) -> bool {
        let parked = parked_path(path);
        if fs::rename(path, &parked).is_err() {
            // Already released or broken by someone else
            return false;
        }

        let still_stale = fs::read_to_string(&parked).ok().as_deref() == Some(observed.stamp.as_str())
            && fs::metadata(&parked)
                .and_then(|m| m.modified())
                .is_ok_and(|modified| age_of(modified) >= stale_after);

        if still_stale {
            let _ = fs::remove_file(&parked);
            warn!(
                lock = %path.display(),
                age_secs = observed.age.as_secs(),
                "Broke stale fingerprint lock"
            );
            return true;
        }

        // A live owner's lock; hard_link refuses to clobber a newer one
        if let Err(e) = fs::hard_link(&parked, path) {
            warn!(lock = %path.display(), error = %e, "Could not restore live fingerprint lock");
        }
        let _ = fs::remove_file(&parked);
        false
    }
}

impl Drop for FingerprintLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        match fs::read_to_string(&self.path) {
            Ok(stamp) if stamp == self.stamp => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(lock = %self.path.display(), error = %e, "Failed to release fingerprint lock");
                }
            }
            Ok(_) => warn!(lock = %self.path.display(), "Fingerprint lock taken over by another owner"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(lock = %self.path.display(), error = %e, "Failed to release fingerprint lock"),
        }
    }
}

fn touch(path: &Path) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

fn age_of(modified: SystemTime) -> Duration {
    SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO)
}

/// `.<fp>.lock.<uuid>.tmp`, swept like any other temp file.
fn parked_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{TEMP_EXTENSION}", uuid::Uuid::new_v4()))
}
