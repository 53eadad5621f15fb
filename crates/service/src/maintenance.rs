use serde::Serialize;
use std::fs;
use std::io;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use crate::persist::{DiskFileKind, DiskTier};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub entries_removed: usize,
    pub temp_files_removed: usize,
    pub locks_removed: usize,
    pub bytes_freed: u64,
}

/// Operator purge: delete entries, leftover temp files and abandoned locks
/// last modified more than `max_age` before `now`.
///
/// Entries are write-once, so their modification time is their creation
/// time. An entry whose document changed is never looked up again and
/// only goes away through here.
pub fn purge_older_than(disk: &DiskTier, max_age: Duration, now: SystemTime) -> io::Result<PurgeReport> {
    let mut report = PurgeReport::default();

    for file in disk.scan()? {
        let Some(modified) = file.modified else {
            continue;
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        match fs::remove_file(&file.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
        debug!(path = %file.path.display(), age_secs = age.as_secs(), "Purged cache file");

        match file.kind {
            DiskFileKind::Entry => {
                report.entries_removed += 1;
                report.bytes_freed += file.len;
            }
            DiskFileKind::Temp => report.temp_files_removed += 1,
            DiskFileKind::Lock => report.locks_removed += 1,
        }
    }

    info!(
        dir = %disk.dir().display(),
        entries = report.entries_removed,
        temp_files = report.temp_files_removed,
        locks = report.locks_removed,
        bytes = report.bytes_freed,
        "Cache purge complete"
    );
    Ok(report)
}
