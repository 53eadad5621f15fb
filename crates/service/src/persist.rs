use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::entry::{CacheEntry, EntryHeader};
use crate::fingerprint::Fingerprint;

pub const ENTRY_EXTENSION: &str = "entry";
pub const LOCK_EXTENSION: &str = "lock";
pub const TEMP_EXTENSION: &str = "tmp";

#[derive(Debug)]
pub enum DiskRead {
    Hit(CacheEntry),
    Missing,
    /// Present but unusable; the reason is for logs.
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFileKind {
    Entry,
    Lock,
    Temp,
}

#[derive(Debug, Clone)]
pub struct DiskFile {
    pub path: PathBuf,
    pub kind: DiskFileKind,
    pub fingerprint: Option<Fingerprint>,
    pub len: u64,
    pub modified: Option<SystemTime>,
}

/// Persistent tier: one `<fingerprint>.entry` file per bundle, a JSON
/// header line followed by the JSON body. All calls are blocking.
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, fp: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fp}.{ENTRY_EXTENSION}"))
    }

    pub fn lock_path(&self, fp: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{fp}.{LOCK_EXTENSION}"))
    }

    pub fn read(&self, fp: &Fingerprint) -> DiskRead {
        let path = self.entry_path(fp);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return DiskRead::Missing,
            Err(e) => return DiskRead::Corrupt(format!("unreadable: {e}")),
        };
        match decode(fp, &bytes) {
            Ok(entry) => DiskRead::Hit(entry),
            Err(reason) => DiskRead::Corrupt(reason),
        }
    }

    /// Write an entry so that readers see either nothing or the whole file:
    /// unique temp file in the same directory, fsync, rename over the final
    /// name. Returns the entry with its body checksum filled in.
    pub fn write(&self, entry: CacheEntry) -> io::Result<CacheEntry> {
        let (entry, bytes) = encode(entry).map_err(io::Error::other)?;
        let fp = entry.fingerprint().clone();
        let final_path = self.entry_path(&fp);
        let temp_path = self
            .dir
            .join(format!(".{fp}.{}.{TEMP_EXTENSION}", uuid::Uuid::new_v4()));

        let written = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        // Directory fsync is not available everywhere
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        debug!(fingerprint = %fp, bytes = bytes.len(), "Cache entry written");
        Ok(entry)
    }

    /// Every file the cache owns, recognised by name.
    pub fn scan(&self) -> io::Result<Vec<DiskFile>> {
        let mut files = Vec::new();
        for item in fs::read_dir(&self.dir)? {
            let item = item?;
            let path = item.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let (kind, fingerprint) = if let Some(stem) = name.strip_suffix(&format!(".{ENTRY_EXTENSION}")) {
                match Fingerprint::parse(stem) {
                    Some(fp) => (DiskFileKind::Entry, Some(fp)),
                    None => continue,
                }
            } else if let Some(stem) = name.strip_suffix(&format!(".{LOCK_EXTENSION}")) {
                match Fingerprint::parse(stem) {
                    Some(fp) => (DiskFileKind::Lock, Some(fp)),
                    None => continue,
                }
            } else if name.starts_with('.') && name.ends_with(&format!(".{TEMP_EXTENSION}")) {
                (DiskFileKind::Temp, None)
            } else {
                continue;
            };

            let metadata = item.metadata()?;
            files.push(DiskFile {
                path,
                kind,
                fingerprint,
                len: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Number of entries and their total size in bytes.
    pub fn usage(&self) -> io::Result<(usize, u64)> {
        let entries: Vec<DiskFile> = self
            .scan()?
            .into_iter()
            .filter(|f| f.kind == DiskFileKind::Entry)
            .collect();
        Ok((entries.len(), entries.iter().map(|f| f.len).sum()))
    }
}

/// Serialize an entry: header line, newline, body. The header's checksum
/// is computed over the body bytes.
pub fn encode(mut entry: CacheEntry) -> serde_json::Result<(CacheEntry, Vec<u8>)> {
    let body = serde_json::to_vec(&entry.bundle)?;
    entry.header.body_sha256 = hex::encode(Sha256::digest(&body));
    let mut bytes = serde_json::to_vec(&entry.header)?;
    bytes.push(b'\n');
    bytes.extend_from_slice(&body);
    Ok((entry, bytes))
}

pub fn decode(fp: &Fingerprint, bytes: &[u8]) -> Result<CacheEntry, String> {
    let split = bytes
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| "missing header line".to_string())?;
    let (header_bytes, body) = (&bytes[..split], &bytes[split + 1..]);

    let header: EntryHeader =
        serde_json::from_slice(header_bytes).map_err(|e| format!("bad header: {e}"))?;
    if &header.fingerprint != fp {
        return Err(format!("header names fingerprint {}", header.fingerprint));
    }
    let checksum = hex::encode(Sha256::digest(body));
    if checksum != header.body_sha256 {
        return Err("body checksum mismatch".to_string());
    }
    let bundle = serde_json::from_slice(body).map_err(|e| format!("bad body: {e}"))?;

    let entry = CacheEntry { header, bundle };
    if entry.bundle.schema_version != entry.header.schema_version {
        return Err("schema version differs between header and body".to_string());
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::SourceSummary;
    use crate::fingerprint::PARSER_VERSION;
    use chrono::Utc;
    use extract::{ExtractionStats, StructuredEntityBundle};
    use ingest::DocumentFormat;
    use std::collections::BTreeMap;

    fn entry(fp: &Fingerprint) -> CacheEntry {
        CacheEntry {
            header: EntryHeader {
                fingerprint: fp.clone(),
                schema_version: 1,
                parser_version: PARSER_VERSION.to_string(),
                created_at: Utc::now(),
                completeness: 0.7,
                source: SourceSummary {
                    file_name: "report.pdf".into(),
                    format: DocumentFormat::Pdf,
                    pages: 3,
                    segments: 12,
                    tables: 1,
                },
                body_sha256: String::new(),
            },
            bundle: StructuredEntityBundle {
                schema_version: 1,
                entities: BTreeMap::new(),
                completeness: 0.7,
                stats: ExtractionStats::default(),
            },
        }
    }

    #[test]
    fn written_entries_read_back_equal() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskTier::open(dir.path()).unwrap();
        let fp = Fingerprint::compute("abc", PARSER_VERSION, 1);

        let written = disk.write(entry(&fp)).unwrap();
        assert!(!written.header.body_sha256.is_empty());

        match disk.read(&fp) {
            DiskRead::Hit(read) => assert_eq!(read, written),
            other => panic!("expected hit, got {other:?}"),
        }
        // no temp files left behind
        let kinds: Vec<DiskFileKind> = disk.scan().unwrap().into_iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![DiskFileKind::Entry]);
    }

    #[test]
    fn damaged_entries_are_corrupt_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskTier::open(dir.path()).unwrap();
        let fp = Fingerprint::compute("abc", PARSER_VERSION, 1);
        disk.write(entry(&fp)).unwrap();

        let path = disk.entry_path(&fp);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x20;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(disk.read(&fp), DiskRead::Corrupt(reason) if reason.contains("checksum")));

        fs::write(&path, b"\x00\x01garbage").unwrap();
        assert!(matches!(disk.read(&fp), DiskRead::Corrupt(_)));

        let other = Fingerprint::compute("xyz", PARSER_VERSION, 1);
        assert!(matches!(disk.read(&other), DiskRead::Missing));
    }

    #[test]
    fn entry_under_wrong_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskTier::open(dir.path()).unwrap();
        let fp = Fingerprint::compute("abc", PARSER_VERSION, 1);
        let other = Fingerprint::compute("abc", PARSER_VERSION, 2);
        disk.write(entry(&fp)).unwrap();
        fs::rename(disk.entry_path(&fp), disk.entry_path(&other)).unwrap();

        assert!(matches!(disk.read(&other), DiskRead::Corrupt(_)));
    }

    #[test]
    fn usage_counts_entries_only() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskTier::open(dir.path()).unwrap();
        let fp = Fingerprint::compute("abc", PARSER_VERSION, 1);
        disk.write(entry(&fp)).unwrap();
        fs::write(disk.lock_path(&fp), b"1").unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let (entries, bytes) = disk.usage().unwrap();
        assert_eq!(entries, 1);
        assert_eq!(bytes, fs::metadata(disk.entry_path(&fp)).unwrap().len());
    }
}
