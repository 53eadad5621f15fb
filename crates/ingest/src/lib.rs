pub mod chunk;
pub mod chunker;
pub mod document;
mod docx;
pub mod error;
pub mod layout;
mod pdf;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use document::{DocumentFormat, RawDocument, SegmentKind, Table, TextSegment};
pub use error::LoadError;
pub use reader::FileReader;

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

const HASH_BUFFER: usize = 64 * 1024;

/// Hex SHA-256 of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash a file's bytes without holding the whole file in memory.
pub fn content_hash_blocking(path: &Path) -> Result<String, LoadError> {
    let mut file = std::fs::File::open(path).map_err(|e| LoadError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buf).map_err(|e| LoadError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub async fn content_hash(path: &Path) -> Result<String, LoadError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || content_hash_blocking(&owned))
        .await
        .map_err(|e| LoadError::io(path, std::io::Error::other(e)))?
}

/// Load a document and split it into chunks with the default bound.
pub async fn ingest_file(path: &Path) -> Result<(RawDocument, Vec<Chunk>), LoadError> {
    let document = FileReader::load(path).await?;
    let chunker = Chunker::new(ChunkerConfig::default());
    let chunks = chunker.chunk_document(&document);
    Ok((document, chunks))
}
