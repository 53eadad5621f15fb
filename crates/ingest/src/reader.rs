use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::document::{DocumentFormat, RawDocument};
use crate::error::LoadError;
use crate::{docx, pdf};

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub struct FileReader;

impl FileReader {
    /// Decide the decoder from the extension, falling back to magic bytes
    /// for files without one.
    pub async fn detect_format(path: &Path) -> Result<DocumentFormat, LoadError> {
        let metadata = fs::metadata(path).await.map_err(|e| LoadError::io(path, e))?;
        if !metadata.is_file() {
            return Err(LoadError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("pdf") => Ok(DocumentFormat::Pdf),
            Some("docx") => Ok(DocumentFormat::Docx),
            Some(other) => Err(LoadError::UnsupportedFormat(other.to_string())),
            None => Self::sniff(path).await,
        }
    }

    async fn sniff(path: &Path) -> Result<DocumentFormat, LoadError> {
        let mut file = fs::File::open(path).await.map_err(|e| LoadError::io(path, e))?;
        let mut head = [0u8; 8];
        let mut filled = 0;
        while filled < head.len() {
            let n = file
                .read(&mut head[filled..])
                .await
                .map_err(|e| LoadError::io(path, e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let head = &head[..filled];

        if head.starts_with(PDF_MAGIC) {
            Ok(DocumentFormat::Pdf)
        } else if head.starts_with(ZIP_MAGIC) {
            Ok(DocumentFormat::Docx)
        } else {
            Err(LoadError::UnsupportedFormat("unknown (no extension)".to_string()))
        }
    }

    /// Detect and decode a document. Decoding runs on the blocking pool.
    pub async fn load(path: &Path) -> Result<RawDocument, LoadError> {
        let format = Self::detect_format(path).await?;
        let owned = path.to_path_buf();

        let document = tokio::task::spawn_blocking(move || Self::load_blocking(&owned, format))
            .await
            .map_err(|e| LoadError::io(path, std::io::Error::other(e)))??;

        info!(
            path = %path.display(),
            format = %document.format,
            pages = document.page_count,
            segments = document.segments.len(),
            tables = document.tables.len(),
            "Loaded document"
        );
        Ok(document)
    }

    pub fn load_blocking(path: &Path, format: DocumentFormat) -> Result<RawDocument, LoadError> {
        debug!(path = %path.display(), %format, "Decoding document");
        match format {
            DocumentFormat::Pdf => pdf::read_pdf(path),
            DocumentFormat::Docx => docx::read_docx(path),
        }
    }
}
