#![allow(dead_code)]

use async_trait::async_trait;
use extract::{RetryConfig, ServiceError, ServiceRequest, UnderstandingService};
use service::AppConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Answers every request with the same reply and counts the calls.
pub struct CountingService {
    reply: Result<String, ServiceError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingService {
    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: ServiceError) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(error),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnderstandingService for CountingService {
    fn name(&self) -> &str {
        "counting"
    }

    fn max_input_tokens(&self) -> usize {
        100_000
    }

    async fn understand(&self, _request: &ServiceRequest) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}

/// Every required field of schema v1.
pub const FULL_REPLY: &str = r#"{"entities": {
  "DeviceContext": {
    "device_name": "Acme Stent",
    "manufacturer": "Acme Medical GmbH",
    "device_class": "III",
    "intended_purpose": "Treatment of coronary artery stenosis"
  },
  "PatientPopulation": {"target_population": "Adults with coronary artery disease", "age_range": "18-85 years"},
  "ClinicalEvidenceItem": [{"title": "ACME-1 registry", "evidence_type": "PMCF", "population_size": 240}],
  "ComplaintRecord": [{"complaint_id": "C-001", "received_date": "2022-03-01", "quantity": 1}]
}}"#;

pub fn config(cache_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.dir = cache_dir.to_path_buf();
    config.cache.lock_poll_ms = 10;
    config.retry = RetryConfig {
        max_attempts: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
    };
    config
}

pub fn make_docx(body_xml: &str) -> Vec<u8> {
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body_xml}</w:body></w:document>"#
    );
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("[Content_Types].xml", options).unwrap();
        zip.write_all(b"<Types/>").unwrap();
        zip.start_file("word/document.xml", options).unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn paragraph(text: &str) -> String {
    format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
}

/// Two pages of labelled device details.
pub fn report_docx(extra: &str) -> Vec<u8> {
    let body = [
        r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Device Description</w:t></w:r></w:p>"#.to_string(),
        paragraph("Device Name: Acme Stent"),
        paragraph("Manufacturer: Acme Medical GmbH"),
        r#"<w:p><w:r><w:br w:type="page"/></w:r></w:p>"#.to_string(),
        paragraph("Device Class: Class III"),
        paragraph(extra),
    ]
    .concat();
    make_docx(&body)
}

pub fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
