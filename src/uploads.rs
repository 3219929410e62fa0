//! File intake: persist uploaded bytes and hand back a handle for ingestion.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::SqliteStore;
use crate::db::models::FileRecord;

/// A received document, ready to be ingested.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentHandle {
    pub file_id: i64,
    pub name: String,
    pub path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
}

impl From<FileRecord> for DocumentHandle {
    fn from(record: FileRecord) -> Self {
        Self {
            file_id: record.id,
            name: record.name,
            path: PathBuf::from(record.path),
            uploaded_at: record.uploaded_at,
        }
    }
}

/// Keep only the final path component and replace anything that is not
/// safe in a file name.
fn sanitize_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn extension_tag(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Write `bytes` under `upload_dir` and record the intake.
///
/// Any file name is accepted here; an unsupported extension is reported
/// when the handle is ingested.
pub fn receive_upload(
    store: &SqliteStore,
    upload_dir: &Path,
    name: &str,
    bytes: &[u8],
) -> Result<DocumentHandle> {
    std::fs::create_dir_all(upload_dir)
        .with_context(|| format!("Failed to create upload dir {}", upload_dir.display()))?;

    let uploaded_at = Utc::now();
    let stored_name = format!(
        "{}_{}",
        uploaded_at.format("%Y%m%d%H%M%S%6f"),
        sanitize_name(name)
    );
    let path = upload_dir.join(stored_name);
    std::fs::write(&path, bytes)
        .with_context(|| format!("Failed to write upload {}", path.display()))?;

    let record = store
        .record_file(
            name,
            &path.to_string_lossy(),
            &extension_tag(name),
            uploaded_at,
        )
        .context("Failed to record upload")?;

    info!("Received {} ({} bytes) as file {}", name, bytes.len(), record.id);
    Ok(record.into())
}

/// Look up a previously received upload.
pub fn find_upload(store: &SqliteStore, file_id: i64) -> Result<Option<DocumentHandle>> {
    Ok(store.get_file(file_id)?.map(DocumentHandle::from))
}
