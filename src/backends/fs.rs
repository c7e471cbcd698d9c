use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::BackendError;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(rename = "isDirectory")]
    pub is_directory: bool,
    #[serde(rename = "isFile")]
    pub is_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub size: u64,
    #[serde(rename = "sizeFormatted")]
    pub size_formatted: String,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub accessed: Option<String>,
    #[serde(rename = "isDirectory")]
    pub is_directory: bool,
    #[serde(rename = "isFile")]
    pub is_file: bool,
    pub permissions: String,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &Path) -> Result<String, BackendError>;
    async fn write(&self, path: &Path, contents: &str) -> Result<(), BackendError>;
    /// Entries sorted by name.
    async fn list(&self, path: &Path) -> Result<Vec<DirEntryInfo>, BackendError>;
    /// Creates missing parents too.
    async fn mkdir(&self, path: &Path) -> Result<(), BackendError>;
    async fn unlink(&self, path: &Path) -> Result<(), BackendError>;
    async fn stat(&self, path: &Path) -> Result<FileInfo, BackendError>;
}

/// The local filesystem through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &Path) -> Result<String, BackendError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BackendError::io("read", path, e))
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<(), BackendError> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| BackendError::io("write", path, e))
    }

    async fn list(&self, path: &Path) -> Result<Vec<DirEntryInfo>, BackendError> {
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| BackendError::io("scandir", path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| BackendError::io("scandir", path, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| BackendError::io("stat", entry.path(), e))?;
            let is_directory = file_type.is_dir();
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if is_directory { "directory" } else { "file" },
                is_directory,
                is_file: file_type.is_file(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &Path) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| BackendError::io("mkdir", path, e))
    }

    async fn unlink(&self, path: &Path) -> Result<(), BackendError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| BackendError::io("unlink", path, e))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo, BackendError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| BackendError::io("stat", path, e))?;

        let size = meta.len();
        Ok(FileInfo {
            size,
            size_formatted: format!("{:.2} KB", size as f64 / 1024.0),
            created: meta.created().ok().map(iso_timestamp),
            modified: meta.modified().ok().map(iso_timestamp),
            accessed: meta.accessed().ok().map(iso_timestamp),
            is_directory: meta.is_dir(),
            is_file: meta.is_file(),
            permissions: permission_bits(&meta),
        })
    }
}

fn iso_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:03o}", meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() { "444" } else { "666" }.to_string()
}
