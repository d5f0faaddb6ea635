//! Candidate media files and the gate that admits them to the upload pipeline.
//!
//! A `MediaFile` is an opaque blob: a declared media type, a size, and a
//! source the bytes can be read from when (and only when) it is uploaded.
//! `FileGate` decides from that metadata alone whether the file may be sent.

pub mod gate;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use gate::{FileGate, Rejection, ALLOWED_MEDIA_TYPES};

/// Fallback media type for files whose extension we don't recognise.
const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaClass {
    Image,
    Video,
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaClass::Image => f.write_str("image"),
            MediaClass::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MediaSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub media_type: String,
    pub size_bytes: u64,
    source: MediaSource,
}

impl MediaFile {
    pub fn from_bytes(
        file_name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            media_type: media_type.into(),
            size_bytes: bytes.len() as u64,
            source: MediaSource::Bytes(bytes),
        }
    }

    /// Describe a file on disk. The media type is guessed from the extension
    /// unless one is declared. Contents are not read until upload.
    pub async fn from_path(path: impl AsRef<Path>, media_type: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat media file: {}", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("Not a regular file: {}", path.display());
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let media_type = media_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_media_type(path).to_string());

        Ok(Self {
            file_name,
            media_type,
            size_bytes: metadata.len(),
            source: MediaSource::Path(path.to_path_buf()),
        })
    }

    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// Local reference a viewer can use to preview the file before it is sent.
    pub fn preview_ref(&self) -> String {
        match &self.source {
            MediaSource::Path(path) => format!("file://{}", path.display()),
            MediaSource::Bytes(_) => format!("memory:{}", self.file_name),
        }
    }

    pub async fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            MediaSource::Path(path) => tokio::fs::read(path).await,
            MediaSource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Media type for the extensions the gate accepts; anything else is unknown.
pub fn guess_media_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "avi" => "video/avi",
        "mov" | "qt" => "video/quicktime",
        "pdf" => "application/pdf",
        _ => UNKNOWN_MEDIA_TYPE,
    }
}
