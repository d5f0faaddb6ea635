use thiserror::Error;

use super::{MediaClass, MediaFile};
use crate::config::{Config, DEFAULT_MAX_IMAGE_SIZE_MB, DEFAULT_MAX_VIDEO_SIZE_MB};

/// Media types accepted for upload.
pub const ALLOWED_MEDIA_TYPES: [&str; 10] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "image/heif",
    "video/mp4",
    "video/webm",
    "video/avi",
    "video/quicktime",
];

pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("Unsupported file type. Please upload a valid image or video.")]
    UnsupportedType { media_type: String },

    #[error("File size too large. Max allowed size for {class}s is {limit_mb} MB.")]
    TooLarge {
        class: MediaClass,
        limit_mb: u64,
        size_bytes: u64,
    },
}

/// Admits media files to the upload pipeline by type and size.
///
/// Remembers the last rejection so a viewer can keep showing it; the
/// remembered rejection is cleared as soon as a valid file comes through.
#[derive(Debug, Clone)]
pub struct FileGate {
    max_image_size_mb: u64,
    max_video_size_mb: u64,
    last_rejection: Option<Rejection>,
}

impl Default for FileGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IMAGE_SIZE_MB, DEFAULT_MAX_VIDEO_SIZE_MB)
    }
}

impl FileGate {
    pub fn new(max_image_size_mb: u64, max_video_size_mb: u64) -> Self {
        Self {
            max_image_size_mb,
            max_video_size_mb,
            last_rejection: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_image_size_mb, config.max_video_size_mb)
    }

    /// Class by media type prefix; `None` for anything that is neither image nor video.
    pub fn classify(media_type: &str) -> Option<MediaClass> {
        if media_type.starts_with("image/") {
            Some(MediaClass::Image)
        } else if media_type.starts_with("video/") {
            Some(MediaClass::Video)
        } else {
            None
        }
    }

    pub fn limit_mb(&self, class: MediaClass) -> u64 {
        match class {
            MediaClass::Image => self.max_image_size_mb,
            MediaClass::Video => self.max_video_size_mb,
        }
    }

    /// Pure check of a file against the policy.
    pub fn check(&self, file: &MediaFile) -> Result<MediaClass, Rejection> {
        let media_type = file.media_type.trim().to_ascii_lowercase();
        let unsupported = || Rejection::UnsupportedType {
            media_type: file.media_type.clone(),
        };

        let class = Self::classify(&media_type).ok_or_else(unsupported)?;
        if !ALLOWED_MEDIA_TYPES.contains(&media_type.as_str()) {
            return Err(unsupported());
        }

        let limit_mb = self.limit_mb(class);
        if file.size_bytes > limit_mb.saturating_mul(BYTES_PER_MB) {
            return Err(Rejection::TooLarge {
                class,
                limit_mb,
                size_bytes: file.size_bytes,
            });
        }

        Ok(class)
    }

    /// Check a file and update the reported rejection.
    pub fn validate(&mut self, file: &MediaFile) -> Result<MediaClass, Rejection> {
        let verdict = self.check(file);
        self.last_rejection = verdict.as_ref().err().cloned();
        verdict
    }

    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.last_rejection.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(media_type: &str, size_bytes: u64) -> MediaFile {
        let mut f = MediaFile::from_bytes("f", media_type, Vec::new());
        f.size_bytes = size_bytes;
        f
    }

    #[test]
    fn test_pdf_is_unsupported() {
        let mut gate = FileGate::default();
        let err = gate.validate(&file("application/pdf", 10)).unwrap_err();

        assert!(matches!(err, Rejection::UnsupportedType { .. }));
        assert!(err.to_string().to_lowercase().contains("unsupported file type"));
    }

    #[test]
    fn test_unlisted_types_rejected_regardless_of_size() {
        let gate = FileGate::default();
        for media_type in ["image/bmp", "video/x-matroska", "text/plain", "", "imagejpeg"] {
            for size in [0, 1, 15 * BYTES_PER_MB + 1, u64::MAX] {
                assert!(
                    matches!(gate.check(&file(media_type, size)), Err(Rejection::UnsupportedType { .. })),
                    "{} / {} should be unsupported",
                    media_type,
                    size
                );
            }
        }
    }

    #[test]
    fn test_size_ceiling_is_inclusive() {
        let gate = FileGate::default();
        assert_eq!(gate.check(&file("image/png", 15 * BYTES_PER_MB)), Ok(MediaClass::Image));
        assert_eq!(gate.check(&file("video/mp4", 50 * BYTES_PER_MB)), Ok(MediaClass::Video));

        let err = gate.check(&file("image/png", 15 * BYTES_PER_MB + 1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "File size too large. Max allowed size for images is 15 MB."
        );

        let err = gate.check(&file("video/webm", 50 * BYTES_PER_MB + 1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "File size too large. Max allowed size for videos is 50 MB."
        );
    }

    #[test]
    fn test_video_may_exceed_image_ceiling() {
        let gate = FileGate::default();
        assert_eq!(gate.check(&file("video/quicktime", 20 * BYTES_PER_MB)), Ok(MediaClass::Video));
    }

    #[test]
    fn test_custom_ceilings() {
        let gate = FileGate::new(1, 2);
        assert!(gate.check(&file("image/gif", 2 * BYTES_PER_MB)).is_err());
        assert!(gate.check(&file("video/avi", 2 * BYTES_PER_MB)).is_ok());
    }

    #[test]
    fn test_valid_file_clears_last_rejection() {
        let mut gate = FileGate::default();
        assert!(gate.validate(&file("image/tiff", 1)).is_err());
        assert!(gate.last_rejection().is_some());

        assert!(gate.validate(&file("image/heic", 1)).is_ok());
        assert!(gate.last_rejection().is_none());
    }
}
