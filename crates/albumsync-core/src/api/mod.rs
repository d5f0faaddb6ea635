//! REST API client module for the album backend.
//!
//! `ApiClient` reads an album's challenge list and submits media uploads.
//! The sync engine and upload coordinator depend on the `ChallengeSource`
//! and `MediaUploader` traits rather than on the client itself.

pub mod client;
pub mod error;

use async_trait::async_trait;

pub use client::ApiClient;
pub use error::ApiError;

use crate::media::MediaFile;
use crate::models::{AlbumIdentity, Challenge};

/// Authoritative source of an album's challenge list.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChallengeSource: Send + Sync {
    async fn fetch_challenges(&self, album: &AlbumIdentity) -> Result<Vec<Challenge>, ApiError>;
}

/// Backend endpoint that accepts uploaded media.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload_media(&self, request: UploadRequest) -> Result<(), ApiError>;
}

/// Everything the upload endpoint needs for one submission.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub album: AlbumIdentity,
    pub user_id: String,
    pub challenge_title: String,
    pub uploader_username: String,
    pub file: MediaFile,
}
