//! Upload sequence: pick a file for a challenge, pass the gate, name the
//! uploader, submit.
//!
//! At most one submission is pending. It is never persisted and never
//! retried: a finished attempt, successful or not, discards it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{MediaUploader, UploadRequest};
use crate::error::SyncError;
use crate::media::{FileGate, MediaClass, MediaFile, Rejection};
use crate::models::{AlbumIdentity, Challenge};
use crate::session::Viewer;

pub const UPLOAD_SUCCESS_MESSAGE: &str = "Image uploaded successfully!";

/// A validated file waiting for the uploader's display name.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub challenge: Challenge,
    pub file: MediaFile,
    pub class: MediaClass,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub challenge_title: String,
    pub file_name: String,
    pub message: String,
}

pub struct UploadCoordinator {
    gate: FileGate,
    uploader: Arc<dyn MediaUploader>,
    album: AlbumIdentity,
    viewer: Viewer,
    pending: Option<PendingSubmission>,
}

impl UploadCoordinator {
    pub fn new(gate: FileGate, uploader: Arc<dyn MediaUploader>, album: AlbumIdentity, viewer: Viewer) -> Self {
        Self {
            gate,
            uploader,
            album,
            viewer,
            pending: None,
        }
    }

    /// Validate `file` for `challenge`. On success the name prompt opens.
    /// On rejection the prompt closes and any earlier pending file is dropped.
    pub fn select_file(&mut self, challenge: Challenge, file: MediaFile) -> Result<&PendingSubmission, SyncError> {
        let class = match self.gate.validate(&file) {
            Ok(class) => class,
            Err(rejection) => {
                debug!(file = %file.file_name, media_type = %file.media_type, reason = %rejection, "File rejected");
                self.pending = None;
                return Err(SyncError::ValidationRejected(rejection));
            }
        };

        let preview = file.preview_ref();
        Ok(self.pending.insert(PendingSubmission {
            challenge,
            file,
            class,
            preview,
        }))
    }

    pub fn pending(&self) -> Option<&PendingSubmission> {
        self.pending.as_ref()
    }

    pub fn prompt_open(&self) -> bool {
        self.pending.is_some()
    }

    /// Rejection from the most recent selection, until a valid file is picked.
    pub fn rejection(&self) -> Option<&Rejection> {
        self.gate.last_rejection()
    }

    /// Close the prompt and drop the pending file.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(file = %pending.file.file_name, "Upload cancelled");
        }
    }

    /// Submit the pending file under `display_name`.
    ///
    /// A blank name is rejected and keeps the pending file. Otherwise the
    /// pending submission is consumed whatever the outcome.
    pub async fn submit_name(&mut self, display_name: &str) -> Result<UploadReceipt, SyncError> {
        if self.pending.is_none() {
            return Err(SyncError::NothingPending);
        }
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SyncError::MissingDisplayName);
        }
        let Some(pending) = self.pending.take() else {
            return Err(SyncError::NothingPending);
        };

        let receipt = UploadReceipt {
            challenge_title: pending.challenge.title.clone(),
            file_name: pending.file.file_name.clone(),
            message: UPLOAD_SUCCESS_MESSAGE.to_string(),
        };
        let request = UploadRequest {
            album: self.album.clone(),
            user_id: self.viewer.upload_user_field().to_string(),
            challenge_title: pending.challenge.title,
            uploader_username: display_name.to_string(),
            file: pending.file,
        };

        match self.uploader.upload_media(request).await {
            Ok(()) => {
                info!(album = %self.album, challenge = %receipt.challenge_title, class = %pending.class, "Upload complete");
                Ok(receipt)
            }
            Err(e) => {
                warn!(album = %self.album, error = %e, "Upload failed");
                Err(SyncError::UploadFailed(e))
            }
        }
    }
}
