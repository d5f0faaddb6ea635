//! Error kinds surfaced to the presentation layer.
//!
//! None of these is fatal. Each `Display` is the message a viewer sees;
//! the underlying cause is kept as the error source for logging.

use thiserror::Error;

use crate::api::ApiError;
use crate::live::ChannelError;
use crate::media::Rejection;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Bad type or size. Cleared once a valid file is chosen.
    #[error(transparent)]
    ValidationRejected(#[from] Rejection),

    /// Reconciliation failed; the cached list stays and the next tick retries.
    #[error("Error loading challenges.")]
    FetchFailed(#[source] ApiError),

    /// Submission failed; the pending submission is discarded.
    #[error("Upload failed.")]
    UploadFailed(#[source] ApiError),

    /// Live updates are down; polling carries on alone.
    #[error("Live updates unavailable.")]
    ChannelUnavailable(#[source] ChannelError),

    #[error("Select a file for a challenge first.")]
    NothingPending,

    #[error("Please enter a name.")]
    MissingDisplayName,
}
