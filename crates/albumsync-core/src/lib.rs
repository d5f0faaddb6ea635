//! albumsync core library.
//!
//! Keeps an album's challenge list in step with the backend across many
//! passive viewers: a local cache seeds the list, a periodic reconciliation
//! corrects it, and a live channel patches it between polls. Media uploads
//! pass through a file gate before they are submitted.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod live;
pub mod media;
pub mod models;
pub mod session;
pub mod sync;
pub mod upload;

pub use api::{ApiClient, ApiError, ChallengeSource, MediaUploader, UploadRequest};
pub use cache::{CacheEntry, LocalCache};
pub use clock::{Clock, SystemClock};
pub use config::{Config, Mode};
pub use error::SyncError;
pub use live::{ChannelError, ChannelState, LiveEvent, LiveUpdateChannel, WsConnector};
pub use media::{FileGate, MediaClass, MediaFile, Rejection};
pub use models::{AlbumIdentity, Challenge, Credential};
pub use session::Viewer;
pub use sync::{ChallengeView, EngineDeps, ReconciliationPoller, SyncEngine, SyncSnapshot};
pub use upload::{PendingSubmission, UploadCoordinator, UploadReceipt};
