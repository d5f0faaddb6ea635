//! Account state consumed by the sync engine and upload pipeline.
//!
//! Sign-in happens elsewhere. This module only reads what that flow left
//! behind, either `session.json` in the cache directory or environment
//! variables, and never writes it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{Credential, GUEST_USER_SENTINEL};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

const ENV_USER_ID: &str = "ALBUMSYNC_USER_ID";
const ENV_ALBUM_ID: &str = "ALBUMSYNC_ALBUM_ID";
const ENV_AUTH_TOKEN: &str = "ALBUMSYNC_AUTH_TOKEN";
const ENV_AUTH_COOKIE: &str = "ALBUMSYNC_AUTH_COOKIE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: Option<String>,
    pub album_id: Option<String>,
    pub credential: Option<Credential>,
}

impl Viewer {
    pub fn guest() -> Self {
        Self::default()
    }

    /// Load the viewer from `session.json`, if a sign-in flow saved one.
    pub fn load(cache_dir: &Path) -> Result<Option<Self>> {
        let path = cache_dir.join(SESSION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)
            .context("Failed to read session file")?;
        let viewer: Viewer = serde_json::from_str(&contents)
            .context("Failed to parse session file")?;
        Ok(Some(viewer))
    }

    /// Build a viewer from environment variables. Returns `None` when none are set.
    pub fn from_env() -> Option<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let credential = var(ENV_AUTH_TOKEN)
            .map(Credential::Bearer)
            .or_else(|| var(ENV_AUTH_COOKIE).map(Credential::Cookie));
        let viewer = Viewer {
            user_id: var(ENV_USER_ID),
            album_id: var(ENV_ALBUM_ID),
            credential,
        };

        if viewer.user_id.is_none() && viewer.album_id.is_none() && viewer.credential.is_none() {
            None
        } else {
            Some(viewer)
        }
    }

    /// `userId` form field for uploads.
    pub fn upload_user_field(&self) -> &str {
        self.user_id.as_deref().unwrap_or(GUEST_USER_SENTINEL)
    }

    pub fn is_signed_in(&self) -> bool {
        self.credential.is_some()
    }
}
