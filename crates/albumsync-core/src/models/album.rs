use std::fmt;

use serde::{Deserialize, Serialize};

/// Value sent as `albumId` when uploading through a public share link.
pub const PUBLIC_ALBUM_SENTINEL: &str = "public";

/// Value sent as `userId` when the uploader has no account.
pub const GUEST_USER_SENTINEL: &str = "guest";

/// Which album a session is looking at.
///
/// Signed-in members address an album by id; guests reach it through a
/// share token. Every place that needs to know "which album" derives it
/// from here: cache key, live-update room, read endpoint, upload fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AlbumIdentity {
    Authenticated(String),
    PublicToken(String),
}

impl AlbumIdentity {
    /// Pick the active identity from what the session knows.
    /// A known album id wins over a share token; blank values count as absent.
    pub fn resolve(album_id: Option<&str>, token: Option<&str>) -> Option<Self> {
        let non_blank = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);

        non_blank(album_id)
            .map(AlbumIdentity::Authenticated)
            .or_else(|| non_blank(token).map(AlbumIdentity::PublicToken))
    }

    /// The raw id or token. Used as cache key and live-update room.
    pub fn key(&self) -> &str {
        match self {
            AlbumIdentity::Authenticated(id) => id,
            AlbumIdentity::PublicToken(token) => token,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AlbumIdentity::Authenticated(_))
    }

    pub fn album_id(&self) -> Option<&str> {
        match self {
            AlbumIdentity::Authenticated(id) => Some(id),
            AlbumIdentity::PublicToken(_) => None,
        }
    }

    pub fn share_token(&self) -> Option<&str> {
        match self {
            AlbumIdentity::Authenticated(_) => None,
            AlbumIdentity::PublicToken(token) => Some(token),
        }
    }

    /// `albumId` form field for uploads.
    pub fn upload_album_field(&self) -> &str {
        self.album_id().unwrap_or(PUBLIC_ALBUM_SENTINEL)
    }
}

impl fmt::Display for AlbumIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlbumIdentity::Authenticated(id) => write!(f, "album {}", id),
            AlbumIdentity::PublicToken(token) => {
                // Share tokens grant access; keep them out of logs.
                let shown: String = token.chars().take(4).collect();
                write!(f, "public album {}…", shown)
            }
        }
    }
}

/// Credential attached to authenticated requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Credential {
    Bearer(String),
    Cookie(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
            Credential::Cookie(_) => f.write_str("Cookie(***)"),
        }
    }
}
