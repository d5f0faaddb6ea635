use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A challenge within an album.
///
/// Only `id` and `title` are interpreted. Any other field the backend sends
/// is kept in `extra` so the cached list round-trips as last observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Challenge {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            extra: Map::new(),
        }
    }

    /// Title for display, falling back to the id for untitled challenges.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.id
        } else {
            &self.title
        }
    }
}
