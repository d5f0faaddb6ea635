use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, warn};

use crate::models::Challenge;

/// The last challenge list stored for an album.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub challenges: Vec<Challenge>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        format_age(self.fetched_at, now)
    }
}

/// Human-readable age of a fetch, e.g. "5m ago".
pub fn format_age(fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - fetched_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

/// File-backed store of challenge lists, one pair of files per album:
/// `challenges_{key}.json` and `lastFetch_{key}` (epoch milliseconds).
///
/// Reads never fail. A missing, unreadable or corrupt pair reads as absent,
/// and a cache without a usable directory is simply disabled.
#[derive(Debug, Clone)]
pub struct LocalCache {
    cache_dir: Option<PathBuf>,
}

impl LocalCache {
    pub fn new(cache_dir: PathBuf) -> Self {
        match std::fs::create_dir_all(&cache_dir) {
            Ok(()) => Self {
                cache_dir: Some(cache_dir),
            },
            Err(e) => {
                warn!(dir = %cache_dir.display(), error = %e, "Cache directory unavailable, caching disabled");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { cache_dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache_dir.is_some()
    }

    pub fn read(&self, key: &str) -> Option<CacheEntry> {
        let dir = self.cache_dir.as_deref()?;
        match Self::load(dir, key) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key = key, error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Overwrite the entry for `key` wholesale.
    ///
    /// The stored timestamp never moves backwards: if the existing entry is
    /// newer than `now` (clock skew), its timestamp is kept. Returns the
    /// timestamp actually stored.
    pub fn write(&self, key: &str, challenges: &[Challenge], now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let Some(dir) = self.cache_dir.as_deref() else {
            return Ok(now);
        };

        let fetched_at = match Self::load_timestamp(dir, key) {
            Ok(Some(previous)) if previous > now => previous,
            _ => now,
        };

        let contents = serde_json::to_string(challenges)?;
        write_atomic(&challenges_path(dir, key), contents.as_bytes())
            .with_context(|| format!("Failed to write cached challenges for {}", key))?;
        write_atomic(
            &last_fetch_path(dir, key),
            fetched_at.timestamp_millis().to_string().as_bytes(),
        )
        .with_context(|| format!("Failed to write fetch timestamp for {}", key))?;

        Ok(fetched_at)
    }

    /// Drop the entry for `key`, so the next non-forced reconcile goes to the backend.
    pub fn invalidate(&self, key: &str) -> Result<()> {
        let Some(dir) = self.cache_dir.as_deref() else {
            return Ok(());
        };
        for path in [challenges_path(dir, key), last_fetch_path(dir, key)] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove cache file: {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn load(dir: &Path, key: &str) -> Result<Option<CacheEntry>> {
        let list_path = challenges_path(dir, key);
        let Some(fetched_at) = Self::load_timestamp(dir, key)? else {
            return Ok(None);
        };
        if !list_path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&list_path)
            .with_context(|| format!("Failed to read cache file: {}", list_path.display()))?;
        let challenges: Vec<Challenge> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", list_path.display()))?;

        Ok(Some(CacheEntry {
            key: key.to_string(),
            challenges,
            fetched_at,
        }))
    }

    fn load_timestamp(dir: &Path, key: &str) -> Result<Option<DateTime<Utc>>> {
        let path = last_fetch_path(dir, key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", path.display()))?;
        let millis: i64 = raw
            .trim()
            .parse()
            .with_context(|| format!("Bad fetch timestamp in {}", path.display()))?;
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow::anyhow!("Fetch timestamp out of range: {}", millis))?;
        Ok(Some(at))
    }
}

fn challenges_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("challenges_{}.json", file_safe(key)))
}

fn last_fetch_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("lastFetch_{}", file_safe(key)))
}

/// Escape a key for use in a file name. Distinct keys stay distinct.
fn file_safe(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

// ============================================================================
// Tests
// ============================================================================
