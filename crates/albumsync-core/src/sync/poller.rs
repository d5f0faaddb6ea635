use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::api::ChallengeSource;
use crate::cache::{CacheEntry, LocalCache};
use crate::clock::Clock;
use crate::error::SyncError;
use crate::models::{AlbumIdentity, Challenge};

/// A cached list younger than this is served without asking the backend.
pub const FRESHNESS_WINDOW_MS: i64 = 60_000;

/// Period of the recurring reconciliation.
pub const POLL_INTERVAL: StdDuration = StdDuration::from_millis(FRESHNESS_WINDOW_MS as u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cache,
    Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub challenges: Vec<Challenge>,
    pub origin: Origin,
    pub fetched_at: DateTime<Utc>,
}

/// An entry stamped in the future (clock skew, or a clock set back) is stale.
pub fn is_fresh(entry: &CacheEntry, now: DateTime<Utc>, window: Duration) -> bool {
    entry.fetched_at <= now && entry.age(now) < window
}

/// Fetches the authoritative list and keeps the cache in step with it.
pub struct ReconciliationPoller {
    source: Arc<dyn ChallengeSource>,
    cache: Arc<LocalCache>,
    clock: Arc<dyn Clock>,
    freshness: Duration,
}

impl ReconciliationPoller {
    pub fn new(source: Arc<dyn ChallengeSource>, cache: Arc<LocalCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            cache,
            clock,
            freshness: Duration::milliseconds(FRESHNESS_WINDOW_MS),
        }
    }

    /// Return the album's list, from cache when it is fresh and `force` is off,
    /// from the backend otherwise.
    ///
    /// On failure the cache entry is left as it was.
    pub async fn reconcile(&self, album: &AlbumIdentity, force: bool) -> Result<Reconciled, SyncError> {
        let key = album.key();

        if !force {
            if let Some(entry) = self.cache.read(key) {
                if is_fresh(&entry, self.clock.now(), self.freshness) {
                    debug!(album = %album, count = entry.challenges.len(), "Serving challenges from cache");
                    return Ok(Reconciled {
                        challenges: entry.challenges,
                        origin: Origin::Cache,
                        fetched_at: entry.fetched_at,
                    });
                }
            }
        }

        let challenges = self.source.fetch_challenges(album).await.map_err(|e| {
            warn!(album = %album, error = %e, "Failed to fetch challenges");
            SyncError::FetchFailed(e)
        })?;

        let now = self.clock.now();
        let fetched_at = match self.cache.write(key, &challenges, now) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(album = %album, error = %e, "Failed to cache challenges");
                now
            }
        };
        debug!(album = %album, count = challenges.len(), force = force, "Fetched challenges");

        Ok(Reconciled {
            challenges,
            origin: Origin::Backend,
            fetched_at,
        })
    }
}
