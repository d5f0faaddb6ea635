//! Local caching module for offline data access.
//!
//! This module provides `LocalCache`, the durable store of the last
//! challenge list seen for each album together with when it was fetched.
//! It applies no expiry of its own; freshness is the poller's decision.

pub mod local;

pub use local::{format_age, CacheEntry, LocalCache};
