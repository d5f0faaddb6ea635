//! Challenge list synchronization: cache, periodic reconciliation and live deltas.

pub mod engine;
pub mod list;
pub mod poller;

pub use engine::{ChallengeView, EngineDeps, SyncEngine, SyncSnapshot, NO_CHALLENGES_MESSAGE};
pub use list::ChallengeList;
pub use poller::{is_fresh, Origin, Reconciled, ReconciliationPoller, FRESHNESS_WINDOW_MS, POLL_INTERVAL};
