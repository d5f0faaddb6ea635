//! The sync engine: sole owner and writer of an album's challenge list.
//!
//! A single driver task applies live events, reconciliation results, timer
//! ticks and caller commands in arrival order. Network work runs in spawned
//! tasks that report back over a channel, so the list is never locked.
//! Readers see the list through a `watch` snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::list::ChallengeList;
use super::poller::{Reconciled, ReconciliationPoller, POLL_INTERVAL};
use crate::api::ChallengeSource;
use crate::cache::LocalCache;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::live::{ChannelState, Connector, LiveEvent, LiveUpdateChannel};
use crate::models::{AlbumIdentity, Challenge};

pub const NO_CHALLENGES_MESSAGE: &str = "No challenges available at the moment.";

/// Buffer size for live events waiting on the driver.
const LIVE_EVENT_BUFFER_SIZE: usize = 64;

/// Collaborators the engine is built from.
pub struct EngineDeps {
    pub source: Arc<dyn ChallengeSource>,
    pub cache: Arc<LocalCache>,
    pub clock: Arc<dyn Clock>,
    /// `None` runs on polling alone.
    pub connector: Option<Arc<dyn Connector>>,
}

/// What readers see of the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSnapshot {
    pub challenges: Vec<Challenge>,
    /// Last reconciliation failure; cleared by the next success.
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Set while live updates are unavailable.
    pub live_notice: Option<String>,
}

/// What the presentation layer should render, in priority order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChallengeView<'a> {
    Error(&'a str),
    Empty,
    List(&'a [Challenge]),
}

impl SyncSnapshot {
    pub fn view(&self) -> ChallengeView<'_> {
        if let Some(error) = &self.error {
            ChallengeView::Error(error)
        } else if self.challenges.is_empty() {
            ChallengeView::Empty
        } else {
            ChallengeView::List(&self.challenges)
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    Upsert(Challenge),
    Remove(String),
    Replace(Vec<Challenge>),
}

pub struct SyncEngine {
    album: AlbumIdentity,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SyncSnapshot>,
    channel_state: Option<watch::Receiver<ChannelState>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncEngine {
    /// Seed from the cache, then start live updates, an immediate forced
    /// reconciliation and the recurring poll. Must be called inside a Tokio runtime.
    pub fn start(album: AlbumIdentity, deps: EngineDeps) -> Self {
        let seeded = deps.cache.read(album.key());
        let fetched_at = seeded.as_ref().map(|e| e.fetched_at);
        let list = ChallengeList::new(seeded.map(|e| e.challenges).unwrap_or_default());
        debug!(album = %album, seeded = fetched_at.is_some(), count = list.len(), "Starting sync engine");

        let (snapshot_tx, snapshot) = watch::channel(SyncSnapshot {
            challenges: list.to_vec(),
            error: None,
            fetched_at,
            live_notice: None,
        });

        let (live_tx, live_rx) = mpsc::channel(LIVE_EVENT_BUFFER_SIZE);
        let live = deps
            .connector
            .map(|connector| LiveUpdateChannel::new(connector, album.key(), live_tx));
        let channel_state = live.as_ref().map(|l| l.subscribe_state());

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = oneshot::channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            album: album.clone(),
            poller: Arc::new(ReconciliationPoller::new(deps.source, deps.cache, deps.clock)),
            list,
            fetched_at,
            error: None,
            live_notice: None,
            live,
            snapshot: snapshot_tx,
            results_tx,
            reconcile_task: None,
        };
        let task = tokio::spawn(driver.run(commands_rx, live_rx, results_rx, shutdown_rx));
        info!(album = %album, "Sync engine started");

        Self {
            album,
            commands,
            snapshot,
            channel_state,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    pub fn album(&self) -> &AlbumIdentity {
        &self.album
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel_state
            .as_ref()
            .map(|state| *state.borrow())
            .unwrap_or_default()
    }

    /// Reconcile now, ignoring cache freshness.
    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    pub fn upsert(&self, challenge: Challenge) {
        self.send(Command::Upsert(challenge));
    }

    pub fn remove(&self, id: impl Into<String>) {
        self.send(Command::Remove(id.into()));
    }

    pub fn replace(&self, challenges: Vec<Challenge>) {
        self.send(Command::Replace(challenges));
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Sync engine stopped, dropping command");
        }
    }

    /// Stop the recurring poll and close the live channel. Nothing changes
    /// the snapshot once this returns.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync engine task ended abnormally");
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns the list. Lives inside the engine's background task.
struct Driver {
    album: AlbumIdentity,
    poller: Arc<ReconciliationPoller>,
    list: ChallengeList,
    fetched_at: Option<DateTime<Utc>>,
    error: Option<String>,
    live_notice: Option<String>,
    live: Option<LiveUpdateChannel>,
    snapshot: watch::Sender<SyncSnapshot>,
    results_tx: mpsc::UnboundedSender<Result<Reconciled, SyncError>>,
    reconcile_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut live_events: mpsc::Receiver<LiveEvent>,
        mut results: mpsc::UnboundedReceiver<Result<Reconciled, SyncError>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        if let Some(live) = self.live.as_mut() {
            live.start();
        }
        self.spawn_reconcile(true);

        let mut ticker = interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let live_enabled = self.live.is_some();

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                command = commands.recv() => match command {
                    Some(command) => self.apply_command(command),
                    // Engine handle dropped
                    None => break,
                },
                Some(event) = live_events.recv(), if live_enabled => self.apply_live_event(event),
                Some(result) = results.recv() => self.apply_reconciled(result),
                _ = ticker.tick() => self.spawn_reconcile(false),
            }
        }

        if let Some(task) = self.reconcile_task.take() {
            task.abort();
        }
        if let Some(mut live) = self.live.take() {
            live.close().await;
        }
        info!(album = %self.album, "Sync engine stopped");
    }

    fn spawn_reconcile(&mut self, force: bool) {
        if self.reconcile_task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!(force = force, "Reconciliation in flight, skipping");
            return;
        }

        let poller = Arc::clone(&self.poller);
        let album = self.album.clone();
        let results = self.results_tx.clone();
        self.reconcile_task = Some(tokio::spawn(async move {
            let result = poller.reconcile(&album, force).await;
            let _ = results.send(result);
        }));
    }

    fn apply_command(&mut self, command: Command) {
        match command {
            Command::Refresh => {
                self.spawn_reconcile(true);
                return;
            }
            Command::Upsert(challenge) => self.list.upsert(challenge),
            Command::Remove(id) => {
                self.list.remove(&id);
            }
            Command::Replace(challenges) => self.list.replace(challenges),
        }
        self.publish();
    }

    fn apply_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::ChallengeCreated(challenge) => {
                debug!(id = %challenge.id, "Live: challenge created");
                self.list.upsert(challenge);
            }
            LiveEvent::ChallengeDeleted { id } => {
                debug!(id = %id, "Live: challenge deleted");
                if !self.list.remove(&id) {
                    return;
                }
            }
            LiveEvent::Connected => {
                if self.live_notice.is_none() {
                    return;
                }
                self.live_notice = None;
            }
            LiveEvent::Unavailable(e) => {
                let err = SyncError::ChannelUnavailable(e);
                debug!(album = %self.album, error = ?err, "Continuing on polling alone");
                self.live_notice = Some(err.to_string());
            }
        }
        self.publish();
    }

    fn apply_reconciled(&mut self, result: Result<Reconciled, SyncError>) {
        match result {
            Ok(reconciled) => {
                self.list.replace(reconciled.challenges);
                self.fetched_at = Some(reconciled.fetched_at);
                self.error = None;
            }
            Err(e) => {
                self.error = Some(e.to_string());
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(SyncSnapshot {
            challenges: self.list.to_vec(),
            error: self.error.clone(),
            fetched_at: self.fetched_at,
            live_notice: self.live_notice.clone(),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::api::{ApiError, MockChallengeSource};
    use crate::clock::{MockClock, SystemClock};
    use crate::live::testing::MemoryConnector;

    fn two() -> Vec<Challenge> {
        vec![Challenge::new("c1", "Best sunset"), Challenge::new("c2", "Group photo")]
    }

    fn album() -> AlbumIdentity {
        AlbumIdentity::PublicToken("tok123".to_string())
    }

    /// Source returning `two()` and counting calls.
    fn counting_source() -> (MockChallengeSource, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockChallengeSource::new();
        source.expect_fetch_challenges().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(two())
        });
        (source, calls)
    }

    fn deps(source: MockChallengeSource, cache: LocalCache) -> EngineDeps {
        EngineDeps {
            source: Arc::new(source),
            cache: Arc::new(cache),
            clock: Arc::new(SystemClock),
            connector: None,
        }
    }

    async fn wait_until(engine: &SyncEngine, pred: impl FnMut(&SyncSnapshot) -> bool) -> SyncSnapshot {
        let mut rx = engine.subscribe();
        let snapshot = rx.wait_for(pred).await.expect("engine running");
        snapshot.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reconciles_public_album() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (source, calls) = counting_source();
        let mut engine = SyncEngine::start(album(), deps(source, LocalCache::new(dir.path().to_path_buf())));

        let snapshot = wait_until(&engine, |s| s.fetched_at.is_some()).await;

        assert_eq!(snapshot.challenges, two());
        assert_eq!(snapshot.view(), ChallengeView::List(&two()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let cached = LocalCache::new(dir.path().to_path_buf()).read("tok123").expect("cached");
        assert_eq!(cached.challenges.len(), 2);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeds_from_cache_before_first_fetch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalCache::new(dir.path().to_path_buf());
        cache
            .write("tok123", &[Challenge::new("old", "Cached")], Utc::now())
            .expect("seed");

        let (source, _calls) = counting_source();
        let mut engine = SyncEngine::start(album(), deps(source, cache));

        // Nothing has run yet; the snapshot already holds the cached list.
        assert_eq!(engine.snapshot().challenges, vec![Challenge::new("old", "Cached")]);

        let snapshot = wait_until(&engine, |s| s.challenges.len() == 2).await;
        assert_eq!(snapshot.challenges, two());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_poll_uses_cache_while_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (source, calls) = counting_source();
        let fixed = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut clock = MockClock::new();
        clock.expect_now().return_const(fixed);

        let mut engine = SyncEngine::start(
            album(),
            EngineDeps {
                source: Arc::new(source),
                cache: Arc::new(LocalCache::new(dir.path().to_path_buf())),
                clock: Arc::new(clock),
                connector: None,
            },
        );
        wait_until(&engine, |s| s.fetched_at.is_some()).await;

        tokio::time::sleep(POLL_INTERVAL * 2 + Duration::from_secs(1)).await;

        // The mocked clock never moves, so every tick finds a fresh entry
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_poll_fetches_when_uncached() {
        let (source, calls) = counting_source();
        let mut engine = SyncEngine::start(album(), deps(source, LocalCache::disabled()));
        wait_until(&engine, |s| s.fetched_at.is_some()).await;

        tokio::time::sleep(POLL_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(POLL_INTERVAL).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_is_surfaced_then_cleared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut source = MockChallengeSource::new();
        source.expect_fetch_challenges().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::ServerError("down".to_string()))
            } else {
                Ok(two())
            }
        });

        let mut engine = SyncEngine::start(album(), deps(source, LocalCache::disabled()));

        let failed = wait_until(&engine, |s| s.error.is_some()).await;
        assert_eq!(failed.view(), ChallengeView::Error("Error loading challenges."));

        engine.refresh();
        let recovered = wait_until(&engine, |s| s.error.is_none() && !s.challenges.is_empty()).await;
        assert_eq!(recovered.challenges, two());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_album_view() {
        let mut source = MockChallengeSource::new();
        source.expect_fetch_challenges().returning(|_| Ok(Vec::new()));
        let mut engine = SyncEngine::start(album(), deps(source, LocalCache::disabled()));

        let snapshot = wait_until(&engine, |s| s.fetched_at.is_some()).await;
        assert_eq!(snapshot.view(), ChallengeView::Empty);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_created_event_extends_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (connector, mut servers) = MemoryConnector::new();
        let (source, _calls) = counting_source();
        let mut engine = SyncEngine::start(
            album(),
            EngineDeps {
                connector: Some(Arc::new(connector)),
                ..deps(source, LocalCache::new(dir.path().to_path_buf()))
            },
        );
        wait_until(&engine, |s| s.challenges.len() == 2).await;

        let mut server = servers.recv().await.expect("connect");
        assert_eq!(server.accept().await, r#"42["join_album","tok123"]"#);
        assert_eq!(engine.channel_state(), ChannelState::Connected);

        server
            .emit(r#"42["challenge_created",{"_id":"c3","title":"Silly hat"}]"#)
            .await;
        let snapshot = wait_until(&engine, |s| s.challenges.len() == 3).await;
        assert_eq!(snapshot.challenges[2].id, "c3");

        // Deltas patch memory only
        let cached = LocalCache::new(dir.path().to_path_buf()).read("tok123").expect("cached");
        assert_eq!(cached.challenges.len(), 2);

        server.emit(r#"42["challenge_deleted",{"id":"c1"}]"#).await;
        let snapshot = wait_until(&engine, |s| s.challenges.len() == 2).await;
        assert_eq!(snapshot.challenges[0].id, "c2");

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciliation_overwrites_live_deltas() {
        let (connector, mut servers) = MemoryConnector::new();
        let (source, calls) = counting_source();
        let mut engine = SyncEngine::start(
            album(),
            EngineDeps {
                connector: Some(Arc::new(connector)),
                ..deps(source, LocalCache::disabled())
            },
        );
        wait_until(&engine, |s| s.challenges.len() == 2).await;
        let mut server = servers.recv().await.expect("connect");
        server.accept().await;

        server
            .emit(r#"42["challenge_created",{"_id":"c3","title":"Silly hat"}]"#)
            .await;
        wait_until(&engine, |s| s.challenges.len() == 3).await;
        server.emit(r#"42["challenge_deleted",{"id":"c1"}]"#).await;
        let patched = wait_until(&engine, |s| s.challenges.len() == 2 && s.challenges[0].id == "c2").await;
        let ids: Vec<&str> = patched.challenges.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c3"]);

        // Backend is authoritative: the delta-built list is discarded wholesale
        engine.refresh();
        let reconciled = wait_until(&engine, |s| s.challenges == two()).await;
        assert_eq!(reconciled.challenges, two());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_channel_falls_back_to_polling() {
        let (connector, _servers) = MemoryConnector::failing_first(usize::MAX);
        let (source, _calls) = counting_source();
        let mut engine = SyncEngine::start(
            album(),
            EngineDeps {
                connector: Some(Arc::new(connector)),
                ..deps(source, LocalCache::disabled())
            },
        );

        let snapshot = wait_until(&engine, |s| s.live_notice.is_some() && s.fetched_at.is_some()).await;
        assert_eq!(snapshot.live_notice.as_deref(), Some("Live updates unavailable."));
        assert_eq!(snapshot.error, None);
        assert_eq!(snapshot.challenges, two());

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_entry_points() {
        let (source, _calls) = counting_source();
        let mut engine = SyncEngine::start(album(), deps(source, LocalCache::disabled()));
        wait_until(&engine, |s| s.challenges.len() == 2).await;

        engine.upsert(Challenge::new("c3", "Silly hat"));
        wait_until(&engine, |s| s.challenges.len() == 3).await;

        engine.remove("c1");
        engine.replace(vec![Challenge::new("only", "One")]);
        let snapshot = wait_until(&engine, |s| s.challenges.len() == 1).await;
        assert_eq!(snapshot.challenges[0].id, "only");

        engine.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer_and_channel() {
        let (connector, mut servers) = MemoryConnector::new();
        let (source, calls) = counting_source();
        let mut engine = SyncEngine::start(
            album(),
            EngineDeps {
                connector: Some(Arc::new(connector)),
                ..deps(source, LocalCache::disabled())
            },
        );
        wait_until(&engine, |s| s.fetched_at.is_some()).await;
        let mut server = servers.recv().await.expect("connect");
        server.accept().await;

        engine.shutdown().await;
        assert_eq!(engine.channel_state(), ChannelState::Disconnected);

        let before = engine.snapshot();
        let _ = server
            .to_client
            .send(r#"42["challenge_created",{"_id":"late","title":"Too late"}]"#.to_string())
            .await;
        tokio::time::sleep(POLL_INTERVAL * 3).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.snapshot(), before);
        assert!(servers.try_recv().is_err(), "no reconnect after shutdown");
    }
}
