//! albumsync - watch a shared album's challenge list and upload media to it.
//!
//! Usage:
//!   albumsync watch [--album ID | --token TOKEN]
//!   albumsync check FILE [--type MEDIA_TYPE]
//!   albumsync upload --challenge ID_OR_TITLE --file FILE --name NAME
//!                    [--album ID | --token TOKEN] [--type MEDIA_TYPE]
//!   albumsync clear-cache [--album ID | --token TOKEN]

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use albumsync_core::cache::format_age;
use albumsync_core::live::Connector;
use albumsync_core::media::gate::BYTES_PER_MB;
use albumsync_core::sync::NO_CHALLENGES_MESSAGE;
use albumsync_core::{
    AlbumIdentity, ApiClient, ChallengeView, Config, EngineDeps, FileGate, LocalCache, MediaFile,
    ReconciliationPoller, SyncEngine, SyncSnapshot, SystemClock, UploadCoordinator, Viewer, WsConnector,
};

const USAGE: &str = "\
Usage:
  albumsync watch [--album ID | --token TOKEN]
  albumsync check FILE [--type MEDIA_TYPE]
  albumsync upload --challenge ID_OR_TITLE --file FILE --name NAME [--album ID | --token TOKEN] [--type MEDIA_TYPE]
  albumsync clear-cache [--album ID | --token TOKEN]

Environment:
  ALBUMSYNC_MODE=development|production, API_BASE_URL_DEV, API_BASE_URL_PROD,
  ALBUMSYNC_MAX_IMAGE_MB, ALBUMSYNC_MAX_VIDEO_MB, ALBUMSYNC_USER_ID,
  ALBUMSYNC_ALBUM_ID, ALBUMSYNC_AUTH_TOKEN, RUST_LOG";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes buffered log lines when dropped; keep it
/// alive for the life of the process.
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=albumsync_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[derive(Debug, PartialEq)]
enum Command {
    Watch,
    Check,
    Upload,
    ClearCache,
    Help,
}

/// Parsed command line: a subcommand, `--flag value` pairs, and positionals.
#[derive(Debug)]
struct Args {
    command: Command,
    flags: HashMap<String, String>,
    positional: Vec<String>,
}

impl Args {
    fn parse(raw: &[String]) -> Result<Self> {
        let command = match raw.first().map(String::as_str) {
            Some("watch") => Command::Watch,
            Some("check") => Command::Check,
            Some("upload") => Command::Upload,
            Some("clear-cache") => Command::ClearCache,
            None | Some("help") | Some("--help") | Some("-h") => Command::Help,
            Some(other) => anyhow::bail!("Unknown command: {}\n\n{}", other, USAGE),
        };

        let mut flags = HashMap::new();
        let mut positional = Vec::new();
        let mut rest = raw.iter().skip(1);
        while let Some(arg) = rest.next() {
            if let Some(name) = arg.strip_prefix("--") {
                let value = rest
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --{}", name))?;
                flags.insert(name.to_string(), value.clone());
            } else {
                positional.push(arg.clone());
            }
        }

        Ok(Self {
            command,
            flags,
            positional,
        })
    }

    fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    fn required(&self, name: &str) -> Result<&str> {
        self.flag(name)
            .ok_or_else(|| anyhow::anyhow!("Missing required --{}\n\n{}", name, USAGE))
    }
}

/// Everything a command needs from config and account state.
struct AppContext {
    config: Config,
    viewer: Viewer,
    cache: Arc<LocalCache>,
    client: ApiClient,
}

impl AppContext {
    fn load() -> Result<Self> {
        let config = Config::load()?;
        let cache_dir = Config::cache_dir()?;
        let viewer = match Viewer::from_env() {
            Some(viewer) => viewer,
            None => Viewer::load(&cache_dir)?.unwrap_or_else(Viewer::guest),
        };
        let client = ApiClient::new(config.base_url())?.with_credential(viewer.credential.clone());

        Ok(Self {
            config,
            viewer,
            cache: Arc::new(LocalCache::new(cache_dir)),
            client,
        })
    }

    /// Album from `--album` / `--token`, else the signed-in viewer's album.
    fn album(&self, args: &Args) -> Result<AlbumIdentity> {
        AlbumIdentity::resolve(args.flag("album"), args.flag("token"))
            .or_else(|| AlbumIdentity::resolve(self.viewer.album_id.as_deref(), None))
            .ok_or_else(|| anyhow::anyhow!("No album selected. Pass --album ID or --token TOKEN."))
    }

    fn poller(&self) -> ReconciliationPoller {
        ReconciliationPoller::new(
            Arc::new(self.client.clone()),
            Arc::clone(&self.cache),
            Arc::new(SystemClock),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = Args::parse(&raw)?;
    if args.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let _guard = init_tracing();
    let ctx = AppContext::load()?;
    info!(base_url = ctx.client.base_url(), mode = ?ctx.config.mode, "albumsync starting");

    match args.command {
        Command::Watch => watch(&ctx, &args).await,
        Command::Check => check(&ctx, &args).await,
        Command::Upload => upload(&ctx, &args).await,
        Command::ClearCache => clear_cache(&ctx, &args),
        Command::Help => Ok(()),
    }
}

/// Run the sync engine and print the list on every change until Ctrl-C.
async fn watch(ctx: &AppContext, args: &Args) -> Result<()> {
    let album = ctx.album(args)?;

    let connector: Option<Arc<dyn Connector>> = match WsConnector::new(ctx.client.base_url()) {
        Ok(connector) => Some(Arc::new(connector)),
        Err(e) => {
            warn!(error = %e, "Live updates disabled");
            None
        }
    };
    let mut engine = SyncEngine::start(
        album,
        EngineDeps {
            source: Arc::new(ctx.client.clone()),
            cache: Arc::clone(&ctx.cache),
            clock: Arc::new(SystemClock),
            connector,
        },
    );

    println!("Watching {} (Ctrl-C to stop)", engine.album());
    let mut updates = engine.subscribe();
    let initial = updates.borrow_and_update().clone();
    render(&initial);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                render(&snapshot);
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn render(snapshot: &SyncSnapshot) {
    println!();
    match snapshot.view() {
        ChallengeView::Error(message) => println!("! {}", message),
        ChallengeView::Empty => println!("{}", NO_CHALLENGES_MESSAGE),
        ChallengeView::List(challenges) => {
            for (i, challenge) in challenges.iter().enumerate() {
                println!("{:>3}. {}  [{}]", i + 1, challenge.display_title(), challenge.id);
            }
        }
    }
    if let Some(fetched_at) = snapshot.fetched_at {
        println!("    updated {}", format_age(fetched_at, Utc::now()));
    }
    if let Some(notice) = &snapshot.live_notice {
        println!("    ({})", notice);
    }
}

/// Run the file gate over a local file.
async fn check(ctx: &AppContext, args: &Args) -> Result<()> {
    let path = args
        .positional
        .first()
        .ok_or_else(|| anyhow::anyhow!("Missing FILE\n\n{}", USAGE))?;
    let file = MediaFile::from_path(path, args.flag("type")).await?;

    let class = FileGate::from_config(&ctx.config).check(&file)?;
    println!(
        "OK: {} is a valid {} ({}, {:.1} MB)",
        file.file_name,
        class,
        file.media_type,
        file.size_bytes as f64 / BYTES_PER_MB as f64
    );
    Ok(())
}

/// Find the challenge, validate the file, submit under the given name.
async fn upload(ctx: &AppContext, args: &Args) -> Result<()> {
    let album = ctx.album(args)?;
    let wanted = args.required("challenge")?;
    let path = args.required("file")?;
    let name = args.required("name")?;

    let challenges = ctx.poller().reconcile(&album, false).await?.challenges;
    let challenge = challenges
        .iter()
        .find(|c| c.id == wanted)
        .or_else(|| challenges.iter().find(|c| c.title.eq_ignore_ascii_case(wanted)))
        .cloned()
        .with_context(|| format!("No challenge {:?} in {}", wanted, album))?;

    let file = MediaFile::from_path(path, args.flag("type")).await?;
    let mut coordinator = UploadCoordinator::new(
        FileGate::from_config(&ctx.config),
        Arc::new(ctx.client.clone()),
        album,
        ctx.viewer.clone(),
    );

    let pending = coordinator.select_file(challenge, file)?;
    println!("Uploading {} for \"{}\"...", pending.preview, pending.challenge.display_title());
    let receipt = coordinator.submit_name(name).await?;
    println!("{}", receipt.message);
    Ok(())
}

/// Forget the cached list so the next reconciliation goes to the backend.
fn clear_cache(ctx: &AppContext, args: &Args) -> Result<()> {
    let album = ctx.album(args)?;
    ctx.cache.invalidate(album.key())?;
    println!("Cleared cached challenges for {}", album);
    Ok(())
}
