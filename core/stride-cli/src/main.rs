//! stride: command-line host for the recording and sync engine.
//!
//! ## Subcommands
//!
//! - `record`: replay an NDJSON track through a live session and queue the result
//! - `sync`: drain the pending queue against the endpoint
//! - `pending`: list queued activities with monthly totals
//! - `recover`: inspect or discard the snapshot of an interrupted recording

mod logging;
mod replay;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use stride_core::session::{discard_snapshot, load_snapshot};
use stride_core::{
    load_engine_config, summarize_by_month, ConnectivityState, EngineConfig, EngineDeps,
    FileStore, HttpActivitySink, KeyValueStore, ManualClock, ManualLocationProvider, NetworkKind,
    PendingActivity, PendingQueue, PermissionStatus, SessionEnd, StorageConfig, StrideEngine,
    StrideError, SyncEngine, SyncOutcome, WatchNetworkMonitor,
};

const USER_ENV: &str = "STRIDE_USER_ID";

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Record, classify and sync walking/running activities")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to $STRIDE_HOME or ~/.stride)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Engine config file (defaults to <data-dir>/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded track through a live session and queue the activity
    Record {
        /// NDJSON file with one fix per line
        #[arg(long, value_name = "FILE")]
        track: PathBuf,

        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// Deliver queued activities
    Sync {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    /// List queued activities
    Pending {
        /// User id (falls back to $STRIDE_USER_ID)
        #[arg(long)]
        user: Option<String>,
    },

    /// Inspect the snapshot left by an interrupted recording
    Recover {
        /// Delete the snapshot instead of showing it
        #[arg(long)]
        discard: bool,
    },
}

#[derive(clap::Args)]
struct RemoteArgs {
    /// User id (falls back to $STRIDE_USER_ID)
    #[arg(long)]
    user: Option<String>,

    /// Connectivity to report to the engine
    #[arg(long, value_enum, default_value = "wifi")]
    network: NetworkArg,

    /// Override the endpoint from the config file
    #[arg(long, value_name = "URL")]
    endpoint: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum NetworkArg {
    Wifi,
    Cellular,
    None,
}

impl NetworkArg {
    fn state(self) -> ConnectivityState {
        match self {
            NetworkArg::Wifi => ConnectivityState::online(NetworkKind::Wifi),
            NetworkArg::Cellular => ConnectivityState::online(NetworkKind::Cellular),
            NetworkArg::None => ConnectivityState::OFFLINE,
        }
    }
}

struct Context {
    storage: StorageConfig,
    config: EngineConfig,
    store: Arc<dyn KeyValueStore>,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, String> {
        let storage = match &cli.data_dir {
            Some(dir) => StorageConfig::with_root(dir.clone()),
            None => StorageConfig::resolve()?,
        };
        let config_path = cli.config.clone().unwrap_or_else(|| storage.config_file());
        let config = load_engine_config(&config_path)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&storage));
        Ok(Self {
            storage,
            config,
            store,
        })
    }

    fn sink(&self, endpoint: Option<&str>) -> Arc<HttpActivitySink> {
        let endpoint = endpoint.unwrap_or(&self.config.sync.endpoint);
        Arc::new(HttpActivitySink::new(
            endpoint,
            self.config.sync.request_timeout(),
        ))
    }
}

fn resolve_user(flag: Option<String>) -> Result<String, String> {
    flag.or_else(|| env::var(USER_ENV).ok())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or_else(|| String::from(StrideError::MissingUser) + "; pass --user or set " + USER_ENV)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let ctx = match Context::load(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("stride: {e}");
            std::process::exit(2);
        }
    };
    let _logging_guard = logging::init(&ctx.storage.logs_dir());

    let result = match cli.command {
        Commands::Record { track, remote } => record(&ctx, &track, remote).await,
        Commands::Sync { remote } => sync(&ctx, remote).await,
        Commands::Pending { user } => pending(&ctx, user),
        Commands::Recover { discard } => recover(&ctx, discard),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "stride failed");
        std::process::exit(1);
    }
}

async fn record(ctx: &Context, track_path: &Path, remote: RemoteArgs) -> Result<(), String> {
    let user_id = resolve_user(remote.user)?;
    let track = replay::load_track(track_path)?;

    let clock = Arc::new(ManualClock::new(track[0].timestamp));
    let location = Arc::new(ManualLocationProvider::new(PermissionStatus::Granted));
    let network = Arc::new(WatchNetworkMonitor::new(remote.network.state()));

    let engine = StrideEngine::init(
        ctx.config.clone(),
        EngineDeps {
            store: ctx.store.clone(),
            location: location.clone(),
            network,
            sink: ctx.sink(remote.endpoint.as_deref()),
            clock: clock.clone(),
            user_id,
        },
    );

    let outcome = record_track(&engine, &clock, &location, &track).await;
    if outcome.is_ok() && remote.network.state().is_usable() {
        report_sync(drain(&engine).await);
    }
    let sync = engine.sync_engine().clone();
    engine.shutdown().await;
    let pending = sync.pending_len();

    if let Some(record) = outcome? {
        print_record(&record);
    }
    println!("{pending} pending");
    Ok(())
}

async fn record_track(
    engine: &StrideEngine,
    clock: &ManualClock,
    location: &ManualLocationProvider,
    track: &[stride_core::Sample],
) -> Result<Option<PendingActivity>, String> {
    engine.start_session().await?;
    let pushed = replay::replay(clock, location, track);
    tracing::info!(pushed, total = track.len(), "Track replayed");

    match engine.stop_session().await {
        Ok(record) => Ok(Some(record)),
        Err(StrideError::InvalidTransition { .. })
            if matches!(engine.view().end, Some(SessionEnd::Aborted(_))) =>
        {
            println!("Recording discarded: sustained vehicle speed");
            Ok(None)
        }
        Err(StrideError::NotQueued { record, source }) => {
            print_record(&record);
            Err(format!(
                "Activity not queued ({source}); its snapshot is kept, see `stride recover`"
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Runs a pass on this task, waiting out any pass the scheduler has in
/// flight so the record just queued is covered.
async fn drain(engine: &StrideEngine) -> SyncOutcome {
    loop {
        match engine.sync_now().await {
            SyncOutcome::AlreadyRunning => tokio::time::sleep(Duration::from_millis(50)).await,
            outcome => return outcome,
        }
    }
}

async fn sync(ctx: &Context, remote: RemoteArgs) -> Result<(), String> {
    let user_id = resolve_user(remote.user)?;
    let engine = SyncEngine::new(
        user_id,
        ctx.store.clone(),
        ctx.sink(remote.endpoint.as_deref()),
        Arc::new(WatchNetworkMonitor::new(remote.network.state())),
        &ctx.config.sync,
    );
    report_sync(engine.sync().await);
    println!("{} pending", engine.pending_len());
    Ok(())
}

fn pending(ctx: &Context, user: Option<String>) -> Result<(), String> {
    let user_id = resolve_user(user)?;
    let queue = PendingQueue::load(ctx.store.clone(), &user_id);

    println!("{} pending for {}", queue.len(), user_id);
    for record in queue.records() {
        print_record(record);
    }

    let months = summarize_by_month(queue.records());
    if !months.is_empty() {
        println!("By month:");
        for month in months {
            println!(
                "  {}  {} activities  {:.2} km  {} s",
                month.month, month.total_activities, month.total_distance, month.total_time
            );
        }
    }
    Ok(())
}

fn recover(ctx: &Context, discard: bool) -> Result<(), String> {
    let Some(snapshot) = load_snapshot(ctx.store.as_ref()) else {
        println!("No interrupted recording");
        return Ok(());
    };

    if discard {
        discard_snapshot(ctx.store.as_ref())?;
        println!("Discarded interrupted recording");
        return Ok(());
    }

    let json = serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?;
    println!(
        "Interrupted recording started {}: {:.3} km, {} s, {} points",
        snapshot.started_at.to_rfc3339(),
        snapshot.total_distance_km,
        snapshot.elapsed_seconds,
        snapshot.route.len()
    );
    if let Err(reason) = snapshot.check_consistency() {
        println!("Warning: {reason}");
    }
    println!("{json}");
    Ok(())
}

fn report_sync(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(report) => println!(
            "Synced: {} delivered, {} already delivered, {} failed",
            report.delivered, report.already_delivered, report.failed
        ),
        SyncOutcome::AlreadyRunning => println!("Sync already running"),
        SyncOutcome::Offline => println!("Offline; nothing sent"),
        SyncOutcome::NoUser => println!("No user; nothing sent"),
    }
}

fn print_record(record: &PendingActivity) {
    let status = match record.invalid_reason {
        Some(reason) => format!("{}/{}", record.status.as_str(), reason.as_str()),
        None => record.status.as_str().to_string(),
    };
    println!(
        "  {}  {}  {:.2} km  {} s  {:.2} km/h  {}  {}",
        record.id,
        record.occurred_at.format("%Y-%m-%d %H:%M"),
        record.distance_km,
        record.duration_sec,
        record.avg_speed_kmh,
        status,
        record.save_method.as_str()
    );
}
