use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use exsync_core::{
    run_sync_up, run_watch, MemoryStore, Pattern, RemoteCfg, RemoteStore, SyncConfig, SyncReport,
};
use exsync_remote_fs::DirStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "exsync", version, about = "exsync: mirror a directory into a document store")]
struct Cli {
    /// Path to config file (YAML / JSON); flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Push the local directory to the store, optionally following changes
    SyncUp(SyncUpArgs),
}

#[derive(clap::Args, Debug)]
struct SyncUpArgs {
    /// Keep watching the directory after the initial sync
    #[arg(long)]
    watch: bool,

    /// Local directory to sync
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Base collection: a bare name lands under /db/apps, an absolute path is used as is
    #[arg(short, long)]
    collection: Option<String>,

    /// Root directory of the document store
    #[arg(short, long, env = "EXSYNC_STORE")]
    store: Option<PathBuf>,

    /// Only sync files matching these globs
    #[arg(long)]
    include: Vec<String>,

    /// Never sync paths matching these globs
    #[arg(long)]
    exclude: Vec<String>,

    /// Move debounce window in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Simulate against an empty in-memory store; nothing is written
    #[arg(long)]
    dry_run: bool,
}

fn base_collection(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/db/apps/{name}")
    }
}

fn build_config(config: Option<&PathBuf>, args: &SyncUpArgs) -> Result<SyncConfig> {
    let mut cfg = match config {
        Some(path) => SyncConfig::load(path).with_context(|| format!("read config {}", path.display()))?,
        None => {
            let dir = args.dir.clone().ok_or_else(|| anyhow!("--dir is required without --config"))?;
            let collection = args
                .collection
                .as_deref()
                .ok_or_else(|| anyhow!("--collection is required without --config"))?;
            let remote = match (&args.store, args.dry_run) {
                (_, true) => RemoteCfg::Memory,
                (Some(root), false) => RemoteCfg::Dir { root: root.clone() },
                (None, false) => bail!("--store is required unless --dry-run is given"),
            };
            SyncConfig::new(dir, base_collection(collection), remote)
        }
    };

    if let Some(dir) = &args.dir {
        cfg.local = dir.clone();
    }
    if let Some(collection) = &args.collection {
        cfg.base_collection = base_collection(collection);
    }
    if let Some(root) = &args.store {
        cfg.remote_cfg = RemoteCfg::Dir { root: root.clone() };
    }
    if args.dry_run {
        cfg.remote_cfg = RemoteCfg::Memory;
    }
    if !args.include.is_empty() {
        cfg.include = args.include.iter().cloned().map(Pattern).collect();
    }
    if !args.exclude.is_empty() {
        cfg.exclude = args.exclude.iter().cloned().map(Pattern).collect();
    }
    if let Some(ms) = args.debounce_ms {
        cfg.debounce_ms = ms;
    }
    cfg.watch |= args.watch;
    cfg.validate()?;
    Ok(cfg)
}

fn log_report(report: &SyncReport) {
    info!(
        created = report.created,
        uploaded = report.uploaded,
        removed = report.removed,
        skipped = report.skipped,
        failed = report.failed,
        "initial sync done"
    );
    if report.failed > 0 {
        warn!("{} action(s) failed; they will be retried on the next sync", report.failed);
    }
}

async fn run<R: RemoteStore>(cfg: SyncConfig, store: Arc<R>) -> Result<()> {
    if !cfg.watch {
        let report = run_sync_up(cfg, store).await?;
        log_report(&report);
        return Ok(());
    }

    let handle = run_watch(cfg, store).await?;
    log_report(&handle.initial_report());
    println!("exsync watching... press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("Stopping");
    handle.stop();
    handle.join().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let Command::SyncUp(args) = &cli.command;
    let cfg = build_config(cli.config.as_ref(), args)?;

    match &cfg.remote_cfg {
        RemoteCfg::Dir { root } => {
            let store = DirStore::open(root)
                .await
                .with_context(|| format!("open store {}", root.display()))?;
            run(cfg, Arc::new(store)).await
        }
        RemoteCfg::Memory => {
            info!("dry run: syncing against an empty in-memory store");
            run(cfg, Arc::new(MemoryStore::new())).await
        }
    }
}
