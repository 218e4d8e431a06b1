use crate::{
    config::SyncConfig,
    debounce::{DebouncerStats, EventDebouncer},
    error::{Result, SyncError},
    file_op::{event_to_ops, FsEvent},
    filter::PathFilter,
    reconciler::{Reconciler, SyncReport},
    remote::RemoteStore,
    utils::PathMapper,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch::Ref;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Public handle returned to callers for controlling a running watch task.
#[derive(Debug)]
pub struct SyncTaskHandle {
    ctrl_tx: mpsc::Sender<TaskCommand>,
    state_rx: watch::Receiver<TaskState>,
    initial: SyncReport,
    join: JoinHandle<DebouncerStats>,
}

impl SyncTaskHandle {
    pub fn stop(&self) {
        let _ = self.ctrl_tx.try_send(TaskCommand::Stop);
    }

    pub fn state(&self) -> Ref<'_, TaskState> {
        self.state_rx.borrow()
    }

    /// Report of the full sync that ran before watching started.
    pub fn initial_report(&self) -> SyncReport {
        self.initial
    }

    /// Wait for the task to wind down after `stop`.
    pub async fn join(self) -> Result<DebouncerStats> {
        Ok(self.join.await?)
    }
}

#[derive(Debug, Clone)]
pub enum TaskCommand {
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Syncing,
    Watching,
    Error(String),
}

/// A connected sync run: local root resolved, base collection in place.
pub struct SyncSession<R: RemoteStore> {
    cfg: SyncConfig,
    reconciler: Arc<Reconciler<R>>,
}

impl<R: RemoteStore> SyncSession<R> {
    /// Validate the config and establish the base collection.
    /// This is the only step whose failure aborts a run.
    pub async fn connect(cfg: SyncConfig, remote: Arc<R>) -> Result<Self> {
        cfg.validate()?;
        let root = cfg
            .local
            .canonicalize()
            .map_err(|e| SyncError::local_io(&cfg.local, e))?;
        let reconciler = Arc::new(Reconciler::new(&cfg, root, remote));
        info!(collection = %reconciler.mapper().base(), "checking base collection");
        reconciler.ensure_base().await?;
        Ok(Self { cfg, reconciler })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<R>> {
        &self.reconciler
    }

    pub async fn sync_up(&self) -> SyncReport {
        info!(local = %self.reconciler.mapper().local_root().display(), "syncing initial state");
        self.reconciler.full_sync().await
    }

    /// Run the initial sync, then follow the local tree until stopped.
    pub async fn watch(self) -> Result<SyncTaskHandle> {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(TaskState::Syncing);
        let initial = self.sync_up().await;

        let (op_tx, op_rx) = mpsc::channel::<FsEvent>(1024);
        let mapper = self.reconciler.mapper().clone();
        let watcher = match spawn_watcher(&mapper, self.reconciler.filter().clone(), op_tx) {
            Ok(w) => w,
            Err(e) => {
                let _ = state_tx.send(TaskState::Error(format!("watch error: {e}")));
                return Err(e);
            }
        };
        info!(local = %mapper.local_root().display(), "watching folder for changes");
        let _ = state_tx.send(TaskState::Watching);

        let debouncer = EventDebouncer::new(self.reconciler.clone(), self.cfg.debounce());
        let root = mapper.local_root().to_path_buf();
        let join = tokio::spawn(async move {
            let stats = debouncer.run(op_rx, ctrl_rx).await;
            unwatch(watcher, &root);
            info!(
                events = stats.events,
                flushes = stats.flushes,
                moves = stats.moves,
                "stopped watching"
            );
            let _ = state_tx.send(TaskState::Idle);
            stats
        });
        Ok(SyncTaskHandle {
            ctrl_tx,
            state_rx,
            initial,
            join,
        })
    }
}

/// Establish the base collection and mirror the local tree once.
pub async fn run_sync_up<R: RemoteStore>(cfg: SyncConfig, remote: Arc<R>) -> Result<SyncReport> {
    let session = SyncSession::connect(cfg, remote).await?;
    Ok(session.sync_up().await)
}

/// `run_sync_up`, then keep the store in step with local changes until the
/// returned handle is stopped.
pub async fn run_watch<R: RemoteStore>(cfg: SyncConfig, remote: Arc<R>) -> Result<SyncTaskHandle> {
    SyncSession::connect(cfg, remote).await?.watch().await
}

fn spawn_watcher(
    mapper: &PathMapper,
    filter: PathFilter,
    op_tx: mpsc::Sender<FsEvent>,
) -> Result<RecommendedWatcher> {
    let path = mapper.local_root().to_path_buf();
    let mapper = mapper.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for op in event_to_ops(event) {
                    // a move passes when either end is tracked
                    let pass = op.paths().iter().any(|p| match mapper.relative(p) {
                        Some(rel) if rel.is_empty() => false,
                        Some(rel) => filter.check_dir(&rel),
                        None => false,
                    });
                    if pass && op_tx.blocking_send(op).is_err() {
                        return;
                    }
                }
            }
            Err(e) => error!("watch error: {e}"),
        },
        notify::Config::default(),
    )?;
    watcher.watch(&path, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn unwatch(mut watcher: RecommendedWatcher, path: &Path) {
    if let Err(e) = watcher.unwatch(path) {
        error!("{e}");
    }
}
