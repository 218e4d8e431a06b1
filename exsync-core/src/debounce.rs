//! Turns filesystem notifications into reconciler actions.
//!
//! Creations, modifications and deletions are applied as they arrive. Moves
//! are held back: the first move of a burst opens a debounce window, every
//! move arriving before it closes joins the same batch, and the batch is
//! then applied directories first so that a moved directory's collection
//! exists before the files inside it are synced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::file_op::{FsEvent, PendingMove};
use crate::reconciler::Reconciler;
use crate::remote::RemoteStore;
use crate::task::TaskCommand;

/// Moves collected during one debounce window.
#[derive(Debug, Default)]
pub struct MoveQueue {
    pending: Vec<PendingMove>,
}

impl MoveQueue {
    /// Returns `true` when this push opened a new window (the queue was empty).
    pub fn push(&mut self, mv: PendingMove) -> bool {
        let opened = self.pending.is_empty();
        self.pending.push(mv);
        opened
    }

    /// Swap the batch out, directory moves first, arrival order otherwise.
    pub fn take_ordered(&mut self) -> Vec<PendingMove> {
        let mut batch = std::mem::take(&mut self.pending);
        batch.sort_by_key(|mv| !mv.is_dir);
        batch
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebouncerStats {
    pub events: usize,
    pub flushes: usize,
    pub moves: usize,
}

pub struct EventDebouncer<R: RemoteStore> {
    reconciler: Arc<Reconciler<R>>,
    window: Duration,
    queue: MoveQueue,
    stats: DebouncerStats,
}

impl<R: RemoteStore> EventDebouncer<R> {
    pub fn new(reconciler: Arc<Reconciler<R>>, window: Duration) -> Self {
        Self {
            reconciler,
            window,
            queue: MoveQueue::default(),
            stats: DebouncerStats::default(),
        }
    }

    /// Process events until `Stop` arrives or the event channel closes.
    /// Moves still waiting for their window are flushed before returning.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<FsEvent>,
        mut ctrl_rx: mpsc::Receiver<TaskCommand>,
    ) -> DebouncerStats {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                Some(cmd) = ctrl_rx.recv() => {
                    match cmd {
                        TaskCommand::Stop => break,
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if self.handle(event).await {
                        deadline = Some(Instant::now() + self.window);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush().await;
                }
            }
        }
        if !self.queue.is_empty() {
            self.flush().await;
        }
        self.stats
    }

    /// Apply one event. Returns `true` when a move opened a debounce window.
    pub async fn handle(&mut self, event: FsEvent) -> bool {
        self.stats.events += 1;
        let rec = &self.reconciler;
        match event {
            FsEvent::Modified { path } => {
                rec.sync_file(&path).await;
            }
            FsEvent::Created { path, is_dir: true } => {
                rec.ensure_directory(&path).await;
            }
            FsEvent::Created { path, is_dir: false } => {
                rec.sync_file(&path).await;
            }
            FsEvent::Deleted { path, is_dir: true } => {
                rec.remove_directory(&path).await;
            }
            FsEvent::Deleted { path, is_dir: false } => {
                rec.remove_file(&path).await;
            }
            FsEvent::Moved(mv) => {
                debug!(from = %mv.from.display(), to = %mv.to.display(), "move queued");
                return self.queue.push(mv);
            }
        }
        false
    }

    /// Apply every queued move in one ordered pass.
    pub async fn flush(&mut self) {
        let batch = self.queue.take_ordered();
        if batch.is_empty() {
            return;
        }
        self.stats.flushes += 1;
        info!(moves = batch.len(), "applying moves");
        for mv in batch {
            self.stats.moves += 1;
            if mv.is_dir {
                self.reconciler.remove_directory(&mv.from).await;
                self.reconciler.ensure_directory(&mv.to).await;
            } else {
                self.reconciler.remove_file(&mv.from).await;
                self.reconciler.sync_file(&mv.to).await;
            }
        }
    }
}
