//! Core library for exsync – mirrors a local directory tree into a remote
//! document store, once in bulk and then incrementally as files change.

mod config;
mod debounce;
mod error;
mod file_op;
mod filter;
mod local;
mod memory;
mod mime;
mod reconciler;
mod remote;
mod task;
mod utils;

#[cfg(test)]
mod test_support;

pub use config::{Pattern, RemoteCfg, SyncConfig};
pub use debounce::{DebouncerStats, EventDebouncer, MoveQueue};
pub use error::{RemoteFault, Result, SyncError};
pub use file_op::{event_to_ops, FsEvent, PendingMove};
pub use filter::PathFilter;
pub use local::{walk, LocalEntry};
pub use memory::{MemoryStore, RemoteCall, StoredDocument};
pub use mime::{MimeResolver, FALLBACK_MIME};
pub use reconciler::{is_remote_newer, Outcome, Reconciler, SkipReason, SyncReport};
pub use remote::{CollectionListing, DocumentInfo, RemoteEntry, RemotePath, RemoteStore, ResourceInfo};
pub use task::{run_sync_up, run_watch, SyncSession, SyncTaskHandle, TaskCommand, TaskState};
pub use utils::PathMapper;
