//! Decides and issues the remote actions that make the store mirror the
//! local tree.
//!
//! Every action takes a local path, maps it onto the store and reports an
//! [`Outcome`]. Faults never escape an action: they are logged and counted,
//! and the caller moves on to the next entry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{RemoteFault, Result, SyncError};
use crate::filter::PathFilter;
use crate::local::{self, LocalEntry};
use crate::mime::MimeResolver;
use crate::remote::{RemoteEntry, RemotePath, RemoteStore};
use crate::utils::PathMapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The collection is already there.
    Exists,
    /// The stored document is newer than the local file.
    RemoteNewer,
    /// Nothing to remove.
    Missing,
    Filtered,
    OutsideRoot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Uploaded,
    Removed,
    Skipped(SkipReason),
    Failed,
}

/// Tally of the outcomes of one full sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub uploaded: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SyncReport {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Uploaded => self.uploaded += 1,
            Outcome::Removed => self.removed += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    /// Number of actions that changed the store.
    pub fn mutations(&self) -> usize {
        self.created + self.uploaded + self.removed
    }
}

pub struct Reconciler<R: RemoteStore> {
    remote: Arc<R>,
    mapper: PathMapper,
    filter: PathFilter,
    mime: MimeResolver,
    skip_collections: Vec<String>,
    permissions: u32,
}

impl<R: RemoteStore> Reconciler<R> {
    /// `local_root` should already be canonical so that watcher paths strip cleanly.
    pub fn new(cfg: &SyncConfig, local_root: PathBuf, remote: Arc<R>) -> Self {
        Self {
            remote,
            mapper: PathMapper::new(local_root, RemotePath::new(&cfg.base_collection)),
            filter: PathFilter::new(&cfg.include, &cfg.exclude),
            mime: MimeResolver::new(&cfg.mime_types),
            skip_collections: cfg.skip_collections.clone(),
            permissions: cfg.permissions,
        }
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Create the base collection when missing. Failure here is fatal for a run.
    pub async fn ensure_base(&self) -> Result<()> {
        let base = self.mapper.base();
        let fatal = |fault: RemoteFault| SyncError::BaseCollection {
            path: base.to_string(),
            fault,
        };
        if self.remote.collection_exists(base).await.map_err(fatal)? {
            debug!(collection = %base, "base collection present");
            return Ok(());
        }
        info!(collection = %base, "creating base collection");
        self.remote.create_collection(base).await.map_err(fatal)
    }

    fn target(&self, local: &Path, is_dir: bool) -> std::result::Result<RemotePath, SkipReason> {
        let rel = self.mapper.relative(local).ok_or(SkipReason::OutsideRoot)?;
        let admitted = if is_dir {
            self.filter.check_dir(&rel)
        } else {
            self.filter.check(&rel)
        };
        if !admitted {
            return Err(SkipReason::Filtered);
        }
        self.mapper.to_remote(local).ok_or(SkipReason::OutsideRoot)
    }

    pub async fn ensure_directory(&self, local: &Path) -> Outcome {
        let path = match self.target(local, true) {
            Ok(p) => p,
            Err(reason) => return skipped(local, reason),
        };
        match self.remote.collection_exists(&path).await {
            Ok(true) => {
                debug!(collection = %path, "already in store: skipping");
                Outcome::Skipped(SkipReason::Exists)
            }
            Ok(false) => match self.remote.create_collection(&path).await {
                Ok(()) => {
                    info!(collection = %path, "not in store: created");
                    Outcome::Created
                }
                Err(fault) => failed(&path, "create collection", &fault),
            },
            Err(fault) => failed(&path, "create collection", &fault),
        }
    }

    /// Upload `local` unless the store already holds a newer copy.
    pub async fn sync_file(&self, local: &Path) -> Outcome {
        let path = match self.target(local, false) {
            Ok(p) => p,
            Err(reason) => return skipped(local, reason),
        };
        let local_modified = match tokio::fs::metadata(local).await.and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => return failed(&path, "sync", &SyncError::local_io(local, e)),
        };
        let remote_modified = match self.remote.describe_resource(&path).await {
            Ok(info) => info.map(|i| i.modified),
            Err(fault) => return failed(&path, "sync", &fault),
        };
        if is_remote_newer(remote_modified, local_modified) {
            debug!(document = %path, "newer in store: skipping");
            return Outcome::Skipped(SkipReason::RemoteNewer);
        }
        match self.upload(local, &path).await {
            Ok(()) => {
                if remote_modified.is_none() {
                    info!(document = %path, "not in store: copied");
                } else {
                    info!(document = %path, "newer locally: synced");
                }
                Outcome::Uploaded
            }
            Err(e) => failed(&path, "sync", &e),
        }
    }

    async fn upload(&self, local: &Path, path: &RemotePath) -> Result<()> {
        let bytes = tokio::fs::read(local)
            .await
            .map_err(|e| SyncError::local_io(local, e))?;
        let mime = self.mime.resolve(local);
        self.remote.upload_document(bytes, path, &mime, true).await?;
        self.remote.set_permissions(path, self.permissions).await?;
        Ok(())
    }

    /// Remove the collection mapped from `local`, if the store has it.
    pub async fn remove_directory(&self, local: &Path) -> Outcome {
        let Some(path) = self.mapper.to_remote(local) else {
            return skipped(local, SkipReason::OutsideRoot);
        };
        if &path == self.mapper.base() {
            return skipped(local, SkipReason::OutsideRoot);
        }
        match self.remote.collection_exists(&path).await {
            Ok(false) => Outcome::Skipped(SkipReason::Missing),
            Ok(true) => match self.remote.remove_collection(&path).await {
                Ok(()) => {
                    info!(collection = %path, "moved/deleted: removed old");
                    Outcome::Removed
                }
                Err(fault) => failed(&path, "remove collection", &fault),
            },
            Err(fault) => failed(&path, "remove collection", &fault),
        }
    }

    /// Remove the document mapped from `local`, if the store has it.
    pub async fn remove_file(&self, local: &Path) -> Outcome {
        let Some(path) = self.mapper.to_remote(local) else {
            return skipped(local, SkipReason::OutsideRoot);
        };
        match self.remote.describe_resource(&path).await {
            Ok(None) => Outcome::Skipped(SkipReason::Missing),
            Ok(Some(_)) => match self.remote.remove_document(&path).await {
                Ok(()) => {
                    info!(document = %path, "moved/deleted: removed old");
                    Outcome::Removed
                }
                Err(fault) => failed(&path, "remove document", &fault),
            },
            Err(fault) => failed(&path, "remove document", &fault),
        }
    }

    /// Pre-order listing of everything below the base collection.
    ///
    /// Each collection yields its documents, then each child collection
    /// followed by that child's whole subtree. Collections named in the skip
    /// list are left out together with their contents. A sub-collection that
    /// cannot be listed is logged and its subtree omitted.
    pub async fn list_remote_entries(&self) -> std::result::Result<Vec<RemoteEntry>, RemoteFault> {
        let base = self.mapper.base().clone();
        let mut entries = Vec::new();
        // `None` marks the base, which is listed but not yielded
        let mut stack: Vec<Option<RemotePath>> = vec![None];
        while let Some(next) = stack.pop() {
            let coll = match next {
                None => base.clone(),
                Some(path) => {
                    entries.push(RemoteEntry::Directory { path: path.clone() });
                    path
                }
            };
            let listing = match self.remote.list_collection(&coll).await {
                Ok(listing) => listing,
                Err(fault) if coll == base => return Err(fault),
                Err(fault) => {
                    warn!(collection = %coll, "cannot list collection: {fault}");
                    continue;
                }
            };
            for doc in listing.documents {
                entries.push(RemoteEntry::Document {
                    path: coll.join(&doc.name),
                    modified: doc.modified,
                });
            }
            for name in listing.collections.iter().rev() {
                if self.skip_collections.iter().any(|s| s == name) {
                    continue;
                }
                stack.push(Some(coll.join(name)));
            }
        }
        Ok(entries)
    }

    /// Remove remote entries without a local counterpart, then push the local tree.
    pub async fn full_sync(&self) -> SyncReport {
        let mut report = SyncReport::default();
        self.cleanup(&mut report).await;
        self.populate(&mut report).await;
        info!(
            created = report.created,
            uploaded = report.uploaded,
            removed = report.removed,
            skipped = report.skipped,
            failed = report.failed,
            "full sync finished"
        );
        report
    }

    async fn cleanup(&self, report: &mut SyncReport) {
        let entries = match self.list_remote_entries().await {
            Ok(entries) => entries,
            Err(fault) => {
                warn!("cannot walk the store, skipping cleanup: {fault}");
                report.record(Outcome::Failed);
                return;
            }
        };
        let mut removed: Vec<RemotePath> = Vec::new();
        for entry in entries {
            // gone together with an ancestor collection
            if removed.iter().any(|r| entry.path().is_within(r)) {
                continue;
            }
            let Some(local) = self.mapper.to_local(entry.path()) else {
                continue;
            };
            let outcome = match &entry {
                RemoteEntry::Document { .. } => {
                    if is_kind(&local, false).await {
                        continue;
                    }
                    self.remove_file(&local).await
                }
                RemoteEntry::Directory { path } => {
                    if is_kind(&local, true).await {
                        continue;
                    }
                    let outcome = self.remove_directory(&local).await;
                    if outcome == Outcome::Removed {
                        removed.push(path.clone());
                    }
                    outcome
                }
            };
            report.record(outcome);
        }
    }

    async fn populate(&self, report: &mut SyncReport) {
        let root = self.mapper.local_root().to_path_buf();
        let filter = self.filter.clone();
        let walked = tokio::task::spawn_blocking(move || {
            local::walk(&root, &filter).collect::<Vec<LocalEntry>>()
        })
        .await;
        let entries = match walked {
            Ok(entries) => entries,
            Err(e) => {
                warn!("local walk aborted: {e}");
                report.record(Outcome::Failed);
                return;
            }
        };
        for entry in entries {
            let outcome = if entry.is_dir {
                self.ensure_directory(&entry.path).await
            } else {
                self.sync_file(&entry.path).await
            };
            report.record(outcome);
        }
    }
}

/// Remote wins only when strictly newer.
pub fn is_remote_newer(remote: Option<SystemTime>, local: SystemTime) -> bool {
    matches!(remote, Some(r) if r > local)
}

async fn is_kind(path: &Path, dir: bool) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(m) if dir => m.is_dir(),
        Ok(m) => m.is_file(),
        Err(_) => false,
    }
}

fn skipped(local: &Path, reason: SkipReason) -> Outcome {
    debug!(path = %local.display(), ?reason, "skipping");
    Outcome::Skipped(reason)
}

fn failed(path: &RemotePath, action: &str, err: &dyn std::error::Error) -> Outcome {
    warn!(target_path = %path, "{action} failed: {err}");
    Outcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Pattern, RemoteCfg};
    use crate::memory::{MemoryStore, RemoteCall};
    use crate::test_support::write_old;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const BASE: &str = "/db/apps/site";

    fn p(s: &str) -> RemotePath {
        RemotePath::new(s)
    }

    fn setup() -> (TempDir, Arc<MemoryStore>, Reconciler<MemoryStore>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = SyncConfig::new(&root, BASE, RemoteCfg::Memory);
        let store = Arc::new(MemoryStore::new());
        store.seed_collection(&p(BASE));
        let rec = Reconciler::new(&cfg, root, store.clone());
        (dir, store, rec)
    }

    fn root(rec: &Reconciler<MemoryStore>) -> PathBuf {
        rec.mapper().local_root().to_path_buf()
    }

    #[tokio::test]
    async fn creates_directory_then_uploads_file() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        fs::create_dir(root.join("a")).unwrap();
        write_old(&root.join("a/x.xml"), "<x/>");

        let report = rec.full_sync().await;

        assert_eq!(
            store.calls(),
            vec![
                RemoteCall::CreateCollection(p("/db/apps/site/a")),
                RemoteCall::Upload {
                    path: p("/db/apps/site/a/x.xml"),
                    mime: "application/xml".into()
                },
                RemoteCall::SetPermissions {
                    path: p("/db/apps/site/a/x.xml"),
                    mode: 0o755
                },
            ]
        );
        let doc = store.document(&p("/db/apps/site/a/x.xml")).unwrap();
        assert_eq!(doc.bytes, b"<x/>");
        assert_eq!(doc.mode, Some(0o755));
        assert_eq!(report.created, 1);
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn removes_orphaned_document_only() {
        let (_dir, store, rec) = setup();
        store.seed_document(&p("/db/apps/site/b.xml"), "<b/>", SystemTime::now());

        let report = rec.full_sync().await;

        assert_eq!(store.calls(), vec![RemoteCall::RemoveDocument(p("/db/apps/site/b.xml"))]);
        assert!(store.document(&p("/db/apps/site/b.xml")).is_none());
        assert_eq!(report.removed, 1);
        assert_eq!(report.mutations(), 1);
    }

    #[tokio::test]
    async fn second_sync_is_a_no_op() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        fs::create_dir_all(root.join("a/b")).unwrap();
        write_old(&root.join("a/x.xml"), "<x/>");
        write_old(&root.join("a/b/y.xql"), "1 + 1");
        write_old(&root.join("index.html"), "<html/>");
        store.seed_document(&p("/db/apps/site/stale.xml"), "<s/>", SystemTime::now());

        let first = rec.full_sync().await;
        assert!(first.mutations() > 0);
        store.take_calls();

        let second = rec.full_sync().await;
        assert_eq!(second.mutations(), 0);
        assert_eq!(second.failed, 0);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn newer_remote_document_is_not_overwritten() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        write_old(&root.join("x.xml"), "<local/>");
        store.seed_document(&p("/db/apps/site/x.xml"), "<remote/>", SystemTime::now());

        let outcome = rec.sync_file(&root.join("x.xml")).await;

        assert_eq!(outcome, Outcome::Skipped(SkipReason::RemoteNewer));
        assert!(store.calls().is_empty());
        assert_eq!(store.document(&p("/db/apps/site/x.xml")).unwrap().bytes, b"<remote/>");
    }

    #[tokio::test]
    async fn older_remote_document_is_replaced() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        write_old(&root.join("x.xml"), "<local/>");
        store.seed_document(&p("/db/apps/site/x.xml"), "<remote/>", SystemTime::UNIX_EPOCH);

        assert_eq!(rec.sync_file(&root.join("x.xml")).await, Outcome::Uploaded);
        assert_eq!(store.document(&p("/db/apps/site/x.xml")).unwrap().bytes, b"<local/>");
    }

    #[test]
    fn equal_timestamps_favour_local() {
        let t = SystemTime::now();
        assert!(!is_remote_newer(Some(t), t));
        assert!(!is_remote_newer(None, t));
        assert!(is_remote_newer(Some(t + Duration::from_secs(1)), t));
    }

    #[tokio::test]
    async fn cleanup_runs_before_populate() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        // remote has `a` as a document, locally `a` is now a directory
        store.seed_document(&p("/db/apps/site/a"), "old", SystemTime::now());
        fs::create_dir(root.join("a")).unwrap();
        write_old(&root.join("a/x.xml"), "<x/>");

        rec.full_sync().await;

        let calls = store.calls();
        assert_eq!(calls[0], RemoteCall::RemoveDocument(p("/db/apps/site/a")));
        assert_eq!(calls[1], RemoteCall::CreateCollection(p("/db/apps/site/a")));
        assert!(store.document(&p("/db/apps/site/a/x.xml")).is_some());
    }

    #[tokio::test]
    async fn removed_collection_takes_its_subtree() {
        let (_dir, store, rec) = setup();
        store.seed_document(&p("/db/apps/site/gone/deep/x.xml"), "x", SystemTime::now());
        store.seed_document(&p("/db/apps/site/gone/y.xml"), "y", SystemTime::now());

        let report = rec.full_sync().await;

        assert_eq!(store.calls(), vec![RemoteCall::RemoveCollection(p("/db/apps/site/gone"))]);
        assert_eq!(report.removed, 1);
        assert_eq!(store.paths(), vec![p("/db"), p("/db/apps"), p(BASE)]);
    }

    #[tokio::test]
    async fn remote_walk_is_pre_order_and_skips_db() {
        let (_dir, store, rec) = setup();
        let t = SystemTime::UNIX_EPOCH;
        store.seed_document(&p("/db/apps/site/top.xml"), "", t);
        store.seed_document(&p("/db/apps/site/a/x.xml"), "", t);
        store.seed_document(&p("/db/apps/site/a/inner/y.xml"), "", t);
        store.seed_document(&p("/db/apps/site/b/z.xml"), "", t);
        store.seed_document(&p("/db/apps/site/db/hidden.xml"), "", t);

        let paths: Vec<String> = rec
            .list_remote_entries()
            .await
            .unwrap()
            .iter()
            .map(|e| match e {
                RemoteEntry::Document { path, .. } => format!("doc {path}"),
                RemoteEntry::Directory { path } => format!("dir {path}"),
            })
            .collect();

        assert_eq!(
            paths,
            vec![
                "doc /db/apps/site/top.xml",
                "dir /db/apps/site/a",
                "doc /db/apps/site/a/x.xml",
                "dir /db/apps/site/a/inner",
                "doc /db/apps/site/a/inner/y.xml",
                "dir /db/apps/site/b",
                "doc /db/apps/site/b/z.xml",
            ]
        );
    }

    #[tokio::test]
    async fn faults_do_not_stop_the_run() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        write_old(&root.join("bad.xml"), "<bad/>");
        write_old(&root.join("good.xml"), "<good/>");
        store.fail_on(&p("/db/apps/site/bad.xml"));

        let report = rec.full_sync().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.uploaded, 1);
        assert!(store.document(&p("/db/apps/site/good.xml")).is_some());
    }

    #[tokio::test]
    async fn unreadable_local_file_is_a_failure() {
        let (_dir, store, rec) = setup();
        let missing = root(&rec).join("vanished.xml");
        assert_eq!(rec.sync_file(&missing).await, Outcome::Failed);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn removals_are_existence_checked() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        assert_eq!(rec.remove_file(&root.join("nope.xml")).await, Outcome::Skipped(SkipReason::Missing));
        assert_eq!(rec.remove_directory(&root.join("nope")).await, Outcome::Skipped(SkipReason::Missing));
        assert_eq!(rec.remove_directory(&root).await, Outcome::Skipped(SkipReason::OutsideRoot));
        assert!(store.calls().is_empty());

        store.seed_collection(&p("/db/apps/site/d"));
        assert_eq!(rec.remove_directory(&root.join("d")).await, Outcome::Removed);
    }

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let (_dir, store, rec) = setup();
        let d = root(&rec).join("d");
        assert_eq!(rec.ensure_directory(&d).await, Outcome::Created);
        assert_eq!(rec.ensure_directory(&d).await, Outcome::Skipped(SkipReason::Exists));
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn excluded_and_foreign_paths_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut cfg = SyncConfig::new(&root, BASE, RemoteCfg::Memory);
        cfg.exclude = vec![Pattern("*.tmp".into())];
        let store = Arc::new(MemoryStore::new());
        let rec = Reconciler::new(&cfg, root.clone(), store.clone());
        write_old(&root.join("x.tmp"), "scratch");

        assert_eq!(rec.sync_file(&root.join("x.tmp")).await, Outcome::Skipped(SkipReason::Filtered));
        assert_eq!(
            rec.sync_file(Path::new("/somewhere/else.xml")).await,
            Outcome::Skipped(SkipReason::OutsideRoot)
        );
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn ensure_base_creates_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = SyncConfig::new(&root, BASE, RemoteCfg::Memory);
        let store = Arc::new(MemoryStore::new());
        let rec = Reconciler::new(&cfg, root, store.clone());

        rec.ensure_base().await.unwrap();
        rec.ensure_base().await.unwrap();
        assert_eq!(store.calls(), vec![RemoteCall::CreateCollection(p(BASE))]);
    }

    #[tokio::test]
    async fn ensure_base_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let cfg = SyncConfig::new(&root, BASE, RemoteCfg::Memory);
        let store = Arc::new(MemoryStore::new());
        store.fail_on(&p(BASE));
        let rec = Reconciler::new(&cfg, root, store);

        assert!(matches!(rec.ensure_base().await, Err(SyncError::BaseCollection { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_file_names_settle() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_dir, store, rec) = setup();
        let root = root(&rec);
        write_old(&root.join(OsStr::from_bytes(b"bad\xff.xml")), "<bad/>");
        write_old(&root.join("good.xml"), "<good/>");

        let first = rec.full_sync().await;
        assert_eq!(first.uploaded, 1);
        assert_eq!(first.failed, 0);
        store.take_calls();

        let second = rec.full_sync().await;
        assert_eq!(second.mutations(), 0);
        assert!(store.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_directory_becomes_a_collection() {
        let (_dir, store, rec) = setup();
        let root = root(&rec);
        let target = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(target.path(), root.join("linked")).unwrap();

        let first = rec.full_sync().await;
        assert_eq!(first.created, 1);
        assert_eq!(first.failed, 0);
        assert!(store.has_collection(&p("/db/apps/site/linked")));

        let second = rec.full_sync().await;
        assert_eq!(second.mutations(), 0);
        assert_eq!(second.failed, 0);
    }
}
