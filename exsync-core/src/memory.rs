//! In-memory `RemoteStore` with a log of every mutating call.
//!
//! Used by the tests and by `--dry-run`, where a sync is simulated against
//! an empty store and only the resulting actions are reported.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, SystemTime};

use crate::error::RemoteFault;
use crate::remote::{CollectionListing, DocumentInfo, RemotePath, RemoteStore, ResourceInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub mode: Option<u32>,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
enum Node {
    Collection,
    Document(StoredDocument),
}

/// A mutating call as it reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateCollection(RemotePath),
    RemoveCollection(RemotePath),
    Upload { path: RemotePath, mime: String },
    RemoveDocument(RemotePath),
    SetPermissions { path: RemotePath, mode: u32 },
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<RemotePath, Node>,
    calls: Vec<RemoteCall>,
    failing: HashSet<RemotePath>,
    last_stamp: Option<SystemTime>,
}

impl Inner {
    fn is_collection(&self, path: &RemotePath) -> bool {
        path.as_str() == "/" || matches!(self.nodes.get(path), Some(Node::Collection))
    }

    fn make_collections(&mut self, path: &RemotePath) {
        let mut chain = Vec::new();
        let mut cur = Some(path.clone());
        while let Some(p) = cur {
            if p.as_str() == "/" {
                break;
            }
            cur = p.parent();
            chain.push(p);
        }
        for p in chain.into_iter().rev() {
            self.nodes.entry(p).or_insert(Node::Collection);
        }
    }

    fn remove_subtree(&mut self, path: &RemotePath) {
        self.nodes.retain(|p, _| p != path && !p.is_within(path));
    }

    // strictly increasing, never behind the wall clock
    fn stamp(&mut self) -> SystemTime {
        let now = SystemTime::now();
        let stamp = match self.last_stamp {
            Some(last) if last >= now => last + Duration::from_nanos(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn check_fault(&self, op: &'static str, path: &RemotePath) -> Result<(), RemoteFault> {
        if self.failing.contains(path) {
            return Err(RemoteFault::new(op, path, "injected fault"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection (and its ancestors) without logging a call.
    pub fn seed_collection(&self, path: &RemotePath) {
        self.inner.lock().make_collections(path);
    }

    /// Add a document without logging a call; missing ancestors are created.
    pub fn seed_document(&self, path: &RemotePath, bytes: impl Into<Vec<u8>>, modified: SystemTime) {
        let mut inner = self.inner.lock();
        if let Some(parent) = path.parent() {
            inner.make_collections(&parent);
        }
        inner.nodes.insert(
            path.clone(),
            Node::Document(StoredDocument {
                bytes: bytes.into(),
                mime: crate::mime::FALLBACK_MIME.to_string(),
                mode: None,
                modified,
            }),
        );
    }

    /// Make every call that targets `path` fail from now on.
    pub fn fail_on(&self, path: &RemotePath) {
        self.inner.lock().failing.insert(path.clone());
    }

    pub fn document(&self, path: &RemotePath) -> Option<StoredDocument> {
        match self.inner.lock().nodes.get(path) {
            Some(Node::Document(doc)) => Some(doc.clone()),
            _ => None,
        }
    }

    pub fn has_collection(&self, path: &RemotePath) -> bool {
        self.inner.lock().is_collection(path)
    }

    /// Every stored path, collections and documents, in sorted order.
    pub fn paths(&self) -> Vec<RemotePath> {
        self.inner.lock().nodes.keys().cloned().collect()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<RemoteCall> {
        std::mem::take(&mut self.inner.lock().calls)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn collection_exists(&self, path: &RemotePath) -> Result<bool, RemoteFault> {
        Ok(self.inner.lock().is_collection(path))
    }

    async fn create_collection(&self, path: &RemotePath) -> Result<(), RemoteFault> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::CreateCollection(path.clone()));
        inner.check_fault("createCollection", path)?;
        if matches!(inner.nodes.get(path), Some(Node::Document(_))) {
            return Err(RemoteFault::new("createCollection", path, "a document has that name"));
        }
        inner.make_collections(path);
        Ok(())
    }

    async fn remove_collection(&self, path: &RemotePath) -> Result<(), RemoteFault> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::RemoveCollection(path.clone()));
        inner.check_fault("removeCollection", path)?;
        if path.as_str() == "/" || !inner.is_collection(path) {
            return Err(RemoteFault::new("removeCollection", path, "no such collection"));
        }
        inner.remove_subtree(path);
        Ok(())
    }

    async fn describe_resource(&self, path: &RemotePath) -> Result<Option<ResourceInfo>, RemoteFault> {
        match self.inner.lock().nodes.get(path) {
            Some(Node::Document(doc)) => Ok(Some(ResourceInfo { modified: doc.modified })),
            _ => Ok(None),
        }
    }

    async fn upload_document(
        &self,
        bytes: Vec<u8>,
        path: &RemotePath,
        mime: &str,
        overwrite: bool,
    ) -> Result<(), RemoteFault> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::Upload {
            path: path.clone(),
            mime: mime.to_string(),
        });
        inner.check_fault("upload", path)?;
        let parent = path
            .parent()
            .ok_or_else(|| RemoteFault::new("upload", path, "cannot store a document at the root"))?;
        if !inner.is_collection(&parent) {
            return Err(RemoteFault::new("upload", path, "parent collection does not exist"));
        }
        match inner.nodes.get(path) {
            Some(Node::Collection) => {
                return Err(RemoteFault::new("upload", path, "a collection has that name"));
            }
            Some(Node::Document(_)) if !overwrite => {
                return Err(RemoteFault::new("upload", path, "document exists"));
            }
            _ => {}
        }
        let modified = inner.stamp();
        inner.nodes.insert(
            path.clone(),
            Node::Document(StoredDocument {
                bytes,
                mime: mime.to_string(),
                mode: None,
                modified,
            }),
        );
        Ok(())
    }

    async fn remove_document(&self, path: &RemotePath) -> Result<(), RemoteFault> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::RemoveDocument(path.clone()));
        inner.check_fault("remove", path)?;
        match inner.nodes.get(path) {
            Some(Node::Document(_)) => {
                inner.nodes.remove(path);
                Ok(())
            }
            _ => Err(RemoteFault::new("remove", path, "no such document")),
        }
    }

    async fn set_permissions(&self, path: &RemotePath, mode: u32) -> Result<(), RemoteFault> {
        let mut inner = self.inner.lock();
        inner.calls.push(RemoteCall::SetPermissions {
            path: path.clone(),
            mode,
        });
        inner.check_fault("setPermissions", path)?;
        match inner.nodes.get_mut(path) {
            Some(Node::Document(doc)) => {
                doc.mode = Some(mode);
                Ok(())
            }
            Some(Node::Collection) => Ok(()),
            None => Err(RemoteFault::new("setPermissions", path, "no such resource")),
        }
    }

    async fn list_collection(&self, path: &RemotePath) -> Result<CollectionListing, RemoteFault> {
        let inner = self.inner.lock();
        inner.check_fault("getCollectionDesc", path)?;
        if !inner.is_collection(path) {
            return Err(RemoteFault::new("getCollectionDesc", path, "no such collection"));
        }
        let mut listing = CollectionListing::default();
        for (p, node) in inner.nodes.iter() {
            if p.parent().as_ref() != Some(path) {
                continue;
            }
            match node {
                Node::Collection => listing.collections.push(p.name().to_string()),
                Node::Document(doc) => listing.documents.push(DocumentInfo {
                    name: p.name().to_string(),
                    modified: Some(doc.modified),
                }),
            }
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> RemotePath {
        RemotePath::new(s)
    }

    #[tokio::test]
    async fn upload_requires_parent_collection() {
        let store = MemoryStore::new();
        let err = store
            .upload_document(b"<x/>".to_vec(), &p("/db/a/x.xml"), "application/xml", true)
            .await
            .unwrap_err();
        assert_eq!(err.op, "upload");

        store.create_collection(&p("/db/a")).await.unwrap();
        store
            .upload_document(b"<x/>".to_vec(), &p("/db/a/x.xml"), "application/xml", true)
            .await
            .unwrap();
        assert!(store.has_collection(&p("/db")));
        assert_eq!(store.document(&p("/db/a/x.xml")).unwrap().bytes, b"<x/>");
    }

    #[tokio::test]
    async fn overwrite_flag_is_honoured() {
        let store = MemoryStore::new();
        store.seed_document(&p("/db/x.xml"), "old", SystemTime::UNIX_EPOCH);
        assert!(store
            .upload_document(b"new".to_vec(), &p("/db/x.xml"), "application/xml", false)
            .await
            .is_err());
        store
            .upload_document(b"new".to_vec(), &p("/db/x.xml"), "application/xml", true)
            .await
            .unwrap();
        let doc = store.document(&p("/db/x.xml")).unwrap();
        assert_eq!(doc.bytes, b"new");
        assert!(doc.modified > SystemTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn remove_collection_drops_subtree() {
        let store = MemoryStore::new();
        store.seed_document(&p("/db/a/b/x.xml"), "x", SystemTime::now());
        store.seed_document(&p("/db/ab.xml"), "y", SystemTime::now());
        store.remove_collection(&p("/db/a")).await.unwrap();
        assert_eq!(store.paths(), vec![p("/db"), p("/db/ab.xml")]);
        assert!(store.remove_collection(&p("/db/a")).await.is_err());
    }

    #[tokio::test]
    async fn listing_and_describe() {
        let store = MemoryStore::new();
        store.seed_document(&p("/db/x.xml"), "x", SystemTime::UNIX_EPOCH);
        store.seed_collection(&p("/db/sub"));
        let listing = store.list_collection(&p("/db")).await.unwrap();
        assert_eq!(listing.collections, vec!["sub".to_string()]);
        assert_eq!(listing.documents[0].name, "x.xml");
        assert!(store.describe_resource(&p("/db/missing.xml")).await.unwrap().is_none());
        assert!(store.describe_resource(&p("/db/sub")).await.unwrap().is_none());
        assert!(store.list_collection(&p("/db/nope")).await.is_err());
    }

    #[tokio::test]
    async fn injected_faults_are_logged_calls() {
        let store = MemoryStore::new();
        store.fail_on(&p("/db/a"));
        assert!(store.create_collection(&p("/db/a")).await.is_err());
        assert_eq!(store.take_calls(), vec![RemoteCall::CreateCollection(p("/db/a"))]);
        assert!(store.calls().is_empty());
    }
}
