use async_trait::async_trait;
use std::fmt;
use std::time::SystemTime;

use crate::error::RemoteFault;

/// Slash-separated absolute path inside the remote store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RemotePath(String);

impl RemotePath {
    /// Normalise to a leading `/`, no trailing `/` and no empty segments.
    pub fn new(path: impl AsRef<str>) -> Self {
        let segments: Vec<&str> = path
            .as_ref()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        Self(format!("/{}", segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, name: &str) -> Self {
        if self.0 == "/" {
            Self::new(name)
        } else {
            Self::new(format!("{}/{}", self.0, name))
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }
        let idx = self.0.rfind('/')?;
        Some(Self::new(&self.0[..idx]))
    }

    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_within(&self, ancestor: &RemotePath) -> bool {
        if ancestor.0 == "/" {
            return self.0 != "/";
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// Segments after `base`, joined with `/`. `None` when outside `base`.
    pub fn relative_to(&self, base: &RemotePath) -> Option<&str> {
        if self == base {
            Some("")
        } else if self.is_within(base) {
            let skip = if base.0 == "/" { 1 } else { base.0.len() + 1 };
            Some(&self.0[skip..])
        } else {
            None
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub modified: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub name: String,
    pub modified: Option<SystemTime>,
}

/// Direct children of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionListing {
    pub documents: Vec<DocumentInfo>,
    pub collections: Vec<String>,
}

/// One node found while walking the remote tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEntry {
    Document {
        path: RemotePath,
        modified: Option<SystemTime>,
    },
    Directory {
        path: RemotePath,
    },
}

impl RemoteEntry {
    pub fn path(&self) -> &RemotePath {
        match self {
            RemoteEntry::Document { path, .. } | RemoteEntry::Directory { path } => path,
        }
    }
}

/// Operations the reconciler needs from a remote document store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn collection_exists(&self, path: &RemotePath) -> Result<bool, RemoteFault>;

    /// Create a collection, including any missing ancestors.
    async fn create_collection(&self, path: &RemotePath) -> Result<(), RemoteFault>;

    /// Remove a collection and everything below it. Callers check existence first.
    async fn remove_collection(&self, path: &RemotePath) -> Result<(), RemoteFault>;

    /// `Ok(None)` when no document lives at `path`.
    async fn describe_resource(&self, path: &RemotePath) -> Result<Option<ResourceInfo>, RemoteFault>;

    async fn upload_document(
        &self,
        bytes: Vec<u8>,
        path: &RemotePath,
        mime: &str,
        overwrite: bool,
    ) -> Result<(), RemoteFault>;

    async fn remove_document(&self, path: &RemotePath) -> Result<(), RemoteFault>;

    async fn set_permissions(&self, path: &RemotePath, mode: u32) -> Result<(), RemoteFault>;

    async fn list_collection(&self, path: &RemotePath) -> Result<CollectionListing, RemoteFault>;
}
