//! Directory-backed document store.
//!
//! Collections are directories and documents are files below a store root,
//! so `/db/apps/site/a.xml` lives at `<root>/db/apps/site/a.xml`. The
//! modification time of a document is its file mtime.

mod utils;

use crate::utils::{fault, stat, to_fs_path};
use async_trait::async_trait;
use exsync_core::{CollectionListing, DocumentInfo, RemoteFault, RemotePath, RemoteStore, ResourceInfo};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Open the store at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!("document store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, op: &'static str, path: &RemotePath) -> Result<PathBuf, RemoteFault> {
        to_fs_path(&self.root, path).ok_or_else(|| RemoteFault::new(op, path, "path escapes the store root"))
    }
}

#[async_trait]
impl RemoteStore for DirStore {
    async fn collection_exists(&self, path: &RemotePath) -> Result<bool, RemoteFault> {
        let p = self.locate("describeCollection", path)?;
        let meta = stat(&p).await.map_err(|e| fault("describeCollection", path, e))?;
        Ok(meta.is_some_and(|m| m.is_dir()))
    }

    async fn create_collection(&self, path: &RemotePath) -> Result<(), RemoteFault> {
        let p = self.locate("createCollection", path)?;
        match stat(&p).await.map_err(|e| fault("createCollection", path, e))? {
            Some(m) if m.is_dir() => return Ok(()),
            Some(_) => return Err(RemoteFault::new("createCollection", path, "a document has that name")),
            None => {}
        }
        tokio::fs::create_dir_all(&p)
            .await
            .map_err(|e| fault("createCollection", path, e))
    }

    async fn remove_collection(&self, path: &RemotePath) -> Result<(), RemoteFault> {
        let p = self.locate("removeCollection", path)?;
        if p == self.root {
            return Err(RemoteFault::new("removeCollection", path, "refusing to remove the store root"));
        }
        match stat(&p).await.map_err(|e| fault("removeCollection", path, e))? {
            Some(m) if m.is_dir() => tokio::fs::remove_dir_all(&p)
                .await
                .map_err(|e| fault("removeCollection", path, e)),
            _ => Err(RemoteFault::new("removeCollection", path, "no such collection")),
        }
    }

    async fn describe_resource(&self, path: &RemotePath) -> Result<Option<ResourceInfo>, RemoteFault> {
        let p = self.locate("describeResource", path)?;
        match stat(&p).await.map_err(|e| fault("describeResource", path, e))? {
            Some(m) if m.is_file() => {
                let modified = m.modified().map_err(|e| fault("describeResource", path, e))?;
                Ok(Some(ResourceInfo { modified }))
            }
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
        let p = self.locate("upload", path)?;
        let parent = p
            .parent()
            .filter(|_| p != self.root)
            .ok_or_else(|| RemoteFault::new("upload", path, "cannot store a document at the root"))?;
        let parent_is_dir = stat(parent)
            .await
            .map_err(|e| fault("upload", path, e))?
            .is_some_and(|m| m.is_dir());
        if !parent_is_dir {
            return Err(RemoteFault::new("upload", path, "parent collection does not exist"));
        }
        match stat(&p).await.map_err(|e| fault("upload", path, e))? {
            Some(m) if m.is_dir() => {
                return Err(RemoteFault::new("upload", path, "a collection has that name"));
            }
            Some(_) if !overwrite => {
                return Err(RemoteFault::new("upload", path, "document exists"));
            }
            _ => {}
        }
        debug!(document = %path, mime, bytes = bytes.len(), "storing document");
        tokio::fs::write(&p, bytes).await.map_err(|e| fault("upload", path, e))
    }

    async fn remove_document(&self, path: &RemotePath) -> Result<(), RemoteFault> {
        let p = self.locate("remove", path)?;
        match stat(&p).await.map_err(|e| fault("remove", path, e))? {
            Some(m) if m.is_file() => tokio::fs::remove_file(&p).await.map_err(|e| fault("remove", path, e)),
            _ => Err(RemoteFault::new("remove", path, "no such document")),
        }
    }

    async fn set_permissions(&self, path: &RemotePath, mode: u32) -> Result<(), RemoteFault> {
        let p = self.locate("setPermissions", path)?;
        if stat(&p).await.map_err(|e| fault("setPermissions", path, e))?.is_none() {
            return Err(RemoteFault::new("setPermissions", path, "no such resource"));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&p, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| fault("setPermissions", path, e))?;
        }
        #[cfg(not(unix))]
        debug!(resource = %path, mode, "permission modes are not supported here");
        Ok(())
    }

    async fn list_collection(&self, path: &RemotePath) -> Result<CollectionListing, RemoteFault> {
        let p = self.locate("getCollectionDesc", path)?;
        let mut dir = tokio::fs::read_dir(&p)
            .await
            .map_err(|e| fault("getCollectionDesc", path, e))?;
        let mut listing = CollectionListing::default();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| fault("getCollectionDesc", path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry
                .metadata()
                .await
                .map_err(|e| fault("getCollectionDesc", path, e))?;
            if meta.is_dir() {
                listing.collections.push(name);
            } else if meta.is_file() {
                listing.documents.push(DocumentInfo {
                    name,
                    modified: meta.modified().ok(),
                });
            }
        }
        listing.collections.sort();
        listing.documents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }
}
