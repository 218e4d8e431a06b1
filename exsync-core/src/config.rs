use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Glob pattern (wrapper type for clarity)
/// Stored as plain String; compiled into a `globset::GlobSet` by `PathFilter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteCfg {
    /// Store kept as a directory hierarchy under `root`
    Dir { root: PathBuf },
    /// Throwaway in-memory store, nothing is persisted
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub local:      PathBuf,
    /// Absolute remote path of the base collection, e.g. `/db/apps/site`
    pub base_collection: String,
    #[serde(default)]
    pub include:    Vec<Pattern>,
    #[serde(default)]
    pub exclude:    Vec<Pattern>,
    /// Move debounce window in milliseconds
    #[serde(default = "SyncConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    /// Child collection names that are never listed or recursed into
    #[serde(default = "SyncConfig::default_skip_collections")]
    pub skip_collections: Vec<String>,
    /// Permission mode applied to every uploaded document
    #[serde(default = "SyncConfig::default_permissions")]
    pub permissions: u32,
    /// Extension -> MIME type overrides
    #[serde(default)]
    pub mime_types: BTreeMap<String, String>,
    #[serde(default)]
    pub watch:      bool,
    pub remote_cfg: RemoteCfg,
}

impl SyncConfig {
    fn default_debounce_ms() -> u64 { 100 }
    fn default_skip_collections() -> Vec<String> { vec!["db".to_string()] }
    fn default_permissions() -> u32 { 0o755 }

    pub fn new(local: impl Into<PathBuf>, base_collection: impl Into<String>, remote_cfg: RemoteCfg) -> Self {
        Self {
            local: local.into(),
            base_collection: base_collection.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            debounce_ms: Self::default_debounce_ms(),
            skip_collections: Self::default_skip_collections(),
            permissions: Self::default_permissions(),
            mime_types: BTreeMap::new(),
            watch: false,
            remote_cfg,
        }
    }

    /// Load a config file, picking the format from the extension (YAML by default).
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| SyncError::local_io(path, e))?;
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let cfg = match ext {
            "json" => serde_json::from_str(&text)
                .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?,
            _ => serde_yaml::from_str(&text)
                .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?,
        };
        Ok(cfg)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_collection.trim_matches('/').is_empty() {
            return Err(SyncError::Config("a base collection must be provided".into()));
        }
        if !self.local.is_dir() {
            return Err(SyncError::Config(format!(
                "local directory {} does not exist",
                self.local.display()
            )));
        }
        if self.permissions > 0o7777 {
            return Err(SyncError::Config(format!(
                "permission mode {:o} is out of range",
                self.permissions
            )));
        }
        Ok(())
    }
}
