use exsync_core::{RemoteFault, RemotePath};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Location of a remote path inside the store root. `None` for paths with
/// `.` or `..` segments, which could step outside it.
pub(crate) fn to_fs_path(root: &Path, path: &RemotePath) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    for seg in path.as_str().split('/').filter(|s| !s.is_empty()) {
        if seg == "." || seg == ".." {
            return None;
        }
        out.push(seg);
    }
    Some(out)
}

pub(crate) fn fault(op: &'static str, path: &RemotePath, err: std::io::Error) -> RemoteFault {
    RemoteFault::new(op, path, err.to_string())
}

/// Metadata of `p`, with "not found" folded into `None`.
pub(crate) async fn stat(p: &Path) -> std::io::Result<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(p).await {
        Ok(m) => Ok(Some(m)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
