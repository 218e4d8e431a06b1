use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::remote::RemotePath;

/// Maps local paths under `local_root` to remote paths under `base`, and back.
#[derive(Debug, Clone)]
pub struct PathMapper {
    local_root: PathBuf,
    base: RemotePath,
}

impl PathMapper {
    pub fn new(local_root: impl Into<PathBuf>, base: RemotePath) -> Self {
        Self {
            local_root: local_root.into(),
            base,
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn base(&self) -> &RemotePath {
        &self.base
    }

    /// Root-relative path with `/` separators. `None` outside the root, and
    /// for names that are not valid UTF-8 since those cannot map back.
    pub fn relative(&self, local: &Path) -> Option<String> {
        let rel = local.strip_prefix(&self.local_root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => match s.to_str() {
                    Some(name) => parts.push(name.to_string()),
                    None => {
                        warn!(path = %local.display(), "name is not valid UTF-8: not syncing");
                        return None;
                    }
                },
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(parts.join("/"))
    }

    pub fn to_remote(&self, local: &Path) -> Option<RemotePath> {
        let rel = self.relative(local)?;
        if rel.is_empty() {
            Some(self.base.clone())
        } else {
            Some(self.base.join(&rel))
        }
    }

    pub fn to_local(&self, remote: &RemotePath) -> Option<PathBuf> {
        let rel = remote.relative_to(&self.base)?;
        Some(
            rel.split('/')
                .filter(|s| !s.is_empty())
                .fold(self.local_root.clone(), |acc, seg| acc.join(seg)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> PathMapper {
        PathMapper::new("/home/me/site", RemotePath::new("/db/apps/site"))
    }

    #[test]
    fn maps_local_to_remote() {
        let m = mapper();
        assert_eq!(
            m.to_remote(Path::new("/home/me/site/a/x.xml")),
            Some(RemotePath::new("/db/apps/site/a/x.xml"))
        );
        assert_eq!(m.to_remote(Path::new("/home/me/site")), Some(RemotePath::new("/db/apps/site")));
        assert_eq!(m.to_remote(Path::new("/home/me/other/x.xml")), None);
        assert_eq!(m.to_remote(Path::new("/home/me/site/../x.xml")), None);
    }

    #[test]
    fn maps_remote_to_local() {
        let m = mapper();
        assert_eq!(
            m.to_local(&RemotePath::new("/db/apps/site/a/x.xml")),
            Some(PathBuf::from("/home/me/site/a/x.xml"))
        );
        assert_eq!(m.to_local(&RemotePath::new("/db/apps/other")), None);
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_are_not_mapped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let m = mapper();
        let local = Path::new("/home/me/site").join(OsStr::from_bytes(b"bad\xff.xml"));
        assert_eq!(m.relative(&local), None);
        assert_eq!(m.to_remote(&local), None);
    }
}
