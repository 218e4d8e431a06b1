//! Ordered traversal of the local tree.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::filter::PathFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Pre-order walk below `root` (the root itself is not yielded).
///
/// Siblings come out directories first, then files, each group by name, and
/// every directory precedes its contents. Excluded directories are pruned
/// with their whole subtree; unreadable entries are logged and skipped.
pub fn walk<'a>(root: &'a Path, filter: &'a PathFilter) -> impl Iterator<Item = LocalEntry> + 'a {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by(dirs_first)
        .into_iter()
        .filter_entry(move |e| admit(root, filter, e))
        .filter_map(|res| match res {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                None
            }
        })
        .filter(move |e| is_dir(e) || passes_file_filter(root, filter, e))
        .map(|e| LocalEntry {
            is_dir: is_dir(&e),
            path: e.into_path(),
        })
}

// Links are not followed, but a link to a directory still counts as one.
fn is_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() || (entry.path_is_symlink() && entry.path().is_dir())
}

fn dirs_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    is_dir(b)
        .cmp(&is_dir(a))
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn admit(root: &Path, filter: &PathFilter, entry: &DirEntry) -> bool {
    if !is_dir(entry) {
        return true;
    }
    match entry.path().strip_prefix(root) {
        Ok(rel) => filter.check_dir(rel),
        Err(_) => true,
    }
}

fn passes_file_filter(root: &Path, filter: &PathFilter, entry: &DirEntry) -> bool {
    match entry.path().strip_prefix(root) {
        Ok(rel) => filter.check(rel),
        Err(_) => true,
    }
}
