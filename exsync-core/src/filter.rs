use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;

use crate::config::Pattern;

/// Runtime filter compiled from include / exclude pattern lists.
///
/// Patterns are matched against root-relative paths. Exclusions apply to
/// files and directories alike; inclusions only narrow down files, so a
/// directory is never dropped just because its name misses an include glob.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            include: GlobSet::empty(),
            exclude: GlobSet::empty(),
        }
    }
}

impl PathFilter {
    /// Build a filter from lists. Empty include list means "include all".
    pub fn new(include: &[Pattern], exclude: &[Pattern]) -> Self {
        Self {
            include: compile(include),
            exclude: compile(exclude),
        }
    }

    /// Whether a file at the given relative path should be synced.
    pub fn check<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        let included = self.include.is_empty() || self.include.is_match(path);
        included && !self.exclude.is_match(path)
    }

    /// Whether a directory at the given relative path should be synced.
    pub fn check_dir<P: AsRef<Path>>(&self, path: P) -> bool {
        !self.exclude.is_match(path.as_ref())
    }
}

// compile patterns, skip invalid ones individually
fn compile(patterns: &[Pattern]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        match Glob::new(&pat.0) {
            Ok(g) => {
                builder.add(g);
            }
            Err(e) => warn!(pattern = %pat.0, "ignoring invalid glob: {e}"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!("glob set failed to build, matching nothing: {e}");
        GlobSet::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_basic() {
        let include = vec![Pattern("**/*.xml".into())];
        let exclude = vec![Pattern("tests/**".into())];
        let filter = PathFilter::new(&include, &exclude);
        assert!(filter.check("modules/app.xml"));
        assert!(!filter.check("tests/app.xml"));
        assert!(!filter.check("README.md"));
    }

    #[test]
    fn include_does_not_prune_directories() {
        let filter = PathFilter::new(&[Pattern("**/*.xql".into())], &[Pattern("build".into())]);
        assert!(filter.check_dir("modules"));
        assert!(!filter.check_dir("build"));
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let filter = PathFilter::new(&[], &[Pattern("a[".into()), Pattern("*.tmp".into())]);
        assert!(!filter.check("x.tmp"));
        assert!(filter.check("x.xml"));
    }

    #[test]
    fn default_accepts_everything() {
        let filter = PathFilter::default();
        assert!(filter.check("anything/at/all.bin"));
        assert!(filter.check_dir("anything"));
    }
}
