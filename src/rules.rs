//! Entry filters deciding which files and directories belong to a job
//!
//! The engine consults an [`EntryFilter`] with paths relative to the pair
//! root (`/`-separated, no leading slash). Rejected source entries are left
//! out entirely; rejected target entries are never pruned.

use crate::types::SyncError;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Decides whether an entry takes part in synchronization
pub trait EntryFilter: Send + Sync {
    fn accepts(&self, relative_path: &str, is_dir: bool) -> bool;
}

/// Filter that lets every entry through
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl EntryFilter for AcceptAll {
    fn accepts(&self, _relative_path: &str, _is_dir: bool) -> bool {
        true
    }
}

/// Glob-based exclusion with include overrides.
///
/// A pattern matches either the whole relative path or the entry's name, so
/// `*.log` excludes log files at any depth and `build/cache` only that
/// directory.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    exclude: GlobSet,
    include: GlobSet,
}

impl GlobFilter {
    /// Build a filter from exclude and include patterns.
    ///
    /// # Errors
    /// `SyncError::Config` for a pattern that is not a valid glob.
    pub fn new(exclude: &[String], include: &[String]) -> Result<Self, SyncError> {
        Ok(Self {
            exclude: build_glob_set(exclude)?,
            include: build_glob_set(include)?,
        })
    }

    fn matches(set: &GlobSet, relative_path: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        set.is_match(relative_path) || set.is_match(name)
    }
}

impl EntryFilter for GlobFilter {
    fn accepts(&self, relative_path: &str, _is_dir: bool) -> bool {
        if Self::matches(&self.include, relative_path) {
            return true;
        }
        !Self::matches(&self.exclude, relative_path)
    }
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, SyncError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| SyncError::Config(format!("Invalid pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to build pattern set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_accept_all() {
        assert!(AcceptAll.accepts("anything/at/all", false));
    }

    #[test]
    fn test_exclude_by_name_at_any_depth() {
        let filter = GlobFilter::new(&patterns(&["*.log"]), &[]).expect("valid patterns");
        assert!(!filter.accepts("debug.log", false));
        assert!(!filter.accepts("deep/nested/debug.log", false));
        assert!(filter.accepts("notes.txt", false));
    }

    #[test]
    fn test_exclude_directory_path() {
        let filter = GlobFilter::new(&patterns(&["build/cache"]), &[]).expect("valid patterns");
        assert!(!filter.accepts("build/cache", true));
        assert!(filter.accepts("build", true));
        assert!(filter.accepts("other/cache2", true));
    }

    #[test]
    fn test_include_overrides_exclude() {
        let filter = GlobFilter::new(&patterns(&["*.log"]), &patterns(&["keep.log"]))
            .expect("valid patterns");
        assert!(filter.accepts("keep.log", false));
        assert!(!filter.accepts("drop.log", false));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = GlobFilter::new(&patterns(&["[unclosed"]), &[]).expect_err("invalid glob");
        assert!(matches!(err, SyncError::Config(_)));
        assert!(err.is_validation_error());
    }
}
