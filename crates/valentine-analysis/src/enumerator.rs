//! Expansion of plan targets into candidate files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::plan::PlanTarget;

/// One item produced while walking a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEntry {
    /// A regular file that passed the filter.
    File {
        /// Path as enumerated.
        path: PathBuf,
        /// Size in bytes.
        size: u64,
    },
    /// A regular file rejected by the target filter.
    Filtered(PathBuf),
    /// A path whose metadata could not be read.
    Inaccessible {
        /// The path.
        path: PathBuf,
        /// Why it failed.
        error: String,
    },
    /// A directory that could not be listed. Reported once per directory.
    DirectoryError {
        /// The directory.
        path: PathBuf,
        /// Why it failed.
        error: String,
    },
}

/// Walks `root` (the resolved path of `target`), following symlinks.
///
/// A file target yields itself. A directory is walked recursively, or only
/// one level deep when the target is not recursive.
pub fn enumerate_target<'a>(
    root: &Path,
    target: &'a PlanTarget,
) -> impl Iterator<Item = TargetEntry> + 'a {
    let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
    if !target.recursive {
        walker = walker.max_depth(1);
    }
    debug!(path = %root.display(), recursive = target.recursive, "enumerating target");

    let mut failed_dirs: HashSet<PathBuf> = HashSet::new();
    walker.into_iter().filter_map(move |item| match item {
        Ok(entry) => {
            if !entry.file_type().is_file() {
                return None;
            }
            let path = entry.into_path();
            if !target.filter.satisfies(&canonical(&path)) {
                return Some(TargetEntry::Filtered(path));
            }
            match std::fs::metadata(&path) {
                Ok(metadata) => Some(TargetEntry::File {
                    size: metadata.len(),
                    path,
                }),
                Err(err) => Some(TargetEntry::Inaccessible {
                    path,
                    error: err.to_string(),
                }),
            }
        }
        Err(err) => {
            let path = err.path().map(Path::to_path_buf).unwrap_or_default();
            let error = err.to_string();
            if err.depth() == 0 {
                return Some(TargetEntry::Inaccessible { path, error });
            }
            // Several failures may share one directory; report it once.
            let dir = if err.io_error().is_some() && path.is_dir() {
                path.clone()
            } else {
                path.parent().map(Path::to_path_buf).unwrap_or_default()
            };
            if failed_dirs.insert(dir.clone()) {
                warn!(path = %dir.display(), error = %error, "failed to enumerate directory");
                Some(TargetEntry::DirectoryError { path: dir, error })
            } else {
                None
            }
        }
    })
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::TempDir;

    use crate::plan::TargetFilter;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.exe"), b"MZ").unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("lib.dll"), b"MZ..").unwrap();
        dir
    }

    fn files(entries: &[TargetEntry]) -> Vec<String> {
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|e| match e {
                TargetEntry::File { path, .. } => {
                    Some(path.file_name().unwrap().to_string_lossy().into_owned())
                }
                _ => None,
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn recursive_walk_finds_nested_files() {
        let dir = fixture();
        let target = PlanTarget::new(dir.path());
        let entries: Vec<_> = enumerate_target(dir.path(), &target).collect();
        assert_eq!(files(&entries), vec!["app.exe", "lib.dll", "notes.txt"]);
    }

    #[test]
    fn flat_walk_stays_at_top_level() {
        let dir = fixture();
        let target = PlanTarget::new(dir.path()).with_recursive(false);
        let entries: Vec<_> = enumerate_target(dir.path(), &target).collect();
        assert_eq!(files(&entries), vec!["app.exe", "notes.txt"]);
    }

    #[test]
    fn filtered_files_are_reported_separately() {
        let dir = fixture();
        let mut filter = TargetFilter::new();
        filter.add_exclude_regex(r"\.txt$").unwrap();
        let target = PlanTarget::new(dir.path()).with_filter(filter);
        let entries: Vec<_> = enumerate_target(dir.path(), &target).collect();

        assert_eq!(files(&entries), vec!["app.exe", "lib.dll"]);
        let filtered: Vec<_> = entries
            .iter()
            .filter(|e| matches!(e, TargetEntry::Filtered(_)))
            .collect();
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn file_target_yields_itself_with_size() {
        let dir = fixture();
        let path = dir.path().join("sub").join("lib.dll");
        let target = PlanTarget::new(&path);
        let entries: Vec<_> = enumerate_target(&path, &target).collect();
        assert_eq!(entries, vec![TargetEntry::File { path, size: 4 }]);
    }

    #[test]
    fn missing_target_is_inaccessible() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");
        let target = PlanTarget::new(&path);
        let entries: Vec<_> = enumerate_target(&path, &target).collect();
        assert_eq!(entries.len(), 1);
        assert!(matches!(&entries[0], TargetEntry::Inaccessible { path: p, .. } if *p == path));
    }
}
