//! Filesystem tree walker shared by every planner.
//!
//! The walker never follows symbolic links and never fails once it has
//! started: an unreadable directory or file becomes a
//! [`WalkEntry::Skipped`] entry and the walk carries on past it.

use crate::category::file_extension;
use crate::config::CompiledFilters;
use crate::error::WalkError;
use crate::plan::SkipReason;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::{DirEntry, WalkDir};

/// Snapshot of one regular file taken at walk time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    /// Lowercase with leading dot, e.g. `.pdf` or `.tar.gz`.
    pub extension: Option<String>,
}

impl FileRecord {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One item produced by a walk.
#[derive(Debug, Clone)]
pub enum WalkEntry {
    File(FileRecord),
    Skipped { path: PathBuf, reason: SkipReason },
}

/// Everything a completed walk found, files sorted by path.
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    pub root: PathBuf,
    pub files: Vec<FileRecord>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

impl WalkReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Enumerates the regular files under a root directory.
#[derive(Debug, Clone)]
pub struct TreeWalker {
    root: PathBuf,
    recursive: bool,
    filters: CompiledFilters,
}

impl TreeWalker {
    /// A recursive walker with no filtering.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            recursive: true,
            filters: CompiledFilters::allow_all(),
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates the root and returns an absolute form of it.
    fn resolved_root(&self) -> Result<PathBuf, WalkError> {
        let meta = std::fs::metadata(&self.root).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => WalkError::NotFound(self.root.clone()),
            _ => WalkError::Io {
                path: self.root.clone(),
                source: e,
            },
        })?;
        if !meta.is_dir() {
            return Err(WalkError::NotADirectory(self.root.clone()));
        }
        std::path::absolute(&self.root).map_err(|e| WalkError::Io {
            path: self.root.clone(),
            source: e,
        })
    }

    /// Starts a lazy walk. Each call starts over from the root.
    ///
    /// Within a directory, entries come in file-name order, so the sequence
    /// is the same for the same filesystem state.
    pub fn iter(&self) -> Result<impl Iterator<Item = WalkEntry> + '_, WalkError> {
        let root = self.resolved_root()?;
        let mut walk = WalkDir::new(&root)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name();
        if !self.recursive {
            walk = walk.max_depth(1);
        }

        let filters = &self.filters;
        let entries = walk
            .into_iter()
            .filter_entry(move |entry| {
                !entry.file_type().is_dir()
                    || filters.should_descend(&entry.file_name().to_string_lossy())
            })
            .filter_map(move |entry| match entry {
                Ok(entry) => self.visit(&root, entry),
                Err(err) => Some(skip_for_walk_error(err)),
            });
        Ok(entries)
    }

    /// Runs the whole walk and sorts the files by path.
    pub fn collect(&self) -> Result<WalkReport, WalkError> {
        let mut report = WalkReport {
            root: self.resolved_root()?,
            ..WalkReport::default()
        };

        for entry in self.iter()? {
            match entry {
                WalkEntry::File(record) => report.files.push(record),
                WalkEntry::Skipped { path, reason } => report.skipped.push((path, reason)),
            }
        }

        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        report.skipped.sort_by(|a, b| a.0.cmp(&b.0));
        debug!(
            "walked {}: {} files, {} skipped",
            report.root.display(),
            report.files.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn visit(&self, root: &Path, entry: DirEntry) -> Option<WalkEntry> {
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            debug!("not following symlink {}", entry.path().display());
            return None;
        }
        if !file_type.is_file() {
            return None;
        }

        let rel_path = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if !self.filters.should_include(rel_path) {
            return None;
        }

        let path = entry.path().to_path_buf();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => return Some(skip_for_walk_error(err)),
        };
        let modified = match metadata.modified() {
            Ok(modified) => modified,
            Err(err) => {
                return Some(WalkEntry::Skipped {
                    path,
                    reason: SkipReason::Unreadable(err.to_string()),
                });
            }
        };

        let extension = file_extension(&entry.file_name().to_string_lossy());
        Some(WalkEntry::File(FileRecord {
            path,
            size: metadata.len(),
            modified,
            extension,
        }))
    }
}

fn skip_for_walk_error(err: walkdir::Error) -> WalkEntry {
    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
    let reason = match err.io_error().map(io::Error::kind) {
        Some(io::ErrorKind::PermissionDenied) => SkipReason::PermissionDenied,
        _ => SkipReason::Unreadable(err.to_string()),
    };
    debug!("skipping {}: {}", path.display(), reason);
    WalkEntry::Skipped { path, reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterRules;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();
        fs::write(base.join("b.txt"), "bb").unwrap();
        fs::write(base.join("a.PDF"), "a").unwrap();
        fs::write(base.join(".hidden"), "h").unwrap();
        fs::create_dir_all(base.join("sub/deeper")).unwrap();
        fs::write(base.join("sub/c.tar.gz"), "ccc").unwrap();
        fs::write(base.join("sub/deeper/d.md"), "dddd").unwrap();
        temp_dir
    }

    fn names(report: &WalkReport) -> Vec<String> {
        report
            .files
            .iter()
            .map(|f| {
                f.path
                    .strip_prefix(&report.root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_recursive_walk_sorted_by_path() {
        let dir = tree();
        let report = TreeWalker::new(dir.path()).collect().unwrap();
        assert_eq!(
            names(&report),
            vec![".hidden", "a.PDF", "b.txt", "sub/c.tar.gz", "sub/deeper/d.md"]
        );
        assert!(report.skipped.is_empty());
        assert_eq!(report.total_bytes(), 1 + 1 + 2 + 3 + 4);
    }

    #[test]
    fn test_non_recursive_walk_stays_at_top() {
        let dir = tree();
        let report = TreeWalker::new(dir.path())
            .recursive(false)
            .collect()
            .unwrap();
        assert_eq!(names(&report), vec![".hidden", "a.PDF", "b.txt"]);
    }

    #[test]
    fn test_records_carry_metadata() {
        let dir = tree();
        let report = TreeWalker::new(dir.path()).collect().unwrap();
        let archive = report
            .files
            .iter()
            .find(|f| f.file_name() == "c.tar.gz")
            .unwrap();
        assert_eq!(archive.size, 3);
        assert_eq!(archive.extension.as_deref(), Some(".tar.gz"));
        assert!(archive.path.is_absolute());

        let pdf = report.files.iter().find(|f| f.file_name() == "a.PDF").unwrap();
        assert_eq!(pdf.extension.as_deref(), Some(".pdf"));
    }

    #[test]
    fn test_filters_skip_hidden_entries() {
        let dir = tree();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();

        let filters = CompiledFilters::compile(&FilterRules::default()).unwrap();
        let report = TreeWalker::new(dir.path())
            .filters(filters)
            .collect()
            .unwrap();
        assert_eq!(
            names(&report),
            vec!["a.PDF", "b.txt", "sub/c.tar.gz", "sub/deeper/d.md"]
        );
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = tree();
        let walker = TreeWalker::new(dir.path());
        assert_eq!(walker.iter().unwrap().count(), 5);
        assert_eq!(walker.iter().unwrap().count(), 5);
        assert_eq!(walker.collect().unwrap().files, walker.collect().unwrap().files);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tree();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("b.txt"), dir.path().join("link.txt"))
            .unwrap();

        let report = TreeWalker::new(dir.path()).collect().unwrap();
        assert_eq!(report.files.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_directory_is_skipped_and_walk_continues() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tree();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("secret.txt"), "s").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // privileged user, modes are not enforced
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let report = TreeWalker::new(dir.path()).collect();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let report = report.unwrap();

        assert_eq!(report.files.len(), 5);
        assert_eq!(
            report.skipped,
            vec![(report.root.join("locked"), SkipReason::PermissionDenied)]
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let result = TreeWalker::new("/no/such/root/here").collect();
        assert!(matches!(result, Err(WalkError::NotFound(_))));
    }

    #[test]
    fn test_file_root_is_an_error() {
        let dir = tree();
        let result = TreeWalker::new(dir.path().join("b.txt")).collect();
        assert!(matches!(result, Err(WalkError::NotADirectory(_))));
    }
}
