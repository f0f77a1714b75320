//! Applies a [`Plan`] to the filesystem, or pretends to under dry-run.
//!
//! Every operation is re-checked against the live filesystem right before it
//! runs, since the walk snapshot may be stale by then. A failed operation is
//! recorded and the executor moves on; nothing is retried.

use crate::error::OpError;
use crate::hash::ContentKey;
use crate::plan::{Guard, Operation, Plan, SkipReason};
use indicatif::ProgressBar;
use log::{info, warn};
use serde::{Serialize, Serializer};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

/// What happened to one planned operation.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The operation ran and changed the filesystem.
    Applied,
    /// The operation would have run; dry-run left the filesystem alone.
    DryRun,
    /// The plan itself said to leave the path alone.
    Skipped { reason: SkipReason },
    /// The operation was attempted and refused or failed.
    Failed {
        #[serde(serialize_with = "serialize_display")]
        error: OpError,
    },
}

fn serialize_display<S: Serializer>(error: &OpError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// One plan operation and what became of it.
#[derive(Debug, Serialize)]
pub struct ExecutionEntry {
    pub operation: Operation,
    pub outcome: Outcome,
}

/// Per-operation outcomes, in plan order, plus running totals.
#[derive(Debug, Default, Serialize)]
pub struct ExecutionResult {
    pub dry_run: bool,
    pub entries: Vec<ExecutionEntry>,
    pub applied: usize,
    pub simulated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Bytes moved or deleted (or that would be, under dry-run).
    pub bytes: u64,
}

impl ExecutionResult {
    fn record(&mut self, operation: Operation, outcome: Outcome, bytes: u64) {
        match &outcome {
            Outcome::Applied => {
                self.applied += 1;
                self.bytes += bytes;
            }
            Outcome::DryRun => {
                self.simulated += 1;
                self.bytes += bytes;
            }
            Outcome::Skipped { .. } => self.skipped += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
        self.entries.push(ExecutionEntry { operation, outcome });
    }

    /// No failed operation and no skip that counts as a failure.
    pub fn is_success(&self) -> bool {
        self.failed == 0
            && !self.entries.iter().any(|entry| {
                matches!(&entry.outcome, Outcome::Skipped { reason } if reason.is_failure())
            })
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.entries.iter().map(|entry| &entry.operation)
    }
}

pub struct Executor {
    dry_run: bool,
    progress: ProgressBar,
}

impl Executor {
    /// Creates an executor. With `dry_run` set, moves and deletes are
    /// reported as [`Outcome::DryRun`] and the filesystem is never touched.
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            progress: ProgressBar::hidden(),
        }
    }

    /// Ticks `progress` once per operation.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs every operation of `plan` in order.
    pub fn execute(&self, plan: &Plan) -> ExecutionResult {
        let mut result = ExecutionResult {
            dry_run: self.dry_run,
            ..ExecutionResult::default()
        };
        self.progress.set_length(plan.len() as u64);

        for (operation, bytes, guard) in plan.planned_operations() {
            let outcome = match operation {
                Operation::Skip { reason, .. } => Outcome::Skipped {
                    reason: reason.clone(),
                },
                _ if self.dry_run => Outcome::DryRun,
                Operation::Move { from, to } => outcome_of(operation, apply_move(from, to)),
                Operation::Delete { path, retained } => {
                    outcome_of(operation, apply_delete(path, retained.as_deref(), &guard))
                }
            };
            result.record(operation.clone(), outcome, bytes);
            self.progress.inc(1);
        }

        self.progress.finish_and_clear();
        result
    }
}

fn outcome_of(operation: &Operation, applied: Result<(), OpError>) -> Outcome {
    match applied {
        Ok(()) => {
            info!("{}", operation);
            Outcome::Applied
        }
        Err(error) => {
            warn!("{} failed: {}", operation, error);
            Outcome::Failed { error }
        }
    }
}

/// Requires `path` to still be a regular file.
fn require_file(path: &Path) -> Result<fs::Metadata, OpError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| OpError::from_io(path, e))?;
    if !metadata.is_file() {
        return Err(OpError::NotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(metadata)
}

/// Requires the content of `path` to still hash to `key`.
fn require_content(path: &Path, key: ContentKey) -> Result<(), OpError> {
    let current = ContentKey::of_file(path).map_err(|e| OpError::from_io(path, e))?;
    if current != key {
        return Err(OpError::Stale {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn apply_move(from: &Path, to: &Path) -> Result<(), OpError> {
    require_file(from)?;
    if to.symlink_metadata().is_ok() {
        return Err(OpError::DestinationOccupied {
            path: to.to_path_buf(),
        });
    }

    if let Some(parent) = to.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| OpError::from_io(parent, e))?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_verify_remove(from, to),
        Err(e) => Err(OpError::from_io(from, e)),
    }
}

fn apply_delete(path: &Path, retained: Option<&Path>, guard: &Guard) -> Result<(), OpError> {
    let metadata = require_file(path)?;
    if let Some(snapshot) = guard.source
        && !snapshot.matches(&metadata)
    {
        return Err(OpError::Stale {
            path: path.to_path_buf(),
        });
    }

    if let Some(retained) = retained {
        let kept = require_file(retained).map_err(|_| OpError::RetainedCopyMissing {
            path: path.to_path_buf(),
            retained: retained.to_path_buf(),
        })?;
        if let Some(snapshot) = guard.retained
            && !snapshot.matches(&kept)
        {
            return Err(OpError::Stale {
                path: retained.to_path_buf(),
            });
        }
    }

    if let Some(key) = guard.content {
        require_content(path, key)?;
        if let Some(retained) = retained {
            require_content(retained, key)?;
        }
    }

    fs::remove_file(path).map_err(|e| OpError::from_io(path, e))
}

/// Moves a file by copying it, checking the copy, then removing the source.
///
/// Used when `rename` cannot cross filesystems. If the copy fails or does not
/// match the source, the partial destination is removed and the source is
/// left untouched.
pub fn copy_verify_remove(from: &Path, to: &Path) -> Result<(), OpError> {
    copy_verify_remove_with(from, to, |source, destination| io::copy(source, destination))
}

fn copy_verify_remove_with<F>(from: &Path, to: &Path, copy: F) -> Result<(), OpError>
where
    F: FnOnce(&mut File, &mut File) -> io::Result<u64>,
{
    let source_meta = require_file(from)?;

    // create_new: never clobber, and only clean up a file we created
    let mut destination = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => OpError::DestinationOccupied {
                path: to.to_path_buf(),
            },
            _ => OpError::from_io(to, e),
        })?;

    if let Err(reason) = copy_into(from, &source_meta, &mut destination, to, copy) {
        drop(destination);
        if let Err(e) = fs::remove_file(to) {
            warn!("could not remove partial copy {}: {}", to.display(), e);
        }
        return Err(OpError::CrossDeviceMove {
            from: from.to_path_buf(),
            reason,
        });
    }

    fs::remove_file(from).map_err(|e| OpError::from_io(from, e))
}

fn copy_into<F>(
    from: &Path,
    source_meta: &fs::Metadata,
    destination: &mut File,
    to: &Path,
    copy: F,
) -> Result<(), String>
where
    F: FnOnce(&mut File, &mut File) -> io::Result<u64>,
{
    let mut source = File::open(from).map_err(|e| format!("open source: {}", e))?;
    copy(&mut source, destination).map_err(|e| format!("copy: {}", e))?;
    destination
        .sync_all()
        .map_err(|e| format!("sync destination: {}", e))?;

    let copied_len = destination
        .metadata()
        .map_err(|e| format!("stat destination: {}", e))?
        .len();
    if copied_len != source_meta.len() {
        return Err(format!(
            "copied {} of {} bytes",
            copied_len,
            source_meta.len()
        ));
    }

    let source_key = ContentKey::of_file(from).map_err(|e| format!("hash source: {}", e))?;
    let copy_key = ContentKey::of_file(to).map_err(|e| format!("hash destination: {}", e))?;
    if source_key != copy_key {
        return Err("content mismatch after copy".to_string());
    }

    if let Ok(modified) = source_meta.modified()
        && let Err(e) = destination.set_modified(modified)
    {
        warn!("could not preserve mtime on {}: {}", to.display(), e);
    }
    if let Err(e) = fs::set_permissions(to, source_meta.permissions()) {
        warn!("could not preserve permissions on {}: {}", to.display(), e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::FileRecord;
    use std::io::{Read, Write};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn move_op(from: PathBuf, to: PathBuf) -> Operation {
        Operation::Move { from, to }
    }

    /// Record of a file as it is on disk right now.
    fn on_disk(path: PathBuf) -> FileRecord {
        let metadata = fs::symlink_metadata(&path).unwrap();
        FileRecord {
            path,
            size: metadata.len(),
            modified: metadata.modified().unwrap(),
            extension: None,
        }
    }

    /// Record of a file that is not on disk.
    fn absent(path: PathBuf) -> FileRecord {
        FileRecord {
            path,
            size: 0,
            modified: SystemTime::UNIX_EPOCH,
            extension: None,
        }
    }

    fn set_age(path: &Path, age: Duration) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    fn failure(result: &ExecutionResult, index: usize) -> &OpError {
        match &result.entries[index].outcome {
            Outcome::Failed { error } => error,
            other => panic!("expected a failure, got {:?}", other),
        }
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "a").unwrap();
        fs::write(base.join("old.log"), "old").unwrap();

        let mut plan = Plan::new();
        plan.push(move_op(base.join("a.pdf"), base.join("Documents/a.pdf")), 1)
            .unwrap();
        plan.push_delete(&on_disk(base.join("old.log")));
        plan.push_skip(base.join("locked"), SkipReason::PermissionDenied);

        let result = Executor::new(true).execute(&plan);

        assert!(base.join("a.pdf").exists());
        assert!(base.join("old.log").exists());
        assert!(!base.join("Documents").exists());
        assert_eq!(result.simulated, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.bytes, 4);
        let ops: Vec<_> = result.operations().cloned().collect();
        assert_eq!(ops, plan.operations());
    }

    #[test]
    fn test_move_creates_category_directory() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "a").unwrap();

        let mut plan = Plan::new();
        plan.push(move_op(base.join("a.pdf"), base.join("Documents/a.pdf")), 1)
            .unwrap();
        let result = Executor::new(false).execute(&plan);

        assert_eq!(result.applied, 1);
        assert!(result.is_success());
        assert!(base.join("Documents/a.pdf").exists());
        assert!(!base.join("a.pdf").exists());
    }

    #[test]
    fn test_destination_appearing_after_planning_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("a.pdf"), "new").unwrap();

        let mut plan = Plan::new();
        plan.push(move_op(base.join("a.pdf"), base.join("Documents/a.pdf")), 3)
            .unwrap();

        fs::create_dir(base.join("Documents")).unwrap();
        fs::write(base.join("Documents/a.pdf"), "someone else").unwrap();

        let result = Executor::new(false).execute(&plan);
        assert_eq!(result.failed, 1);
        assert!(matches!(failure(&result, 0), OpError::DestinationOccupied { .. }));
        assert_eq!(
            fs::read_to_string(base.join("Documents/a.pdf")).unwrap(),
            "someone else"
        );
        assert!(base.join("a.pdf").exists());
    }

    #[test]
    fn test_failure_does_not_abort_remaining_operations() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("b.log"), "b").unwrap();

        let mut plan = Plan::new();
        plan.push_delete(&absent(base.join("vanished.log")));
        plan.push_delete(&on_disk(base.join("b.log")));

        let result = Executor::new(false).execute(&plan);
        assert_eq!(result.failed, 1);
        assert_eq!(result.applied, 1);
        assert!(!result.is_success());
        assert!(matches!(failure(&result, 0), OpError::NotFound { .. }));
        assert!(!base.join("b.log").exists());
    }

    #[test]
    fn test_delete_refuses_when_retained_copy_is_gone() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("b.txt"), "same").unwrap();

        let mut plan = Plan::new();
        plan.push_duplicate_delete(
            &on_disk(base.join("b.txt")),
            &absent(base.join("a.txt")),
            ContentKey::of_bytes(b"same"),
        );

        let result = Executor::new(false).execute(&plan);
        assert!(matches!(failure(&result, 0), OpError::RetainedCopyMissing { .. }));
        assert!(base.join("b.txt").exists());
    }

    #[test]
    fn test_duplicate_rewritten_after_planning_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("a.txt"), "same bytes").unwrap();
        fs::write(base.join("b.txt"), "same bytes").unwrap();

        let mut plan = Plan::new();
        plan.push_duplicate_delete(
            &on_disk(base.join("b.txt")),
            &on_disk(base.join("a.txt")),
            ContentKey::of_bytes(b"same bytes"),
        );

        // same length, different bytes
        fs::write(base.join("b.txt"), "SAME BYTES").unwrap();

        let result = Executor::new(false).execute(&plan);
        assert_eq!(result.applied, 0);
        assert!(matches!(failure(&result, 0), OpError::Stale { .. }));
        assert_eq!(fs::read_to_string(base.join("b.txt")).unwrap(), "SAME BYTES");
    }

    #[test]
    fn test_retained_copy_changed_after_planning_blocks_delete() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::write(base.join("a.txt"), "payload").unwrap();
        fs::write(base.join("b.txt"), "payload").unwrap();

        let mut plan = Plan::new();
        plan.push_duplicate_delete(
            &on_disk(base.join("b.txt")),
            &on_disk(base.join("a.txt")),
            ContentKey::of_bytes(b"payload"),
        );

        fs::OpenOptions::new()
            .append(true)
            .open(base.join("a.txt"))
            .unwrap()
            .write_all(b" and more")
            .unwrap();

        let result = Executor::new(false).execute(&plan);
        match failure(&result, 0) {
            OpError::Stale { path } => assert_eq!(path, &base.join("a.txt")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(base.join("b.txt").exists());
    }

    #[test]
    fn test_file_touched_after_planning_is_not_cleaned_up() {
        let temp_dir = TempDir::new().unwrap();
        let old = temp_dir.path().join("old.log");
        fs::write(&old, "log line").unwrap();
        set_age(&old, Duration::from_secs(40 * 86_400));

        let mut plan = Plan::new();
        plan.push_delete(&on_disk(old.clone()));

        set_age(&old, Duration::ZERO);

        let result = Executor::new(false).execute(&plan);
        assert!(matches!(failure(&result, 0), OpError::Stale { .. }));
        assert!(old.exists());
    }

    #[test]
    fn test_delete_does_not_remove_directories() {
        let temp_dir = TempDir::new().unwrap();
        let base = temp_dir.path();
        fs::create_dir(base.join("dir")).unwrap();

        let mut plan = Plan::new();
        plan.push_delete(&absent(base.join("dir")));
        let result = Executor::new(false).execute(&plan);

        assert_eq!(result.failed, 1);
        assert!(base.join("dir").is_dir());
    }

    #[test]
    fn test_failure_class_skips_fail_the_result() {
        let mut plan = Plan::new();
        plan.push_skip("/x/in-place".into(), SkipReason::AlreadyInPlace);
        assert!(Executor::new(false).execute(&plan).is_success());

        plan.push_skip("/x/locked".into(), SkipReason::PermissionDenied);
        assert!(!Executor::new(false).execute(&plan).is_success());
    }

    #[test]
    fn test_copy_verify_remove_moves_content_and_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("src.bin");
        let to = temp_dir.path().join("dst.bin");
        fs::write(&from, vec![7u8; 20_000]).unwrap();
        let old = SystemTime::now() - Duration::from_secs(40 * 86_400);
        File::options()
            .write(true)
            .open(&from)
            .unwrap()
            .set_modified(old)
            .unwrap();

        copy_verify_remove(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), vec![7u8; 20_000]);
        let modified = fs::metadata(&to).unwrap().modified().unwrap();
        let drift = modified
            .duration_since(old)
            .unwrap_or_else(|e| e.duration());
        assert!(drift < Duration::from_secs(2));
    }

    #[test]
    fn test_copy_verify_remove_never_clobbers() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("src.txt");
        let to = temp_dir.path().join("dst.txt");
        fs::write(&from, "source").unwrap();
        fs::write(&to, "precious").unwrap();

        let err = copy_verify_remove(&from, &to).unwrap_err();
        assert!(matches!(err, OpError::DestinationOccupied { .. }));
        assert_eq!(fs::read_to_string(&to).unwrap(), "precious");
        assert_eq!(fs::read_to_string(&from).unwrap(), "source");
    }

    #[test]
    fn test_interrupted_copy_removes_partial_destination() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("src.bin");
        let to = temp_dir.path().join("dst.bin");
        fs::write(&from, vec![1u8; 4096]).unwrap();

        let err = copy_verify_remove_with(&from, &to, |source, destination| {
            let mut half = vec![0u8; 2048];
            source.read_exact(&mut half)?;
            destination.write_all(&half)?;
            Err(io::Error::other("device went away"))
        })
        .unwrap_err();

        assert!(matches!(err, OpError::CrossDeviceMove { .. }));
        assert!(!to.exists());
        assert_eq!(fs::read(&from).unwrap(), vec![1u8; 4096]);
    }

    #[test]
    fn test_corrupted_copy_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("src.txt");
        let to = temp_dir.path().join("dst.txt");
        fs::write(&from, "original").unwrap();

        let err = copy_verify_remove_with(&from, &to, |_, destination| {
            destination.write_all(b"ORIGINAL")?;
            Ok(8)
        })
        .unwrap_err();

        match err {
            OpError::CrossDeviceMove { reason, .. } => assert!(reason.contains("mismatch")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!to.exists());
        assert_eq!(fs::read_to_string(&from).unwrap(), "original");
    }

    #[test]
    fn test_json_report_renders_errors_as_text() {
        let mut plan = Plan::new();
        plan.push_delete(&absent("/definitely/missing".into()));
        let result = Executor::new(false).execute(&plan);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["failed"], 1);
        assert_eq!(json["entries"][0]["outcome"]["status"], "failed");
        assert_eq!(
            json["entries"][0]["outcome"]["error"],
            "no longer exists: /definitely/missing"
        );
    }
}
