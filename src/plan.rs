//! Plans: the ordered list of file operations a planner wants to perform.
//!
//! Nothing in this module touches the filesystem. A [`Plan`] is built in
//! full before the [`Executor`](crate::executor::Executor) sees it, which is
//! what makes a dry run an exact preview of the real run.

use crate::hash::ContentKey;
use crate::walker::FileRecord;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Why a file was left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// The walk was refused access to the path.
    PermissionDenied,
    /// The path could not be read or stat'ed; carries the I/O error text.
    Unreadable(String),
    /// Every numbered destination name was already taken.
    CollisionUnresolvable,
    /// The file already sits where the planner would put it.
    AlreadyInPlace,
}

impl SkipReason {
    /// Whether this skip should make the command exit unsuccessfully.
    pub fn is_failure(&self) -> bool {
        !matches!(self, SkipReason::AlreadyInPlace)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::PermissionDenied => write!(f, "permission denied"),
            SkipReason::Unreadable(msg) => write!(f, "unreadable: {}", msg),
            SkipReason::CollisionUnresolvable => write!(f, "no free destination name"),
            SkipReason::AlreadyInPlace => write!(f, "already in place"),
        }
    }
}

/// A single pending file operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Rename `from` to `to`. `to` is free when planned.
    Move {
        from: PathBuf,
        to: PathBuf,
    },
    /// Remove a regular file. `retained` names the copy that must survive
    /// this delete, if any.
    Delete {
        path: PathBuf,
        retained: Option<PathBuf>,
    },
    /// Leave `path` alone and record why.
    Skip {
        path: PathBuf,
        reason: SkipReason,
    },
}

impl Operation {
    /// The path the operation acts on.
    pub fn source(&self) -> &Path {
        match self {
            Operation::Move { from, .. } => from,
            Operation::Delete { path, .. } | Operation::Skip { path, .. } => path,
        }
    }

    /// The path the operation creates, if it creates one.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Operation::Move { to, .. } => Some(to),
            _ => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Operation::Skip { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Move { from, to } => {
                write!(f, "move {} -> {}", from.display(), to.display())
            }
            Operation::Delete {
                path,
                retained: Some(retained),
            } => write!(
                f,
                "delete {} (duplicate of {})",
                path.display(),
                retained.display()
            ),
            Operation::Delete {
                path,
                retained: None,
            } => write!(f, "delete {}", path.display()),
            Operation::Skip { path, reason } => {
                write!(f, "skip {} ({})", path.display(), reason)
            }
        }
    }
}

/// Size and mtime of a file as the planner saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub size: u64,
    pub modified: SystemTime,
}

impl Snapshot {
    pub fn of(file: &FileRecord) -> Self {
        Self {
            size: file.size,
            modified: file.modified,
        }
    }

    /// Whether `metadata` still describes the file that was planned on.
    pub fn matches(&self, metadata: &fs::Metadata) -> bool {
        metadata.len() == self.size && metadata.modified().ok() == Some(self.modified)
    }
}

/// What a delete requires of the filesystem before it may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guard {
    /// The file to delete must be unchanged.
    pub source: Option<Snapshot>,
    /// The retained copy must be unchanged.
    pub retained: Option<Snapshot>,
    /// Both files must still hash to this key.
    pub content: Option<ContentKey>,
}

/// Returned when a plan would end up with two writers for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTaken(pub PathBuf);

impl fmt::Display for DestinationTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination already planned: {}", self.0.display())
    }
}

impl std::error::Error for DestinationTaken {}

/// Ordered operations plus aggregate statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    operations: Vec<Operation>,
    bytes_affected: u64,
    file_count: usize,
    #[serde(skip)]
    sizes: Vec<u64>,
    #[serde(skip)]
    guards: Vec<Guard>,
    #[serde(skip)]
    destinations: HashSet<PathBuf>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation touching `bytes` bytes.
    ///
    /// # Errors
    ///
    /// Rejects a `Move` whose destination is already claimed by this plan.
    pub fn push(&mut self, operation: Operation, bytes: u64) -> Result<(), DestinationTaken> {
        if let Some(to) = operation.destination()
            && !self.destinations.insert(to.to_path_buf())
        {
            return Err(DestinationTaken(to.to_path_buf()));
        }
        if operation.is_mutation() {
            self.bytes_affected += bytes;
            self.file_count += 1;
        }
        self.sizes.push(if operation.is_mutation() { bytes } else { 0 });
        self.guards.push(Guard::default());
        self.operations.push(operation);
        Ok(())
    }

    /// Appends a delete of `file` that only runs if the file is unchanged
    /// since it was walked. Deletes claim no destination, so this cannot fail.
    pub fn push_delete(&mut self, file: &FileRecord) {
        let guard = Guard {
            source: Some(Snapshot::of(file)),
            ..Guard::default()
        };
        self.push_guarded_delete(file, None, guard);
    }

    /// Appends a delete of `file` as a redundant copy of `keep`.
    ///
    /// At execution time both files must be unchanged and still hash to `key`.
    pub fn push_duplicate_delete(&mut self, file: &FileRecord, keep: &FileRecord, key: ContentKey) {
        let guard = Guard {
            source: Some(Snapshot::of(file)),
            retained: Some(Snapshot::of(keep)),
            content: Some(key),
        };
        self.push_guarded_delete(file, Some(keep.path.clone()), guard);
    }

    fn push_guarded_delete(&mut self, file: &FileRecord, retained: Option<PathBuf>, guard: Guard) {
        self.bytes_affected += file.size;
        self.file_count += 1;
        self.sizes.push(file.size);
        self.guards.push(guard);
        self.operations.push(Operation::Delete {
            path: file.path.clone(),
            retained,
        });
    }

    pub fn push_skip(&mut self, path: PathBuf, reason: SkipReason) {
        self.sizes.push(0);
        self.guards.push(Guard::default());
        self.operations.push(Operation::Skip { path, reason });
    }

    /// Whether a path is already some operation's destination.
    pub fn claims(&self, path: &Path) -> bool {
        self.destinations.contains(path)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operations with the byte count and guard recorded when each was planned.
    pub fn planned_operations(&self) -> impl Iterator<Item = (&Operation, u64, Guard)> {
        self.operations
            .iter()
            .zip(self.sizes.iter().copied())
            .zip(self.guards.iter().copied())
            .map(|((operation, bytes), guard)| (operation, bytes, guard))
    }

    /// Total size of the files moved or deleted.
    pub fn bytes_affected(&self) -> u64 {
        self.bytes_affected
    }

    /// Number of moves and deletes.
    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// True when the plan would change nothing on disk.
    pub fn has_no_mutations(&self) -> bool {
        self.file_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_only_mutations() {
        let mut plan = Plan::new();
        plan.push(
            Operation::Move {
                from: "/r/a.pdf".into(),
                to: "/r/Documents/a.pdf".into(),
            },
            10,
        )
        .unwrap();
        plan.push(
            Operation::Delete {
                path: "/r/b.txt".into(),
                retained: None,
            },
            5,
        )
        .unwrap();
        plan.push_skip("/r/locked".into(), SkipReason::PermissionDenied);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.file_count(), 2);
        assert_eq!(plan.bytes_affected(), 15);
        assert!(!plan.has_no_mutations());
    }

    #[test]
    fn test_duplicate_destination_is_rejected() {
        let mut plan = Plan::new();
        let first = Operation::Move {
            from: "/r/a.pdf".into(),
            to: "/r/Documents/a.pdf".into(),
        };
        let second = Operation::Move {
            from: "/r/x/a.pdf".into(),
            to: "/r/Documents/a.pdf".into(),
        };
        plan.push(first, 1).unwrap();
        assert_eq!(
            plan.push(second, 1),
            Err(DestinationTaken(PathBuf::from("/r/Documents/a.pdf")))
        );
        assert_eq!(plan.len(), 1);
        assert!(plan.claims(Path::new("/r/Documents/a.pdf")));
    }

    #[test]
    fn test_skip_reason_failure_classes() {
        assert!(SkipReason::PermissionDenied.is_failure());
        assert!(SkipReason::CollisionUnresolvable.is_failure());
        assert!(SkipReason::Unreadable("eio".into()).is_failure());
        assert!(!SkipReason::AlreadyInPlace.is_failure());
    }

    fn record(path: &str, size: u64) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size,
            modified: SystemTime::UNIX_EPOCH,
            extension: None,
        }
    }

    #[test]
    fn test_deletes_carry_their_snapshots() {
        let mut plan = Plan::new();
        let old = record("/r/old.log", 7);
        let keep = record("/r/a.txt", 3);
        let copy = record("/r/b.txt", 3);
        let key = ContentKey::of_bytes(b"abc");
        plan.push_delete(&old);
        plan.push_duplicate_delete(&copy, &keep, key);
        plan.push_skip("/r/locked".into(), SkipReason::PermissionDenied);

        let guards: Vec<Guard> = plan.planned_operations().map(|(_, _, g)| g).collect();
        assert_eq!(guards[0].source, Some(Snapshot::of(&old)));
        assert_eq!(guards[0].content, None);
        assert_eq!(guards[1].retained, Some(Snapshot::of(&keep)));
        assert_eq!(guards[1].content, Some(key));
        assert_eq!(guards[2], Guard::default());
        assert_eq!(plan.bytes_affected(), 10);
        assert_eq!(
            plan.operations()[1],
            Operation::Delete {
                path: "/r/b.txt".into(),
                retained: Some("/r/a.txt".into()),
            }
        );
    }

    #[test]
    fn test_operation_display() {
        let op = Operation::Delete {
            path: "/r/b.txt".into(),
            retained: Some("/r/a.txt".into()),
        };
        assert_eq!(op.to_string(), "delete /r/b.txt (duplicate of /r/a.txt)");
    }
}
