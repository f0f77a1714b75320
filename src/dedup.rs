//! Content deduplicator behind `deduplicate`.
//!
//! Works in two passes so that only files which already collide on size
//! are ever read:
//! 1. group files by size
//! 2. hash every member of a size group with at least two files and group
//!    by [`ContentKey`]
//!
//! In each resulting class the file with the lexicographically smallest
//! path survives and every other member gets a delete that names it as the
//! retained copy.

use crate::hash::ContentKey;
use crate::plan::{Plan, SkipReason};
use crate::walker::{FileRecord, WalkReport};
use indicatif::ProgressBar;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::io;

/// A set of files with identical content. `keep` is never in `remove`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub key: ContentKey,
    pub keep: FileRecord,
    pub remove: Vec<FileRecord>,
}

impl DuplicateGroup {
    pub fn wasted_bytes(&self) -> u64 {
        self.remove.iter().map(|f| f.size).sum()
    }
}

/// Result of a deduplication pass: the groups found and the plan built
/// from them.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub groups: Vec<DuplicateGroup>,
    pub plan: Plan,
    pub files_hashed: usize,
}

pub struct Deduplicator {
    progress: ProgressBar,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports hashing progress on `progress`, one tick per file hashed.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn plan(&self, report: &WalkReport) -> DedupOutcome {
        self.plan_with(report, |file| ContentKey::of_file(&file.path))
    }

    /// Same as [`plan`](Self::plan) with a caller-supplied hash function.
    pub fn plan_with<F>(&self, report: &WalkReport, mut hash: F) -> DedupOutcome
    where
        F: FnMut(&FileRecord) -> io::Result<ContentKey>,
    {
        let mut outcome = DedupOutcome::default();
        for (path, reason) in &report.skipped {
            outcome.plan.push_skip(path.clone(), reason.clone());
        }

        let mut by_size: BTreeMap<u64, Vec<&FileRecord>> = BTreeMap::new();
        for file in &report.files {
            by_size.entry(file.size).or_default().push(file);
        }
        by_size.retain(|_, files| files.len() > 1);

        let to_hash: u64 = by_size.values().map(|files| files.len() as u64).sum();
        self.progress.set_length(to_hash);

        for files in by_size.into_values() {
            let mut by_key: BTreeMap<ContentKey, Vec<&FileRecord>> = BTreeMap::new();
            for file in files {
                match hash(file) {
                    Ok(key) => by_key.entry(key).or_default().push(file),
                    Err(err) => {
                        warn!("cannot hash {}: {}", file.path.display(), err);
                        outcome
                            .plan
                            .push_skip(file.path.clone(), SkipReason::Unreadable(err.to_string()));
                    }
                }
                outcome.files_hashed += 1;
                self.progress.inc(1);
            }

            for (key, mut members) in by_key {
                if members.len() < 2 {
                    continue;
                }
                members.sort_by(|a, b| a.path.cmp(&b.path));
                let keep = members[0].clone();
                let remove: Vec<FileRecord> = members[1..].iter().map(|f| (*f).clone()).collect();
                debug!(
                    "duplicate class {:?}: keeping {}, {} redundant",
                    key,
                    keep.path.display(),
                    remove.len()
                );
                outcome.groups.push(DuplicateGroup { key, keep, remove });
            }
        }
        self.progress.finish_and_clear();

        outcome.groups.sort_by(|a, b| a.keep.path.cmp(&b.keep.path));
        for group in &outcome.groups {
            for file in &group.remove {
                outcome
                    .plan
                    .push_duplicate_delete(file, &group.keep, group.key);
            }
        }
        outcome
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}
