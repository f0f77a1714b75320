//! Ranker behind `bigfiles`. Read-only: produces a report, not a plan.

use crate::plan::SkipReason;
use crate::walker::{FileRecord, WalkReport};
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub files: Vec<FileRecord>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

/// Returns the `top` largest files, size descending, ties by path ascending.
pub fn rank(report: &WalkReport, top: usize) -> Ranking {
    let mut files = report.files.clone();
    files.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
    files.truncate(top);
    Ranking {
        files,
        skipped: report.skipped.clone(),
    }
}
