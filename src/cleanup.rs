//! Age filter behind `cleanup`.

use crate::plan::Plan;
use crate::walker::{FileRecord, WalkReport};
use std::time::{Duration, SystemTime};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Selects files whose modification time is at least `threshold_days` old.
///
/// `now` is fixed when the filter is built so that every file in one plan
/// is judged against the same instant.
#[derive(Debug, Clone, Copy)]
pub struct AgeFilter {
    threshold: Duration,
    now: SystemTime,
}

impl AgeFilter {
    pub fn new(threshold_days: u64, now: SystemTime) -> Self {
        Self {
            threshold: Duration::from_secs(threshold_days.saturating_mul(SECONDS_PER_DAY)),
            now,
        }
    }

    /// Uses the current time as `now`.
    pub fn from_now(threshold_days: u64) -> Self {
        Self::new(threshold_days, SystemTime::now())
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn now(&self) -> SystemTime {
        self.now
    }

    /// `None` when the file's mtime lies in the future.
    pub fn age_of(&self, file: &FileRecord) -> Option<Duration> {
        self.now.duration_since(file.modified).ok()
    }

    pub fn qualifies(&self, file: &FileRecord) -> bool {
        self.age_of(file).is_some_and(|age| age >= self.threshold)
    }

    /// Plans a delete for every qualifying file. Directories are never deleted.
    pub fn plan(&self, report: &WalkReport) -> Plan {
        let mut plan = Plan::new();
        for (path, reason) in &report.skipped {
            plan.push_skip(path.clone(), reason.clone());
        }

        for file in report.files.iter().filter(|f| self.qualifies(f)) {
            plan.push_delete(file);
        }
        plan
    }
}
