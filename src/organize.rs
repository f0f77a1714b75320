//! Classifier behind `organize`: plans a move of every file into
//! `root/<Category>/<file name>`.
//!
//! Collisions are resolved while planning. A destination that already exists
//! on disk, or that an earlier move in the same plan claims, is renamed to
//! `name (1).ext`, `name (2).ext`, ... until a free name turns up.

use crate::category::CategoryMap;
use crate::plan::{Operation, Plan, SkipReason};
use crate::walker::{FileRecord, WalkReport};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Upper bound on numbered names tried per file.
pub const MAX_SUFFIX_ATTEMPTS: usize = 1000;

/// Plans category moves for walked files.
#[derive(Debug, Clone)]
pub struct Classifier {
    categories: CategoryMap,
    max_attempts: usize,
}

impl Classifier {
    pub fn new(categories: CategoryMap) -> Self {
        Self {
            categories,
            max_attempts: MAX_SUFFIX_ATTEMPTS,
        }
    }

    /// Limits how many numbered names are tried before giving up on a file.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn categories(&self) -> &CategoryMap {
        &self.categories
    }

    /// Builds the move plan for a walk rooted at `report.root`.
    ///
    /// Unreadable walk entries are carried into the plan as skips.
    pub fn plan(&self, report: &WalkReport) -> Plan {
        let mut plan = Plan::new();
        for (path, reason) in &report.skipped {
            plan.push_skip(path.clone(), reason.clone());
        }

        for file in &report.files {
            self.plan_file(&report.root, file, &mut plan);
        }
        plan
    }

    fn plan_file(&self, root: &Path, file: &FileRecord, plan: &mut Plan) {
        let name = file.file_name();
        let dest_dir = root.join(self.categories.category_for(&name));

        if dest_dir.join(&name) == file.path {
            plan.push_skip(file.path.clone(), SkipReason::AlreadyInPlace);
            return;
        }

        // a multi-part extension stays whole even when only its tail is mapped
        let extension = match (self.categories.lookup(&name), file.extension.as_deref()) {
            (Some((suffix, _)), Some(ext))
                if ext.len() > suffix.len() && ext.ends_with(suffix) =>
            {
                Some(ext.to_string())
            }
            (Some((suffix, _)), _) => Some(suffix.to_string()),
            (None, ext) => ext.map(str::to_string),
        };
        let (stem, ext) = split_name(&name, extension.as_deref());

        let Some(destination) =
            free_destination(&dest_dir, stem, ext, plan, self.max_attempts)
        else {
            warn!(
                "no free name for {} in {}",
                file.path.display(),
                dest_dir.display()
            );
            plan.push_skip(file.path.clone(), SkipReason::CollisionUnresolvable);
            return;
        };

        debug!("plan move {} -> {}", file.path.display(), destination.display());
        let operation = Operation::Move {
            from: file.path.clone(),
            to: destination,
        };
        if let Err(taken) = plan.push(operation, file.size) {
            warn!("{}", taken);
            plan.push_skip(file.path.clone(), SkipReason::CollisionUnresolvable);
        }
    }
}

/// Splits `name` into stem and extension, preserving the original case.
fn split_name<'a>(name: &'a str, extension: Option<&str>) -> (&'a str, &'a str) {
    let Some(ext) = extension else {
        return (name, "");
    };
    if ext.len() >= name.len() {
        return (name, "");
    }
    let cut = name.len() - ext.len();
    if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(ext) {
        (&name[..cut], &name[cut..])
    } else {
        (name, "")
    }
}

fn free_destination(
    dest_dir: &Path,
    stem: &str,
    ext: &str,
    plan: &Plan,
    max_attempts: usize,
) -> Option<PathBuf> {
    (0..=max_attempts)
        .map(|n| {
            if n == 0 {
                dest_dir.join(format!("{}{}", stem, ext))
            } else {
                dest_dir.join(format!("{} ({}){}", stem, n, ext))
            }
        })
        .find(|candidate| !plan.claims(candidate) && candidate.symlink_metadata().is_err())
}
