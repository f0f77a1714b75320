//! tidykit - plan-first file management
//!
//! Every mutating command works in two steps. A planner walks a directory
//! and produces a [`Plan`], then the [`Executor`] applies it, or under
//! dry-run only reports what it would do. Archiving and extraction sit
//! beside that pipeline behind the [`Archiver`] trait.

pub mod archive;
pub mod category;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod hash;
pub mod organize;
pub mod output;
pub mod plan;
pub mod ranker;
pub mod walker;

pub use archive::{ArchiveError, ArchiveFormat, Archiver, StandardArchiver};
pub use category::CategoryMap;
pub use cleanup::AgeFilter;
pub use config::{CompiledFilters, Config, ConfigError};
pub use dedup::{DedupOutcome, Deduplicator, DuplicateGroup};
pub use error::{OpError, WalkError};
pub use executor::{ExecutionResult, Executor, Outcome};
pub use hash::ContentKey;
pub use organize::Classifier;
pub use plan::{Operation, Plan, SkipReason};
pub use ranker::{Ranking, rank};
pub use walker::{FileRecord, TreeWalker, WalkEntry, WalkReport};

pub use cli::{Command, CommandOutcome, run_cli, run_cli_with_config};
