//! Command-line interface module for tidykit.
//!
//! Parses commands with `clap`, wires configuration into the walker and the
//! planners, runs the executor and renders results as text or JSON.
//! Command-level failures come back as `Err(String)`; per-file failures are
//! part of the returned [`CommandOutcome`].

use crate::archive::{ArchiveFormat, Archiver, StandardArchiver};
use crate::cleanup::AgeFilter;
use crate::config::{CompiledFilters, Config};
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::executor::{ExecutionResult, Executor, Outcome};
use crate::organize::Classifier;
use crate::output::{
    OutputFormat, OutputFormatter, format_bytes, format_timestamp, print_json,
};
use crate::plan::{Operation, Plan, SkipReason};
use crate::ranker::{Ranking, rank};
use crate::walker::{TreeWalker, WalkReport};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(
    name = "tidykit",
    version,
    about = "Organize, clean up, deduplicate and archive directories"
)]
pub struct Cli {
    /// Configuration file to use instead of the default lookup.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print reports as JSON instead of colored text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn output_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Move files into category folders by extension.
    Organize {
        /// Directory to organize (default: the configured downloads folder).
        #[arg(long)]
        path: Option<PathBuf>,
        /// Also organize files in subdirectories.
        #[arg(short, long)]
        recursive: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete files not modified for at least N days.
    Cleanup {
        #[arg(long)]
        days: u64,
        #[arg(long, default_value = ".")]
        path: PathBuf,
        /// Only look at the top level of PATH.
        #[arg(long)]
        no_recursive: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete redundant copies of identical files.
    Deduplicate {
        path: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// List the largest files.
    Bigfiles {
        path: PathBuf,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Pack a folder into a zip or tar.gz archive.
    Archive {
        folder: PathBuf,
        #[arg(long, value_enum, default_value_t = ArchiveFormat::Zip)]
        format: ArchiveFormat,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Unpack a zip, tar.gz or tgz archive.
    Extract {
        archive: PathBuf,
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },
}

/// Whether a command that ran to completion left anything undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub failures: usize,
}

impl CommandOutcome {
    pub fn clean() -> Self {
        Self { failures: 0 }
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }

    fn from_execution(result: &ExecutionResult) -> Self {
        let failed_skips = result
            .entries
            .iter()
            .filter(|e| matches!(&e.outcome, Outcome::Skipped { reason } if reason.is_failure()))
            .count();
        Self {
            failures: result.failed + failed_skips,
        }
    }
}

/// Runs `command` with the default configuration lookup and text output.
pub fn run_cli(command: &Command) -> Result<CommandOutcome, String> {
    run_cli_with_config(command, None, OutputFormat::Text)
}

pub fn run_cli_with_config(
    command: &Command,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<CommandOutcome, String> {
    let config =
        Config::load(config_path).map_err(|e| format!("Error loading configuration: {}", e))?;
    let filters = CompiledFilters::compile(&config.filters)
        .map_err(|e| format!("Error compiling filters: {}", e))?;

    match command {
        Command::Organize {
            path,
            recursive,
            dry_run,
        } => {
            let root = match path {
                Some(path) => path.clone(),
                None => config
                    .paths
                    .downloads_dir()
                    .ok_or("No directory given and no downloads folder could be resolved")?,
            };
            organize(&config, filters, &root, *recursive, *dry_run, format)
        }
        Command::Cleanup {
            days,
            path,
            no_recursive,
            dry_run,
        } => cleanup(filters, path, *days, !*no_recursive, *dry_run, format),
        Command::Deduplicate { path, dry_run } => deduplicate(filters, path, *dry_run, format),
        Command::Bigfiles { path, top } => bigfiles(filters, path, *top, format),
        Command::Archive {
            folder,
            format: archive_format,
            output_dir,
        } => archive(folder, *archive_format, output_dir, format),
        Command::Extract { archive, dest } => extract(archive, dest, format),
    }
}

fn walk(root: &Path, recursive: bool, filters: CompiledFilters) -> Result<WalkReport, String> {
    TreeWalker::new(root)
        .recursive(recursive)
        .filters(filters)
        .collect()
        .map_err(|e| format!("Error reading directory {}: {}", root.display(), e))
}

fn organize(
    config: &Config,
    filters: CompiledFilters,
    root: &Path,
    recursive: bool,
    dry_run: bool,
    format: OutputFormat,
) -> Result<CommandOutcome, String> {
    let categories = config
        .organize
        .category_map()
        .map_err(|e| format!("Error loading configuration: {}", e))?;
    let report = walk(root, recursive, filters)?;
    let plan = Classifier::new(categories).plan(&report);

    if format == OutputFormat::Text {
        announce("Organizing", &report.root, dry_run);
    }
    let result = execute(&plan, dry_run, format);
    render("organize", &report.root, &result, format)?;
    if format == OutputFormat::Text && plan.file_count() > 0 {
        OutputFormatter::summary_table("Category", &category_counts(&report.root, &plan));
    }
    Ok(CommandOutcome::from_execution(&result))
}

/// Files per destination folder name.
fn category_counts(root: &Path, plan: &Plan) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for op in plan.operations() {
        if let Some(to) = op.destination()
            && let Ok(relative) = to.strip_prefix(root)
            && let Some(category) = relative.components().next()
        {
            let name = category.as_os_str().to_string_lossy().into_owned();
            *counts.entry(name).or_insert(0) += 1;
        }
    }
    counts
}

fn cleanup(
    filters: CompiledFilters,
    root: &Path,
    days: u64,
    recursive: bool,
    dry_run: bool,
    format: OutputFormat,
) -> Result<CommandOutcome, String> {
    let report = walk(root, recursive, filters)?;
    let plan = AgeFilter::from_now(days).plan(&report);

    if format == OutputFormat::Text {
        announce(
            &format!("Removing files older than {} days from", days),
            &report.root,
            dry_run,
        );
    }
    let result = execute(&plan, dry_run, format);
    render("cleanup", &report.root, &result, format)?;
    Ok(CommandOutcome::from_execution(&result))
}

fn deduplicate(
    filters: CompiledFilters,
    root: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> Result<CommandOutcome, String> {
    let report = walk(root, true, filters)?;
    if format == OutputFormat::Text {
        announce("Looking for duplicates in", &report.root, dry_run);
    }

    let progress = OutputFormatter::create_progress_bar(0, format == OutputFormat::Text);
    progress.set_message("hashing");
    let outcome = Deduplicator::new().with_progress(progress).plan(&report);
    debug!(
        "hashed {} of {} files",
        outcome.files_hashed,
        report.files.len()
    );

    if format == OutputFormat::Text {
        print_groups(&outcome);
    }
    let result = execute(&outcome.plan, dry_run, format);
    render("deduplicate", &report.root, &result, format)?;
    Ok(CommandOutcome::from_execution(&result))
}

fn print_groups(outcome: &DedupOutcome) {
    if outcome.groups.is_empty() {
        OutputFormatter::info("No duplicate files found.");
        return;
    }
    for group in &outcome.groups {
        OutputFormatter::header(&format!(
            "{} ({} each, {} redundant)",
            group.key.short(),
            format_bytes(group.keep.size),
            format_bytes(group.wasted_bytes())
        ));
        println!("  {} {}", "KEEP  ".green(), group.keep.path.display());
        for file in &group.remove {
            println!("  {} {}", "DELETE".red(), file.path.display());
        }
    }
}

#[derive(Serialize)]
struct RankedFile {
    path: PathBuf,
    size: u64,
    modified: DateTime<Utc>,
}

#[derive(Serialize)]
struct RankingReport<'a> {
    command: &'static str,
    root: &'a Path,
    files: Vec<RankedFile>,
    skipped: &'a [(PathBuf, SkipReason)],
}

fn bigfiles(
    filters: CompiledFilters,
    root: &Path,
    top: usize,
    format: OutputFormat,
) -> Result<CommandOutcome, String> {
    let report = walk(root, true, filters)?;
    let Ranking { files, skipped } = rank(&report, top);
    let outcome = CommandOutcome {
        failures: skipped.iter().filter(|(_, r)| r.is_failure()).count(),
    };

    match format {
        OutputFormat::Json => print_json(&RankingReport {
            command: "bigfiles",
            root: &report.root,
            files: files
                .iter()
                .map(|f| RankedFile {
                    path: f.path.clone(),
                    size: f.size,
                    modified: DateTime::from(f.modified),
                })
                .collect(),
            skipped: &skipped,
        })?,
        OutputFormat::Text => {
            OutputFormatter::header(&format!(
                "Largest {} of {} files ({} total) under {}",
                files.len(),
                report.files.len(),
                format_bytes(report.total_bytes()),
                report.root.display()
            ));
            for file in &files {
                println!(
                    "{:>10}  {}  {}",
                    format_bytes(file.size).bold(),
                    format_timestamp(file.modified),
                    file.path.display()
                );
            }
            for (path, reason) in &skipped {
                OutputFormatter::warning(&format!("skipped {}: {}", path.display(), reason));
            }
        }
    }
    Ok(outcome)
}

#[derive(Serialize)]
struct ArchiveReport<'a> {
    command: &'static str,
    path: &'a Path,
}

fn archive(
    folder: &Path,
    archive_format: ArchiveFormat,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<CommandOutcome, String> {
    let path = StandardArchiver
        .create(folder, archive_format, output_dir)
        .map_err(|e| format!("Error creating archive: {}", e))?;
    match format {
        OutputFormat::Json => print_json(&ArchiveReport {
            command: "archive",
            path: &path,
        })?,
        OutputFormat::Text => {
            OutputFormatter::success(&format!("Created archive {}", path.display()))
        }
    }
    Ok(CommandOutcome::clean())
}

fn extract(archive: &Path, dest: &Path, format: OutputFormat) -> Result<CommandOutcome, String> {
    let path = StandardArchiver
        .extract(archive, dest)
        .map_err(|e| format!("Error extracting archive: {}", e))?;
    match format {
        OutputFormat::Json => print_json(&ArchiveReport {
            command: "extract",
            path: &path,
        })?,
        OutputFormat::Text => OutputFormatter::success(&format!(
            "Extracted {} into {}",
            archive.display(),
            path.display()
        )),
    }
    Ok(CommandOutcome::clean())
}

fn announce(action: &str, root: &Path, dry_run: bool) {
    let message = format!("{} {}", action, root.display());
    if dry_run {
        OutputFormatter::dry_run_notice(&message);
    } else {
        OutputFormatter::info(&message);
    }
}

fn execute(plan: &Plan, dry_run: bool, format: OutputFormat) -> ExecutionResult {
    let visible = format == OutputFormat::Text && !dry_run && plan.file_count() > 0;
    let progress = OutputFormatter::create_progress_bar(plan.len() as u64, visible);
    Executor::new(dry_run).with_progress(progress).execute(plan)
}

#[derive(Serialize)]
struct ExecutionReport<'a> {
    command: &'static str,
    root: &'a Path,
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

fn render(
    command: &'static str,
    root: &Path,
    result: &ExecutionResult,
    format: OutputFormat,
) -> Result<(), String> {
    if format == OutputFormat::Json {
        return print_json(&ExecutionReport {
            command,
            root,
            result,
        });
    }

    for entry in &result.entries {
        render_entry(&entry.operation, &entry.outcome);
    }

    let touched = result.applied + result.simulated;
    if touched == 0 && result.failed == 0 {
        OutputFormatter::plain("Nothing to do.");
    } else if result.dry_run {
        OutputFormatter::dry_run_notice(&format!(
            "{} {} ({}) would be affected. No files were modified.",
            touched,
            if touched == 1 { "file" } else { "files" },
            format_bytes(result.bytes)
        ));
    } else {
        OutputFormatter::success(&format!(
            "{} {} ({}) processed",
            touched,
            if touched == 1 { "file" } else { "files" },
            format_bytes(result.bytes)
        ));
    }

    if !result.is_success() {
        OutputFormatter::error(&format!(
            "{} operation(s) failed. Please review errors above.",
            CommandOutcome::from_execution(result).failures
        ));
    }
    Ok(())
}

fn render_entry(operation: &Operation, outcome: &Outcome) {
    match outcome {
        Outcome::Applied => OutputFormatter::success(&operation.to_string()),
        Outcome::DryRun => OutputFormatter::dry_run_notice(&operation.to_string()),
        Outcome::Skipped { reason } if reason.is_failure() => {
            OutputFormatter::warning(&operation.to_string())
        }
        Outcome::Skipped { .. } => debug!("{}", operation),
        Outcome::Failed { error } => {
            OutputFormatter::error(&format!("{}: {}", operation, error))
        }
    }
}
