//! Output formatting and styling module.
//!
//! All terminal output of the CLI goes through [`OutputFormatter`], so the
//! styling can change in one place. JSON reports go through [`print_json`].

use chrono::{DateTime, Local};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// How command results are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use tidykit::output::OutputFormatter;
    /// OutputFormatter::success("Moved 12 files");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message to stderr in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a progress bar for `total` items, drawn on stderr.
    ///
    /// Returns a hidden bar when `visible` is false, so callers never
    /// branch on whether progress is shown.
    pub fn create_progress_bar(total: u64, visible: bool) -> ProgressBar {
        if !visible {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints per-label counts with a total row.
    ///
    /// ```no_run
    /// use tidykit::output::OutputFormatter;
    /// use std::collections::BTreeMap;
    ///
    /// let mut counts = BTreeMap::new();
    /// counts.insert("Documents".to_string(), 15);
    /// counts.insert("Images".to_string(), 8);
    /// OutputFormatter::summary_table("Category", &counts);
    /// ```
    pub fn summary_table(label: &str, counts: &BTreeMap<String, usize>) {
        Self::header("SUMMARY");

        let width = counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(label.len())
            .max(5);

        println!("{:<width$} | {}", label.bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));

        for (name, count) in counts {
            println!(
                "{:<width$} | {} {}",
                name,
                count.to_string().green(),
                plural(*count),
                width = width
            );
        }

        let total: usize = counts.values().sum();
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            plural(total),
            width = width
        );
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Local time, `%Y-%m-%d %H:%M`.
pub fn format_timestamp(time: SystemTime) -> String {
    let local: DateTime<Local> = DateTime::from(time);
    local.format("%Y-%m-%d %H:%M").to_string()
}

/// Pretty-prints `value` as JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Error serializing report: {}", e))?;
    println!("{}", json);
    Ok(())
}
