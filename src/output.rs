//! Output formatting and styling module.
//!
//! All user-facing output of the command line goes through here: status
//! lines, the progress bar, the summary after a clean, and the history and
//! session tables.

use crate::cleaner::{CleanReport, PlannedAction};
use crate::ledger::{CleaningSession, OperationKind, OperationRecord, SessionStatus};
use crate::revert::RevertOutcome;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Progress bars and result tables
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use filescrub::output::OutputFormatter;
    /// OutputFormatter::success("Cleaning complete");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates and returns a progress bar for a cleaning pass.
    ///
    /// # Arguments
    ///
    /// * `total` - Total number of files to process
    ///
    /// # Example
    ///
    /// ```no_run
    /// use filescrub::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_and_clear();
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        pb.set_style(style);
        pb
    }

    /// Prints what a cleaning run did, followed by a totals line.
    pub fn clean_summary(report: &CleanReport) {
        if report.is_empty() {
            Self::info("Nothing to clean.");
            return;
        }

        for (old_name, new_name) in &report.renamed {
            println!("  {} {} → {}", "renamed".green(), old_name, new_name);
        }
        for name in &report.deleted {
            println!("  {} {}", "deleted".red(), name);
        }
        for (old_name, new_name, reason) in &report.skipped {
            println!(
                "  {} {} → {} ({})",
                "skipped".yellow(),
                old_name,
                new_name,
                reason
            );
        }

        Self::header("SUMMARY");
        println!(
            "Renamed {}, deleted {}, skipped {}",
            report.renamed.len().to_string().green().bold(),
            report.deleted.len().to_string().red().bold(),
            report.skipped.len().to_string().yellow().bold()
        );
    }

    /// Prints the actions a dry run found.
    pub fn plan_listing(actions: &[PlannedAction]) {
        if actions.is_empty() {
            Self::dry_run_notice("Nothing to clean.");
            return;
        }

        for action in actions {
            match action {
                PlannedAction::Rename { from, to, patterns } => println!(
                    "  {} {} → {} [{}]",
                    "would rename".green(),
                    from.display(),
                    file_name(to),
                    patterns.join(", ")
                ),
                PlannedAction::Skip {
                    path,
                    target,
                    reason,
                } => println!(
                    "  {} {} → {} ({})",
                    "would skip".yellow(),
                    path.display(),
                    file_name(target),
                    reason
                ),
                PlannedAction::Delete { path } => {
                    println!("  {} {}", "would delete".red(), path.display())
                }
            }
        }

        Self::dry_run_notice(&format!(
            "{} planned actions. No files were modified.",
            actions.len()
        ));
    }

    /// Prints active operation records as a table, newest first.
    pub fn history_table(records: &[OperationRecord]) {
        if records.is_empty() {
            Self::info("No operations recorded.");
            return;
        }

        Self::header("OPERATIONS");
        println!(
            "{:>6} | {:<19} | {:<6} | {}",
            "ID".bold(),
            "Time".bold(),
            "Kind".bold(),
            "File".bold()
        );
        println!("{}", "-".repeat(72));

        for record in records {
            let kind = format!("{:<6}", record.kind.to_string());
            let kind = match record.kind {
                OperationKind::Rename => kind.green(),
                OperationKind::Delete => kind.red(),
                OperationKind::Skip => kind.yellow(),
                OperationKind::Error => kind.red().bold(),
            };
            let target = match &record.new_path {
                Some(new_path) => format!(
                    "{} → {}",
                    record.original_path.display(),
                    file_name(new_path)
                ),
                None => record.original_path.display().to_string(),
            };
            println!(
                "{:>6} | {} | {} | {}",
                record.id,
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                kind,
                target
            );
            if !record.details.is_empty() {
                println!("{:>6} | {:<19} | {:<6} | {}", "", "", "", record.details.dimmed());
            }
        }
    }

    /// Prints cleaning sessions as a table, newest first.
    pub fn sessions_table(sessions: &[CleaningSession]) {
        if sessions.is_empty() {
            Self::info("No cleaning sessions recorded.");
            return;
        }

        Self::header("SESSIONS");
        println!(
            "{:<24} | {:<11} | {:>7} | {:>7} | {}",
            "Session".bold(),
            "Status".bold(),
            "Renamed".bold(),
            "Deleted".bold(),
            "Directory".bold()
        );
        println!("{}", "-".repeat(80));

        for session in sessions {
            let status = format!("{:<11}", session.status.to_string());
            let status = match session.status {
                SessionStatus::Completed => status.green(),
                SessionStatus::InProgress => status.yellow(),
                SessionStatus::Aborted => status.red(),
            };
            println!(
                "{:<24} | {} | {:>7} | {:>7} | {}",
                session.session_id,
                status,
                session.files_renamed,
                session.files_deleted,
                session.target_directory.display()
            );
        }
    }

    /// Prints the outcome of reverting one operation.
    pub fn revert_outcome(id: u64, outcome: &RevertOutcome) {
        let message = format!("Operation {}: {}", id, outcome);
        if outcome.succeeded() {
            Self::success(&message);
        } else if matches!(outcome, RevertOutcome::AlreadyReverted) {
            Self::info(&message);
        } else {
            Self::warning(&message);
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
