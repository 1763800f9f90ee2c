//! Command-line interface module for filescrub.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing with `clap`
//! - Cleaning runs and dry runs
//! - Operation and session history listings
//! - Reverting individual operations
//! - Writing a starter configuration file

use crate::cleaner::{self, Cleaner};
use crate::config::RuleSet;
use crate::ledger::{LEDGER_FILE_NAME, Ledger};
use crate::output::OutputFormatter;
use crate::revert::Reverter;
use crate::trash::{DirectoryTrash, RecoverableStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Strip download-site tags from media file names and remove leftover link files.
#[derive(Debug, Parser)]
#[command(name = "filescrub", version, about)]
pub struct Cli {
    /// Rules file to use instead of the discovered one
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the ledger and the trash
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log debug diagnostics to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Clean a directory
    Clean {
        directory: PathBuf,

        /// Show what would change without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Delete cleanup files permanently instead of moving them to the trash
        #[arg(long)]
        permanent: bool,
    },
    /// List recent operations that have not been reverted
    History {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// List recent cleaning sessions
    Sessions {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Revert operations by id
    Revert {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
    /// Write the active rules to a configuration file
    InitConfig {
        /// Destination, defaults to the user configuration path
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Where rules come from and where state is kept.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: Option<PathBuf>,
    pub data_dir: PathBuf,
}

impl Settings {
    /// Builds settings from parsed arguments, filling in defaults.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            config_path: cli.config.clone(),
            data_dir: cli.data_dir.clone().unwrap_or_else(default_data_dir),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(LEDGER_FILE_NAME)
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.data_dir.join("trash")
    }
}

/// Returns `$HOME/.local/share/filescrub`, or `.filescrub` when there is no home.
pub fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".local/share/filescrub"),
        None => PathBuf::from(".filescrub"),
    }
}

/// Runs the CLI application with parsed arguments.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use filescrub::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["filescrub", "clean", "/path/to/videos", "--dry-run"]);
/// match run_cli(cli) {
///     Ok(()) => println!("Operation completed successfully"),
///     Err(e) => eprintln!("Error: {}", e),
/// }
/// ```
pub fn run_cli(cli: Cli) -> Result<(), String> {
    let settings = Settings::from_cli(&cli);
    run_command(&cli.command, &settings)
}

/// Executes one command against the given settings.
pub fn run_command(command: &Command, settings: &Settings) -> Result<(), String> {
    match command {
        Command::Clean {
            directory,
            dry_run: true,
            ..
        } => clean_dry_run(directory, settings),
        Command::Clean {
            directory,
            dry_run: false,
            permanent,
        } => clean_directory(directory, *permanent, settings),
        Command::History { limit } => show_history(*limit, settings),
        Command::Sessions { limit } => show_sessions(*limit, settings),
        Command::Revert { ids } => revert_operations(ids, settings),
        Command::InitConfig { path, force } => init_config(path.as_deref(), *force, settings),
    }
}

fn open_ledger(settings: &Settings) -> Result<Ledger, String> {
    Ledger::open(settings.ledger_path()).map_err(|e| format!("Error opening ledger: {}", e))
}

/// Cleans a directory, recording every change in the ledger.
///
/// This function:
/// 1. Loads the rule set
/// 2. Opens the ledger and the trash
/// 3. Runs the cleaner with a progress bar
/// 4. Prints what was renamed, deleted and skipped
fn clean_directory(directory: &Path, permanent: bool, settings: &Settings) -> Result<(), String> {
    let rules = RuleSet::load(settings.config_path.as_deref());
    let mut ledger = open_ledger(settings)?;
    let trash = DirectoryTrash::new(settings.trash_dir());
    let store: Option<&dyn RecoverableStore> = if permanent { None } else { Some(&trash) };

    OutputFormatter::info(&format!("Cleaning contents of: {}", directory.display()));

    let progress = OutputFormatter::create_progress_bar(0);
    let result = Cleaner::new(&mut ledger, store)
        .with_progress(progress.clone())
        .excluding(&settings.data_dir)
        .clean(directory, &rules);
    progress.finish_and_clear();

    let report = result.map_err(|e| e.to_string())?;
    OutputFormatter::clean_summary(&report);

    if !report.is_empty() {
        OutputFormatter::plain("Use 'filescrub history' to review and 'filescrub revert <ID>' to undo.");
    }
    Ok(())
}

/// Shows what a clean would do without touching the directory or the ledger.
fn clean_dry_run(directory: &Path, settings: &Settings) -> Result<(), String> {
    let rules = RuleSet::load(settings.config_path.as_deref());
    OutputFormatter::dry_run_notice(&format!("Analyzing contents of: {}", directory.display()));

    let actions = cleaner::plan(directory, &rules, std::slice::from_ref(&settings.data_dir))
        .map_err(|e| e.to_string())?;
    OutputFormatter::plan_listing(&actions);
    Ok(())
}

fn show_history(limit: usize, settings: &Settings) -> Result<(), String> {
    let ledger = open_ledger(settings)?;
    let records = ledger
        .recent_operations(limit)
        .map_err(|e| format!("Error reading ledger: {}", e))?;
    OutputFormatter::history_table(&records);
    Ok(())
}

fn show_sessions(limit: usize, settings: &Settings) -> Result<(), String> {
    let ledger = open_ledger(settings)?;
    let sessions = ledger
        .recent_sessions(limit)
        .map_err(|e| format!("Error reading ledger: {}", e))?;
    OutputFormatter::sessions_table(&sessions);
    Ok(())
}

/// Reverts each listed operation in turn.
///
/// Unknown ids and unsuccessful reverts are reported; the command fails if
/// any operation was not reverted.
fn revert_operations(ids: &[u64], settings: &Settings) -> Result<(), String> {
    let mut ledger = open_ledger(settings)?;
    let trash = DirectoryTrash::new(settings.trash_dir());
    let mut failed = 0;

    for &id in ids {
        let record = ledger
            .operation(id)
            .map_err(|e| format!("Error reading ledger: {}", e))?;
        let Some(record) = record else {
            OutputFormatter::warning(&format!("Operation {}: not found", id));
            failed += 1;
            continue;
        };

        let outcome = Reverter::new(&mut ledger, Some(&trash)).attempt(&record);
        OutputFormatter::revert_outcome(id, &outcome);
        if !outcome.succeeded() {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(format!(
            "{} of {} operations could not be reverted",
            failed,
            ids.len()
        ));
    }
    Ok(())
}

/// Writes the active rule set as TOML.
fn init_config(path: Option<&Path>, force: bool, settings: &Settings) -> Result<(), String> {
    let destination = match path {
        Some(path) => path.to_path_buf(),
        None => RuleSet::user_config_path()
            .ok_or_else(|| "No home directory; pass a destination path".to_string())?,
    };

    if destination.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            destination.display()
        ));
    }

    let rules = RuleSet::load(settings.config_path.as_deref());
    rules
        .save(&destination)
        .map_err(|e| format!("Error writing configuration: {}", e))?;
    OutputFormatter::success(&format!("Wrote rules to {}", destination.display()));
    Ok(())
}
