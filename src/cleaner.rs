/// The cleaning pass over a directory tree.
///
/// For each regular file the [`Cleaner`] strips configured patterns from the
/// names of media files and removes files with cleanup extensions, writing
/// every outcome to the [`Ledger`] under one cleaning session.
use crate::config::RuleSet;
use crate::ledger::{Ledger, NOT_RECOVERABLE, OperationKind};
use crate::trash::RecoverableStore;
use indicatif::ProgressBar;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Skip reason used when the scrubbed name is already taken.
pub const TARGET_EXISTS: &str = "target exists";

/// Skip reason used when stripping patterns leaves nothing.
pub const EMPTY_NAME: &str = "empty name";

/// What a cleaning run did, for display to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// `(old name, new name)` for every rename.
    pub renamed: Vec<(String, String)>,
    /// Names of deleted files.
    pub deleted: Vec<String>,
    /// `(old name, intended name, reason)` for every skipped rename.
    pub skipped: Vec<(String, String, String)>,
}

impl CleanReport {
    /// Returns true if the run changed nothing and skipped nothing.
    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty() && self.deleted.is_empty() && self.skipped.is_empty()
    }
}

/// A change a cleaning run would make, computed without touching anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Rename {
        from: PathBuf,
        to: PathBuf,
        patterns: Vec<String>,
    },
    Skip {
        path: PathBuf,
        target: PathBuf,
        reason: &'static str,
    },
    Delete {
        path: PathBuf,
    },
}

/// Errors that stop a cleaning run.
#[derive(Debug)]
pub enum CleanError {
    /// The target directory is missing or is not a directory.
    InvalidDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The same suffix is both a rename target and a cleanup target.
    OverlappingRules(Vec<String>),
    /// Renaming a file failed. The run was aborted at this file.
    RenameFailed {
        source: PathBuf,
        destination: PathBuf,
        source_error: std::io::Error,
    },
}

impl std::fmt::Display for CleanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDirectory { path, source } => {
                write!(f, "Invalid directory {}: {}", path.display(), source)
            }
            Self::OverlappingRules(extensions) => write!(
                f,
                "Extensions configured for both renaming and cleanup: {}",
                extensions.join(", ")
            ),
            Self::RenameFailed {
                source,
                destination,
                source_error,
            } => write!(
                f,
                "Failed to rename {} to {}: {}",
                source.display(),
                destination.display(),
                source_error
            ),
        }
    }
}

impl std::error::Error for CleanError {}

/// Result type for cleaning operations.
pub type CleanResult<T> = Result<T, CleanError>;

/// Applies a [`RuleSet`] to a directory and logs each outcome.
///
/// # Examples
///
/// ```no_run
/// use filescrub::{Cleaner, Ledger, MemoryTrash, RuleSet};
/// use std::path::Path;
///
/// let mut ledger = Ledger::open("/tmp/filescrub/ledger.jsonl").unwrap();
/// let trash = MemoryTrash::new();
/// let report = Cleaner::new(&mut ledger, Some(&trash))
///     .clean(Path::new("/path/to/videos"), &RuleSet::default());
///
/// match report {
///     Ok(report) => println!("Renamed {} files", report.renamed.len()),
///     Err(e) => eprintln!("Cleaning failed: {}", e),
/// }
/// ```
pub struct Cleaner<'a> {
    ledger: &'a mut Ledger,
    trash: Option<&'a dyn RecoverableStore>,
    progress: Option<ProgressBar>,
    excluded: Vec<PathBuf>,
}

impl<'a> Cleaner<'a> {
    /// Creates a cleaner writing to `ledger`. With `trash` set to `None`,
    /// deletions are permanent.
    pub fn new(ledger: &'a mut Ledger, trash: Option<&'a dyn RecoverableStore>) -> Self {
        Self {
            ledger,
            trash,
            progress: None,
            excluded: Vec::new(),
        }
    }

    /// Reports per-file progress on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Leaves everything under `root` alone, typically the directory holding
    /// the ledger and the trash.
    pub fn excluding(mut self, root: impl Into<PathBuf>) -> Self {
        self.excluded.push(root.into());
        self
    }

    /// Runs one cleaning pass over `directory`.
    ///
    /// # Returns
    ///
    /// The renames, deletions and skips of this run. A rename failure aborts
    /// the run: an error record is appended, the session is closed as
    /// aborted, and the error is returned. Changes made before the failure
    /// stay in place and stay recorded.
    pub fn clean(&mut self, directory: &Path, rules: &RuleSet) -> CleanResult<CleanReport> {
        validate(directory, rules)?;

        let session_id = match self.ledger.begin_session(directory) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "could not open a session, continuing without one");
                None
            }
        };
        let session = session_id.as_deref();

        let files = collect_files(directory, rules, &self.excluded);
        if let Some(progress) = &self.progress {
            progress.set_length(files.len() as u64);
        }

        let mut report = CleanReport::default();
        for file in &files {
            if let Err(e) = self.process_file(file, rules, session, &mut report) {
                tracing::error!(file = %file.display(), error = %e, "cleaning aborted");
                self.ledger.record(
                    OperationKind::Error,
                    file,
                    None,
                    session,
                    &format!("cleaning aborted: {}", e),
                );
                if let Some(id) = session {
                    self.ledger
                        .abort_session(id, report.renamed.len(), report.deleted.len());
                }
                return Err(e);
            }
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }

        if let Some(id) = session {
            self.ledger
                .end_session(id, report.renamed.len(), report.deleted.len());
        }

        Ok(report)
    }

    /// Runs the rename pass, then the delete pass, on one file.
    fn process_file(
        &mut self,
        path: &Path,
        rules: &RuleSet,
        session: Option<&str>,
        report: &mut CleanReport,
    ) -> CleanResult<()> {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            tracing::debug!(path = %path.display(), "skipping file with a non UTF-8 name");
            return Ok(());
        };

        let mut current = path.to_path_buf();
        if rules.is_rename_target(file_name)
            && let Some(renamed) = self.rename_file(path, file_name, rules, session, report)?
        {
            current = renamed;
        }

        let current_name = current
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file_name)
            .to_string();
        if rules.is_cleanup_target(&current_name) {
            self.delete_file(&current, &current_name, session, report);
        }

        Ok(())
    }

    /// Strips patterns from the name and renames in place.
    ///
    /// Returns the new path, or `None` when the file kept its name.
    fn rename_file(
        &mut self,
        path: &Path,
        file_name: &str,
        rules: &RuleSet,
        session: Option<&str>,
        report: &mut CleanReport,
    ) -> CleanResult<Option<PathBuf>> {
        let Some((new_name, patterns)) = rules.scrub_name(file_name) else {
            return Ok(None);
        };

        if new_name.is_empty() {
            report
                .skipped
                .push((file_name.to_string(), new_name, EMPTY_NAME.to_string()));
            self.ledger.record(
                OperationKind::Skip,
                path,
                None,
                session,
                &format!("skipped rename, {}: nothing left after stripping", EMPTY_NAME),
            );
            return Ok(None);
        }

        let new_path = path.with_file_name(&new_name);
        if new_path.exists() {
            self.ledger.record(
                OperationKind::Skip,
                path,
                None,
                session,
                &format!("skipped rename, {}: '{}'", TARGET_EXISTS, new_name),
            );
            report
                .skipped
                .push((file_name.to_string(), new_name, TARGET_EXISTS.to_string()));
            return Ok(None);
        }

        fs::rename(path, &new_path).map_err(|e| CleanError::RenameFailed {
            source: path.to_path_buf(),
            destination: new_path.clone(),
            source_error: e,
        })?;

        let stripped = patterns
            .iter()
            .map(|p| format!("'{}'", p))
            .collect::<Vec<_>>()
            .join(", ");
        self.ledger.record(
            OperationKind::Rename,
            path,
            Some(&new_path),
            session,
            &format!("removed {} from file name", stripped),
        );
        tracing::info!(from = %path.display(), to = %new_path.display(), "renamed");

        report.renamed.push((file_name.to_string(), new_name));
        Ok(Some(new_path))
    }

    /// Deletes a cleanup file, preferring the recoverable store.
    ///
    /// Failures are recorded and never stop the run.
    fn delete_file(
        &mut self,
        path: &Path,
        file_name: &str,
        session: Option<&str>,
        report: &mut CleanReport,
    ) {
        let fallback_reason = match self.trash {
            Some(trash) => match trash.move_to_store(path) {
                Ok(()) => {
                    self.ledger.record(
                        OperationKind::Delete,
                        path,
                        None,
                        session,
                        "moved cleanup file to trash (recoverable)",
                    );
                    tracing::info!(path = %path.display(), "moved to trash");
                    report.deleted.push(file_name.to_string());
                    return;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "trash failed, deleting permanently");
                    format!("trash failed: {}", e)
                }
            },
            None => "no trash available".to_string(),
        };

        match fs::remove_file(path) {
            Ok(()) => {
                self.ledger.record(
                    OperationKind::Delete,
                    path,
                    None,
                    session,
                    &format!(
                        "deleted cleanup file permanently ({}, {})",
                        fallback_reason, NOT_RECOVERABLE
                    ),
                );
                tracing::info!(path = %path.display(), "deleted permanently");
                report.deleted.push(file_name.to_string());
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "delete failed");
                self.ledger.record(
                    OperationKind::Error,
                    path,
                    None,
                    session,
                    &format!("failed to delete file: {}", e),
                );
            }
        }
    }
}

/// Checks the target directory and the rule set before anything is written.
pub fn validate(directory: &Path, rules: &RuleSet) -> CleanResult<()> {
    match fs::metadata(directory) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            return Err(CleanError::InvalidDirectory {
                path: directory.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path is not a directory",
                ),
            });
        }
        Err(e) => {
            return Err(CleanError::InvalidDirectory {
                path: directory.to_path_buf(),
                source: e,
            });
        }
    }

    let overlap = rules.overlapping_extensions();
    if !overlap.is_empty() {
        return Err(CleanError::OverlappingRules(overlap));
    }

    Ok(())
}

/// Lists the regular files a run over `directory` would visit.
///
/// Order follows file names within each directory. Entries that cannot be
/// read are logged and left out, and so is anything under an `excluded`
/// root. A `directory` inside an excluded root yields nothing.
pub fn collect_files(directory: &Path, rules: &RuleSet, excluded: &[PathBuf]) -> Vec<PathBuf> {
    let excluded: Vec<PathBuf> = excluded
        .iter()
        .filter_map(|root| fs::canonicalize(root).ok())
        .collect();

    if let Ok(start) = fs::canonicalize(directory)
        && let Some(root) = excluded.iter().find(|root| start.starts_with(root))
    {
        tracing::warn!(
            directory = %directory.display(),
            excluded = %root.display(),
            "directory lies inside an excluded root, nothing to clean"
        );
        return Vec::new();
    }

    let mut walker = WalkDir::new(directory).min_depth(1).sort_by_file_name();
    if !rules.recurse_subdirectories() {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, &excluded))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn is_excluded(entry: &DirEntry, excluded: &[PathBuf]) -> bool {
    if excluded.is_empty() || !entry.file_type().is_dir() {
        return false;
    }

    match fs::canonicalize(entry.path()) {
        Ok(path) if excluded.contains(&path) => {
            tracing::debug!(path = %entry.path().display(), "skipping excluded directory");
            true
        }
        _ => false,
    }
}

/// Computes what [`Cleaner::clean`] would do, without changing anything.
///
/// Two files that scrub to the same name are planned the way a real run
/// handles them: the first is renamed and the second is skipped.
pub fn plan(
    directory: &Path,
    rules: &RuleSet,
    excluded: &[PathBuf],
) -> CleanResult<Vec<PlannedAction>> {
    validate(directory, rules)?;

    let mut actions = Vec::new();
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    for path in collect_files(directory, rules, excluded) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let mut current_name = file_name.to_string();
        if rules.is_rename_target(file_name)
            && let Some((new_name, patterns)) = rules.scrub_name(file_name)
        {
            let target = path.with_file_name(&new_name);
            if new_name.is_empty() {
                actions.push(PlannedAction::Skip {
                    path: path.clone(),
                    target,
                    reason: EMPTY_NAME,
                });
            } else if target.exists() || claimed.contains(&target) {
                actions.push(PlannedAction::Skip {
                    path: path.clone(),
                    target,
                    reason: TARGET_EXISTS,
                });
            } else {
                claimed.insert(target.clone());
                actions.push(PlannedAction::Rename {
                    from: path.clone(),
                    to: target,
                    patterns: patterns.into_iter().map(str::to_string).collect(),
                });
                current_name = new_name;
            }
        }

        if rules.is_cleanup_target(&current_name) {
            actions.push(PlannedAction::Delete {
                path: path.with_file_name(&current_name),
            });
        }
    }

    Ok(actions)
}
