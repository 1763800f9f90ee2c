/// Undoing recorded operations.
///
/// A rename is undone by moving the file back to its old name. A delete is
/// undone by asking the recoverable store for the file. Each attempt ends in
/// a [`RevertOutcome`]; the ledger entry is marked reverted once the attempt
/// is final, whether or not the file came back.
use crate::ledger::{Ledger, OperationKind, OperationRecord};
use crate::trash::{RecoverableStore, TrashError};
use chrono::{Duration, Local};
use std::fs;
use std::path::{Path, PathBuf};

/// How far back the store is searched for a deleted file.
pub const RECOVERY_WINDOW_HOURS: i64 = 24;

/// Result of a single revert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertOutcome {
    /// The operation was undone.
    Restored,
    /// The record was already reverted; nothing was attempted.
    AlreadyReverted,
    /// The renamed file is gone. The record stays active.
    TargetMissing(PathBuf),
    /// Renaming back failed. The record stays active.
    RenameFailed(String),
    /// The file was deleted permanently; there is nothing to recover.
    NotRecoverable,
    /// The store holds no recent copy of the file.
    NotInTrash,
    /// The store has the file but could not restore it.
    RestoreFailed(String),
    /// No usable store on this host.
    TrashUnavailable,
    /// Skips and errors have no effect to undo.
    NothingToRevert(OperationKind),
}

impl RevertOutcome {
    /// Returns true only if the operation's effect was undone.
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Restored)
    }

    /// Returns true if the record is marked reverted after this outcome.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Self::Restored
                | Self::AlreadyReverted
                | Self::NotRecoverable
                | Self::NotInTrash
                | Self::RestoreFailed(_)
                | Self::TrashUnavailable
        )
    }
}

impl std::fmt::Display for RevertOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restored => write!(f, "restored"),
            Self::AlreadyReverted => write!(f, "already reverted"),
            Self::TargetMissing(path) => {
                write!(f, "file not found at expected location {}", path.display())
            }
            Self::RenameFailed(reason) => write!(f, "could not rename back: {}", reason),
            Self::NotRecoverable => write!(f, "file was deleted permanently and cannot be recovered"),
            Self::NotInTrash => write!(f, "no recent copy found in trash"),
            Self::RestoreFailed(reason) => write!(f, "restore from trash failed: {}", reason),
            Self::TrashUnavailable => write!(f, "trash is not available"),
            Self::NothingToRevert(kind) => write!(f, "{} operations cannot be reverted", kind),
        }
    }
}

/// Undoes individual ledger entries.
pub struct Reverter<'a> {
    ledger: &'a mut Ledger,
    trash: Option<&'a dyn RecoverableStore>,
}

impl<'a> Reverter<'a> {
    pub fn new(ledger: &'a mut Ledger, trash: Option<&'a dyn RecoverableStore>) -> Self {
        Self { ledger, trash }
    }

    /// Attempts to undo `record`, returning true only if its effect was undone.
    pub fn revert(&mut self, record: &OperationRecord) -> bool {
        self.attempt(record).succeeded()
    }

    /// Attempts to undo `record` and reports exactly what happened.
    ///
    /// # Edge Cases Handled
    ///
    /// * **Stale record**: the ledger is consulted, so a record reverted since
    ///   it was read is not attempted again
    /// * **Renamed file gone**: left active so the user can retry
    /// * **Old name taken**: the occupying file is backed up with a timestamp suffix
    /// * **Delete not recoverable, or recovery fails**: marked reverted anyway
    pub fn attempt(&mut self, record: &OperationRecord) -> RevertOutcome {
        if record.reverted || self.reverted_in_ledger(record.id) {
            return RevertOutcome::AlreadyReverted;
        }

        let outcome = match record.kind {
            OperationKind::Rename => self.revert_rename(record),
            OperationKind::Delete => self.revert_delete(record),
            kind => RevertOutcome::NothingToRevert(kind),
        };

        if outcome.is_final() {
            self.mark(record.id);
        }

        tracing::info!(id = record.id, kind = %record.kind, %outcome, "revert attempted");
        outcome
    }

    fn reverted_in_ledger(&self, id: u64) -> bool {
        match self.ledger.operation(id) {
            Ok(Some(current)) => current.reverted,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(id, error = %e, "could not read ledger before revert");
                false
            }
        }
    }

    fn mark(&mut self, id: u64) {
        if let Err(e) = self.ledger.mark_reverted(id) {
            tracing::warn!(id, error = %e, "failed to mark operation reverted");
        }
    }

    fn revert_rename(&self, record: &OperationRecord) -> RevertOutcome {
        let Some(new_path) = record.new_path.as_deref() else {
            return RevertOutcome::RenameFailed("record has no new path".to_string());
        };

        if !new_path.exists() {
            return RevertOutcome::TargetMissing(new_path.to_path_buf());
        }

        let original_path = &record.original_path;
        let mut backup = None;
        if original_path.exists() {
            let backup_path = generate_backup_path(original_path);
            if let Err(e) = fs::rename(original_path, &backup_path) {
                return RevertOutcome::RenameFailed(format!(
                    "could not back up conflicting file: {}",
                    e
                ));
            }
            tracing::info!(
                conflict = %original_path.display(),
                backup = %backup_path.display(),
                "backed up file occupying original name"
            );
            backup = Some(backup_path);
        }

        match fs::rename(new_path, original_path) {
            Ok(()) => RevertOutcome::Restored,
            Err(e) => {
                if let Some(backup_path) = backup
                    && let Err(undo) = fs::rename(&backup_path, original_path)
                {
                    tracing::error!(
                        backup = %backup_path.display(),
                        error = %undo,
                        "could not return backed up file to its name"
                    );
                }
                RevertOutcome::RenameFailed(e.to_string())
            }
        }
    }

    fn revert_delete(&self, record: &OperationRecord) -> RevertOutcome {
        if !record.is_recoverable_delete() {
            return RevertOutcome::NotRecoverable;
        }

        let Some(trash) = self.trash else {
            return RevertOutcome::TrashUnavailable;
        };

        let since = Local::now() - Duration::hours(RECOVERY_WINDOW_HOURS);
        match trash.find_recently_deleted(&record.original_path, since) {
            Ok(Some(entry)) => match trash.restore(&entry) {
                Ok(()) => RevertOutcome::Restored,
                Err(e) => RevertOutcome::RestoreFailed(e.to_string()),
            },
            Ok(None) => RevertOutcome::NotInTrash,
            Err(TrashError::Unsupported(_)) => RevertOutcome::TrashUnavailable,
            Err(e) => RevertOutcome::RestoreFailed(e.to_string()),
        }
    }
}

/// Generates an unused backup path for a file by appending a timestamp.
///
/// Example: `movie.mp4` becomes `movie.mp4.bak.20251109-143052`, or
/// `movie.mp4.bak.20251109-143052.1` when that name is taken.
fn generate_backup_path(original_path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let filename = original_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let parent = original_path.parent().unwrap_or(Path::new(""));

    let base = format!("{}.bak.{}", filename, timestamp);
    let mut candidate = parent.join(&base);
    let mut counter = 1;
    while candidate.symlink_metadata().is_ok() {
        candidate = parent.join(format!("{}.{}", base, counter));
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::Cleaner;
    use crate::config::RuleSet;
    use crate::ledger::LEDGER_FILE_NAME;
    use crate::trash::MemoryTrash;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, Ledger) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let work = temp_dir.path().join("work");
        fs::create_dir(&work).expect("Failed to create work directory");
        let ledger = Ledger::open(temp_dir.path().join(LEDGER_FILE_NAME))
            .expect("Failed to open ledger");
        (temp_dir, work, ledger)
    }

    fn rules() -> RuleSet {
        RuleSet::new([".mp4"], ["hhd800.com@"], [".url"], true)
    }

    fn only_record(ledger: &Ledger, kind: OperationKind) -> OperationRecord {
        ledger
            .recent_operations(100)
            .expect("query failed")
            .into_iter()
            .find(|r| r.kind == kind)
            .expect("record should exist")
    }

    #[test]
    fn test_revert_rename() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("clip.hhd800.com@.mp4"), "v").expect("Failed to write file");
        Cleaner::new(&mut ledger, None)
            .clean(&work, &rules())
            .expect("Clean failed");

        let record = only_record(&ledger, OperationKind::Rename);
        assert!(Reverter::new(&mut ledger, None).revert(&record));

        assert!(work.join("clip.hhd800.com@.mp4").exists());
        assert!(!work.join("clip.mp4").exists());
        let stored = ledger.operation(record.id).expect("query failed").expect("missing");
        assert!(stored.reverted);
    }

    #[test]
    fn test_revert_rename_with_missing_target_stays_active() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("clip.hhd800.com@.mp4"), "v").expect("Failed to write file");
        Cleaner::new(&mut ledger, None)
            .clean(&work, &rules())
            .expect("Clean failed");
        fs::remove_file(work.join("clip.mp4")).expect("Failed to remove renamed file");

        let record = only_record(&ledger, OperationKind::Rename);
        let outcome = Reverter::new(&mut ledger, None).attempt(&record);

        assert!(matches!(outcome, RevertOutcome::TargetMissing(_)));
        let stored = ledger.operation(record.id).expect("query failed").expect("missing");
        assert!(!stored.reverted);
    }

    #[test]
    fn test_revert_rename_backs_up_conflict() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("clip.hhd800.com@.mp4"), "original").expect("Failed to write file");
        Cleaner::new(&mut ledger, None)
            .clean(&work, &rules())
            .expect("Clean failed");
        fs::write(work.join("clip.hhd800.com@.mp4"), "newcomer").expect("Failed to write file");

        let record = only_record(&ledger, OperationKind::Rename);
        assert!(Reverter::new(&mut ledger, None).revert(&record));

        assert_eq!(
            fs::read_to_string(work.join("clip.hhd800.com@.mp4")).expect("read failed"),
            "original"
        );
        let backups = fs::read_dir(&work)
            .expect("Failed to read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn test_revert_recoverable_delete_twice() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("note.url"), "link").expect("Failed to write file");
        let trash = MemoryTrash::new();
        Cleaner::new(&mut ledger, Some(&trash))
            .clean(&work, &rules())
            .expect("Clean failed");

        let record = only_record(&ledger, OperationKind::Delete);
        let mut reverter = Reverter::new(&mut ledger, Some(&trash));
        assert!(reverter.revert(&record));
        assert_eq!(reverter.attempt(&record), RevertOutcome::AlreadyReverted);

        assert_eq!(fs::read_to_string(work.join("note.url")).expect("read failed"), "link");
    }

    #[test]
    fn test_revert_permanent_delete_is_final() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("note.url"), "link").expect("Failed to write file");
        Cleaner::new(&mut ledger, None)
            .clean(&work, &rules())
            .expect("Clean failed");

        let record = only_record(&ledger, OperationKind::Delete);
        let outcome = Reverter::new(&mut ledger, None).attempt(&record);

        assert_eq!(outcome, RevertOutcome::NotRecoverable);
        assert!(!outcome.succeeded());
        assert!(ledger.recent_operations(10).expect("query failed").is_empty());
    }

    #[test]
    fn test_revert_delete_outside_window() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("note.url"), "link").expect("Failed to write file");
        let trash = MemoryTrash::new();
        Cleaner::new(&mut ledger, Some(&trash))
            .clean(&work, &rules())
            .expect("Clean failed");
        trash.age_entries(Duration::hours(RECOVERY_WINDOW_HOURS + 1));

        let record = only_record(&ledger, OperationKind::Delete);
        let outcome = Reverter::new(&mut ledger, Some(&trash)).attempt(&record);

        assert_eq!(outcome, RevertOutcome::NotInTrash);
        assert!(!work.join("note.url").exists());
        let stored = ledger.operation(record.id).expect("query failed").expect("missing");
        assert!(stored.reverted);
    }

    #[test]
    fn test_revert_delete_without_trash() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("note.url"), "link").expect("Failed to write file");
        let trash = MemoryTrash::new();
        Cleaner::new(&mut ledger, Some(&trash))
            .clean(&work, &rules())
            .expect("Clean failed");

        let record = only_record(&ledger, OperationKind::Delete);
        let outcome = Reverter::new(&mut ledger, None).attempt(&record);
        assert_eq!(outcome, RevertOutcome::TrashUnavailable);

        let unsupported = MemoryTrash::unsupported();
        let again = Reverter::new(&mut ledger, Some(&unsupported)).attempt(&record);
        assert_eq!(again, RevertOutcome::AlreadyReverted);
    }

    #[test]
    fn test_revert_delete_after_trash_emptied() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("note.url"), "link").expect("Failed to write file");
        let trash = MemoryTrash::new();
        Cleaner::new(&mut ledger, Some(&trash))
            .clean(&work, &rules())
            .expect("Clean failed");
        trash.purge(&work.join("note.url"));

        let record = only_record(&ledger, OperationKind::Delete);
        assert!(!Reverter::new(&mut ledger, Some(&trash)).revert(&record));
        assert!(ledger.recent_operations(10).expect("query failed").is_empty());
    }

    #[test]
    fn test_skip_records_cannot_be_reverted() {
        let (_temp_dir, work, mut ledger) = setup();
        fs::write(work.join("a.hhd800.com@.mp4"), "v").expect("Failed to write file");
        fs::write(work.join("a.mp4"), "v").expect("Failed to write file");
        Cleaner::new(&mut ledger, None)
            .clean(&work, &rules())
            .expect("Clean failed");

        let record = only_record(&ledger, OperationKind::Skip);
        let outcome = Reverter::new(&mut ledger, None).attempt(&record);

        assert_eq!(outcome, RevertOutcome::NothingToRevert(OperationKind::Skip));
        let stored = ledger.operation(record.id).expect("query failed").expect("missing");
        assert!(!stored.reverted);
    }

    #[test]
    fn test_backup_path_avoids_existing_backup() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let original = temp_dir.path().join("movie.mp4");

        let first = generate_backup_path(&original);
        fs::write(&first, "older backup").expect("Failed to write backup");
        let second = generate_backup_path(&original);

        assert_ne!(first, second);
        assert!(!second.exists());
        assert_eq!(fs::read_to_string(&first).expect("read failed"), "older backup");
    }

    #[test]
    fn test_failed_rename_back_returns_occupant() {
        let (_temp_dir, work, mut ledger) = setup();
        let renamed = work.join("album");
        let original = renamed.join("disc").join("track.mp4");
        fs::create_dir_all(original.parent().expect("has parent")).expect("Failed to create dirs");
        fs::write(&original, "occupant").expect("Failed to write file");

        // A directory cannot be moved inside itself, so renaming back fails
        // after the occupant has been moved aside.
        let id = ledger
            .record(OperationKind::Rename, &original, Some(&renamed), None, "renamed")
            .expect("record failed");
        let record = ledger.operation(id).expect("query failed").expect("missing");

        let outcome = Reverter::new(&mut ledger, None).attempt(&record);

        assert!(matches!(outcome, RevertOutcome::RenameFailed(_)));
        assert_eq!(fs::read_to_string(&original).expect("read failed"), "occupant");
        let backups = fs::read_dir(original.parent().expect("has parent"))
            .expect("Failed to read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".bak."))
            .count();
        assert_eq!(backups, 0);
        let stored = ledger.operation(record.id).expect("query failed").expect("missing");
        assert!(!stored.reverted);
    }

    #[test]
    fn test_generate_backup_path_keeps_directory() {
        let backup = generate_backup_path(Path::new("/videos/movie.mp4"));
        assert_eq!(backup.parent(), Some(Path::new("/videos")));
        assert!(
            backup
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("movie.mp4.bak."))
        );
    }
}
