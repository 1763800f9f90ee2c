//! Recoverable storage for deleted files.
//!
//! Deleting a cleanup file prefers moving it into a [`RecoverableStore`] so
//! that a later revert can bring it back. Two stores are provided:
//!
//! - [`DirectoryTrash`]: a holding directory on disk with a JSON index,
//!   used by the command-line tool.
//! - [`MemoryTrash`]: keeps deleted contents in memory. Useful for tests and
//!   for embedding the engine where no holding directory is wanted.
//!
//! Callers that have no store at all pass `None` to the engine, which then
//! falls back to permanent deletion.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One item held by a recoverable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrashEntry {
    /// Store-specific identifier of the item.
    pub id: String,
    /// Where the file lived before it was deleted.
    pub original_path: PathBuf,
    /// When the file was moved into the store.
    pub deleted_at: DateTime<Local>,
}

/// Errors reported by a recoverable store.
#[derive(Debug)]
pub enum TrashError {
    /// The store cannot operate on this host.
    Unsupported(String),
    /// A filesystem operation failed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Restoring would overwrite an existing file.
    Conflict(PathBuf),
    /// The entry is not (or no longer) held by the store.
    UnknownEntry(String),
    /// The store's index could not be read or written.
    Index(String),
}

impl std::fmt::Display for TrashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported(reason) => write!(f, "Trash is not supported: {}", reason),
            Self::Io { path, source } => write!(f, "Trash I/O error on {}: {}", path.display(), source),
            Self::Conflict(path) => {
                write!(f, "Cannot restore, a file already exists at {}", path.display())
            }
            Self::UnknownEntry(id) => write!(f, "No trash entry with id {}", id),
            Self::Index(reason) => write!(f, "Trash index error: {}", reason),
        }
    }
}

impl std::error::Error for TrashError {}

pub type TrashResult<T> = Result<T, TrashError>;

/// A holding area that keeps deleted files so they can be restored.
pub trait RecoverableStore {
    /// Moves the file at `path` into the store.
    fn move_to_store(&self, path: &Path) -> TrashResult<()>;

    /// Finds the most recent entry for `original_path` deleted at or after `since`.
    fn find_recently_deleted(
        &self,
        original_path: &Path,
        since: DateTime<Local>,
    ) -> TrashResult<Option<TrashEntry>>;

    /// Puts `entry` back at its original path and drops it from the store.
    fn restore(&self, entry: &TrashEntry) -> TrashResult<()>;
}

/// Picks the newest matching entry.
fn newest_match<'e>(
    entries: impl Iterator<Item = &'e TrashEntry>,
    original_path: &Path,
    since: DateTime<Local>,
) -> Option<TrashEntry> {
    entries
        .filter(|entry| entry.original_path == original_path && entry.deleted_at >= since)
        .max_by_key(|entry| entry.deleted_at)
        .cloned()
}

/// In-memory recoverable store.
///
/// Moving a file reads its bytes and removes it from disk; restoring writes
/// the bytes back. Single-threaded by construction.
#[derive(Debug)]
pub struct MemoryTrash {
    supported: bool,
    entries: RefCell<Vec<(TrashEntry, Vec<u8>)>>,
    next_id: Cell<u64>,
}

impl MemoryTrash {
    pub fn new() -> Self {
        Self {
            supported: true,
            entries: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    /// A store that rejects every request as unsupported.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Returns true if an item deleted from `original_path` is held.
    pub fn contains(&self, original_path: &Path) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|(entry, _)| entry.original_path == original_path)
    }

    /// Shifts every deletion time back by `age`, as if that much time had passed.
    pub fn age_entries(&self, age: chrono::Duration) {
        for (entry, _) in self.entries.borrow_mut().iter_mut() {
            entry.deleted_at -= age;
        }
    }

    /// Drops every item deleted from `original_path`, like emptying the trash.
    pub fn purge(&self, original_path: &Path) {
        self.entries
            .borrow_mut()
            .retain(|(entry, _)| entry.original_path != original_path);
    }

    fn ensure_supported(&self) -> TrashResult<()> {
        if self.supported {
            Ok(())
        } else {
            Err(TrashError::Unsupported("memory trash disabled".to_string()))
        }
    }
}

impl Default for MemoryTrash {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoverableStore for MemoryTrash {
    fn move_to_store(&self, path: &Path) -> TrashResult<()> {
        self.ensure_supported()?;

        let contents = fs::read(path).map_err(|e| TrashError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        fs::remove_file(path).map_err(|e| TrashError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        self.entries.borrow_mut().push((
            TrashEntry {
                id: id.to_string(),
                original_path: path.to_path_buf(),
                deleted_at: Local::now(),
            },
            contents,
        ));
        Ok(())
    }

    fn find_recently_deleted(
        &self,
        original_path: &Path,
        since: DateTime<Local>,
    ) -> TrashResult<Option<TrashEntry>> {
        self.ensure_supported()?;
        let entries = self.entries.borrow();
        Ok(newest_match(
            entries.iter().map(|(entry, _)| entry),
            original_path,
            since,
        ))
    }

    fn restore(&self, entry: &TrashEntry) -> TrashResult<()> {
        self.ensure_supported()?;

        let mut entries = self.entries.borrow_mut();
        let index = entries
            .iter()
            .position(|(held, _)| held.id == entry.id)
            .ok_or_else(|| TrashError::UnknownEntry(entry.id.clone()))?;

        let target = &entries[index].0.original_path;
        if target.exists() {
            return Err(TrashError::Conflict(target.clone()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| TrashError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(target, &entries[index].1).map_err(|e| TrashError::Io {
            path: target.clone(),
            source: e,
        })?;

        entries.remove(index);
        Ok(())
    }
}

/// Recoverable store backed by a holding directory.
///
/// Layout under `root`:
///
/// ```text
/// root/
/// ├── files/        # moved files, renamed to their entry id
/// └── index.json    # list of TrashEntry
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryTrash {
    root: PathBuf,
}

impl DirectoryTrash {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    /// Lists every held entry, oldest first.
    pub fn entries(&self) -> TrashResult<Vec<TrashEntry>> {
        let index_path = self.index_path();
        if !index_path.exists() {
            return Ok(Vec::new());
        }

        let json = fs::read_to_string(&index_path).map_err(|e| TrashError::Io {
            path: index_path.clone(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| TrashError::Index(e.to_string()))
    }

    /// Replaces the index in one step: the new contents go to a temporary
    /// file that is then renamed over `index.json`.
    fn save_entries(&self, entries: &[TrashEntry]) -> TrashResult<()> {
        let json =
            serde_json::to_string_pretty(entries).map_err(|e| TrashError::Index(e.to_string()))?;
        let index_path = self.index_path();
        let temp_path = self.root.join("index.json.tmp");

        let write_temp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_data()
        };
        if let Err(e) = write_temp() {
            remove_quietly(&temp_path);
            return Err(TrashError::Io {
                path: temp_path,
                source: e,
            });
        }

        fs::rename(&temp_path, &index_path).map_err(|e| {
            remove_quietly(&temp_path);
            TrashError::Io {
                path: index_path,
                source: e,
            }
        })
    }

    fn stored_path(&self, id: &str) -> PathBuf {
        self.files_dir().join(id)
    }

    /// Builds an id that is not yet used in the holding directory.
    fn fresh_id(&self, original_path: &Path) -> String {
        let stamp = Local::now().format("%Y%m%d%H%M%S%6f");
        let name = original_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let mut counter = 0u32;
        loop {
            let id = format!("{}-{}-{}", stamp, counter, name);
            if !self.stored_path(&id).exists() {
                return id;
            }
            counter += 1;
        }
    }
}

impl RecoverableStore for DirectoryTrash {
    fn move_to_store(&self, path: &Path) -> TrashResult<()> {
        let files_dir = self.files_dir();
        fs::create_dir_all(&files_dir).map_err(|e| TrashError::Io {
            path: files_dir.clone(),
            source: e,
        })?;

        let mut entries = self.entries()?;
        let id = self.fresh_id(path);
        let stored = self.stored_path(&id);

        move_file(path, &stored).map_err(|e| TrashError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        entries.push(TrashEntry {
            id,
            original_path: path.to_path_buf(),
            deleted_at: Local::now(),
        });

        if let Err(e) = self.save_entries(&entries) {
            // Without an index entry the file could never be found again.
            if let Err(undo) = move_file(&stored, path) {
                tracing::error!(
                    file = %path.display(),
                    stored = %stored.display(),
                    error = %undo,
                    "could not put file back after trash index failure"
                );
            }
            return Err(e);
        }

        Ok(())
    }

    fn find_recently_deleted(
        &self,
        original_path: &Path,
        since: DateTime<Local>,
    ) -> TrashResult<Option<TrashEntry>> {
        let entries = self.entries()?;
        Ok(newest_match(entries.iter(), original_path, since))
    }

    fn restore(&self, entry: &TrashEntry) -> TrashResult<()> {
        let mut entries = self.entries()?;
        let index = entries
            .iter()
            .position(|held| held.id == entry.id)
            .ok_or_else(|| TrashError::UnknownEntry(entry.id.clone()))?;

        let target = entries[index].original_path.clone();
        if target.exists() {
            return Err(TrashError::Conflict(target));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| TrashError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let stored = self.stored_path(&entry.id);
        move_file(&stored, &target).map_err(|e| TrashError::Io {
            path: stored.clone(),
            source: e,
        })?;

        entries.remove(index);
        self.save_entries(&entries)
    }
}

/// Renames `from` to `to`, copying across filesystems when a rename is refused.
///
/// When the copy fallback cannot finish, the copy is removed again so the
/// file only ever lives in one place.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    let Err(rename_error) = fs::rename(from, to) else {
        return Ok(());
    };
    tracing::debug!(
        from = %from.display(),
        to = %to.display(),
        error = %rename_error,
        "rename failed, falling back to copy"
    );

    let existed = to.exists();
    if let Err(e) = fs::copy(from, to) {
        if !existed {
            remove_quietly(to);
        }
        return Err(e);
    }
    if let Err(e) = fs::remove_file(from) {
        remove_quietly(to);
        return Err(e);
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if path.is_file()
        && let Err(e) = fs::remove_file(path)
    {
        tracing::warn!(path = %path.display(), error = %e, "could not remove leftover file");
    }
}
