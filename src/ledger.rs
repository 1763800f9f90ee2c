/// Durable history of every cleaning operation.
///
/// The ledger is a JSON-lines file. Each line is one event: an operation was
/// recorded, an operation was reverted, a session started, or a session
/// ended. Events are only ever appended, and each append is flushed to disk
/// before the call returns. Reading folds the events back into
/// [`OperationRecord`]s and [`CleaningSession`]s.
use chrono::{DateTime, Local, SubsecRound};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the ledger inside the data directory.
pub const LEDGER_FILE_NAME: &str = "ledger.jsonl";

/// Phrase carried in the details of a delete that bypassed the trash.
pub const NOT_RECOVERABLE: &str = "not recoverable";

/// What kind of action an operation record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Rename,
    Delete,
    Skip,
    Error,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rename => "rename",
            Self::Delete => "delete",
            Self::Skip => "skip",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One logged filesystem action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: u64,
    pub kind: OperationKind,
    pub original_path: PathBuf,
    /// Set only for renames.
    pub new_path: Option<PathBuf>,
    /// Creation time, whole seconds.
    pub timestamp: DateTime<Local>,
    #[serde(default)]
    pub reverted: bool,
    pub session_id: Option<String>,
    pub details: String,
}

impl OperationRecord {
    /// Returns true for a delete whose file went to a recoverable store.
    pub fn is_recoverable_delete(&self) -> bool {
        self.kind == OperationKind::Delete && !self.details.contains(NOT_RECOVERABLE)
    }
}

/// Lifecycle state of a cleaning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    /// The walk stopped on an unhandled error.
    Aborted,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// A bounded run of the cleaner over one directory.
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningSession {
    pub session_id: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub target_directory: PathBuf,
    pub files_renamed: usize,
    pub files_deleted: usize,
    pub status: SessionStatus,
}

/// One line of the ledger file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum LedgerEvent {
    Operation(OperationRecord),
    Reverted {
        id: u64,
        at: DateTime<Local>,
    },
    SessionStarted {
        session_id: String,
        start_time: DateTime<Local>,
        target_directory: PathBuf,
    },
    SessionEnded {
        session_id: String,
        end_time: DateTime<Local>,
        files_renamed: usize,
        files_deleted: usize,
        status: SessionStatus,
    },
}

/// Errors that can occur while reading or writing the ledger.
#[derive(Debug)]
pub enum LedgerError {
    /// The ledger file or its directory could not be accessed.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// An event could not be encoded.
    Encode(String),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Ledger I/O error on {}: {}", path.display(), source)
            }
            Self::Encode(reason) => write!(f, "Failed to encode ledger event: {}", reason),
        }
    }
}

impl std::error::Error for LedgerError {}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Everything the ledger file currently says.
#[derive(Default)]
struct LedgerState {
    operations: BTreeMap<u64, OperationRecord>,
    sessions: HashMap<String, CleaningSession>,
}

/// Append-only store of operation records and cleaning sessions.
///
/// Writes go through a fresh file handle each time. Mutating calls take
/// `&mut self`, so sharing a ledger across threads requires the caller to
/// serialize access.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    next_id: u64,
    known_sessions: HashSet<String>,
}

impl Ledger {
    /// Opens the ledger at `path`, creating its directory if needed.
    ///
    /// An existing file is scanned once so ids continue where it left off.
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LedgerError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut ledger = Self {
            path,
            next_id: 1,
            known_sessions: HashSet::new(),
        };

        let state = ledger.load_state()?;
        ledger.next_id = state.operations.keys().next_back().map_or(1, |id| id + 1);
        ledger.known_sessions = state.sessions.into_keys().collect();

        tracing::debug!(
            path = %ledger.path.display(),
            next_id = ledger.next_id,
            "opened ledger"
        );
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts a new session for `directory` and returns its id.
    ///
    /// Fails only when the ledger file cannot be written.
    pub fn begin_session(&mut self, directory: &Path) -> LedgerResult<String> {
        let start_time = Local::now();
        let base = start_time.format("%Y%m%d_%H%M%S_%6f").to_string();

        let mut session_id = base.clone();
        let mut suffix = 1;
        while self.known_sessions.contains(&session_id) {
            session_id = format!("{}-{}", base, suffix);
            suffix += 1;
        }

        self.append(&LedgerEvent::SessionStarted {
            session_id: session_id.clone(),
            start_time,
            target_directory: directory.to_path_buf(),
        })?;
        self.known_sessions.insert(session_id.clone());

        tracing::info!(session = %session_id, directory = %directory.display(), "session started");
        Ok(session_id)
    }

    /// Closes a session as completed with its final counters.
    ///
    /// Unknown ids and write failures are logged and otherwise ignored.
    pub fn end_session(&mut self, session_id: &str, files_renamed: usize, files_deleted: usize) {
        self.close_session(
            session_id,
            files_renamed,
            files_deleted,
            SessionStatus::Completed,
        );
    }

    /// Closes a session that stopped on an unhandled error.
    pub fn abort_session(&mut self, session_id: &str, files_renamed: usize, files_deleted: usize) {
        self.close_session(
            session_id,
            files_renamed,
            files_deleted,
            SessionStatus::Aborted,
        );
    }

    fn close_session(
        &mut self,
        session_id: &str,
        files_renamed: usize,
        files_deleted: usize,
        status: SessionStatus,
    ) {
        if !self.known_sessions.contains(session_id) {
            tracing::warn!(session = %session_id, "cannot close unknown session");
            return;
        }

        let event = LedgerEvent::SessionEnded {
            session_id: session_id.to_string(),
            end_time: Local::now(),
            files_renamed,
            files_deleted,
            status,
        };
        match self.append(&event) {
            Ok(()) => tracing::info!(
                session = %session_id,
                files_renamed,
                files_deleted,
                %status,
                "session closed"
            ),
            Err(e) => tracing::warn!(session = %session_id, error = %e, "failed to close session"),
        }
    }

    /// Appends one operation record and returns its id.
    ///
    /// Never fails: a record that cannot be written is reported through
    /// `tracing` and `None` is returned, leaving the filesystem change that
    /// prompted it in place. `new_path` is kept only for renames, and a
    /// rename without one is refused.
    pub fn record(
        &mut self,
        kind: OperationKind,
        original_path: &Path,
        new_path: Option<&Path>,
        session_id: Option<&str>,
        details: &str,
    ) -> Option<u64> {
        let new_path = match (kind, new_path) {
            (OperationKind::Rename, None) => {
                tracing::warn!(
                    path = %original_path.display(),
                    "refusing to record a rename without a new path"
                );
                return None;
            }
            (OperationKind::Rename, Some(path)) => Some(path.to_path_buf()),
            (_, _) => None,
        };

        let id = self.next_id;
        self.next_id += 1;

        let record = OperationRecord {
            id,
            kind,
            original_path: original_path.to_path_buf(),
            new_path,
            timestamp: Local::now().trunc_subsecs(0),
            reverted: false,
            session_id: session_id.map(str::to_string),
            details: details.to_string(),
        };

        match self.append(&LedgerEvent::Operation(record)) {
            Ok(()) => {
                tracing::debug!(id, %kind, path = %original_path.display(), "operation recorded");
                Some(id)
            }
            Err(e) => {
                tracing::warn!(
                    %kind,
                    path = %original_path.display(),
                    error = %e,
                    "failed to record operation"
                );
                None
            }
        }
    }

    /// Flags an operation as reverted. Repeated calls are no-ops.
    pub fn mark_reverted(&mut self, id: u64) -> LedgerResult<()> {
        let state = self.load_state()?;
        match state.operations.get(&id) {
            Some(record) if record.reverted => Ok(()),
            Some(_) => {
                self.append(&LedgerEvent::Reverted {
                    id,
                    at: Local::now(),
                })?;
                tracing::info!(id, "operation marked reverted");
                Ok(())
            }
            None => {
                tracing::warn!(id, "cannot mark unknown operation as reverted");
                Ok(())
            }
        }
    }

    /// Non-reverted operations, newest first, at most `limit` of them.
    pub fn recent_operations(&self, limit: usize) -> LedgerResult<Vec<OperationRecord>> {
        let state = self.load_state()?;
        let mut records: Vec<_> = state
            .operations
            .into_values()
            .filter(|record| !record.reverted)
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    /// Looks up a single operation, reverted or not.
    pub fn operation(&self, id: u64) -> LedgerResult<Option<OperationRecord>> {
        Ok(self.load_state()?.operations.remove(&id))
    }

    /// All operations recorded within one session, oldest first.
    pub fn session_operations(&self, session_id: &str) -> LedgerResult<Vec<OperationRecord>> {
        Ok(self
            .load_state()?
            .operations
            .into_values()
            .filter(|record| record.session_id.as_deref() == Some(session_id))
            .collect())
    }

    /// Sessions, most recently started first, at most `limit` of them.
    pub fn recent_sessions(&self, limit: usize) -> LedgerResult<Vec<CleaningSession>> {
        let mut sessions: Vec<_> = self.load_state()?.sessions.into_values().collect();
        sessions.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.session_id.cmp(&a.session_id))
        });
        sessions.truncate(limit);
        Ok(sessions)
    }

    pub fn session(&self, session_id: &str) -> LedgerResult<Option<CleaningSession>> {
        Ok(self.load_state()?.sessions.remove(session_id))
    }

    fn append(&self, event: &LedgerEvent) -> LedgerResult<()> {
        let mut line =
            serde_json::to_string(event).map_err(|e| LedgerError::Encode(e.to_string()))?;
        line.push('\n');

        let io_error = |e| LedgerError::Io {
            path: self.path.clone(),
            source: e,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).map_err(io_error)?;
        file.sync_data().map_err(io_error)
    }

    /// Replays the ledger file. Lines that fail to parse are skipped.
    fn load_state(&self) -> LedgerResult<LedgerState> {
        let mut state = LedgerState::default();
        if !self.path.exists() {
            return Ok(state);
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| LedgerError::Io {
            path: self.path.clone(),
            source: e,
        })?;

        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: LedgerEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(line = index + 1, error = %e, "skipping unreadable ledger line");
                    continue;
                }
            };
            state.apply(event);
        }

        Ok(state)
    }
}

impl LedgerState {
    fn apply(&mut self, event: LedgerEvent) {
        match event {
            LedgerEvent::Operation(record) => {
                self.operations.insert(record.id, record);
            }
            LedgerEvent::Reverted { id, .. } => {
                if let Some(record) = self.operations.get_mut(&id) {
                    record.reverted = true;
                }
            }
            LedgerEvent::SessionStarted {
                session_id,
                start_time,
                target_directory,
            } => {
                self.sessions.insert(
                    session_id.clone(),
                    CleaningSession {
                        session_id,
                        start_time,
                        end_time: None,
                        target_directory,
                        files_renamed: 0,
                        files_deleted: 0,
                        status: SessionStatus::InProgress,
                    },
                );
            }
            LedgerEvent::SessionEnded {
                session_id,
                end_time,
                files_renamed,
                files_deleted,
                status,
            } => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.end_time = Some(end_time);
                    session.files_renamed = files_renamed;
                    session.files_deleted = files_deleted;
                    session.status = status;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_ledger(temp_dir: &TempDir) -> Ledger {
        Ledger::open(temp_dir.path().join("data").join(LEDGER_FILE_NAME))
            .expect("Failed to open ledger")
    }

    #[test]
    fn test_open_creates_directory() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = open_ledger(&temp_dir);
        assert!(temp_dir.path().join("data").is_dir());
        assert!(ledger.recent_operations(10).expect("query failed").is_empty());
    }

    #[test]
    fn test_record_assigns_increasing_ids() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);

        let first = ledger.record(OperationKind::Skip, Path::new("/a"), None, None, "one");
        let second = ledger.record(OperationKind::Skip, Path::new("/b"), None, None, "two");
        assert_eq!(first, Some(1));
        assert_eq!(second, Some(2));
    }

    #[test]
    fn test_ids_continue_after_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        {
            let mut ledger = open_ledger(&temp_dir);
            ledger.record(OperationKind::Error, Path::new("/a"), None, None, "boom");
            ledger.record(OperationKind::Error, Path::new("/b"), None, None, "boom");
        }

        let mut ledger = open_ledger(&temp_dir);
        let id = ledger.record(OperationKind::Error, Path::new("/c"), None, None, "boom");
        assert_eq!(id, Some(3));
    }

    #[test]
    fn test_new_path_only_kept_for_renames() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);

        let rename = ledger
            .record(
                OperationKind::Rename,
                Path::new("/x/a.tag.mp4"),
                Some(Path::new("/x/a.mp4")),
                None,
                "renamed",
            )
            .expect("record failed");
        let skip = ledger
            .record(
                OperationKind::Skip,
                Path::new("/x/b.tag.mp4"),
                Some(Path::new("/x/b.mp4")),
                None,
                "skipped",
            )
            .expect("record failed");

        let rename = ledger.operation(rename).expect("query failed").expect("missing");
        let skip = ledger.operation(skip).expect("query failed").expect("missing");
        assert_eq!(rename.new_path, Some(PathBuf::from("/x/a.mp4")));
        assert_eq!(skip.new_path, None);
    }

    #[test]
    fn test_rename_without_new_path_is_refused() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);

        let id = ledger.record(OperationKind::Rename, Path::new("/x/a.mp4"), None, None, "renamed");
        assert!(id.is_none());
        assert!(ledger.recent_operations(10).expect("query failed").is_empty());

        let next = ledger.record(OperationKind::Skip, Path::new("/x/b.mp4"), None, None, "skipped");
        assert_eq!(next, Some(1));
    }

    #[test]
    fn test_recent_operations_newest_first_and_limited() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        for i in 0..5 {
            ledger.record(
                OperationKind::Skip,
                Path::new(&format!("/f{}", i)),
                None,
                None,
                "",
            );
        }

        let recent = ledger.recent_operations(3).expect("query failed");
        let ids: Vec<u64> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn test_mark_reverted_hides_record_and_is_idempotent() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        let id = ledger
            .record(OperationKind::Delete, Path::new("/a.url"), None, None, "trashed")
            .expect("record failed");

        ledger.mark_reverted(id).expect("mark failed");
        ledger.mark_reverted(id).expect("second mark failed");

        assert!(ledger.recent_operations(10).expect("query failed").is_empty());
        let record = ledger.operation(id).expect("query failed").expect("missing");
        assert!(record.reverted);

        let reverted_lines = fs::read_to_string(ledger.path())
            .expect("Failed to read ledger")
            .lines()
            .filter(|line| line.contains("\"event\":\"reverted\""))
            .count();
        assert_eq!(reverted_lines, 1);
    }

    #[test]
    fn test_mark_unknown_id_is_harmless() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        assert!(ledger.mark_reverted(42).is_ok());
        assert!(ledger.operation(42).expect("query failed").is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);

        let id = ledger
            .begin_session(Path::new("/videos"))
            .expect("Failed to begin session");
        let open = ledger.session(&id).expect("query failed").expect("missing");
        assert_eq!(open.status, SessionStatus::InProgress);
        assert!(open.end_time.is_none());

        ledger.end_session(&id, 3, 2);
        let closed = ledger.session(&id).expect("query failed").expect("missing");
        assert_eq!(closed.status, SessionStatus::Completed);
        assert_eq!(closed.files_renamed, 3);
        assert_eq!(closed.files_deleted, 2);
        assert!(closed.end_time.is_some());
        assert_eq!(closed.target_directory, PathBuf::from("/videos"));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);

        let ids: HashSet<String> = (0..20)
            .map(|_| ledger.begin_session(Path::new("/d")).expect("begin failed"))
            .collect();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn test_end_unknown_session_is_noop() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        ledger.end_session("nope", 1, 1);
        assert!(ledger.recent_sessions(10).expect("query failed").is_empty());
    }

    #[test]
    fn test_abort_session() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        let id = ledger.begin_session(Path::new("/d")).expect("begin failed");
        ledger.abort_session(&id, 1, 0);

        let session = ledger.session(&id).expect("query failed").expect("missing");
        assert_eq!(session.status, SessionStatus::Aborted);
        assert_eq!(session.files_renamed, 1);
    }

    #[test]
    fn test_recent_sessions_newest_first() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        let first = ledger.begin_session(Path::new("/one")).expect("begin failed");
        let second = ledger.begin_session(Path::new("/two")).expect("begin failed");

        let sessions = ledger.recent_sessions(1).expect("query failed");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_session_operations() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        let session = ledger.begin_session(Path::new("/d")).expect("begin failed");
        ledger.record(OperationKind::Skip, Path::new("/d/a"), None, Some(&session), "");
        ledger.record(OperationKind::Skip, Path::new("/d/b"), None, None, "");

        let ops = ledger.session_operations(&session).expect("query failed");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].original_path, PathBuf::from("/d/a"));
    }

    #[test]
    fn test_corrupt_lines_are_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        ledger.record(OperationKind::Skip, Path::new("/a"), None, None, "kept");

        let mut file = OpenOptions::new()
            .append(true)
            .open(ledger.path())
            .expect("Failed to open ledger file");
        writeln!(file, "{{ not json").expect("Failed to write garbage");

        let reopened = open_ledger(&temp_dir);
        let ops = reopened.recent_operations(10).expect("query failed");
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].details, "kept");
    }

    #[test]
    fn test_record_never_fails_when_storage_is_gone() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut ledger = open_ledger(&temp_dir);
        fs::remove_dir_all(temp_dir.path().join("data")).expect("Failed to remove data dir");

        let id = ledger.record(OperationKind::Skip, Path::new("/a"), None, None, "lost");
        assert!(id.is_none());
    }

    #[test]
    fn test_recoverable_delete_detection() {
        let record = OperationRecord {
            id: 1,
            kind: OperationKind::Delete,
            original_path: PathBuf::from("/a.url"),
            new_path: None,
            timestamp: Local::now(),
            reverted: false,
            session_id: None,
            details: format!("deleted permanently ({})", NOT_RECOVERABLE),
        };
        assert!(!record.is_recoverable_delete());

        let trashed = OperationRecord {
            details: "moved to trash (recoverable)".to_string(),
            ..record
        };
        assert!(trashed.is_recoverable_delete());
    }
}
