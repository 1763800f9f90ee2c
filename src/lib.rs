//! filescrub - strip download-site tags from media file names
//!
//! This library cleans a directory by removing configured substrings from
//! the names of media files and deleting leftover link files. Every change
//! is written to an append-only ledger, and any recorded rename or delete
//! can be reverted individually. Deletions go to a recoverable trash when
//! one is available.

pub mod cleaner;
pub mod cli;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod output;
pub mod revert;
pub mod trash;

pub use cleaner::{CleanError, CleanReport, Cleaner, PlannedAction};
pub use config::{ConfigError, RuleSet};
pub use ledger::{CleaningSession, Ledger, LedgerError, OperationKind, OperationRecord, SessionStatus};
pub use revert::{RevertOutcome, Reverter};
pub use trash::{DirectoryTrash, MemoryTrash, RecoverableStore, TrashEntry, TrashError};

pub use cli::{Cli, Command, run_cli};
