//! Best-effort board snapshots.
//!
//! The store talks to storage only through [`Durability`]. Both operations
//! are allowed to fail; the store logs failures and keeps serving from
//! memory, so a missing or read-only disk degrades to memory-only operation.
//!
//! Snapshot layout is a single pretty-printed JSON document, overwritten
//! wholesale on every write:
//!
//! ```text
//! {
//!   "tasks": [ ... ],
//!   "teamMembers": [ ... ]
//! }
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;

use crate::board::Board;

/// Durability errors.
#[derive(Debug, thiserror::Error)]
pub enum DurabilityError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Snapshot worker failed: {0}")]
    Worker(String),
}

/// Storage backend for board snapshots.
///
/// Implementations are called from the blocking thread pool and may do
/// synchronous I/O.
pub trait Durability: Send + Sync + 'static {
    /// Read the last snapshot. `None` when there is nothing usable.
    fn restore(&self) -> Option<Board>;

    /// Overwrite the snapshot with `board`.
    fn snapshot(&self, board: &Board) -> Result<(), DurabilityError>;

    /// Short label for log lines.
    fn describe(&self) -> String;
}

/// Snapshot to a single JSON file.
#[derive(Debug, Clone)]
pub struct FileDurability {
    path: PathBuf,
}

impl FileDurability {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Durability for FileDurability {
    fn restore(&self) -> Option<Board> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No snapshot at {}, starting empty", self.path.display());
                return None;
            }
            Err(e) => {
                log::warn!("Could not read snapshot {}: {e}", self.path.display());
                return None;
            }
        };

        match serde_json::from_str::<Board>(&data) {
            Ok(board) => Some(board),
            Err(e) => {
                log::warn!("Ignoring malformed snapshot {}: {e}", self.path.display());
                None
            }
        }
    }

    fn snapshot(&self, board: &Board) -> Result<(), DurabilityError> {
        let json = serde_json::to_string_pretty(board)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// No storage at all: nothing to restore, snapshots are discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOnly;

impl Durability for MemoryOnly {
    fn restore(&self) -> Option<Board> {
        None
    }

    fn snapshot(&self, _board: &Board) -> Result<(), DurabilityError> {
        Ok(())
    }

    fn describe(&self) -> String {
        "memory only".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Task, TeamMember};
    use tempfile::tempdir;

    fn sample_board() -> Board {
        let mut board = Board::new();
        board.add_task(Task::new("t1").with_status("todo").with_field("title", "One"));
        board.upsert_team_member(TeamMember::new("Alice"));
        board
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = tempdir().unwrap();
        let durability = FileDurability::new(dir.path().join("data.json"));
        assert!(durability.restore().is_none());
    }

    #[test]
    fn test_snapshot_then_restore() {
        let dir = tempdir().unwrap();
        let durability = FileDurability::new(dir.path().join("data.json"));
        let board = sample_board();

        durability.snapshot(&board).unwrap();
        assert_eq!(durability.restore(), Some(board));
    }

    #[test]
    fn test_snapshot_is_pretty_printed_with_camel_case_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        FileDurability::new(&path).snapshot(&sample_board()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains('\n'));
        assert!(text.contains("\"teamMembers\""));
        assert!(text.contains("\"tasks\""));
    }

    #[test]
    fn test_snapshot_overwrites_previous() {
        let dir = tempdir().unwrap();
        let durability = FileDurability::new(dir.path().join("data.json"));
        durability.snapshot(&sample_board()).unwrap();
        durability.snapshot(&Board::new()).unwrap();
        assert_eq!(durability.restore(), Some(Board::new()));
    }

    #[test]
    fn test_restore_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{ this is not json").unwrap();
        assert!(FileDurability::new(&path).restore().is_none());
    }

    #[test]
    fn test_restore_wrong_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"tasks": 42}"#).unwrap();
        assert!(FileDurability::new(&path).restore().is_none());
    }

    #[test]
    fn test_snapshot_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let durability = FileDurability::new(dir.path().join("missing").join("data.json"));
        let err = durability.snapshot(&sample_board()).unwrap_err();
        assert!(matches!(err, DurabilityError::Io(_)));
    }

    #[test]
    fn test_memory_only() {
        let durability = MemoryOnly;
        assert!(durability.snapshot(&sample_board()).is_ok());
        assert!(durability.restore().is_none());
    }
}
