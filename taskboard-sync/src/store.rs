//! The authoritative in-memory board.
//!
//! ```text
//!  Router ──transact()──► Transaction ──load()/replace()──► resident Board
//!                                             │
//!                                             │ Arc<Board>
//!                                             ▼
//!                                      snapshot writer task
//!                                             │  spawn_blocking
//!                                             ▼
//!                                        dyn Durability
//! ```
//!
//! A [`Transaction`] holds the store's mutex for as long as it lives, which
//! makes it the single serialization point for the board: one handler runs
//! its whole load → mutate → replace → broadcast sequence before the next
//! handler can look at the board.
//!
//! The board is restored lazily on first access. Snapshots are written by a
//! background task in submission order; when several are queued only the
//! newest is written. Storage failures are logged and counted, never
//! returned: memory stays the source of truth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};

use crate::board::Board;
use crate::durability::{Durability, DurabilityError, FileDurability, MemoryOnly};

/// How long the first access waits for storage before starting empty.
pub const DEFAULT_RESTORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub snapshots_written: u64,
    pub snapshots_failed: u64,
}

struct AtomicStoreStats {
    snapshots_written: AtomicU64,
    snapshots_failed: AtomicU64,
}

impl AtomicStoreStats {
    fn new() -> Self {
        Self {
            snapshots_written: AtomicU64::new(0),
            snapshots_failed: AtomicU64::new(0),
        }
    }
}

enum SnapshotCommand {
    Write(Arc<Board>),
    Flush(oneshot::Sender<()>),
}

/// Owner of the single resident board.
pub struct DocumentStore {
    board: Mutex<Option<Arc<Board>>>,
    durability: Arc<dyn Durability>,
    writer: mpsc::UnboundedSender<SnapshotCommand>,
    stats: Arc<AtomicStoreStats>,
    restore_timeout: Duration,
}

impl DocumentStore {
    /// Create a store over the given backend.
    ///
    /// Spawns the snapshot writer, so this must be called from within a
    /// Tokio runtime.
    pub fn new(durability: Arc<dyn Durability>) -> Self {
        let (writer, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(AtomicStoreStats::new());
        tokio::spawn(run_snapshot_writer(rx, durability.clone(), stats.clone()));

        Self {
            board: Mutex::new(None),
            durability,
            writer,
            stats,
            restore_timeout: DEFAULT_RESTORE_TIMEOUT,
        }
    }

    /// Store backed by a JSON snapshot file.
    pub fn with_file(path: impl Into<std::path::PathBuf>) -> Self {
        Self::new(Arc::new(FileDurability::new(path)))
    }

    /// Store with no persistence.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryOnly))
    }

    pub fn with_restore_timeout(mut self, timeout: Duration) -> Self {
        self.restore_timeout = timeout;
        self
    }

    /// Open a transaction, restoring the board first if this is the first
    /// access.
    pub async fn transact(&self) -> Transaction<'_> {
        let mut guard = self.board.lock().await;
        if guard.is_none() {
            *guard = Some(Arc::new(self.restore().await));
        }
        Transaction { guard, store: self }
    }

    /// Current board (a copy).
    pub async fn load(&self) -> Board {
        self.transact().await.load()
    }

    /// Overwrite the resident board and queue a snapshot.
    pub async fn replace(&self, board: Board) {
        self.transact().await.replace(board);
    }

    /// Wait until every snapshot queued so far has been handed to storage.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.writer.send(SnapshotCommand::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            snapshots_written: self.stats.snapshots_written.load(Ordering::Relaxed),
            snapshots_failed: self.stats.snapshots_failed.load(Ordering::Relaxed),
        }
    }

    async fn restore(&self) -> Board {
        let durability = self.durability.clone();
        let label = durability.describe();
        let restore = tokio::task::spawn_blocking(move || durability.restore());

        match tokio::time::timeout(self.restore_timeout, restore).await {
            Ok(Ok(Some(board))) => {
                log::info!(
                    "Restored board from {label}: {} tasks, {} team members",
                    board.tasks.len(),
                    board.team_members.len()
                );
                board
            }
            Ok(Ok(None)) => {
                log::info!("No snapshot in {label}, starting with an empty board");
                Board::default()
            }
            Ok(Err(e)) => {
                log::warn!("Restore from {label} panicked: {e}; starting empty");
                Board::default()
            }
            Err(_) => {
                log::warn!(
                    "Restore from {label} timed out after {:?}; starting empty",
                    self.restore_timeout
                );
                Board::default()
            }
        }
    }

    fn queue_snapshot(&self, board: Arc<Board>) {
        if self.writer.send(SnapshotCommand::Write(board)).is_err() {
            log::warn!("Snapshot writer is gone; board kept in memory only");
            self.stats.snapshots_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Exclusive access to the resident board.
///
/// Dropping the transaction releases the board to the next handler.
pub struct Transaction<'a> {
    guard: MutexGuard<'a, Option<Arc<Board>>>,
    store: &'a DocumentStore,
}

impl Transaction<'_> {
    /// A copy of the board to mutate.
    pub fn load(&self) -> Board {
        self.guard.as_deref().cloned().unwrap_or_default()
    }

    /// Shared view of the board without copying it.
    pub fn current(&self) -> Arc<Board> {
        self.guard.as_ref().cloned().unwrap_or_default()
    }

    /// Commit `board` as the new resident board and queue a snapshot.
    pub fn replace(&mut self, board: Board) {
        let board = Arc::new(board);
        self.store.queue_snapshot(board.clone());
        *self.guard = Some(board);
    }
}

async fn run_snapshot_writer(
    mut rx: mpsc::UnboundedReceiver<SnapshotCommand>,
    durability: Arc<dyn Durability>,
    stats: Arc<AtomicStoreStats>,
) {
    while let Some(command) = rx.recv().await {
        let mut latest = None;
        let mut waiters = Vec::new();
        let mut coalesced = 0usize;

        let mut next = Some(command);
        while let Some(command) = next {
            match command {
                SnapshotCommand::Write(board) => {
                    if latest.replace(board).is_some() {
                        coalesced += 1;
                    }
                }
                SnapshotCommand::Flush(ack) => waiters.push(ack),
            }
            next = rx.try_recv().ok();
        }

        if coalesced > 0 {
            log::trace!("Coalesced {coalesced} queued snapshots");
        }

        if let Some(board) = latest {
            match write_snapshot(durability.clone(), board).await {
                Ok(()) => {
                    stats.snapshots_written.fetch_add(1, Ordering::Relaxed);
                    log::trace!("Snapshot written to {}", durability.describe());
                }
                Err(e) => {
                    stats.snapshots_failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Snapshot to {} failed, continuing in memory: {e}",
                        durability.describe()
                    );
                }
            }
        }

        for ack in waiters {
            let _ = ack.send(());
        }
    }
    log::debug!("Snapshot writer stopped");
}

async fn write_snapshot(
    durability: Arc<dyn Durability>,
    board: Arc<Board>,
) -> Result<(), DurabilityError> {
    tokio::task::spawn_blocking(move || durability.snapshot(&board))
        .await
        .map_err(|e| DurabilityError::Worker(e.to_string()))?
}
