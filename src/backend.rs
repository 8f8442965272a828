//! Persistence collaborator: officer and slot-assignment tables plus a
//! realtime change feed.
//!
//! [`Backend`] is the seam to the hosted database. [`MemoryBackend`] is an
//! in-process implementation with the same observable behaviour: every write
//! is broadcast on the change feed, tables can be mirrored to a JSON snapshot
//! file, and individual calls can be made to fail for testing.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::assignment::AssignmentRow;
use crate::error::{BackendError, FeedError};
use crate::model::{Officer, OfficerId, OfficerPatch};
use crate::slot::SlotName;

/// Buffered change notifications per subscriber before it starts lagging.
const FEED_CAPACITY: usize = 64;

/// Table touched by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Officers,
    Assignments,
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One notification from the realtime feed.
///
/// Consumers do not apply these incrementally; any notification means
/// "re-fetch".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    /// Primary key of the changed row.
    pub key: String,
}

/// Stream of change notifications. Ends when the feed disconnects.
pub type ChangeFeed = Pin<Box<dyn Stream<Item = Result<ChangeEvent, FeedError>> + Send>>;

/// The hosted relational store, reduced to the calls the assignment engine
/// makes.
#[async_trait::async_trait]
pub trait Backend: Send + Sync + 'static {
    /// All officer rows.
    async fn officers(&self) -> Result<Vec<Officer>, BackendError>;

    /// One officer row, `None` if absent.
    async fn officer(&self, id: &OfficerId) -> Result<Option<Officer>, BackendError>;

    /// Patch an officer's status and incident reference.
    ///
    /// # Errors
    ///
    /// [`BackendError::OfficerNotFound`] if there is no such row.
    async fn update_officer(
        &self,
        id: &OfficerId,
        patch: &OfficerPatch,
    ) -> Result<Officer, BackendError>;

    /// All assignment rows.
    async fn assignment_rows(&self) -> Result<Vec<AssignmentRow>, BackendError>;

    /// Assignment rows for one officer (normally zero or one).
    async fn assignments_for(&self, officer_id: &OfficerId)
    -> Result<Vec<AssignmentRow>, BackendError>;

    /// Insert a new assignment row stamped with the current time.
    async fn insert_assignment(
        &self,
        officer_id: &OfficerId,
        slot: &SlotName,
    ) -> Result<AssignmentRow, BackendError>;

    /// Change the slot of an existing row and refresh its timestamp.
    async fn update_assignment(
        &self,
        row_id: Uuid,
        slot: &SlotName,
    ) -> Result<AssignmentRow, BackendError>;

    /// Delete one assignment row. Deleting a missing row is not an error.
    async fn delete_assignment(&self, row_id: Uuid) -> Result<(), BackendError>;

    /// Open a new subscription to the change feed.
    fn subscribe(&self) -> ChangeFeed;
}

/// Call site that [`MemoryBackend::fail_next`] can make fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    ReadOfficers,
    UpdateOfficer,
    ReadAssignments,
    WriteAssignment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    officers: Vec<Officer>,
    assignments: Vec<AssignmentRow>,
    /// Last timestamp handed out, so stamps are strictly increasing.
    #[serde(default)]
    last_stamp: u64,
}

impl Tables {
    fn stamp(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }
}

struct Inner {
    tables: Mutex<Tables>,
    changes: Mutex<broadcast::Sender<ChangeEvent>>,
    failures: Mutex<Vec<FailPoint>>,
    snapshot_path: Option<PathBuf>,
}

/// In-process [`Backend`].
///
/// `Clone` is cheap: clones share the same tables and feed.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("snapshot_path", &self.inner.snapshot_path)
            .finish()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty tables, no snapshot file.
    pub fn new() -> Self {
        Self::from_tables(Tables::default(), None)
    }

    /// Seeded with `officers` and no assignments.
    pub fn with_officers(officers: impl IntoIterator<Item = Officer>) -> Self {
        let tables = Tables {
            officers: officers.into_iter().collect(),
            ..Tables::default()
        };
        Self::from_tables(tables, None)
    }

    /// Open a backend mirrored to the JSON snapshot at `path`.
    ///
    /// Existing contents are loaded; a missing or corrupt file starts empty.
    /// Every later write rewrites the file atomically.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` for read failures other than file-not-found.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let tables = load_snapshot(&path)?.unwrap_or_default();
        Ok(Self::from_tables(tables, Some(path)))
    }

    fn from_tables(tables: Tables, snapshot_path: Option<PathBuf>) -> Self {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(tables),
                changes: Mutex::new(tx),
                failures: Mutex::new(Vec::new()),
                snapshot_path,
            }),
        }
    }

    /// Add or replace an officer row.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the snapshot file cannot be written.
    pub fn upsert_officer(&self, officer: Officer) -> io::Result<()> {
        let mut tables = self.tables();
        let mut next = tables.clone();
        let key = officer.id.to_string();
        let kind = match next.officers.iter_mut().find(|o| o.id == officer.id) {
            Some(existing) => {
                *existing = officer;
                ChangeKind::Update
            }
            None => {
                next.officers.push(officer);
                ChangeKind::Insert
            }
        };
        self.commit(&mut tables, next, Table::Officers, kind, key)
    }

    /// Append an assignment row as-is, bypassing the upsert path.
    ///
    /// Lets tests reproduce the state left by two racing inserts.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the snapshot file cannot be written.
    pub fn push_raw_assignment(&self, row: AssignmentRow) -> io::Result<()> {
        let mut tables = self.tables();
        let mut next = tables.clone();
        let key = row.id.to_string();
        next.assignments.push(row);
        self.commit(&mut tables, next, Table::Assignments, ChangeKind::Insert, key)
    }

    /// Snapshot of the assignment table, for inspection.
    pub fn rows(&self) -> Vec<AssignmentRow> {
        self.tables().assignments.clone()
    }

    /// Make the next call at `point` fail with [`BackendError::Unavailable`].
    pub fn fail_next(&self, point: FailPoint) {
        self.inner
            .failures
            .lock()
            .expect("failure list mutex poisoned")
            .push(point);
    }

    /// Drop every open change feed subscription.
    ///
    /// Existing [`ChangeFeed`] streams end; later `subscribe` calls get a
    /// fresh feed. Simulates a realtime connection loss.
    pub fn disconnect_feeds(&self) {
        let (tx, _rx) = broadcast::channel(FEED_CAPACITY);
        *self.inner.changes.lock().expect("feed mutex poisoned") = tx;
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner.tables.lock().expect("backend tables mutex poisoned")
    }

    fn check(&self, point: FailPoint) -> Result<(), BackendError> {
        let mut failures = self.inner.failures.lock().expect("failure list mutex poisoned");
        if let Some(pos) = failures.iter().position(|p| *p == point) {
            failures.remove(pos);
            return Err(BackendError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    /// Persist `next` to the snapshot (if configured), install it as the
    /// live tables and broadcast the change.
    ///
    /// A failed snapshot write leaves `tables` untouched, so an `Err` from a
    /// write always means the write is not visible.
    fn commit(
        &self,
        tables: &mut Tables,
        next: Tables,
        table: Table,
        kind: ChangeKind,
        key: String,
    ) -> io::Result<()> {
        if let Some(path) = &self.inner.snapshot_path {
            save_snapshot(path, &next)?;
        }
        *tables = next;
        let event = ChangeEvent { table, kind, key };
        tracing::debug!(table = ?event.table, kind = ?event.kind, key = %event.key, "change broadcast");
        // No subscribers is fine.
        let _ = self.inner.changes.lock().expect("feed mutex poisoned").send(event);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn officers(&self) -> Result<Vec<Officer>, BackendError> {
        self.check(FailPoint::ReadOfficers)?;
        Ok(self.tables().officers.clone())
    }

    async fn officer(&self, id: &OfficerId) -> Result<Option<Officer>, BackendError> {
        self.check(FailPoint::ReadOfficers)?;
        Ok(self.tables().officers.iter().find(|o| &o.id == id).cloned())
    }

    async fn update_officer(
        &self,
        id: &OfficerId,
        patch: &OfficerPatch,
    ) -> Result<Officer, BackendError> {
        self.check(FailPoint::UpdateOfficer)?;
        let mut tables = self.tables();
        let mut next = tables.clone();
        let officer = next
            .officers
            .iter_mut()
            .find(|o| &o.id == id)
            .ok_or_else(|| BackendError::OfficerNotFound(id.clone()))?;
        officer.apply(patch);
        let updated = officer.clone();
        self.commit(&mut tables, next, Table::Officers, ChangeKind::Update, id.to_string())?;
        Ok(updated)
    }

    async fn assignment_rows(&self) -> Result<Vec<AssignmentRow>, BackendError> {
        self.check(FailPoint::ReadAssignments)?;
        Ok(self.tables().assignments.clone())
    }

    async fn assignments_for(
        &self,
        officer_id: &OfficerId,
    ) -> Result<Vec<AssignmentRow>, BackendError> {
        self.check(FailPoint::ReadAssignments)?;
        Ok(self
            .tables()
            .assignments
            .iter()
            .filter(|row| &row.officer_id == officer_id)
            .cloned()
            .collect())
    }

    async fn insert_assignment(
        &self,
        officer_id: &OfficerId,
        slot: &SlotName,
    ) -> Result<AssignmentRow, BackendError> {
        self.check(FailPoint::WriteAssignment)?;
        let mut tables = self.tables();
        let mut next = tables.clone();
        let row = AssignmentRow {
            id: Uuid::new_v4(),
            officer_id: officer_id.clone(),
            slot: slot.clone(),
            updated_at: next.stamp(),
        };
        next.assignments.push(row.clone());
        let key = row.id.to_string();
        self.commit(&mut tables, next, Table::Assignments, ChangeKind::Insert, key)?;
        Ok(row)
    }

    async fn update_assignment(
        &self,
        row_id: Uuid,
        slot: &SlotName,
    ) -> Result<AssignmentRow, BackendError> {
        self.check(FailPoint::WriteAssignment)?;
        let mut tables = self.tables();
        let mut next = tables.clone();
        let stamp = next.stamp();
        let row = next
            .assignments
            .iter_mut()
            .find(|row| row.id == row_id)
            .ok_or_else(|| {
                BackendError::Unavailable(format!("assignment row {row_id} vanished"))
            })?;
        row.slot = slot.clone();
        row.updated_at = stamp;
        let updated = row.clone();
        let key = row_id.to_string();
        self.commit(&mut tables, next, Table::Assignments, ChangeKind::Update, key)?;
        Ok(updated)
    }

    async fn delete_assignment(&self, row_id: Uuid) -> Result<(), BackendError> {
        self.check(FailPoint::WriteAssignment)?;
        let mut tables = self.tables();
        let mut next = tables.clone();
        next.assignments.retain(|row| row.id != row_id);
        if next.assignments.len() != tables.assignments.len() {
            let key = row_id.to_string();
            self.commit(&mut tables, next, Table::Assignments, ChangeKind::Delete, key)?;
        }
        Ok(())
    }

    fn subscribe(&self) -> ChangeFeed {
        let rx = self.inner.changes.lock().expect("feed mutex poisoned").subscribe();
        let stream = BroadcastStream::new(rx).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(missed)| FeedError::Lagged(missed))
        });
        Box::pin(stream)
    }
}

/// Write the tables to `path` via a temporary file and rename.
fn save_snapshot(path: &Path, tables: &Tables) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(tables).map_err(io::Error::other)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read tables from `path`. `Ok(None)` if missing or corrupt.
fn load_snapshot(path: &Path) -> io::Result<Option<Tables>> {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str(&content) {
            Ok(tables) => Ok(Some(tables)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "corrupt backend snapshot, starting empty"
                );
                Ok(None)
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
