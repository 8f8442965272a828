//! Canonical assignment state backed by the persistence collaborator.
//!
//! [`AssignmentStore`] loads assignment rows into an [`AssignmentMap`],
//! performs the officer-to-slot upsert/delete, and publishes every re-fetched
//! map on a watch channel so subscribers (the optimistic overlay reconciler,
//! renderers) re-derive their view.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::watch;

use crate::assignment::AssignmentMap;
use crate::backend::Backend;
use crate::error::BackendError;
use crate::live::{LiveConfig, LiveHandle, run_live_loop};
use crate::model::OfficerId;
use crate::slot::{SlotCatalog, SlotName};

/// Canonical, server-confirmed assignment mapping.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct AssignmentStore {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) catalog: Arc<SlotCatalog>,
    canonical: Arc<watch::Sender<AssignmentMap>>,
    live_handle: Arc<tokio::sync::Mutex<Option<LiveHandle>>>,
}

// Manual `Debug` because `dyn Backend` is not `Debug`.
impl std::fmt::Debug for AssignmentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentStore")
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl AssignmentStore {
    /// Create a store over `backend`. The published map starts with every
    /// catalog slot empty; call [`refresh`](Self::refresh) to load.
    pub fn new(backend: Arc<dyn Backend>, catalog: SlotCatalog) -> Self {
        let (tx, _rx) = watch::channel(AssignmentMap::empty(&catalog));
        Self {
            backend,
            catalog: Arc::new(catalog),
            canonical: Arc::new(tx),
            live_handle: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn catalog(&self) -> &SlotCatalog {
        &self.catalog
    }

    /// Fetch all persisted rows and bucket them into the slot catalog.
    ///
    /// Every catalog slot is present in the result, empty or not. Does not
    /// publish; see [`refresh`](Self::refresh).
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the rows cannot be read.
    pub async fn load(&self) -> Result<AssignmentMap, BackendError> {
        let rows = self.backend.assignment_rows().await?;
        Ok(AssignmentMap::from_rows(&self.catalog, &rows))
    }

    /// Re-fetch and publish the canonical map to all subscribers.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the rows cannot be read; the previously
    /// published map stays in place.
    pub async fn refresh(&self) -> Result<AssignmentMap, BackendError> {
        let map = self.load().await?;
        self.canonical.send_replace(map.clone());
        tracing::debug!("canonical assignments refreshed");
        Ok(map)
    }

    /// The most recently published canonical map.
    pub fn current(&self) -> AssignmentMap {
        self.canonical.borrow().clone()
    }

    /// Receiver that observes every published canonical map.
    pub fn subscribe(&self) -> watch::Receiver<AssignmentMap> {
        self.canonical.subscribe()
    }

    /// Persist `officer_id`'s slot, then publish a refreshed map.
    ///
    /// With `None` every row for the officer is deleted (a no-op if there is
    /// none). Otherwise the newest existing row is updated in place, or a row
    /// is inserted when none exists; any extra rows left behind by a racing
    /// insert are deleted so the officer ends with exactly one row.
    ///
    /// # Errors
    ///
    /// * [`BackendError::UnknownSlot`] -- `destination` is not in the catalog.
    /// * Any backend error from the read, write, or the follow-up refresh.
    pub async fn move_officer(
        &self,
        officer_id: &OfficerId,
        destination: Option<&SlotName>,
    ) -> Result<(), BackendError> {
        if let Some(slot) = destination
            && !self.catalog.contains(slot)
        {
            return Err(BackendError::UnknownSlot(slot.clone()));
        }

        let mut rows = self.backend.assignments_for(officer_id).await?;
        // Newest first: that row is the one kept on upsert.
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        match destination {
            None => {
                for row in &rows {
                    self.backend.delete_assignment(row.id).await?;
                }
                tracing::info!(officer_id = %officer_id, removed = rows.len(), "assignment cleared");
            }
            Some(slot) => {
                let mut rows = rows.into_iter();
                match rows.next() {
                    Some(keep) => {
                        self.backend.update_assignment(keep.id, slot).await?;
                    }
                    None => {
                        self.backend.insert_assignment(officer_id, slot).await?;
                    }
                }
                for extra in rows {
                    tracing::warn!(
                        officer_id = %officer_id,
                        row_id = %extra.id,
                        "removing duplicate assignment row"
                    );
                    self.backend.delete_assignment(extra.id).await?;
                }
                tracing::info!(officer_id = %officer_id, slot = %slot, "assignment stored");
            }
        }

        self.refresh().await?;
        Ok(())
    }

    /// Start the realtime feed loop in the background.
    ///
    /// Spawns a tokio task that subscribes to the backend change feed and
    /// re-fetches the canonical map on every notification, reconnecting with
    /// backoff when the feed drops. Returns a [`LiveHandle`] for checking
    /// sync status and shutting down.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::AlreadyExists`] if live mode is already active.
    pub async fn start_live(&self, config: LiveConfig) -> io::Result<LiveHandle> {
        let mut guard = self.live_handle.lock().await;
        if guard.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "live subscription already started",
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let synced = Arc::new(AtomicBool::new(false));

        let store_clone = self.clone();
        let synced_clone = synced.clone();
        let task = tokio::spawn(async move {
            run_live_loop(store_clone, config, synced_clone, shutdown_rx).await
        });

        let handle = LiveHandle {
            shutdown_tx,
            synced,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        };

        *guard = Some(handle.clone());
        Ok(handle)
    }
}
