//! The single entry point that turns a drop into persisted state.
//!
//! Every operation is two sequential backend calls: the officer
//! status/incident update, then the slot assignment write. They are not
//! atomic. If the second call fails the first stays applied and the error
//! names which half failed.

use tracing::Instrument;

use crate::error::{BackendError, MutationError};
use crate::model::{Incident, Officer, OfficerId, OfficerPatch};
use crate::notify::Notifier;
use crate::overlay::OverlayHandle;
use crate::slot::SlotName;
use crate::store::AssignmentStore;

/// A resolved drop, as routed by the target it landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentRequest {
    AssignToSlot {
        officer_id: OfficerId,
        slot: SlotName,
    },
    ReturnToPool {
        officer_id: OfficerId,
    },
    AssignToIncident {
        officer_id: OfficerId,
        incident: Incident,
    },
}

impl AssignmentRequest {
    pub fn officer_id(&self) -> &OfficerId {
        match self {
            Self::AssignToSlot { officer_id, .. }
            | Self::ReturnToPool { officer_id }
            | Self::AssignToIncident { officer_id, .. } => officer_id,
        }
    }
}

/// What a mutation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Both writes went through. `slot` is where the officer now sits, or
    /// `None` when the officer sits in no slot.
    Applied { slot: Option<SlotName> },
    /// Malformed input (unknown officer or slot); nothing was written.
    Ignored,
}

/// Applies officer assignments: optimistic move, officer update, slot
/// write, toast. `Clone` is cheap.
#[derive(Debug, Clone)]
pub struct AssignmentMutationService {
    store: AssignmentStore,
    overlay: OverlayHandle,
    notifier: Notifier,
}

impl AssignmentMutationService {
    pub fn new(store: AssignmentStore, overlay: OverlayHandle, notifier: Notifier) -> Self {
        Self {
            store,
            overlay,
            notifier,
        }
    }

    /// Run whichever operation `request` names.
    pub async fn execute(
        &self,
        request: AssignmentRequest,
    ) -> Result<MutationOutcome, MutationError> {
        match request {
            AssignmentRequest::AssignToSlot { officer_id, slot } => {
                self.assign_to_slot(&officer_id, &slot).await
            }
            AssignmentRequest::ReturnToPool { officer_id } => self.return_to_pool(&officer_id).await,
            AssignmentRequest::AssignToIncident {
                officer_id,
                incident,
            } => self.assign_to_incident(&officer_id, &incident).await,
        }
    }

    /// Post `officer_id` to `slot` and mark them responding.
    ///
    /// The optimistic move is applied before the first backend call, so the
    /// view changes without waiting on persistence.
    ///
    /// # Returns
    ///
    /// [`MutationOutcome::Ignored`] for a slot outside the catalog or an
    /// officer the backend does not know. Either way nothing is written and
    /// no optimistic move is left behind.
    ///
    /// # Errors
    ///
    /// * [`MutationError::OfficerUpdate`] -- the status update failed; no
    ///   slot write was attempted.
    /// * [`MutationError::SlotAssignment`] -- the status update succeeded but
    ///   the slot write failed. The status change is not rolled back.
    pub async fn assign_to_slot(
        &self,
        officer_id: &OfficerId,
        slot: &SlotName,
    ) -> Result<MutationOutcome, MutationError> {
        let span = tracing::info_span!("assign_to_slot", officer_id = %officer_id, slot = %slot);
        self.apply_slot_assignment(officer_id, slot)
            .instrument(span)
            .await
    }

    async fn apply_slot_assignment(
        &self,
        officer_id: &OfficerId,
        slot: &SlotName,
    ) -> Result<MutationOutcome, MutationError> {
        if !self.store.catalog().contains(slot) {
            tracing::debug!("slot not in catalog, drop ignored");
            return Ok(MutationOutcome::Ignored);
        }

        self.overlay.apply_local_move(officer_id, Some(slot));
        let Some(officer) = self
            .update_officer(officer_id, &OfficerPatch::responding())
            .await?
        else {
            return Ok(MutationOutcome::Ignored);
        };
        self.write_slot(officer_id, Some(slot)).await?;

        tracing::info!("officer assigned to slot");
        self.notifier
            .success(format!("{} assigned to {slot}", officer.display_name));
        Ok(MutationOutcome::Applied {
            slot: Some(slot.clone()),
        })
    }

    /// Take `officer_id` out of every slot and make them available with no
    /// incident. Calling it again changes nothing further.
    ///
    /// # Errors
    ///
    /// Same as [`assign_to_slot`](Self::assign_to_slot).
    pub async fn return_to_pool(
        &self,
        officer_id: &OfficerId,
    ) -> Result<MutationOutcome, MutationError> {
        let span = tracing::info_span!("return_to_pool", officer_id = %officer_id);
        self.apply_pool_return(officer_id).instrument(span).await
    }

    async fn apply_pool_return(
        &self,
        officer_id: &OfficerId,
    ) -> Result<MutationOutcome, MutationError> {
        self.overlay.apply_local_move(officer_id, None);
        let Some(officer) = self
            .update_officer(officer_id, &OfficerPatch::available())
            .await?
        else {
            return Ok(MutationOutcome::Ignored);
        };
        self.write_slot(officer_id, None).await?;

        tracing::info!("officer returned to pool");
        self.notifier
            .success(format!("{} returned to the pool", officer.display_name));
        Ok(MutationOutcome::Applied { slot: None })
    }

    /// Mark `officer_id` responding to `incident`.
    ///
    /// When a catalog slot name occurs in the incident address the officer is
    /// also posted to that slot, optimistically first. Otherwise no optimistic
    /// move is made, the slot write is skipped, and an officer already posted
    /// somewhere stays in that slot.
    ///
    /// # Returns
    ///
    /// `Applied` with the slot the officer sits in afterwards: the matched
    /// slot, or the unchanged current slot when nothing matched.
    ///
    /// # Errors
    ///
    /// Same as [`assign_to_slot`](Self::assign_to_slot).
    pub async fn assign_to_incident(
        &self,
        officer_id: &OfficerId,
        incident: &Incident,
    ) -> Result<MutationOutcome, MutationError> {
        let span = tracing::info_span!(
            "assign_to_incident",
            officer_id = %officer_id,
            incident_id = %incident.id
        );
        self.apply_incident_assignment(officer_id, incident)
            .instrument(span)
            .await
    }

    async fn apply_incident_assignment(
        &self,
        officer_id: &OfficerId,
        incident: &Incident,
    ) -> Result<MutationOutcome, MutationError> {
        let matched = self.store.catalog().match_address(&incident.address).cloned();

        if let Some(slot) = &matched {
            self.overlay.apply_local_move(officer_id, Some(slot));
        }
        let Some(officer) = self
            .update_officer(officer_id, &OfficerPatch::responding_to(incident.id.clone()))
            .await?
        else {
            return Ok(MutationOutcome::Ignored);
        };
        match &matched {
            Some(slot) => {
                self.write_slot(officer_id, Some(slot)).await?;
                tracing::info!(slot = %slot, "officer assigned to incident at matched slot");
            }
            None => {
                tracing::info!("officer assigned to incident, no slot matches address");
            }
        }

        self.notifier.success(format!(
            "{} responding to {}",
            officer.display_name, incident.address
        ));
        let slot = match matched {
            Some(slot) => Some(slot),
            None => self.store.current().slot_of(officer_id).cloned(),
        };
        Ok(MutationOutcome::Applied { slot })
    }

    /// Write the officer half of a mutation.
    ///
    /// `Ok(None)` for an officer the backend does not know: the drop was
    /// malformed, so its optimistic move is withdrawn and nothing is reported.
    async fn update_officer(
        &self,
        officer_id: &OfficerId,
        patch: &OfficerPatch,
    ) -> Result<Option<Officer>, MutationError> {
        match self.store.backend.update_officer(officer_id, patch).await {
            Ok(officer) => Ok(Some(officer)),
            Err(BackendError::OfficerNotFound(_)) => {
                tracing::debug!("unknown officer, drop ignored");
                self.overlay.discard(officer_id);
                Ok(None)
            }
            Err(source) => Err(self.report(MutationError::OfficerUpdate {
                officer_id: officer_id.clone(),
                source,
            })),
        }
    }

    async fn write_slot(
        &self,
        officer_id: &OfficerId,
        slot: Option<&SlotName>,
    ) -> Result<(), MutationError> {
        self.store
            .move_officer(officer_id, slot)
            .await
            .map_err(|source| {
                self.report(MutationError::SlotAssignment {
                    officer_id: officer_id.clone(),
                    source,
                })
            })
    }

    /// Log and toast a failure. The optimistic overlay is left alone; the
    /// reconcile window brings it back in line.
    fn report(&self, err: MutationError) -> MutationError {
        tracing::error!(error = %err, "assignment mutation failed");
        self.notifier.failure(err.to_string());
        err
    }
}
