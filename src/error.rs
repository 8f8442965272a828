//! Crate-level error types for persistence, the change feed, and the
//! assignment mutation boundary.

use crate::model::OfficerId;
use crate::slot::SlotName;

/// Error returned by the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No officer row with this id.
    #[error("officer {0} not found")]
    OfficerNotFound(OfficerId),

    /// Slot name is not in the catalog.
    #[error("slot '{0}' is not in the catalog")]
    UnknownSlot(SlotName),

    /// Network or database failure reported by the backing store.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Local snapshot file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fault observed on the realtime change feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The subscriber fell behind and change notifications were dropped.
    ///
    /// Every notification triggers a full re-fetch, so the remedy is simply
    /// to re-fetch once more.
    #[error("change feed lagged, {0} notifications missed")]
    Lagged(u64),
}

/// Error surfaced by [`AssignmentMutationService`](crate::AssignmentMutationService).
///
/// The officer update and the slot write are two separate calls; the
/// variant says which one failed. Nothing applied before the failure is
/// rolled back.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// Updating the officer's status or incident reference failed.
    #[error("failed to update officer {officer_id}: {source}")]
    OfficerUpdate {
        officer_id: OfficerId,
        #[source]
        source: BackendError,
    },

    /// Writing or deleting the slot assignment row failed.
    #[error("failed to update slot assignment for officer {officer_id}: {source}")]
    SlotAssignment {
        officer_id: OfficerId,
        #[source]
        source: BackendError,
    },
}

impl MutationError {
    pub fn officer_id(&self) -> &OfficerId {
        match self {
            Self::OfficerUpdate { officer_id, .. } | Self::SlotAssignment { officer_id, .. } => {
                officer_id
            }
        }
    }
}
