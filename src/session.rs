//! Drag-session context shared by the gesture controllers and drop targets.
//!
//! One [`DragSession`] is owned by the board and handed to every participant.
//! It carries the typed message bus for the touch path and the "currently
//! dragged officer" token, so nothing relies on ambient global state.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::model::OfficerId;
use crate::slot::SlotName;
use crate::target::{DropTargetId, Point};

const BUS_CAPACITY: usize = 256;

/// Where a drag gesture picked the officer up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DragSource {
    Slot(SlotName),
    Pool,
    /// An incident card or anywhere else outside the grid.
    Other,
}

/// Gesture-scoped payload: who is being dragged and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragPayload {
    pub officer_id: OfficerId,
    pub source: DragSource,
}

/// Messages broadcast while a touch drag is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum DragMessage {
    DragStarted {
        officer_id: OfficerId,
        source: DragSource,
        at: Point,
    },
    DragMoved {
        officer_id: OfficerId,
        at: Point,
    },
    Dropped {
        officer_id: OfficerId,
        destination: DropTargetId,
        at: Point,
    },
    DragEnded {
        officer_id: OfficerId,
    },
}

impl DragMessage {
    pub fn officer_id(&self) -> &OfficerId {
        match self {
            Self::DragStarted { officer_id, .. }
            | Self::DragMoved { officer_id, .. }
            | Self::Dropped { officer_id, .. }
            | Self::DragEnded { officer_id } => officer_id,
        }
    }
}

/// A resolved drop: this officer onto that target. Both gesture paths
/// produce one of these and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropIntent {
    pub officer_id: OfficerId,
    pub destination: DropTargetId,
}

/// Message bus plus dragged-officer token. `Clone` is cheap.
#[derive(Debug, Clone)]
pub struct DragSession {
    bus: broadcast::Sender<DragMessage>,
    active: watch::Sender<Option<DragPayload>>,
}

impl Default for DragSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DragSession {
    pub fn new() -> Self {
        let (bus, _rx) = broadcast::channel(BUS_CAPACITY);
        let (active, _rx) = watch::channel(None);
        Self { bus, active }
    }

    /// Broadcast `message` to every subscriber. Having none is fine.
    pub fn publish(&self, message: DragMessage) {
        tracing::trace!(officer_id = %message.officer_id(), ?message, "drag message");
        let _ = self.bus.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DragMessage> {
        self.bus.subscribe()
    }

    /// Publish `payload` as the currently dragged officer.
    ///
    /// Drop targets without a native drag-data channel read it through
    /// [`active`](Self::active). It must be cleared with
    /// [`clear`](Self::clear) on every terminal transition, drop or cancel.
    pub fn begin(&self, payload: DragPayload) {
        self.active.send_replace(Some(payload));
    }

    /// The currently dragged officer, if a drag is in flight.
    pub fn active(&self) -> Option<DragPayload> {
        self.active.borrow().clone()
    }

    /// Clear the dragged-officer token.
    pub fn clear(&self) {
        self.active.send_replace(None);
    }
}
