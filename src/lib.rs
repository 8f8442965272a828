//! Drag-and-drop officer assignment engine for a dispatch dashboard.

mod assignment;
pub use assignment::{AssignmentMap, AssignmentRow};
mod backend;
pub use backend::{Backend, ChangeEvent, ChangeFeed, ChangeKind, FailPoint, MemoryBackend, Table};
mod board;
mod error;
mod live;
mod model;
mod mutation;
mod notify;
mod overlay;
mod pointer;
mod session;
mod slot;
mod store;
mod target;
mod touch;

pub use board::{DispatchBoard, DispatchBoardBuilder, DropHandler};
pub use error::{BackendError, FeedError, MutationError};
pub use live::{LiveConfig, LiveHandle};
pub use model::{
    Incident, IncidentChange, IncidentId, Officer, OfficerId, OfficerPatch, OfficerStatus,
};
pub use mutation::{AssignmentMutationService, AssignmentRequest, MutationOutcome};
pub use notify::{Notifier, Toast, ToastLevel};
pub use overlay::{DEFAULT_RECONCILE_WINDOW, OptimisticOverlay, OverlayHandle, ReconcilePolicy};
pub use pointer::{
    DragDataChannel, DropEffect, OFFICER_ID_FORMAT, PointerDragController, PointerDropEvent,
};
pub use session::{DragMessage, DragPayload, DragSession, DragSource, DropIntent};
pub use slot::{SlotCatalog, SlotName};
pub use store::AssignmentStore;
pub use target::{
    DropTarget, DropTargetId, DropTargetRegistry, ParseDropTargetError, Point, Rect,
    TargetRegistration,
};
pub use touch::{
    Ghost, TouchConfig, TouchDragController, TouchEffect, TouchInput, TouchNoopReason, TouchPhase,
};
