//! Drop targets: identities, geometry, and the registry both gesture paths
//! hit-test against.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Incident, IncidentId};
use crate::mutation::AssignmentRequest;
use crate::session::{DragMessage, DropIntent};
use crate::slot::SlotName;

/// Screen coordinates in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Axis-aligned bounding box. Left and top edges are inside, right and
/// bottom edges are not.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }
}

/// Identity marker of a droppable region.
///
/// The string form is what a rendered element carries: the slot name, the
/// literal `unassigned-pool`, or `incident:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DropTargetId {
    Slot(SlotName),
    UnassignedPool,
    Incident(IncidentId),
}

const POOL_MARKER: &str = "unassigned-pool";
const INCIDENT_PREFIX: &str = "incident:";

impl fmt::Display for DropTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(name) => write!(f, "{name}"),
            Self::UnassignedPool => f.write_str(POOL_MARKER),
            Self::Incident(id) => write!(f, "{INCIDENT_PREFIX}{id}"),
        }
    }
}

/// Drop target marker that names nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid drop target marker '{0}'")]
pub struct ParseDropTargetError(String);

impl FromStr for DropTargetId {
    type Err = ParseDropTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == POOL_MARKER {
            return Ok(Self::UnassignedPool);
        }
        if let Some(id) = s.strip_prefix(INCIDENT_PREFIX) {
            if id.is_empty() {
                return Err(ParseDropTargetError(s.to_owned()));
            }
            return Ok(Self::Incident(IncidentId::new(id)));
        }
        if s.is_empty() {
            return Err(ParseDropTargetError(s.to_owned()));
        }
        Ok(Self::Slot(SlotName::new(s)))
    }
}

/// A droppable region as registered by the component that renders it.
#[derive(Debug, Clone, PartialEq)]
pub struct DropTarget {
    id: DropTargetId,
    rect: Rect,
    z_index: i32,
    incident: Option<Incident>,
}

impl DropTarget {
    pub fn slot(name: impl Into<SlotName>, rect: Rect) -> Self {
        Self {
            id: DropTargetId::Slot(name.into()),
            rect,
            z_index: 0,
            incident: None,
        }
    }

    pub fn pool(rect: Rect) -> Self {
        Self {
            id: DropTargetId::UnassignedPool,
            rect,
            z_index: 0,
            incident: None,
        }
    }

    pub fn incident(incident: Incident, rect: Rect) -> Self {
        Self {
            id: DropTargetId::Incident(incident.id.clone()),
            rect,
            z_index: 0,
            incident: Some(incident),
        }
    }

    /// Stacking order for hit testing; higher paints on top.
    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = z_index;
        self
    }

    pub fn id(&self) -> &DropTargetId {
        &self.id
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }
}

#[derive(Debug)]
struct Entry {
    key: u64,
    target: DropTarget,
    pointer_hover: bool,
    touch_hover: bool,
}

#[derive(Debug, Default)]
struct Targets {
    entries: Vec<Entry>,
    next_key: u64,
}

/// Registered drop targets, in registration order.
///
/// Targets are never owned by the gesture controllers; each is held by the
/// [`TargetRegistration`] its component keeps while mounted. `Clone` is
/// cheap.
#[derive(Debug, Clone, Default)]
pub struct DropTargetRegistry {
    targets: Arc<Mutex<Targets>>,
}

impl DropTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Targets> {
        self.targets.lock().expect("drop target registry mutex poisoned")
    }

    /// Register `target` for hit testing, hover tracking and routing.
    ///
    /// # Arguments
    ///
    /// * `target` - The region's identity, bounding box and stacking order.
    ///
    /// # Returns
    ///
    /// A [`TargetRegistration`] guard. The target stays registered until the
    /// guard is dropped; [`TargetRegistration::update_rect`] moves it.
    pub fn register(&self, target: DropTarget) -> TargetRegistration {
        let mut targets = self.lock();
        let key = targets.next_key;
        targets.next_key += 1;
        tracing::debug!(target_id = %target.id, key, "drop target registered");
        targets.entries.push(Entry {
            key,
            target,
            pointer_hover: false,
            touch_hover: false,
        });
        TargetRegistration {
            registry: self.clone(),
            key,
        }
    }

    fn deregister(&self, key: u64) {
        self.lock().entries.retain(|entry| entry.key != key);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Resolve the drop target under `point`.
    ///
    /// # Arguments
    ///
    /// * `point` - Release coordinates of a touch drag.
    ///
    /// # Returns
    ///
    /// The topmost target whose rectangle contains `point`: highest z-index,
    /// and among equals the most recently registered. `None` if the point is
    /// over no target.
    pub fn hit_test(&self, point: Point) -> Option<DropTargetId> {
        let targets = self.lock();
        targets
            .entries
            .iter()
            .filter(|entry| entry.target.rect.contains(point))
            // max_by_key keeps the last of equal keys.
            .max_by_key(|entry| entry.target.z_index)
            .map(|entry| entry.target.id.clone())
    }

    /// Pointer-path hover, driven by native dragover / dragleave.
    pub fn set_pointer_hover(&self, id: &DropTargetId, hovered: bool) {
        for entry in self.lock().entries.iter_mut() {
            if &entry.target.id == id {
                entry.pointer_hover = hovered;
            }
        }
    }

    /// Touch-path hover: each target tests its own rectangle against every
    /// `DragMoved`; a drop or drag end clears all of them.
    pub fn observe(&self, message: &DragMessage) {
        let mut targets = self.lock();
        match message {
            DragMessage::DragStarted { at, .. } | DragMessage::DragMoved { at, .. } => {
                for entry in targets.entries.iter_mut() {
                    entry.touch_hover = entry.target.rect.contains(*at);
                }
            }
            DragMessage::Dropped { .. } | DragMessage::DragEnded { .. } => {
                for entry in targets.entries.iter_mut() {
                    entry.touch_hover = false;
                }
            }
        }
    }

    pub fn is_hovered(&self, id: &DropTargetId) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|entry| &entry.target.id == id && (entry.pointer_hover || entry.touch_hover))
    }

    /// Ids of every highlighted target, in registration order.
    pub fn hovered(&self) -> Vec<DropTargetId> {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.pointer_hover || entry.touch_hover)
            .map(|entry| entry.target.id.clone())
            .collect()
    }

    /// Translate a drop into the one mutation its target calls for.
    ///
    /// Slot and pool identities carry everything needed. An incident
    /// identity needs the incident itself, so it resolves only while the
    /// incident card is registered.
    ///
    /// # Arguments
    ///
    /// * `intent` - The officer and destination produced by either gesture
    ///   path.
    ///
    /// # Returns
    ///
    /// `AssignToSlot`, `ReturnToPool` or `AssignToIncident` for a slot, the
    /// pool or an incident card respectively. `None` for an incident that is
    /// not (or no longer) registered.
    pub fn route(&self, intent: &DropIntent) -> Option<AssignmentRequest> {
        let officer_id = intent.officer_id.clone();
        match &intent.destination {
            DropTargetId::Slot(slot) => Some(AssignmentRequest::AssignToSlot {
                officer_id,
                slot: slot.clone(),
            }),
            DropTargetId::UnassignedPool => Some(AssignmentRequest::ReturnToPool { officer_id }),
            DropTargetId::Incident(incident_id) => {
                let targets = self.lock();
                let incident = targets
                    .entries
                    .iter()
                    .rev()
                    .find(|entry| entry.target.id == intent.destination)
                    .and_then(|entry| entry.target.incident.clone());
                match incident {
                    Some(incident) => Some(AssignmentRequest::AssignToIncident {
                        officer_id,
                        incident,
                    }),
                    None => {
                        tracing::debug!(incident_id = %incident_id, "drop on unregistered incident");
                        None
                    }
                }
            }
        }
    }

    /// Drive touch hover from the drag bus.
    ///
    /// Runs until every sender of the bus is gone; a lagged receiver logs a
    /// warning and carries on with the next message.
    ///
    /// # Arguments
    ///
    /// * `rx` - Subscription to the board's [`DragSession`](crate::DragSession)
    ///   bus, taken before the first drag starts.
    pub async fn follow(self, mut rx: broadcast::Receiver<DragMessage>) {
        loop {
            match rx.recv().await {
                Ok(message) => self.observe(&message),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "drop target registry lagged behind drag bus");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

/// Keeps a target registered; deregisters it on drop.
#[derive(Debug)]
pub struct TargetRegistration {
    registry: DropTargetRegistry,
    key: u64,
}

impl TargetRegistration {
    /// Replace the bounding box after a layout change.
    pub fn update_rect(&self, rect: Rect) {
        let mut targets = self.registry.lock();
        if let Some(entry) = targets.entries.iter_mut().find(|entry| entry.key == self.key) {
            entry.target.rect = rect;
        }
    }
}

impl Drop for TargetRegistration {
    fn drop(&mut self) {
        self.registry.deregister(self.key);
    }
}
