//! Native pointer drag-and-drop.
//!
//! The platform carries the payload in its own drag-data channel, so this
//! path needs no session token or message bus. Hover highlight is written
//! straight into the [`DropTargetRegistry`].

use std::collections::HashMap;

use crate::model::OfficerId;
use crate::session::DropIntent;
use crate::target::{DropTargetId, DropTargetRegistry};

/// Drag-data format key the officer id is stored under.
pub const OFFICER_ID_FORMAT: &str = "officerId";

/// Operations a drag source allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropEffect {
    #[default]
    None,
    Copy,
    Move,
    All,
}

/// The platform drag-data channel: string values keyed by format.
#[derive(Debug, Clone, Default)]
pub struct DragDataChannel {
    data: HashMap<String, String>,
    pub effect_allowed: DropEffect,
}

impl DragDataChannel {
    pub fn set_data(&mut self, format: &str, value: impl Into<String>) {
        self.data.insert(format.to_owned(), value.into());
    }

    pub fn get_data(&self, format: &str) -> Option<&str> {
        self.data.get(format).map(String::as_str)
    }
}

/// A native drop event as delivered to a drop target.
#[derive(Debug, Clone, Default)]
pub struct PointerDropEvent {
    pub data: DragDataChannel,
    default_prevented: bool,
    propagation_stopped: bool,
}

impl PointerDropEvent {
    pub fn new(data: DragDataChannel) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }
}

/// Pointer-path gesture detection.
#[derive(Debug, Clone)]
pub struct PointerDragController {
    registry: DropTargetRegistry,
}

impl PointerDragController {
    pub fn new(registry: DropTargetRegistry) -> Self {
        Self { registry }
    }

    /// Tag the drag with the officer id and allow a move.
    pub fn on_drag_start(&self, channel: &mut DragDataChannel, officer_id: &OfficerId) {
        channel.set_data(OFFICER_ID_FORMAT, officer_id.as_str());
        channel.effect_allowed = DropEffect::Move;
        tracing::debug!(officer_id = %officer_id, "pointer drag started");
    }

    /// The drag entered or moved over `target`.
    pub fn on_drag_over(&self, target: &DropTargetId) {
        self.registry.set_pointer_hover(target, true);
    }

    pub fn on_drag_leave(&self, target: &DropTargetId) {
        self.registry.set_pointer_hover(target, false);
    }

    /// Resolve a drop on `destination`.
    ///
    /// Always prevents default, stops propagation and clears the highlight.
    /// Returns `None` for a malformed drop with no officer id in the channel.
    pub fn on_drop(
        &self,
        event: &mut PointerDropEvent,
        destination: DropTargetId,
    ) -> Option<DropIntent> {
        event.prevent_default();
        event.stop_propagation();
        self.registry.set_pointer_hover(&destination, false);

        match event.data.get_data(OFFICER_ID_FORMAT) {
            Some(id) if !id.is_empty() => Some(DropIntent {
                officer_id: OfficerId::new(id),
                destination,
            }),
            _ => {
                tracing::debug!(target_id = %destination, "drop without officer id ignored");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotName;
    use crate::target::{DropTarget, Rect};

    fn north() -> DropTargetId {
        DropTargetId::Slot(SlotName::new("North Gate"))
    }

    fn controller() -> (PointerDragController, DropTargetRegistry) {
        let registry = DropTargetRegistry::new();
        (PointerDragController::new(registry.clone()), registry)
    }

    #[test]
    fn drag_start_tags_payload_and_allows_move() {
        let (controller, _registry) = controller();
        let mut channel = DragDataChannel::default();
        controller.on_drag_start(&mut channel, &OfficerId::new("o-1"));
        assert_eq!(channel.get_data(OFFICER_ID_FORMAT), Some("o-1"));
        assert_eq!(channel.effect_allowed, DropEffect::Move);
    }

    #[test]
    fn drop_yields_intent_and_consumes_event() {
        let (controller, _registry) = controller();
        let mut channel = DragDataChannel::default();
        controller.on_drag_start(&mut channel, &OfficerId::new("o-1"));
        let mut event = PointerDropEvent::new(channel);

        let intent = controller.on_drop(&mut event, north());

        assert_eq!(
            intent,
            Some(DropIntent {
                officer_id: OfficerId::new("o-1"),
                destination: north(),
            })
        );
        assert!(event.default_prevented());
        assert!(event.propagation_stopped());
    }

    #[test]
    fn drop_without_payload_is_noop() {
        let (controller, _registry) = controller();
        let mut event = PointerDropEvent::default();
        assert_eq!(controller.on_drop(&mut event, north()), None);
        assert!(event.default_prevented());

        let mut channel = DragDataChannel::default();
        channel.set_data(OFFICER_ID_FORMAT, "");
        let mut event = PointerDropEvent::new(channel);
        assert_eq!(controller.on_drop(&mut event, north()), None);
    }

    #[test]
    fn highlight_follows_over_leave_and_drop() {
        let (controller, registry) = controller();
        let _north = registry.register(DropTarget::slot("North Gate", Rect::new(0.0, 0.0, 10.0, 10.0)));

        controller.on_drag_over(&north());
        assert!(registry.is_hovered(&north()));
        controller.on_drag_leave(&north());
        assert!(!registry.is_hovered(&north()));

        controller.on_drag_over(&north());
        controller.on_drop(&mut PointerDropEvent::default(), north());
        assert!(!registry.is_hovered(&north()));
    }
}
