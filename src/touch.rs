//! Touch drag emulation.
//!
//! A touch surface cannot tell drag intent from scroll intent on first
//! contact, so dragging takes two confirmations: a double tap arms the card,
//! then a touch-and-hold on the armed card starts the drag.
//!
//! ```text
//! Idle -> Pressed -> Idle                (single tap: click, or scroll)
//! Idle -> Pressed -> Armed               (second tap within threshold)
//! Armed -> Holding -> Armed              (released before hold delay)
//! Armed -> Holding -> Dragging -> Idle   (drop, release off-target, cancel)
//! ```
//!
//! The controller is driven by [`TouchInput`] values that carry their own
//! timestamps; nothing reads the clock, so every transition is reproducible.

use std::time::Duration;

use tokio::time::Instant;

use crate::model::OfficerId;
use crate::session::{DragMessage, DragPayload, DragSession, DragSource, DropIntent};
use crate::target::{DropTargetRegistry, Point};

/// Touch gesture tuning.
#[derive(Debug, Clone)]
pub struct TouchConfig {
    /// Maximum gap between two taps that still counts as a double tap.
    ///
    /// Default: 300 ms.
    pub double_tap_threshold: Duration,

    /// How long a touch on an armed card must be held before dragging.
    ///
    /// Default: 100 ms.
    pub hold_delay: Duration,

    /// Distance in pixels a finger may drift and still count as a tap.
    ///
    /// Default: 10.
    pub tap_slop: f64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            double_tap_threshold: Duration::from_millis(300),
            hold_delay: Duration::from_millis(100),
            tap_slop: 10.0,
        }
    }
}

/// One touch event on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum TouchInput {
    /// Finger down on an officer card.
    Start {
        officer_id: OfficerId,
        source: DragSource,
        point: Point,
        at: Instant,
    },
    Move {
        point: Point,
        at: Instant,
    },
    End {
        point: Point,
        at: Instant,
    },
    /// The system took the touch away (incoming call, edge swipe).
    Cancel {
        at: Instant,
    },
}

impl TouchInput {
    pub fn at(&self) -> Instant {
        match self {
            Self::Start { at, .. } | Self::Move { at, .. } | Self::End { at, .. } | Self::Cancel { at } => {
                *at
            }
        }
    }
}

/// Gesture lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum TouchPhase {
    Idle,
    /// Finger down on an unarmed card; a click or a scroll once lifted.
    Pressed {
        officer_id: OfficerId,
        source: DragSource,
        origin: Point,
    },
    /// Double-tapped and highlighted, waiting for touch-and-hold.
    Armed {
        officer_id: OfficerId,
        source: DragSource,
    },
    /// Finger down on the armed card, hold timer running.
    Holding {
        officer_id: OfficerId,
        source: DragSource,
        position: Point,
        deadline: Instant,
    },
    Dragging {
        officer_id: OfficerId,
        source: DragSource,
        position: Point,
    },
}

/// Why an input changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchNoopReason {
    /// Move, release or cancel with no finger down.
    NoTouchInProgress,
    /// A second finger landed mid-gesture.
    GestureInProgress,
    /// Movement still within tap slop.
    WithinSlop,
    /// Hold timer has not fired yet.
    HoldPending,
    /// `poll_hold` with no hold timer running.
    NoHoldScheduled,
}

/// Observable result of one transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TouchEffect {
    /// Finger down on an unarmed card.
    Pressed,
    /// A single tap: open the officer's detail view.
    Click { officer_id: OfficerId },
    /// The finger drifted past tap slop; the touch is a scroll.
    Scrolled,
    /// Double tap recognised; the card is highlighted.
    Armed { officer_id: OfficerId },
    /// Another card was touched while one was armed.
    Disarmed { officer_id: OfficerId },
    /// Touch-and-hold started; call [`TouchDragController::poll_hold`] at
    /// `deadline`.
    HoldScheduled { deadline: Instant },
    /// Lifted before the hold delay; back to armed, no click.
    HoldReleased,
    DragStarted { officer_id: OfficerId, at: Point },
    DragMoved { at: Point },
    /// Released over a drop target.
    Dropped(DropIntent),
    /// Released over no drop target.
    Released,
    Cancelled,
    Noop(TouchNoopReason),
}

/// Floating proxy shown under the finger while dragging.
#[derive(Debug, Clone, PartialEq)]
pub struct Ghost {
    pub officer_id: OfficerId,
    pub position: Point,
}

/// Touch gesture state machine.
///
/// Publishes [`DragMessage`]s on the shared [`DragSession`] and owns the
/// session's dragged-officer token while dragging. Dropping the controller
/// runs [`reset`](Self::reset).
#[derive(Debug)]
pub struct TouchDragController {
    config: TouchConfig,
    phase: TouchPhase,
    /// Completion time of the last single tap on any card.
    last_tap: Option<Instant>,
    session: DragSession,
    registry: DropTargetRegistry,
}

impl TouchDragController {
    pub fn new(config: TouchConfig, session: DragSession, registry: DropTargetRegistry) -> Self {
        Self {
            config,
            phase: TouchPhase::Idle,
            last_tap: None,
            session,
            registry,
        }
    }

    pub fn phase(&self) -> &TouchPhase {
        &self.phase
    }

    pub fn config(&self) -> &TouchConfig {
        &self.config
    }

    /// The card currently highlighted as armed (also while holding).
    pub fn armed_officer(&self) -> Option<&OfficerId> {
        match &self.phase {
            TouchPhase::Armed { officer_id, .. } | TouchPhase::Holding { officer_id, .. } => {
                Some(officer_id)
            }
            _ => None,
        }
    }

    pub fn hold_deadline(&self) -> Option<Instant> {
        match &self.phase {
            TouchPhase::Holding { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Native touch scrolling must be suppressed while this is `true`.
    pub fn suppresses_scroll(&self) -> bool {
        matches!(self.phase, TouchPhase::Dragging { .. })
    }

    /// The drag ghost, derived from state. `None` unless dragging.
    pub fn ghost(&self) -> Option<Ghost> {
        match &self.phase {
            TouchPhase::Dragging {
                officer_id,
                position,
                ..
            } => Some(Ghost {
                officer_id: officer_id.clone(),
                position: *position,
            }),
            _ => None,
        }
    }

    /// Apply one touch input.
    ///
    /// An input stamped at or after a pending hold deadline first completes
    /// the hold (as [`poll_hold`](Self::poll_hold) would) and is then applied
    /// to the dragging state.
    pub fn handle(&mut self, input: TouchInput) -> TouchEffect {
        if let Some(deadline) = self.hold_deadline()
            && input.at() >= deadline
        {
            self.poll_hold(input.at());
        }

        let phase = std::mem::replace(&mut self.phase, TouchPhase::Idle);
        let (next, effect) = match (phase, input) {
            (
                TouchPhase::Idle,
                TouchInput::Start {
                    officer_id,
                    source,
                    point,
                    ..
                },
            ) => (
                TouchPhase::Pressed {
                    officer_id,
                    source,
                    origin: point,
                },
                TouchEffect::Pressed,
            ),
            (TouchPhase::Idle, _) => (
                TouchPhase::Idle,
                TouchEffect::Noop(TouchNoopReason::NoTouchInProgress),
            ),

            (phase @ TouchPhase::Pressed { .. }, TouchInput::Start { .. }) => {
                (phase, TouchEffect::Noop(TouchNoopReason::GestureInProgress))
            }
            (
                TouchPhase::Pressed {
                    officer_id,
                    source,
                    origin,
                },
                TouchInput::Move { point, .. },
            ) => {
                if origin.distance_to(point) > self.config.tap_slop {
                    (TouchPhase::Idle, TouchEffect::Scrolled)
                } else {
                    (
                        TouchPhase::Pressed {
                            officer_id,
                            source,
                            origin,
                        },
                        TouchEffect::Noop(TouchNoopReason::WithinSlop),
                    )
                }
            }
            (
                TouchPhase::Pressed {
                    officer_id,
                    source,
                    origin,
                },
                TouchInput::End { point, at },
            ) => {
                if origin.distance_to(point) > self.config.tap_slop {
                    (TouchPhase::Idle, TouchEffect::Scrolled)
                } else {
                    self.complete_tap(officer_id, source, at)
                }
            }
            (TouchPhase::Pressed { .. }, TouchInput::Cancel { .. }) => {
                (TouchPhase::Idle, TouchEffect::Cancelled)
            }

            (
                TouchPhase::Armed { officer_id, source },
                TouchInput::Start {
                    officer_id: touched,
                    source: touched_source,
                    point,
                    at,
                },
            ) => {
                if touched == officer_id {
                    let deadline = at + self.config.hold_delay;
                    (
                        TouchPhase::Holding {
                            officer_id,
                            source,
                            position: point,
                            deadline,
                        },
                        TouchEffect::HoldScheduled { deadline },
                    )
                } else {
                    tracing::debug!(
                        officer_id = %officer_id,
                        touched = %touched,
                        "armed card disarmed by touch elsewhere"
                    );
                    (
                        TouchPhase::Pressed {
                            officer_id: touched,
                            source: touched_source,
                            origin: point,
                        },
                        TouchEffect::Disarmed { officer_id },
                    )
                }
            }
            (phase @ TouchPhase::Armed { .. }, _) => {
                (phase, TouchEffect::Noop(TouchNoopReason::NoTouchInProgress))
            }

            (phase @ TouchPhase::Holding { .. }, TouchInput::Start { .. }) => {
                (phase, TouchEffect::Noop(TouchNoopReason::GestureInProgress))
            }
            (
                TouchPhase::Holding {
                    officer_id,
                    source,
                    deadline,
                    ..
                },
                TouchInput::Move { point, .. },
            ) => (
                TouchPhase::Holding {
                    officer_id,
                    source,
                    position: point,
                    deadline,
                },
                TouchEffect::Noop(TouchNoopReason::HoldPending),
            ),
            (
                TouchPhase::Holding {
                    officer_id, source, ..
                },
                TouchInput::End { .. } | TouchInput::Cancel { .. },
            ) => (
                TouchPhase::Armed { officer_id, source },
                TouchEffect::HoldReleased,
            ),

            (phase @ TouchPhase::Dragging { .. }, TouchInput::Start { .. }) => {
                (phase, TouchEffect::Noop(TouchNoopReason::GestureInProgress))
            }
            (
                TouchPhase::Dragging {
                    officer_id, source, ..
                },
                TouchInput::Move { point, .. },
            ) => {
                self.session.publish(DragMessage::DragMoved {
                    officer_id: officer_id.clone(),
                    at: point,
                });
                (
                    TouchPhase::Dragging {
                        officer_id,
                        source,
                        position: point,
                    },
                    TouchEffect::DragMoved { at: point },
                )
            }
            (TouchPhase::Dragging { officer_id, .. }, TouchInput::End { point, .. }) => {
                let effect = match self.registry.hit_test(point) {
                    Some(destination) => {
                        self.session.publish(DragMessage::Dropped {
                            officer_id: officer_id.clone(),
                            destination: destination.clone(),
                            at: point,
                        });
                        tracing::debug!(
                            officer_id = %officer_id,
                            target_id = %destination,
                            "touch drop"
                        );
                        TouchEffect::Dropped(DropIntent {
                            officer_id: officer_id.clone(),
                            destination,
                        })
                    }
                    None => {
                        tracing::debug!(officer_id = %officer_id, "touch released off target");
                        TouchEffect::Released
                    }
                };
                self.end_drag(officer_id);
                (TouchPhase::Idle, effect)
            }
            (TouchPhase::Dragging { officer_id, .. }, TouchInput::Cancel { .. }) => {
                tracing::debug!(officer_id = %officer_id, "touch drag cancelled");
                self.end_drag(officer_id);
                (TouchPhase::Idle, TouchEffect::Cancelled)
            }
        };
        self.phase = next;
        effect
    }

    /// Fire the hold timer if `now` has reached its deadline.
    ///
    /// On success the card starts dragging: the ghost appears at the finger,
    /// the session token is set and `DragStarted` is published.
    pub fn poll_hold(&mut self, now: Instant) -> TouchEffect {
        let phase = std::mem::replace(&mut self.phase, TouchPhase::Idle);
        let (next, effect) = match phase {
            TouchPhase::Holding {
                officer_id,
                source,
                position,
                deadline,
            } if now >= deadline => {
                self.session.begin(DragPayload {
                    officer_id: officer_id.clone(),
                    source: source.clone(),
                });
                self.session.publish(DragMessage::DragStarted {
                    officer_id: officer_id.clone(),
                    source: source.clone(),
                    at: position,
                });
                tracing::debug!(officer_id = %officer_id, "touch drag started");
                let effect = TouchEffect::DragStarted {
                    officer_id: officer_id.clone(),
                    at: position,
                };
                (
                    TouchPhase::Dragging {
                        officer_id,
                        source,
                        position,
                    },
                    effect,
                )
            }
            phase @ TouchPhase::Holding { .. } => {
                (phase, TouchEffect::Noop(TouchNoopReason::HoldPending))
            }
            phase => (phase, TouchEffect::Noop(TouchNoopReason::NoHoldScheduled)),
        };
        self.phase = next;
        effect
    }

    /// Force the controller back to idle.
    ///
    /// An in-flight drag is cancelled: the session token is cleared and
    /// `DragEnded` is published. Returns `true` if a gesture was active.
    pub fn reset(&mut self) -> bool {
        let phase = std::mem::replace(&mut self.phase, TouchPhase::Idle);
        self.last_tap = None;
        match phase {
            TouchPhase::Idle => false,
            TouchPhase::Dragging { officer_id, .. } => {
                self.end_drag(officer_id);
                true
            }
            _ => true,
        }
    }

    fn complete_tap(
        &mut self,
        officer_id: OfficerId,
        source: DragSource,
        at: Instant,
    ) -> (TouchPhase, TouchEffect) {
        let is_double = self
            .last_tap
            .is_some_and(|last| at.saturating_duration_since(last) < self.config.double_tap_threshold);
        if is_double {
            self.last_tap = None;
            tracing::debug!(officer_id = %officer_id, "card armed");
            (
                TouchPhase::Armed {
                    officer_id: officer_id.clone(),
                    source,
                },
                TouchEffect::Armed { officer_id },
            )
        } else {
            self.last_tap = Some(at);
            (TouchPhase::Idle, TouchEffect::Click { officer_id })
        }
    }

    fn end_drag(&mut self, officer_id: OfficerId) {
        self.session.clear();
        self.session.publish(DragMessage::DragEnded { officer_id });
        self.last_tap = None;
    }
}

impl Drop for TouchDragController {
    fn drop(&mut self) {
        self.reset();
    }
}
