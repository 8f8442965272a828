//! Client-side optimistic assignment overlay.
//!
//! A local drag-drop is written to the overlay before any persistence call is
//! issued, so the view changes instantly. The overlay then decays back to
//! mirroring the canonical map: when the canonical feed confirms every
//! pending placement ([`ReconcilePolicy::ConfirmOrTimer`]) or when the
//! reconcile window elapses, whichever comes first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::Instant;

use crate::assignment::AssignmentMap;
use crate::model::OfficerId;
use crate::slot::SlotName;

/// Default reconcile window.
pub const DEFAULT_RECONCILE_WINDOW: Duration = Duration::from_secs(2);

/// When a dirty overlay goes back to mirroring canonical state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcilePolicy {
    /// Clear only when the window elapses, whatever the server says.
    TimerOnly,
    /// Clear as soon as canonical state places every pending officer where
    /// the overlay expects; the window is the upper bound.
    #[default]
    ConfirmOrTimer,
}

/// Pending local moves layered over the canonical map.
///
/// The view is the canonical map with every pending move replayed on top,
/// so officers nobody touched locally keep following the server.
#[derive(Debug)]
pub struct OptimisticOverlay {
    pending: HashMap<OfficerId, Option<SlotName>>,
    deadline: Option<Instant>,
    window: Duration,
    policy: ReconcilePolicy,
}

impl OptimisticOverlay {
    pub fn new(window: Duration, policy: ReconcilePolicy) -> Self {
        Self {
            pending: HashMap::new(),
            deadline: None,
            window,
            policy,
        }
    }

    /// Record a local move and restart the reconcile window.
    ///
    /// A later move of the same officer replaces the earlier intent.
    pub fn apply_local_move(
        &mut self,
        officer_id: &OfficerId,
        destination: Option<&SlotName>,
        now: Instant,
    ) {
        self.pending.insert(officer_id.clone(), destination.cloned());
        self.deadline = Some(now + self.window);
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    /// The map a renderer should draw: `canonical` when clean, otherwise
    /// `canonical` with every pending move applied.
    pub fn view(&self, canonical: &AssignmentMap) -> AssignmentMap {
        let mut map = canonical.clone();
        for (officer_id, destination) in &self.pending {
            map.move_officer(officer_id, destination.as_ref());
        }
        map
    }

    /// Compare a freshly published canonical map against pending intents.
    ///
    /// Under [`ReconcilePolicy::ConfirmOrTimer`] every confirmed officer is
    /// dropped from the pending set. Returns `true` if this made the overlay
    /// clean.
    pub fn observe_canonical(&mut self, canonical: &AssignmentMap) -> bool {
        if self.policy == ReconcilePolicy::TimerOnly || self.pending.is_empty() {
            return false;
        }
        self.pending
            .retain(|officer_id, expected| !canonical.places(officer_id, expected.as_ref()));
        if self.pending.is_empty() {
            self.deadline = None;
            return true;
        }
        false
    }

    /// Discard all pending moves if the window has elapsed at `now`.
    /// Returns `true` if the overlay was cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Forget the pending move for `officer_id`, if any. Returns `true` if
    /// one was removed. The deadline is dropped once nothing is pending.
    pub fn discard(&mut self, officer_id: &OfficerId) -> bool {
        let removed = self.pending.remove(officer_id).is_some();
        if self.pending.is_empty() {
            self.deadline = None;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.deadline = None;
    }
}

/// Shared handle to an [`OptimisticOverlay`].
///
/// Reads apply any elapsed window first, so a view taken after the window
/// never shows a stale local move even if the reconciler task is not
/// running. `Clone` is cheap.
#[derive(Debug, Clone)]
pub struct OverlayHandle {
    inner: Arc<Mutex<OptimisticOverlay>>,
    /// Wakes the reconciler when the deadline moves.
    rearmed: Arc<Notify>,
}

impl OverlayHandle {
    pub fn new(window: Duration, policy: ReconcilePolicy) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimisticOverlay::new(window, policy))),
            rearmed: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OptimisticOverlay> {
        self.inner.lock().expect("overlay mutex poisoned")
    }

    /// Record a local move for `officer_id` and restart the reconcile window.
    ///
    /// Synchronous: the next [`view`](Self::view) already shows the move,
    /// before any persistence call for it has been issued.
    ///
    /// # Arguments
    ///
    /// * `officer_id` - The officer being moved.
    /// * `destination` - The target slot, or `None` for the unassigned pool.
    pub fn apply_local_move(&self, officer_id: &OfficerId, destination: Option<&SlotName>) {
        self.lock()
            .apply_local_move(officer_id, destination, Instant::now());
        tracing::debug!(
            officer_id = %officer_id,
            slot = ?destination.map(SlotName::as_str),
            "optimistic move applied"
        );
        self.rearmed.notify_one();
    }

    pub fn is_dirty(&self) -> bool {
        let mut overlay = self.lock();
        overlay.expire(Instant::now());
        overlay.is_dirty()
    }

    /// The map a renderer should draw.
    ///
    /// Any elapsed reconcile window is applied first.
    ///
    /// # Arguments
    ///
    /// * `canonical` - The latest map published by the assignment store.
    ///
    /// # Returns
    ///
    /// `canonical` with every still-pending local move replayed on top.
    pub fn view(&self, canonical: &AssignmentMap) -> AssignmentMap {
        let mut overlay = self.lock();
        overlay.expire(Instant::now());
        overlay.view(canonical)
    }

    /// Withdraw a local move that turned out to be malformed, such as one for
    /// an officer the backend does not know.
    pub fn discard(&self, officer_id: &OfficerId) {
        if self.lock().discard(officer_id) {
            tracing::debug!(officer_id = %officer_id, "optimistic move discarded");
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.lock().deadline()
    }

    /// Check pending local moves against a freshly published canonical map.
    ///
    /// # Arguments
    ///
    /// * `canonical` - The map the assignment store just published.
    ///
    /// # Returns
    ///
    /// `true` if every pending move is now confirmed and the overlay went
    /// clean. Always `false` under [`ReconcilePolicy::TimerOnly`].
    pub fn observe_canonical(&self, canonical: &AssignmentMap) -> bool {
        let cleared = self.lock().observe_canonical(canonical);
        if cleared {
            tracing::debug!("overlay confirmed by canonical state");
        }
        cleared
    }

    pub fn expire(&self, now: Instant) -> bool {
        let cleared = self.lock().expire(now);
        if cleared {
            tracing::debug!("overlay reconcile window elapsed");
        }
        cleared
    }
}

/// Keep `overlay` reconciled against the canonical map until shutdown.
///
/// Multiplexes canonical updates, the overlay deadline, and deadline
/// restarts.
///
/// # Arguments
///
/// * `overlay` - The overlay shared with the mutation service.
/// * `canonical` - Receiver of the assignment store's published map.
/// * `shutdown_rx` - Watch receiver that signals the loop to stop.
///
/// # Returns
///
/// When shutdown is signaled or the canonical sender is dropped.
pub(crate) async fn run_reconciler(
    overlay: OverlayHandle,
    mut canonical: watch::Receiver<AssignmentMap>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        let deadline = overlay.deadline();
        tokio::select! {
            changed = canonical.changed() => {
                if changed.is_err() {
                    return;
                }
                let map = canonical.borrow_and_update().clone();
                overlay.observe_canonical(&map);
            }
            _ = sleep_until(deadline) => {
                overlay.expire(Instant::now());
            }
            _ = overlay.rearmed.notified() => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::SlotCatalog;

    fn canonical() -> AssignmentMap {
        AssignmentMap::empty(&SlotCatalog::new(["North Gate", "South Gate"]))
    }

    fn north() -> SlotName {
        SlotName::new("North Gate")
    }

    #[tokio::test(start_paused = true)]
    async fn local_move_is_visible_immediately() {
        let overlay = OverlayHandle::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::TimerOnly);
        let o1 = OfficerId::new("o-1");

        overlay.apply_local_move(&o1, Some(&north()));

        assert!(overlay.is_dirty());
        assert_eq!(overlay.view(&canonical()).slot_of(&o1), Some(&north()));
    }

    #[tokio::test(start_paused = true)]
    async fn window_clears_dirty_without_confirmation() {
        let overlay = OverlayHandle::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::TimerOnly);
        let o1 = OfficerId::new("o-1");
        overlay.apply_local_move(&o1, Some(&north()));

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(overlay.is_dirty());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!overlay.is_dirty());
        assert_eq!(overlay.view(&canonical()).slot_of(&o1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn second_move_restarts_window_and_wins() {
        let overlay = OverlayHandle::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::TimerOnly);
        let o1 = OfficerId::new("o-1");
        let south = SlotName::new("South Gate");

        overlay.apply_local_move(&o1, Some(&north()));
        tokio::time::advance(Duration::from_millis(1500)).await;
        overlay.apply_local_move(&o1, Some(&south));
        tokio::time::advance(Duration::from_millis(1500)).await;

        assert!(overlay.is_dirty());
        let view = overlay.view(&canonical());
        assert_eq!(view.slot_of(&o1), Some(&south));
        assert!(view.is_consistent());
    }

    #[test]
    fn confirm_policy_clears_on_matching_canonical() {
        let mut overlay =
            OptimisticOverlay::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::ConfirmOrTimer);
        let o1 = OfficerId::new("o-1");
        overlay.apply_local_move(&o1, Some(&north()), Instant::now());

        // Stale canonical does not confirm.
        assert!(!overlay.observe_canonical(&canonical()));
        assert!(overlay.is_dirty());

        let mut confirmed = canonical();
        confirmed.move_officer(&o1, Some(&north()));
        assert!(overlay.observe_canonical(&confirmed));
        assert!(!overlay.is_dirty());
        assert_eq!(overlay.deadline(), None);
    }

    #[test]
    fn timer_only_ignores_confirmation() {
        let mut overlay = OptimisticOverlay::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::TimerOnly);
        let o1 = OfficerId::new("o-1");
        overlay.apply_local_move(&o1, Some(&north()), Instant::now());

        let mut confirmed = canonical();
        confirmed.move_officer(&o1, Some(&north()));
        assert!(!overlay.observe_canonical(&confirmed));
        assert!(overlay.is_dirty());
    }

    #[test]
    fn confirmation_waits_for_every_pending_officer() {
        let mut overlay =
            OptimisticOverlay::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::ConfirmOrTimer);
        let o1 = OfficerId::new("o-1");
        let o2 = OfficerId::new("o-2");
        overlay.apply_local_move(&o1, Some(&north()), Instant::now());
        overlay.apply_local_move(&o2, None, Instant::now());

        let mut partial = canonical();
        partial.move_officer(&o1, Some(&north()));
        partial.move_officer(&o2, Some(&SlotName::new("South Gate")));
        assert!(!overlay.observe_canonical(&partial));

        partial.move_officer(&o2, None);
        assert!(overlay.observe_canonical(&partial));
    }

    #[test]
    fn view_follows_canonical_for_untouched_officers() {
        let mut overlay = OptimisticOverlay::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::TimerOnly);
        let o1 = OfficerId::new("o-1");
        let o2 = OfficerId::new("o-2");
        overlay.apply_local_move(&o1, Some(&north()), Instant::now());

        let mut server = canonical();
        server.move_officer(&o2, Some(&SlotName::new("South Gate")));
        let view = overlay.view(&server);

        assert_eq!(view.slot_of(&o1), Some(&north()));
        assert_eq!(view.slot_of(&o2), Some(&SlotName::new("South Gate")));
    }

    #[test]
    fn discard_drops_one_officer_and_last_deadline() {
        let mut overlay = OptimisticOverlay::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::TimerOnly);
        let o1 = OfficerId::new("o-1");
        let o2 = OfficerId::new("o-2");
        overlay.apply_local_move(&o1, Some(&north()), Instant::now());
        overlay.apply_local_move(&o2, None, Instant::now());

        assert!(overlay.discard(&o1));
        assert!(overlay.is_dirty());
        assert!(overlay.deadline().is_some());
        assert_eq!(overlay.view(&canonical()).slot_of(&o1), None);

        assert!(overlay.discard(&o2));
        assert!(!overlay.discard(&o2));
        assert!(!overlay.is_dirty());
        assert_eq!(overlay.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciler_clears_on_confirmation() {
        let overlay =
            OverlayHandle::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::ConfirmOrTimer);
        let (canonical_tx, canonical_rx) = watch::channel(canonical());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_reconciler(overlay.clone(), canonical_rx, shutdown_rx));

        let o1 = OfficerId::new("o-1");
        overlay.apply_local_move(&o1, Some(&north()));
        let mut confirmed = canonical();
        confirmed.move_officer(&o1, Some(&north()));
        canonical_tx.send_replace(confirmed);

        // Well inside the window.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!overlay.is_dirty());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconciler_expires_at_deadline() {
        let overlay =
            OverlayHandle::new(DEFAULT_RECONCILE_WINDOW, ReconcilePolicy::ConfirmOrTimer);
        let (_canonical_tx, canonical_rx) = watch::channel(canonical());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_reconciler(overlay.clone(), canonical_rx, shutdown_rx));

        overlay.apply_local_move(&OfficerId::new("o-1"), Some(&north()));
        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(overlay.deadline(), None);
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
