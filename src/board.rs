//! Top-level coordinator wiring gestures to assignment mutations.
//!
//! [`DispatchBoard`] owns the drag session, the drop target registry, both
//! gesture controllers, the optimistic overlay and the mutation service.
//! Build one with [`DispatchBoardBuilder`].

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::assignment::AssignmentMap;
use crate::backend::{Backend, MemoryBackend};
use crate::error::{BackendError, MutationError};
use crate::live::{LiveConfig, LiveHandle};
use crate::model::{Officer, OfficerId};
use crate::mutation::{AssignmentMutationService, MutationOutcome};
use crate::notify::Notifier;
use crate::overlay::{DEFAULT_RECONCILE_WINDOW, OverlayHandle, ReconcilePolicy, run_reconciler};
use crate::pointer::{DragDataChannel, PointerDragController, PointerDropEvent};
use crate::session::{DragSession, DropIntent};
use crate::slot::{SlotCatalog, SlotName};
use crate::store::AssignmentStore;
use crate::target::{DropTarget, DropTargetId, DropTargetRegistry, TargetRegistration};
use crate::touch::{Ghost, TouchConfig, TouchDragController, TouchEffect, TouchInput, TouchPhase};

/// The one interface both gesture paths resolve into.
#[async_trait::async_trait]
pub trait DropHandler: Send + Sync {
    /// Apply the mutation the drop's destination calls for.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] when a backend write fails.
    async fn officer_dropped_on(&self, intent: DropIntent)
    -> Result<MutationOutcome, MutationError>;
}

/// Background tasks owned by a board.
struct Background {
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    hold_timer: Mutex<Option<JoinHandle<()>>>,
    live: tokio::sync::Mutex<Option<LiveHandle>>,
}

/// The drag-and-drop officer assignment engine behind a dispatch dashboard.
///
/// `Clone` is cheap -- all internal state is `Arc`-wrapped.
#[derive(Clone)]
pub struct DispatchBoard {
    store: AssignmentStore,
    overlay: OverlayHandle,
    service: AssignmentMutationService,
    session: DragSession,
    registry: DropTargetRegistry,
    pointer: PointerDragController,
    touch: Arc<Mutex<TouchDragController>>,
    notifier: Notifier,
    live_config: LiveConfig,
    background: Arc<Background>,
}

impl std::fmt::Debug for DispatchBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchBoard")
            .field("store", &self.store)
            .field("live_config", &self.live_config)
            .finish_non_exhaustive()
    }
}

impl DispatchBoard {
    pub fn builder() -> DispatchBoardBuilder {
        DispatchBoardBuilder::new()
    }

    pub fn store(&self) -> &AssignmentStore {
        &self.store
    }

    pub fn registry(&self) -> &DropTargetRegistry {
        &self.registry
    }

    pub fn session(&self) -> &DragSession {
        &self.session
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn service(&self) -> &AssignmentMutationService {
        &self.service
    }

    pub fn catalog(&self) -> &SlotCatalog {
        self.store.catalog()
    }

    /// What the grid should render right now: the overlay while it is
    /// dirty, canonical state otherwise.
    pub fn assignment_view(&self) -> AssignmentMap {
        self.overlay.view(&self.store.current())
    }

    pub fn is_overlay_dirty(&self) -> bool {
        self.overlay.is_dirty()
    }

    /// Officer records from the backend.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the officer table cannot be read.
    pub async fn officers(&self) -> Result<Vec<Officer>, BackendError> {
        self.store.backend.officers().await
    }

    /// Officers sitting in no slot of the current view, in backend order.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the officer table cannot be read.
    pub async fn unassigned_officers(&self) -> Result<Vec<Officer>, BackendError> {
        let officers = self.officers().await?;
        let view = self.assignment_view();
        Ok(view.unassigned(&officers).into_iter().cloned().collect())
    }

    /// Register a droppable region; it stays registered while the returned
    /// guard lives.
    pub fn register_target(&self, target: DropTarget) -> TargetRegistration {
        self.registry.register(target)
    }

    /// Start the realtime feed loop for the canonical map.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::AlreadyExists`] if live mode is already active.
    pub async fn start_live(&self) -> io::Result<LiveHandle> {
        let handle = self.store.start_live(self.live_config.clone()).await?;
        *self.background.live.lock().await = Some(handle.clone());
        Ok(handle)
    }

    // --- pointer path -------------------------------------------------------

    pub fn pointer_drag_start(&self, channel: &mut DragDataChannel, officer_id: &OfficerId) {
        self.pointer.on_drag_start(channel, officer_id);
    }

    pub fn pointer_drag_over(&self, target: &DropTargetId) {
        self.pointer.on_drag_over(target);
    }

    pub fn pointer_drag_leave(&self, target: &DropTargetId) {
        self.pointer.on_drag_leave(target);
    }

    /// Handle a native drop on `destination`.
    ///
    /// A drop carrying no officer id is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] when a backend write fails.
    pub async fn pointer_drop(
        &self,
        event: &mut PointerDropEvent,
        destination: DropTargetId,
    ) -> Result<MutationOutcome, MutationError> {
        match self.pointer.on_drop(event, destination) {
            Some(intent) => self.officer_dropped_on(intent).await,
            None => Ok(MutationOutcome::Ignored),
        }
    }

    // --- touch path ---------------------------------------------------------

    fn touch(&self) -> std::sync::MutexGuard<'_, TouchDragController> {
        self.touch.lock().expect("touch controller mutex poisoned")
    }

    pub fn touch_phase(&self) -> TouchPhase {
        self.touch().phase().clone()
    }

    pub fn touch_ghost(&self) -> Option<Ghost> {
        self.touch().ghost()
    }

    pub fn touch_suppresses_scroll(&self) -> bool {
        self.touch().suppresses_scroll()
    }

    /// Feed one touch event to the touch controller.
    ///
    /// A scheduled hold is fired by a timer task at its deadline. A drop is
    /// resolved and applied before returning.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError`] when the drop's backend write fails.
    pub async fn handle_touch(&self, input: TouchInput) -> Result<TouchEffect, MutationError> {
        let (effect, holding) = {
            let mut touch = self.touch();
            let effect = touch.handle(input);
            (effect, touch.hold_deadline().is_some())
        };

        match &effect {
            TouchEffect::HoldScheduled { deadline } => self.schedule_hold(*deadline),
            _ if !holding => self.cancel_hold(),
            _ => {}
        }

        if let TouchEffect::Dropped(intent) = &effect {
            self.officer_dropped_on(intent.clone()).await?;
        }
        Ok(effect)
    }

    fn schedule_hold(&self, deadline: Instant) {
        let touch = self.touch.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let effect = touch
                .lock()
                .expect("touch controller mutex poisoned")
                .poll_hold(Instant::now());
            tracing::debug!(?effect, "hold timer fired");
        });
        let previous = self
            .background
            .hold_timer
            .lock()
            .expect("hold timer mutex poisoned")
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn cancel_hold(&self) {
        let timer = self
            .background
            .hold_timer
            .lock()
            .expect("hold timer mutex poisoned")
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Stop background tasks: the reconciler, the hover follower, any hold
    /// timer and the live loop. An in-flight touch drag is cancelled.
    ///
    /// Calling `shutdown` more than once is safe.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the live loop task panicked.
    pub async fn shutdown(&self) -> io::Result<()> {
        let _ = self.background.shutdown_tx.send(true);
        self.cancel_hold();
        self.touch().reset();

        let tasks: Vec<_> = self
            .background
            .tasks
            .lock()
            .expect("task list mutex poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
            // Aborted tasks report cancellation; nothing to surface.
            let _ = task.await;
        }

        let live = self.background.live.lock().await.take();
        if let Some(live) = live {
            live.shutdown().await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DropHandler for DispatchBoard {
    async fn officer_dropped_on(
        &self,
        intent: DropIntent,
    ) -> Result<MutationOutcome, MutationError> {
        match self.registry.route(&intent) {
            Some(request) => self.service.execute(request).await,
            None => Ok(MutationOutcome::Ignored),
        }
    }
}

/// Builder for configuring and opening a [`DispatchBoard`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), dispatch_board::BackendError> {
/// use std::time::Duration;
/// use dispatch_board::{DispatchBoard, MemoryBackend};
///
/// let board = DispatchBoard::builder()
///     .backend(MemoryBackend::new())
///     .slots(["North Gate", "South Gate"])
///     .reconcile_window(Duration::from_secs(3))
///     .open()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct DispatchBoardBuilder {
    backend: Option<Arc<dyn Backend>>,
    slots: SlotCatalog,
    touch: TouchConfig,
    reconcile_window: Duration,
    reconcile_policy: ReconcilePolicy,
    live_config: LiveConfig,
}

impl DispatchBoardBuilder {
    /// A builder with every setting at its default and no slots.
    pub fn new() -> Self {
        Self {
            backend: None,
            slots: SlotCatalog::default(),
            touch: TouchConfig::default(),
            reconcile_window: DEFAULT_RECONCILE_WINDOW,
            reconcile_policy: ReconcilePolicy::default(),
            live_config: LiveConfig::default(),
        }
    }

    /// Set the persistence collaborator.
    ///
    /// If not called, an empty [`MemoryBackend`] is used.
    pub fn backend(mut self, backend: impl Backend) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Set the ordered slot catalog.
    pub fn slots<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SlotName>,
    {
        self.slots = SlotCatalog::new(names);
        self
    }

    /// Maximum gap between taps that arms a card. Defaults to 300 ms.
    pub fn double_tap_threshold(mut self, threshold: Duration) -> Self {
        self.touch.double_tap_threshold = threshold;
        self
    }

    /// Hold time on an armed card before dragging. Defaults to 100 ms.
    pub fn hold_delay(mut self, delay: Duration) -> Self {
        self.touch.hold_delay = delay;
        self
    }

    /// Drift in pixels beyond which a touch is a scroll. Defaults to 10.
    pub fn tap_slop(mut self, slop: f64) -> Self {
        self.touch.tap_slop = slop;
        self
    }

    /// How long a local move may diverge from canonical state. Defaults to
    /// 2 seconds.
    pub fn reconcile_window(mut self, window: Duration) -> Self {
        self.reconcile_window = window;
        self
    }

    pub fn reconcile_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.reconcile_policy = policy;
        self
    }

    /// Set the realtime feed loop configuration used by
    /// [`DispatchBoard::start_live`].
    pub fn live_config(mut self, config: LiveConfig) -> Self {
        self.live_config = config;
        self
    }

    /// Load canonical assignments and build the board.
    ///
    /// Spawns the overlay reconciler and the touch hover follower, so this
    /// must run inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the initial assignment load fails.
    pub async fn open(self) -> Result<DispatchBoard, BackendError> {
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let store = AssignmentStore::new(backend, self.slots);
        store.refresh().await?;

        let overlay = OverlayHandle::new(self.reconcile_window, self.reconcile_policy);
        let notifier = Notifier::new();
        let service = AssignmentMutationService::new(store.clone(), overlay.clone(), notifier.clone());
        let session = DragSession::new();
        let registry = DropTargetRegistry::new();
        let touch = TouchDragController::new(self.touch, session.clone(), registry.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = tokio::spawn(run_reconciler(overlay.clone(), store.subscribe(), shutdown_rx));
        let follower = tokio::spawn(registry.clone().follow(session.subscribe()));

        tracing::info!(slots = store.catalog().len(), "dispatch board opened");

        Ok(DispatchBoard {
            pointer: PointerDragController::new(registry.clone()),
            store,
            overlay,
            service,
            session,
            registry,
            touch: Arc::new(Mutex::new(touch)),
            notifier,
            live_config: self.live_config,
            background: Arc::new(Background {
                shutdown_tx,
                tasks: Mutex::new(vec![reconciler, follower]),
                hold_timer: Mutex::new(None),
                live: tokio::sync::Mutex::new(None),
            }),
        })
    }
}

impl Default for DispatchBoardBuilder {
    fn default() -> Self {
        Self::new()
    }
}
