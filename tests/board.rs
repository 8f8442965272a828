//! Integration tests for the dispatch board.
//!
//! These drive the board end to end through both gesture paths against an
//! in-memory backend, checking the assignment map, officer records, the
//! optimistic overlay and the toast channel.

use std::time::Duration;

use dispatch_board::{
    Backend, DispatchBoard, DragDataChannel, DragMessage, DragSource, DropHandler, DropIntent,
    DropTarget, DropTargetId, FailPoint, Incident, MemoryBackend, MutationError, MutationOutcome,
    Officer, OfficerId, OfficerStatus, Point, PointerDropEvent, Rect, ReconcilePolicy, SlotName,
    TargetRegistration, ToastLevel, TouchEffect, TouchInput,
};
use tokio::time::Instant;

fn north() -> SlotName {
    SlotName::new("North Gate")
}

fn south() -> SlotName {
    SlotName::new("South Gate")
}

fn officers() -> Vec<Officer> {
    vec![Officer::new("o-1", "Reyes"), Officer::new("o-2", "Chen")]
}

/// Board over the two-gate catalog with two available officers.
async fn test_board(backend: MemoryBackend) -> DispatchBoard {
    DispatchBoard::builder()
        .backend(backend)
        .slots(["North Gate", "South Gate"])
        .open()
        .await
        .expect("failed to open board")
}

/// Lay out the grid: two slot blocks, the pool and one incident card.
fn layout(board: &DispatchBoard, incident: Incident) -> Vec<TargetRegistration> {
    vec![
        board.register_target(DropTarget::slot("North Gate", Rect::new(0.0, 0.0, 100.0, 100.0))),
        board.register_target(DropTarget::slot("South Gate", Rect::new(100.0, 0.0, 100.0, 100.0))),
        board.register_target(DropTarget::pool(Rect::new(0.0, 100.0, 200.0, 50.0))),
        board.register_target(DropTarget::incident(incident, Rect::new(200.0, 0.0, 100.0, 100.0))),
    ]
}

async fn pointer_drop(
    board: &DispatchBoard,
    officer: &str,
    destination: DropTargetId,
) -> Result<MutationOutcome, MutationError> {
    let mut channel = DragDataChannel::default();
    board.pointer_drag_start(&mut channel, &OfficerId::new(officer));
    board.pointer_drag_over(&destination);
    let mut event = PointerDropEvent::new(channel);
    board.pointer_drop(&mut event, destination).await
}

async fn officer(backend: &MemoryBackend, id: &str) -> Officer {
    backend
        .officer(&OfficerId::new(id))
        .await
        .expect("officer read")
        .expect("officer exists")
}

/// Drop O1 on North Gate, then on South Gate.
#[tokio::test]
async fn slot_to_slot_scenario() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let o1 = OfficerId::new("o-1");

    pointer_drop(&board, "o-1", DropTargetId::Slot(north()))
        .await
        .expect("first drop");

    let map = board.store().current();
    assert!(map.officers_in(&north()).unwrap().contains(&o1));
    assert!(map.officers_in(&south()).unwrap().is_empty());
    assert_eq!(officer(&backend, "o-1").await.status, OfficerStatus::Responding);

    pointer_drop(&board, "o-1", DropTargetId::Slot(south()))
        .await
        .expect("second drop");

    let map = board.store().current();
    assert!(map.officers_in(&north()).unwrap().is_empty());
    assert!(map.officers_in(&south()).unwrap().contains(&o1));
    assert!(map.is_consistent());
    assert!(!board.registry().is_hovered(&DropTargetId::Slot(south())));

    board.shutdown().await.expect("shutdown");
}

/// An incident at a matched address posts the officer to the slot.
#[tokio::test]
async fn incident_with_matched_address_scenario() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let incident = Incident::new("inc-1", "123 North Gate Rd");
    let _targets = layout(&board, incident.clone());

    let outcome = pointer_drop(&board, "o-2", DropTargetId::Incident(incident.id.clone()))
        .await
        .expect("drop on incident");

    assert_eq!(outcome, MutationOutcome::Applied { slot: Some(north()) });
    let record = officer(&backend, "o-2").await;
    assert_eq!(record.status, OfficerStatus::Responding);
    assert_eq!(record.current_incident, Some(incident.id));
    assert_eq!(board.store().current().slot_of(&OfficerId::new("o-2")), Some(&north()));

    board.shutdown().await.expect("shutdown");
}

/// An incident whose address names no slot leaves the officer out of the grid.
#[tokio::test]
async fn incident_with_unmatched_address_scenario() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let incident = Incident::new("inc-2", "999 Unmatched Ave");
    let _targets = layout(&board, incident.clone());

    pointer_drop(&board, "o-2", DropTargetId::Incident(incident.id.clone()))
        .await
        .expect("drop on incident");

    let record = officer(&backend, "o-2").await;
    assert_eq!(record.status, OfficerStatus::Responding);
    assert_eq!(record.current_incident, Some(incident.id));
    let map = board.assignment_view();
    assert!(map.iter().all(|(_, set)| set.is_empty()));

    board.shutdown().await.expect("shutdown");
}

/// An officer already posted to a slot keeps that slot when sent to an
/// incident whose address names no slot: only the officer record changes.
#[tokio::test]
async fn unmatched_incident_keeps_posted_officer_in_slot() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let incident = Incident::new("inc-3", "999 Unmatched Ave");
    let _targets = layout(&board, incident.clone());
    let o1 = OfficerId::new("o-1");
    pointer_drop(&board, "o-1", DropTargetId::Slot(south()))
        .await
        .expect("slot drop");
    let rows_before = backend.rows();

    let outcome = pointer_drop(&board, "o-1", DropTargetId::Incident(incident.id.clone()))
        .await
        .expect("drop on incident");

    assert_eq!(outcome, MutationOutcome::Applied { slot: Some(south()) });
    assert_eq!(backend.rows(), rows_before);
    assert_eq!(board.store().current().slot_of(&o1), Some(&south()));
    assert_eq!(board.assignment_view().slot_of(&o1), Some(&south()));
    let record = officer(&backend, "o-1").await;
    assert_eq!(record.status, OfficerStatus::Responding);
    assert_eq!(record.current_incident, Some(incident.id));

    board.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn return_to_pool_is_idempotent() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let o1 = OfficerId::new("o-1");
    pointer_drop(&board, "o-1", DropTargetId::Slot(north()))
        .await
        .unwrap();

    pointer_drop(&board, "o-1", DropTargetId::UnassignedPool)
        .await
        .expect("first return");
    let once = (board.store().current(), officer(&backend, "o-1").await);

    pointer_drop(&board, "o-1", DropTargetId::UnassignedPool)
        .await
        .expect("second return");
    let twice = (board.store().current(), officer(&backend, "o-1").await);

    assert_eq!(once, twice);
    assert_eq!(twice.0.slot_of(&o1), None);
    assert_eq!(twice.1.status, OfficerStatus::Available);
    let pool = board.unassigned_officers().await.unwrap();
    assert_eq!(pool.len(), 2);

    board.shutdown().await.expect("shutdown");
}

/// Double tap, hold, drag across the grid and release over South Gate.
#[tokio::test(start_paused = true)]
async fn touch_drag_assigns_officer() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let _targets = layout(&board, Incident::new("inc-1", "1 Harbor Way"));
    let mut bus = board.session().subscribe();
    let o1 = OfficerId::new("o-1");
    let card = Point::new(150.0, 125.0);
    let start = || TouchInput::Start {
        officer_id: o1.clone(),
        source: DragSource::Pool,
        point: card,
        at: Instant::now(),
    };
    let end = |point| TouchInput::End {
        point,
        at: Instant::now(),
    };

    assert!(matches!(
        board.handle_touch(start()).await.unwrap(),
        TouchEffect::Pressed
    ));
    assert!(matches!(
        board.handle_touch(end(card)).await.unwrap(),
        TouchEffect::Click { .. }
    ));
    tokio::time::advance(Duration::from_millis(150)).await;
    board.handle_touch(start()).await.unwrap();
    assert!(matches!(
        board.handle_touch(end(card)).await.unwrap(),
        TouchEffect::Armed { .. }
    ));

    board.handle_touch(start()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(board.touch_ghost().is_some());

    let over_south = Point::new(150.0, 50.0);
    board
        .handle_touch(TouchInput::Move {
            point: over_south,
            at: Instant::now(),
        })
        .await
        .unwrap();
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(board.registry().is_hovered(&DropTargetId::Slot(south())));

    let effect = board.handle_touch(end(over_south)).await.unwrap();
    assert_eq!(
        effect,
        TouchEffect::Dropped(DropIntent {
            officer_id: o1.clone(),
            destination: DropTargetId::Slot(south()),
        })
    );
    assert_eq!(board.store().current().slot_of(&o1), Some(&south()));
    assert!(board.touch_ghost().is_none());
    assert!(board.session().active().is_none());

    let mut drops = 0;
    while let Ok(message) = bus.try_recv() {
        if matches!(message, DragMessage::Dropped { .. }) {
            drops += 1;
        }
    }
    assert_eq!(drops, 1);

    board.shutdown().await.expect("shutdown");
}

/// Both gesture paths resolve into the same handler.
#[tokio::test]
async fn drop_handler_is_shared_entry_point() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend).await;
    let handler: &dyn DropHandler = &board;

    let outcome = handler
        .officer_dropped_on(DropIntent {
            officer_id: OfficerId::new("o-1"),
            destination: DropTargetId::Slot(north()),
        })
        .await
        .unwrap();

    assert_eq!(outcome, MutationOutcome::Applied { slot: Some(north()) });
    board.shutdown().await.expect("shutdown");
}

/// A failed slot write shows the intended move until the window passes,
/// then the view falls back to canonical.
#[tokio::test(start_paused = true)]
async fn failed_write_decays_after_window() {
    let backend = MemoryBackend::with_officers(officers());
    let board = DispatchBoard::builder()
        .backend(backend.clone())
        .slots(["North Gate", "South Gate"])
        .reconcile_policy(ReconcilePolicy::ConfirmOrTimer)
        .open()
        .await
        .unwrap();
    let mut toasts = board.notifier().subscribe();
    let o1 = OfficerId::new("o-1");
    backend.fail_next(FailPoint::WriteAssignment);

    let err = pointer_drop(&board, "o-1", DropTargetId::Slot(north()))
        .await
        .expect_err("slot write fails");

    assert!(matches!(err, MutationError::SlotAssignment { .. }));
    assert_eq!(toasts.recv().await.unwrap().level, ToastLevel::Failure);
    // Partial failure: the officer half stays applied.
    assert_eq!(officer(&backend, "o-1").await.status, OfficerStatus::Responding);
    assert!(board.is_overlay_dirty());
    assert_eq!(board.assignment_view().slot_of(&o1), Some(&north()));

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(!board.is_overlay_dirty());
    assert_eq!(board.assignment_view().slot_of(&o1), None);
    board.shutdown().await.expect("shutdown");
}

/// A successful write is confirmed by the canonical refresh well before the
/// window elapses.
#[tokio::test]
async fn confirmed_write_clears_overlay() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend).await;

    pointer_drop(&board, "o-1", DropTargetId::Slot(north()))
        .await
        .unwrap();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    assert!(!board.is_overlay_dirty());
    board.shutdown().await.expect("shutdown");
}

/// A write by another dispatcher reaches this board through the live feed.
#[tokio::test(start_paused = true)]
async fn live_feed_converges_remote_writes() {
    let backend = MemoryBackend::with_officers(officers());
    let board = test_board(backend.clone()).await;
    let live = board.start_live().await.expect("start live");

    let o2 = OfficerId::new("o-2");
    backend
        .insert_assignment(&o2, &south())
        .await
        .expect("remote write");

    for _ in 0..50 {
        if board.assignment_view().slot_of(&o2).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(live.is_synced());
    assert_eq!(board.assignment_view().slot_of(&o2), Some(&south()));
    board.shutdown().await.expect("shutdown");
}

/// Assignments written through a snapshot-backed backend survive a restart.
#[tokio::test]
async fn snapshot_backend_survives_reopen() {
    let tmp = tempfile::tempdir().expect("failed to create tmpdir");
    let path = tmp.path().join("dispatch.json");

    {
        let backend = MemoryBackend::open(&path).expect("open snapshot");
        for o in officers() {
            backend.upsert_officer(o).expect("seed officer");
        }
        let board = test_board(backend).await;
        pointer_drop(&board, "o-1", DropTargetId::Slot(north()))
            .await
            .unwrap();
        board.shutdown().await.expect("shutdown");
    }

    let backend = MemoryBackend::open(&path).expect("reopen snapshot");
    let board = test_board(backend.clone()).await;
    assert_eq!(
        board.assignment_view().slot_of(&OfficerId::new("o-1")),
        Some(&north())
    );
    assert_eq!(officer(&backend, "o-1").await.status, OfficerStatus::Responding);
    board.shutdown().await.expect("shutdown");
}
