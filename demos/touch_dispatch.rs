//! Scripted dispatch session: a tablet dispatcher drags officers with touch
//! gestures while a desktop dispatcher uses the pointer, both against one
//! in-memory backend.
//!
//! Run with: `cargo run --example touch_dispatch`
//!
//! Set `RUST_LOG=dispatch_board=debug` to watch the gesture and write logs.

use std::time::Duration;

use dispatch_board::{
    DispatchBoard, DragDataChannel, DragSource, DropTarget, DropTargetId, Incident, MemoryBackend,
    Officer, OfficerId, Point, PointerDropEvent, Rect, SlotName, TouchInput,
};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn print_board(board: &DispatchBoard) {
    for (slot, officers) in board.assignment_view().iter() {
        let names: Vec<_> = officers.iter().map(OfficerId::as_str).collect();
        println!("  {:<12} {names:?}", slot.as_str());
    }
}

fn touch_start(officer_id: &OfficerId, point: Point) -> TouchInput {
    TouchInput::Start {
        officer_id: officer_id.clone(),
        source: DragSource::Pool,
        point,
        at: Instant::now(),
    }
}

fn touch_end(point: Point) -> TouchInput {
    TouchInput::End {
        point,
        at: Instant::now(),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let backend = MemoryBackend::with_officers([
        Officer::new("o-1", "Reyes"),
        Officer::new("o-2", "Chen"),
        Officer::new("o-3", "Okafor"),
    ]);
    let board = DispatchBoard::builder()
        .backend(backend)
        .slots(["North Gate", "South Gate", "Harbor"])
        .open()
        .await?;
    let live = board.start_live().await?;

    let mut toasts = board.notifier().subscribe();
    tokio::spawn(async move {
        while let Ok(toast) = toasts.recv().await {
            println!("[{:?}] {}", toast.level, toast.message);
        }
    });

    let incident = Incident::new("inc-7", "Fire alarm, 40 Harbor Rd");
    let _targets = [
        board.register_target(DropTarget::slot("North Gate", Rect::new(0.0, 0.0, 100.0, 100.0))),
        board.register_target(DropTarget::slot("South Gate", Rect::new(100.0, 0.0, 100.0, 100.0))),
        board.register_target(DropTarget::slot("Harbor", Rect::new(200.0, 0.0, 100.0, 100.0))),
        board.register_target(DropTarget::pool(Rect::new(0.0, 100.0, 300.0, 50.0))),
        board.register_target(DropTarget::incident(
            incident.clone(),
            Rect::new(300.0, 0.0, 100.0, 100.0),
        )),
    ];

    // -- touch: double tap to arm, hold, drag onto South Gate ---------------
    let reyes = OfficerId::new("o-1");
    let card = Point::new(20.0, 120.0);
    board.handle_touch(touch_start(&reyes, card)).await?;
    board.handle_touch(touch_end(card)).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    board.handle_touch(touch_start(&reyes, card)).await?;
    let armed = board.handle_touch(touch_end(card)).await?;
    println!("second tap: {armed:?}");

    board.handle_touch(touch_start(&reyes, card)).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let south = Point::new(150.0, 40.0);
    board
        .handle_touch(TouchInput::Move {
            point: south,
            at: Instant::now(),
        })
        .await?;
    println!("ghost: {:?}", board.touch_ghost());
    let dropped = board.handle_touch(touch_end(south)).await?;
    println!("release: {dropped:?}");
    print_board(&board);

    // -- pointer: drag Chen onto the incident card --------------------------
    let mut channel = DragDataChannel::default();
    board.pointer_drag_start(&mut channel, &OfficerId::new("o-2"));
    let mut event = PointerDropEvent::new(channel);
    let outcome = board
        .pointer_drop(&mut event, DropTargetId::Incident(incident.id.clone()))
        .await?;
    println!("incident drop: {outcome:?}");
    print_board(&board);

    // -- pointer: send Reyes back to the pool -------------------------------
    let mut channel = DragDataChannel::default();
    board.pointer_drag_start(&mut channel, &reyes);
    let mut event = PointerDropEvent::new(channel);
    board
        .pointer_drop(&mut event, DropTargetId::UnassignedPool)
        .await?;
    print_board(&board);

    let pool: Vec<_> = board
        .unassigned_officers()
        .await?
        .into_iter()
        .map(|o| o.display_name)
        .collect();
    println!("unassigned: {pool:?}");
    assert_eq!(
        board.assignment_view().slot_of(&OfficerId::new("o-2")),
        Some(&SlotName::new("Harbor"))
    );

    println!("live synced: {}", live.is_synced());
    board.shutdown().await?;
    Ok(())
}
