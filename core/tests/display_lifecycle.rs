//! Integration Tests for Displays and the Application Lifecycle
//!
//! Drives real display tasks through simulated terminals.
//!
//! # Test Coverage
//!
//! 1. **Resize**: geometry changes reach handlers and the presented frame
//! 2. **Ordering**: a resize queued before a key is seen by that key's handler
//! 3. **Isolation**: input on one display never touches another
//! 4. **Broadcast**: application signals reach every live display
//! 5. **Suspend**: a suspended display drops input until resumed
//! 6. **Terminate**: stuck displays are detached after the grace period
//! 7. **Errors**: backend failures and undecodable input stay inside one
//!    display

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use termplex_core::signal::PRIORITY_NORMAL;
use termplex_core::{
    AppConfig, Application, DisplayHandle, DisplayState, KeyCode, Propagation, Session, Signal,
    SimulatedHandle, SimulatedTerminal, Size, Style, TerminateReason,
};

const WAIT: Duration = Duration::from_secs(5);

fn app_with_grace(grace: Duration) -> Application {
    let mut config = AppConfig::default();
    config.grace_period = grace;
    Application::initialize(config).unwrap()
}

async fn running(display: &DisplayHandle) {
    let reached = timeout(WAIT, display.wait_for_state(DisplayState::Running))
        .await
        .expect("display never started");
    assert!(reached, "display closed before running");
}

/// Round-trip through the command queue so everything queued before has run
async fn settle(display: &DisplayHandle) {
    timeout(WAIT, display.snapshot())
        .await
        .expect("snapshot timed out")
        .expect("display closed");
}

/// Spawn a display whose root counts key presses and writes the count
fn counting_display(app: &Application, size: Size) -> (DisplayHandle, SimulatedHandle, Arc<AtomicUsize>) {
    let keys = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&keys);
    let (term, handle) = SimulatedTerminal::new(size);
    let display = app
        .spawn_display(Session::local(size), term, move |scene| {
            let root = scene.root();
            let seen = Arc::clone(&counter);
            scene.connect_key(root, PRIORITY_NORMAL, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Propagation::Continue
            });
            let shown = Arc::clone(&counter);
            scene.set_draw_handler(root, move |canvas, _| {
                let text = format!("keys={}", shown.load(Ordering::SeqCst));
                canvas.put_str(0, 0, &text, Style::default());
            })
        })
        .unwrap();
    (display, handle, keys)
}

// ============================================================================
// Resize
// ============================================================================

#[tokio::test]
async fn test_resize_round_trip() {
    let app = app_with_grace(Duration::from_millis(500));
    let sizes = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&sizes);
    let background = Arc::new(Mutex::new(None));
    let seen_background = Arc::clone(&background);
    let (term, handle) = SimulatedTerminal::new(Size::new(80, 24));
    let display = app
        .spawn_display(Session::local(Size::new(80, 24)), term, move |scene| {
            let root = scene.root();
            let recorded = Arc::clone(&recorded);
            scene.connect_resize(root, PRIORITY_NORMAL, move |_, size| {
                recorded.lock().push(size);
                Propagation::Continue
            });
            // Painted once; no draw handler repaints it later.
            if let Some(canvas) = scene.canvas_mut(root) {
                for row in 0..24 {
                    canvas.put_str(row, 0, &pattern_row(row), Style::default());
                }
                *seen_background.lock() = Some(canvas.background());
            }
            Ok(())
        })
        .unwrap();
    running(&display).await;
    let background = background.lock().expect("setup ran");

    handle.resize(Size::new(40, 12));
    let frame = timeout(WAIT, display.snapshot()).await.unwrap().unwrap();
    assert_eq!(frame.size(), Size::new(40, 12));
    assert_eq!(frame.row_text(11), pattern_row(11)[..40]);

    handle.resize(Size::new(80, 24));
    let frame = timeout(WAIT, display.snapshot()).await.unwrap().unwrap();
    assert_eq!(frame.size(), Size::new(80, 24));
    for row in 0..24u16 {
        let expected = pattern_row(row);
        for col in 0..80u16 {
            let cell = *frame.get(row, col).unwrap();
            if row < 12 && col < 40 {
                let symbol = expected.chars().nth(usize::from(col)).unwrap();
                assert_eq!(cell.symbol, symbol, "content lost at ({row}, {col})");
            } else {
                assert_eq!(cell, background, "stale cell at ({row}, {col})");
            }
        }
    }

    assert_eq!(*sizes.lock(), vec![Size::new(40, 12), Size::new(80, 24)]);
    assert_eq!(display.state(), DisplayState::Running);
}

/// 80 printable, non-blank characters that differ per row
fn pattern_row(row: u16) -> String {
    (0..80u16)
        .map(|col| char::from(b'a' + ((row + col) % 26) as u8))
        .collect()
}

#[tokio::test]
async fn test_resize_to_same_size_is_ignored() {
    let app = app_with_grace(Duration::from_millis(500));
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let (term, handle) = SimulatedTerminal::new(Size::new(20, 5));
    let display = app
        .spawn_display(Session::local(Size::new(20, 5)), term, move |scene| {
            let root = scene.root();
            scene.connect_resize(root, PRIORITY_NORMAL, move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                Propagation::Continue
            });
            Ok(())
        })
        .unwrap();
    running(&display).await;

    handle.resize(Size::new(20, 5));
    settle(&display).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resize_is_seen_by_following_key() {
    let app = app_with_grace(Duration::from_millis(500));
    let observed = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&observed);
    let (term, handle) = SimulatedTerminal::new(Size::new(80, 24));
    let display = app
        .spawn_display(Session::local(Size::new(80, 24)), term, move |scene| {
            let root = scene.root();
            scene.connect_key(root, PRIORITY_NORMAL, move |scene, _| {
                record.lock().push(scene.size());
                Propagation::Continue
            });
            Ok(())
        })
        .unwrap();
    running(&display).await;

    handle.key(KeyCode::Char('a'));
    handle.resize(Size::new(40, 12));
    handle.key(KeyCode::Char('b'));
    settle(&display).await;

    assert_eq!(
        *observed.lock(),
        vec![Size::new(80, 24), Size::new(40, 12)]
    );
}

// ============================================================================
// Isolation and broadcast
// ============================================================================

#[tokio::test]
async fn test_displays_are_isolated() {
    let app = app_with_grace(Duration::from_millis(500));
    let (first, first_term, first_keys) = counting_display(&app, Size::new(10, 1));
    let (second, _second_term, second_keys) = counting_display(&app, Size::new(10, 1));
    running(&first).await;
    running(&second).await;

    first_term.key(KeyCode::Char('x'));
    first_term.key(KeyCode::Char('y'));
    settle(&first).await;
    settle(&second).await;

    assert_eq!(first_keys.load(Ordering::SeqCst), 2);
    assert_eq!(second_keys.load(Ordering::SeqCst), 0);

    let first_frame = first.snapshot().await.unwrap();
    let second_frame = second.snapshot().await.unwrap();
    assert_eq!(first_frame.row_text(0).trim_end(), "keys=2");
    assert_eq!(second_frame.row_text(0).trim_end(), "keys=0");

    // Closing one leaves the other untouched.
    first_term.disconnect();
    timeout(WAIT, first.wait_closed()).await.unwrap();
    assert_eq!(second.state(), DisplayState::Running);
    assert_eq!(app.display_count(), 1);
}

#[tokio::test]
async fn test_broadcast_reaches_every_display() {
    let app = app_with_grace(Duration::from_millis(500));
    let hits = Arc::new(AtomicUsize::new(0));
    let mut displays = Vec::new();
    for _ in 0..3 {
        let (term, _handle) = SimulatedTerminal::new(Size::new(8, 2));
        let hits = Arc::clone(&hits);
        let display = app
            .spawn_display(Session::local(Size::new(8, 2)), term, move |scene| {
                let root = scene.root();
                scene.connect_custom(root, "announce", PRIORITY_NORMAL, move |_, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Propagation::Continue
                });
                Ok(())
            })
            .unwrap();
        running(&display).await;
        displays.push(display);
    }

    let result = app.broadcast(Signal::custom("announce", vec![]));
    assert_eq!(result.sent, 3);
    assert!(result.all_succeeded());
    for display in &displays {
        settle(display).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_backend_failure_closes_only_that_display() {
    let app = app_with_grace(Duration::from_millis(500));
    let (failing, failing_term, _) = counting_display(&app, Size::new(10, 1));
    let (healthy, healthy_term, healthy_keys) = counting_display(&app, Size::new(10, 1));
    running(&failing).await;
    running(&healthy).await;

    failing_term.fail("connection reset");
    timeout(WAIT, failing.wait_closed())
        .await
        .expect("failed display never closed");
    assert_eq!(failing.state(), DisplayState::Closed);

    healthy_term.key(KeyCode::Char('k'));
    settle(&healthy).await;
    assert_eq!(healthy.state(), DisplayState::Running);
    assert_eq!(healthy_keys.load(Ordering::SeqCst), 1);
    assert_eq!(app.display_count(), 1);
}

#[tokio::test]
async fn test_undecodable_input_is_dropped() {
    let app = app_with_grace(Duration::from_millis(500));
    let (display, term, keys) = counting_display(&app, Size::new(10, 1));
    running(&display).await;

    term.bytes(b"\xff");
    term.bytes(b"\xfeb");
    term.key(KeyCode::Char('c'));
    settle(&display).await;

    assert_eq!(display.state(), DisplayState::Running);
    assert_eq!(keys.load(Ordering::SeqCst), 2);
    let frame = display.snapshot().await.unwrap();
    assert_eq!(frame.row_text(0).trim_end(), "keys=2");
}

// ============================================================================
// Suspend
// ============================================================================

#[tokio::test]
async fn test_suspended_display_drops_input() {
    let app = app_with_grace(Duration::from_millis(500));
    let (display, term, keys) = counting_display(&app, Size::new(10, 1));
    running(&display).await;

    display.suspend().unwrap();
    assert!(timeout(WAIT, display.wait_for_state(DisplayState::Suspended))
        .await
        .unwrap());
    term.key(KeyCode::Char('a'));
    settle(&display).await;
    assert_eq!(keys.load(Ordering::SeqCst), 0);

    display.resume().unwrap();
    running(&display).await;
    term.key(KeyCode::Char('b'));
    settle(&display).await;
    assert_eq!(keys.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Terminate
// ============================================================================

#[tokio::test]
async fn test_terminate_detaches_display_stuck_in_close() {
    let grace = Duration::from_millis(200);
    let app = app_with_grace(grace);
    let (first, _first_term, _) = counting_display(&app, Size::new(4, 1));
    let (second, _second_term, _) = counting_display(&app, Size::new(4, 1));
    let (stuck, stuck_term, _) = counting_display(&app, Size::new(4, 1));
    for display in [&first, &second, &stuck] {
        running(display).await;
    }
    stuck_term.hang_on_close();

    let report = app.terminate(TerminateReason::Requested).await;

    assert!(report.elapsed >= grace, "{:?}", report.elapsed);
    assert!(
        report.elapsed < grace + Duration::from_millis(300),
        "terminate overran the grace period: {:?}",
        report.elapsed
    );
    assert_eq!(report.closed.len(), 2);
    assert!(report.closed.contains(&first.id()));
    assert!(report.closed.contains(&second.id()));
    assert_eq!(report.forced, vec![stuck.id()]);
    assert!(!report.is_clean());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(first.state(), DisplayState::Closed);
    assert_eq!(second.state(), DisplayState::Closed);
    assert_eq!(app.display_count(), 0);
    timeout(WAIT, stuck.wait_closed()).await.unwrap();
}

#[tokio::test]
async fn test_terminate_detaches_display_stuck_writing() {
    let app = app_with_grace(Duration::from_millis(100));
    let (display, term, _) = counting_display(&app, Size::new(10, 1));
    running(&display).await;

    term.stall_writes(true);
    term.key(KeyCode::Char('z'));
    // Give the display time to block inside the write.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let report = timeout(WAIT, app.terminate(TerminateReason::Signal("SIGTERM".into())))
        .await
        .unwrap();
    assert_eq!(report.forced, vec![display.id()]);
    assert_eq!(app.display_count(), 0);
}

#[tokio::test]
async fn test_run_returns_after_terminate() {
    let app = app_with_grace(Duration::from_millis(200));
    let (display, _term, _) = counting_display(&app, Size::new(4, 1));
    running(&display).await;

    let runner = app.clone();
    let run = tokio::spawn(async move { runner.run().await });
    let report = app.terminate(TerminateReason::Requested).await;
    let code = timeout(WAIT, run).await.unwrap().unwrap();

    assert!(report.is_clean());
    assert_eq!(code, 0);
    assert!(app
        .spawn_display(
            Session::local(Size::new(4, 1)),
            SimulatedTerminal::new(Size::new(4, 1)).0,
            |_| Ok(())
        )
        .is_err());
}
