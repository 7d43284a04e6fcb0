//! Session Integration Tests
//!
//! This test module verifies:
//! 1. A scripted sign-on exchange against a stub session
//! 2. Synchronization waits driven by a simulated host thread
//! 3. Error-line overlay flow through protocol updates
//! 4. Session event dispatch ordering

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tn5250h::oia::InhibitCode;
use tn5250h::screen::{ContentMask, ErrorState, SaveScope};
use tn5250h::session::{HeadlessSession, SessionEvent, SessionListener, StubSession};
use tn5250h::update::ProtocolUpdate;
use tn5250h::SessionError;

fn write_text(session: &StubSession, row: usize, text: &str) {
    for (i, ch) in text.chars().enumerate() {
        session
            .apply_update(&ProtocolUpdate::WriteChar { row, col: i, ch, attribute: 0x20 })
            .unwrap();
    }
}

/// Full scripted exchange: host paints a sign-on screen, automation fills
/// credentials, the host locks while processing and unlocks on the next
/// screen.
#[test]
fn test_sign_on_round_trip() {
    let session = Arc::new(StubSession::new("dev-as400"));
    session.connect().unwrap();

    write_text(&session, 0, "                  Sign On");
    write_text(&session, 5, "User  . . . . :");
    write_text(&session, 6, "Password  . . :");
    session.apply_update(&ProtocolUpdate::MoveCursor { row: 5, col: 17 }).unwrap();

    assert!(session.screen_as_text().contains("Sign On"));
    assert_eq!(session.screen().cursor(), (5, 17));

    session.send_keys("QUSER[tab]secret[enter]").unwrap();
    assert_eq!(session.sent_keys(), vec!["QUSER[tab]secret[enter]".to_string()]);

    // Host processes the input on its own thread
    let host = session.clone();
    let handle = thread::spawn(move || {
        host.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();
        host.apply_update(&ProtocolUpdate::SetInputInhibited {
            code: InhibitCode::SystemWait,
            what_code: 0,
            message: Some("X SYSTEM".to_string()),
        })
        .unwrap();
        thread::sleep(Duration::from_millis(30));
        host.apply_update(&ProtocolUpdate::ClearScreen).unwrap();
        host.apply_update(&ProtocolUpdate::ClearInputInhibited { clear_message: true }).unwrap();
        host.apply_update(&ProtocolUpdate::UnlockKeyboard).unwrap();
    });

    session.wait_for_keyboard_lock_cycle(Duration::from_secs(2)).unwrap();
    handle.join().unwrap();

    assert!(!session.oia().is_keyboard_locked());
    assert!(!session.oia().is_input_inhibited());
    assert_eq!(session.screen().row_text(0).unwrap().trim(), "");
}

/// The error line is saved, overwritten with the host message, then put
/// back once the operator resets.
#[test]
fn test_error_line_overlay_flow() {
    let session = StubSession::new("err-demo");
    session.connect().unwrap();
    write_text(&session, 23, "F3=Exit   F12=Cancel");

    session
        .apply_update(&ProtocolUpdate::SaveScreen {
            scope: SaveScope::ErrorLine,
            mask: ContentMask::All,
        })
        .unwrap();
    session.apply_update(&ProtocolUpdate::SetErrorState(ErrorState::Pending)).unwrap();
    write_text(&session, 23, "CPF1107 - Password not correct for user profile");
    session.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();

    assert!(session.screen().row_text(23).unwrap().starts_with("CPF1107"));
    assert_eq!(session.screen().error_state(), ErrorState::Pending);

    // Operator hits Reset: the host restores the line and unlocks
    session
        .apply_update(&ProtocolUpdate::RestoreScreen { scope: SaveScope::ErrorLine })
        .unwrap();
    session.apply_update(&ProtocolUpdate::UnlockKeyboard).unwrap();

    assert!(session.screen().row_text(23).unwrap().starts_with("F3=Exit"));
    assert_eq!(session.screen().error_state(), ErrorState::None);
    assert!(!session.oia().is_keyboard_locked());
}

#[test]
fn test_out_of_bounds_update_is_rejected() {
    let session = StubSession::new("bounds");
    let result = session.apply_update(&ProtocolUpdate::WriteChar {
        row: 24,
        col: 0,
        ch: 'X',
        attribute: 0,
    });
    assert!(matches!(result, Err(SessionError::UpdateRejected { .. })));
}

#[test]
fn test_session_events_in_order() {
    struct EventLog(Mutex<Vec<SessionEvent>>);
    impl SessionListener for EventLog {
        fn on_session_event(&self, _name: &str, event: SessionEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    let session = StubSession::new("events");
    let log = Arc::new(EventLog(Mutex::new(Vec::new())));
    session.add_session_listener(log.clone());

    session.connect().unwrap();
    session.connect().unwrap(); // idempotent, no second event
    session
        .apply_update(&ProtocolUpdate::WriteChar { row: 0, col: 0, ch: 'A', attribute: 0 })
        .unwrap();
    session.apply_update(&ProtocolUpdate::Bell).unwrap();
    session.apply_update(&ProtocolUpdate::MoveCursor { row: 1, col: 1 }).unwrap();
    session.disconnect();

    assert_eq!(
        *log.0.lock().unwrap(),
        vec![
            SessionEvent::Connected,
            SessionEvent::ScreenChanged,
            SessionEvent::Bell,
            SessionEvent::Disconnected,
        ],
        "cursor-only moves must not fire ScreenChanged"
    );
}

#[test]
fn test_oia_level_visible_through_session() {
    let session = StubSession::new("level");
    let before = session.oia().level();
    session.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();
    session.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();
    assert_eq!(session.oia().level(), before + 1, "redundant lock must not bump the level");
}

/// Two waiters parked on the same session both wake on one unlock.
#[test]
fn test_unlock_wakes_all_waiters() {
    let session = Arc::new(StubSession::new("waiters"));
    session.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();

    let woken = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut handles = Vec::new();
    for _ in 0..3 {
        let session = session.clone();
        let woken = woken.clone();
        handles.push(thread::spawn(move || {
            session.wait_for_keyboard_unlock(Duration::from_secs(2)).unwrap();
            woken.fetch_add(1, Ordering::SeqCst);
        }));
    }

    thread::sleep(Duration::from_millis(50));
    session.apply_update(&ProtocolUpdate::UnlockKeyboard).unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(woken.load(Ordering::SeqCst), 3);
}
