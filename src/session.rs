//! Headless session management
//!
//! A session composes one screen buffer, one operator status and a
//! connection handle behind the HeadlessSession capability interface. The
//! pool and automation clients depend only on the trait, so a real
//! network-backed TerminalSession and the in-memory StubSession used by
//! harnesses are interchangeable.
//!
//! The pool enforces at-most-one concurrent holder per session; the
//! interior mutexes exist so the transport thread can apply decoded updates
//! while the holder blocks in the wait calls, not to support multiple
//! holders.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::keyboard::{tokenize_keys, DefaultKeyMapper, KeyMapper, KeyToken};
use crate::oia::OperatorStatus;
use crate::screen::ScreenBuffer;
use crate::update::{apply_update, ProtocolUpdate};

/// Events fired to session listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    ScreenChanged,
    Bell,
}

/// Listener for session lifecycle and screen events
pub trait SessionListener: Send + Sync {
    fn on_session_event(&self, session_name: &str, event: SessionEvent);
}

/// Handle for removing a session listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionListenerId(u64);

/// Connection handle injected into a TerminalSession.
///
/// Wire handling (telnet negotiation, TLS, EBCDIC encoding) lives behind
/// this trait; the session only pushes already-translated bytes through it.
pub trait SessionTransport: Send {
    fn open(&mut self) -> io::Result<()>;
    fn send(&mut self, data: &[u8]) -> io::Result<()>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}

/// Renderer collaborator for capture_screenshot(); headless sessions run
/// without one
pub trait ScreenRenderer: Send + Sync {
    fn render(&self, screen: &ScreenBuffer) -> Vec<u8>;
}

/// The capability interface automation and the pool program against
pub trait HeadlessSession: Send + Sync {
    fn name(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn connect(&self) -> Result<(), SessionError>;

    /// Idempotent; a disconnected session stays disconnected
    fn disconnect(&self);

    /// Send text plus bracketed mnemonics ("user[tab]pass[enter]")
    fn send_keys(&self, keys: &str) -> Result<(), SessionError>;

    /// Block until the keyboard is unlocked or the timeout elapses
    fn wait_for_keyboard_unlock(&self, timeout: Duration) -> Result<(), SessionError>;

    /// Block through one full lock -> unlock transition (host input round
    /// trip) or until the timeout elapses
    fn wait_for_keyboard_lock_cycle(&self, timeout: Duration) -> Result<(), SessionError>;

    fn screen(&self) -> MutexGuard<'_, ScreenBuffer>;

    fn oia(&self) -> MutexGuard<'_, OperatorStatus>;

    fn screen_as_text(&self) -> String {
        self.screen().to_string()
    }

    /// Delegates to the injected renderer; None when running headless
    fn capture_screenshot(&self) -> Option<Vec<u8>> {
        None
    }

    /// Entry point for the transport/codec collaborator
    fn apply_update(&self, update: &ProtocolUpdate) -> Result<(), SessionError>;

    fn add_session_listener(&self, listener: Arc<dyn SessionListener>) -> SessionListenerId;

    fn remove_session_listener(&self, id: SessionListenerId);
}

/// Shared state machinery both session variants embed: the screen/OIA pair,
/// the condvar the wait calls park on, and the listener registry
struct SessionCore {
    name: String,
    screen: Mutex<ScreenBuffer>,
    oia: Mutex<OperatorStatus>,
    oia_changed: Condvar,
    listeners: Mutex<Vec<(SessionListenerId, Arc<dyn SessionListener>)>>,
    next_listener_id: AtomicU64,
}

impl SessionCore {
    fn new(name: String, rows: usize, cols: usize) -> Self {
        Self {
            name,
            screen: Mutex::new(ScreenBuffer::new(rows, cols)),
            oia: Mutex::new(OperatorStatus::new()),
            oia_changed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    fn fire(&self, event: SessionEvent) {
        let listeners = self.listeners.lock().unwrap().clone();
        for (_, listener) in listeners {
            listener.on_session_event(&self.name, event);
        }
    }

    fn add_listener(&self, listener: Arc<dyn SessionListener>) -> SessionListenerId {
        let id = SessionListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    fn remove_listener(&self, id: SessionListenerId) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    fn apply(&self, update: &ProtocolUpdate) -> Result<(), SessionError> {
        let mut screen = self.screen.lock().unwrap();
        let mut oia = self.oia.lock().unwrap();
        apply_update(&mut screen, &mut oia, update).map_err(|err| {
            SessionError::UpdateRejected {
                session: self.name.clone(),
                reason: err.to_string(),
            }
        })?;
        drop(oia);
        drop(screen);

        // Wake any task parked in a wait call, then tell listeners
        self.oia_changed.notify_all();
        match update {
            ProtocolUpdate::Bell => self.fire(SessionEvent::Bell),
            ProtocolUpdate::WriteChar { .. }
            | ProtocolUpdate::WriteFieldAttribute { .. }
            | ProtocolUpdate::SetOverlay { .. }
            | ProtocolUpdate::ClearScreen
            | ProtocolUpdate::RestoreScreen { .. } => self.fire(SessionEvent::ScreenChanged),
            _ => {}
        }
        Ok(())
    }

    fn wait_for_unlock(&self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        let mut oia = self.oia.lock().unwrap();
        while oia.is_keyboard_locked() {
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::WaitTimeout {
                    what: "keyboard unlock",
                    waited: timeout,
                });
            }
            let (guard, _) = self
                .oia_changed
                .wait_timeout(oia, deadline - now)
                .unwrap();
            oia = guard;
        }
        Ok(())
    }

    fn wait_for_lock_cycle(&self, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        let mut oia = self.oia.lock().unwrap();

        // Phase 1: wait for the host to lock the keyboard
        while !oia.is_keyboard_locked() {
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::WaitTimeout {
                    what: "keyboard lock",
                    waited: timeout,
                });
            }
            let (guard, _) = self
                .oia_changed
                .wait_timeout(oia, deadline - now)
                .unwrap();
            oia = guard;
        }

        // Phase 2: wait for the unlock that ends the cycle
        while oia.is_keyboard_locked() {
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::WaitTimeout {
                    what: "keyboard unlock",
                    waited: timeout,
                });
            }
            let (guard, _) = self
                .oia_changed
                .wait_timeout(oia, deadline - now)
                .unwrap();
            oia = guard;
        }
        Ok(())
    }
}

/// A real terminal session backed by an injected transport
pub struct TerminalSession {
    id: String,
    core: SessionCore,
    config: SessionConfig,
    transport: Mutex<Box<dyn SessionTransport>>,
    key_mapper: Box<dyn KeyMapper>,
    renderer: Option<Box<dyn ScreenRenderer>>,
    connected: AtomicBool,
}

impl TerminalSession {
    pub fn new(
        name: impl Into<String>,
        config: SessionConfig,
        transport: Box<dyn SessionTransport>,
    ) -> Self {
        let name = name.into();
        let (rows, cols) = config.screen_size();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            core: SessionCore::new(name, rows, cols),
            config,
            transport: Mutex::new(transport),
            key_mapper: Box::new(DefaultKeyMapper),
            renderer: None,
            connected: AtomicBool::new(false),
        }
    }

    /// Replace the default mnemonic table
    pub fn with_key_mapper(mut self, mapper: Box<dyn KeyMapper>) -> Self {
        self.key_mapper = mapper;
        self
    }

    /// Attach a renderer so capture_screenshot() produces output
    pub fn with_renderer(mut self, renderer: Box<dyn ScreenRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Unique session id (uuid v4)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn send_bytes(&self, data: &[u8]) -> Result<(), SessionError> {
        self.transport
            .lock()
            .unwrap()
            .send(data)
            .map_err(|err| SessionError::SendFailed {
                session: self.core.name.clone(),
                reason: err.to_string(),
            })
    }
}

impl HeadlessSession for TerminalSession {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<(), SessionError> {
        if self.is_connected() {
            return Ok(());
        }
        self.transport
            .lock()
            .unwrap()
            .open()
            .map_err(|err| SessionError::ConnectFailed {
                session: self.core.name.clone(),
                reason: err.to_string(),
            })?;
        self.connected.store(true, Ordering::SeqCst);
        self.core.fire(SessionEvent::Connected);
        Ok(())
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.transport.lock().unwrap().close();
        self.core.fire(SessionEvent::Disconnected);
    }

    fn send_keys(&self, keys: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected {
                session: self.core.name.clone(),
            });
        }
        for token in tokenize_keys(keys) {
            match token {
                KeyToken::Text(text) => self.send_bytes(text.as_bytes())?,
                KeyToken::Mnemonic(name) => {
                    let key = self.key_mapper.map(&name).ok_or_else(|| {
                        SessionError::UnknownMnemonic { mnemonic: name.clone() }
                    })?;
                    if let Some(aid) = key.aid_code() {
                        self.send_bytes(&[aid])?;
                    }
                }
            }
        }
        Ok(())
    }

    fn wait_for_keyboard_unlock(&self, timeout: Duration) -> Result<(), SessionError> {
        self.core.wait_for_unlock(timeout)
    }

    fn wait_for_keyboard_lock_cycle(&self, timeout: Duration) -> Result<(), SessionError> {
        self.core.wait_for_lock_cycle(timeout)
    }

    fn screen(&self) -> MutexGuard<'_, ScreenBuffer> {
        self.core.screen.lock().unwrap()
    }

    fn oia(&self) -> MutexGuard<'_, OperatorStatus> {
        self.core.oia.lock().unwrap()
    }

    fn capture_screenshot(&self) -> Option<Vec<u8>> {
        let renderer = self.renderer.as_ref()?;
        let screen = self.screen();
        Some(renderer.render(&screen))
    }

    fn apply_update(&self, update: &ProtocolUpdate) -> Result<(), SessionError> {
        self.core.apply(update)
    }

    fn add_session_listener(&self, listener: Arc<dyn SessionListener>) -> SessionListenerId {
        self.core.add_listener(listener)
    }

    fn remove_session_listener(&self, id: SessionListenerId) {
        self.core.remove_listener(id)
    }
}

/// In-memory session for harnesses and pool tests: no transport, keystrokes
/// accumulate locally, connect/disconnect just toggle state
pub struct StubSession {
    core: SessionCore,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl StubSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: SessionCore::new(name.into(), 24, 80),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every keystroke string passed to send_keys(), in order
    pub fn sent_keys(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Make subsequent connect() calls fail (connection-loss simulation)
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Drop the connection without firing events, as a broken socket would
    pub fn break_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl HeadlessSession for StubSession {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self) -> Result<(), SessionError> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(SessionError::ConnectFailed {
                session: self.core.name.clone(),
                reason: "stub configured to refuse connections".to_string(),
            });
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.core.fire(SessionEvent::Connected);
        }
        Ok(())
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.core.fire(SessionEvent::Disconnected);
        }
    }

    fn send_keys(&self, keys: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected {
                session: self.core.name.clone(),
            });
        }
        self.sent.lock().unwrap().push(keys.to_string());
        Ok(())
    }

    fn wait_for_keyboard_unlock(&self, timeout: Duration) -> Result<(), SessionError> {
        self.core.wait_for_unlock(timeout)
    }

    fn wait_for_keyboard_lock_cycle(&self, timeout: Duration) -> Result<(), SessionError> {
        self.core.wait_for_lock_cycle(timeout)
    }

    fn screen(&self) -> MutexGuard<'_, ScreenBuffer> {
        self.core.screen.lock().unwrap()
    }

    fn oia(&self) -> MutexGuard<'_, OperatorStatus> {
        self.core.oia.lock().unwrap()
    }

    fn apply_update(&self, update: &ProtocolUpdate) -> Result<(), SessionError> {
        self.core.apply(update)
    }

    fn add_session_listener(&self, listener: Arc<dyn SessionListener>) -> SessionListenerId {
        self.core.add_listener(listener)
    }

    fn remove_session_listener(&self, id: SessionListenerId) {
        self.core.remove_listener(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_connect_disconnect() {
        let session = StubSession::new("stub-1");
        assert!(!session.is_connected());
        session.connect().unwrap();
        assert!(session.is_connected());
        session.disconnect();
        session.disconnect(); // idempotent
        assert!(!session.is_connected());
    }

    #[test]
    fn test_send_keys_requires_connection() {
        let session = StubSession::new("stub-2");
        assert!(matches!(
            session.send_keys("hello"),
            Err(SessionError::NotConnected { .. })
        ));
        session.connect().unwrap();
        session.send_keys("hello[enter]").unwrap();
        assert_eq!(session.sent_keys(), vec!["hello[enter]".to_string()]);
    }

    #[test]
    fn test_wait_for_unlock_immediate_when_unlocked() {
        let session = StubSession::new("stub-3");
        session
            .wait_for_keyboard_unlock(Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn test_wait_for_unlock_times_out() {
        let session = StubSession::new("stub-4");
        session.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();
        let result = session.wait_for_keyboard_unlock(Duration::from_millis(50));
        assert!(matches!(result, Err(SessionError::WaitTimeout { .. })));
    }

    #[test]
    fn test_unlock_from_other_thread_releases_waiter() {
        let session = Arc::new(StubSession::new("stub-5"));
        session.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();

        let unlocker = session.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            unlocker.apply_update(&ProtocolUpdate::UnlockKeyboard).unwrap();
        });

        session
            .wait_for_keyboard_unlock(Duration::from_secs(2))
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_lock_cycle_round_trip() {
        let session = Arc::new(StubSession::new("stub-6"));

        let host = session.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            host.apply_update(&ProtocolUpdate::LockKeyboard).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            host.apply_update(&ProtocolUpdate::UnlockKeyboard).unwrap();
        });

        session
            .wait_for_keyboard_lock_cycle(Duration::from_secs(2))
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_screen_changed_event_fires() {
        use std::sync::atomic::AtomicUsize;

        struct Recorder(AtomicUsize);
        impl SessionListener for Recorder {
            fn on_session_event(&self, _name: &str, event: SessionEvent) {
                if event == SessionEvent::ScreenChanged {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let session = StubSession::new("stub-7");
        let recorder = Arc::new(Recorder(AtomicUsize::new(0)));
        let id = session.add_session_listener(recorder.clone());

        session
            .apply_update(&ProtocolUpdate::WriteChar { row: 0, col: 0, ch: 'A', attribute: 0 })
            .unwrap();
        session.remove_session_listener(id);
        session
            .apply_update(&ProtocolUpdate::WriteChar { row: 0, col: 1, ch: 'B', attribute: 0 })
            .unwrap();

        assert_eq!(recorder.0.load(Ordering::SeqCst), 1);
        assert_eq!(session.screen_as_text().lines().next().unwrap().trim_end(), "AB");
    }

    struct RecordingTransport {
        open: bool,
        sent: Vec<u8>,
    }

    impl SessionTransport for Arc<Mutex<RecordingTransport>> {
        fn open(&mut self) -> io::Result<()> {
            self.lock().unwrap().open = true;
            Ok(())
        }

        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            let mut inner = self.lock().unwrap();
            if !inner.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            inner.sent.extend_from_slice(data);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.lock().unwrap().open
        }

        fn close(&mut self) {
            self.lock().unwrap().open = false;
        }
    }

    #[test]
    fn test_terminal_session_forwards_aid_bytes() {
        use crate::keyboard::AID_ENTER;

        let transport = Arc::new(Mutex::new(RecordingTransport { open: false, sent: Vec::new() }));
        let session = TerminalSession::new(
            "term-1",
            SessionConfig::new("TN5250HDefaults.props", "term-1"),
            Box::new(transport.clone()),
        );

        session.connect().unwrap();
        session.send_keys("go[enter]").unwrap();

        let sent = transport.lock().unwrap().sent.clone();
        assert_eq!(sent, vec![b'g', b'o', AID_ENTER]);

        session.disconnect();
        assert!(!transport.lock().unwrap().open);
    }

    #[test]
    fn test_terminal_session_unknown_mnemonic() {
        let transport = Arc::new(Mutex::new(RecordingTransport { open: false, sent: Vec::new() }));
        let session = TerminalSession::new(
            "term-2",
            SessionConfig::new("TN5250HDefaults.props", "term-2"),
            Box::new(transport),
        );
        session.connect().unwrap();
        assert!(matches!(
            session.send_keys("[warp9]"),
            Err(SessionError::UnknownMnemonic { .. })
        ));
    }
}
