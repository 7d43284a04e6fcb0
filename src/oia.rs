//! Operator Information Area state machine
//!
//! The OIA is the terminal's status line: keyboard lock, input-inhibit reason
//! and pending check codes, message light, insert mode and the auxiliary
//! flags automation polls (or subscribes to) before sending input. Every
//! observable state change bumps a monotonic level counter and notifies
//! listeners exactly once, synchronously on the mutating thread; a mutation
//! that changes nothing does neither.

use std::sync::Arc;

/// Reason the host currently disallows keyboard input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InhibitCode {
    #[default]
    NotInhibited,
    SystemWait,
    CommCheck,
    ProgCheck,
    MachineCheck,
    Other,
}

/// Change descriptor delivered to OIA listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OiaChange {
    KeyboardLocked,
    InputInhibited,
    MessageLight,
    InsertMode,
    KeysBuffered,
    ScriptActive,
    Owner,
    /// Momentary host-driven bell; not persisted state
    Bell,
    /// Momentary host-driven clear-screen signal; not persisted state
    ClearScreen,
}

/// Copy of the observable OIA fields handed to listeners
#[derive(Debug, Clone, Default)]
pub struct OiaSnapshot {
    pub keyboard_locked: bool,
    pub input_inhibited: bool,
    pub inhibit_code: InhibitCode,
    pub inhibited_text: Option<String>,
    pub message_light: bool,
    pub insert_mode: bool,
    pub keys_buffered: bool,
    pub script_active: bool,
    pub owner: i32,
    pub level: u64,
}

/// Listener for OIA state changes; notified synchronously on the thread that
/// performed the mutation
pub trait OiaListener: Send + Sync {
    fn on_oia_changed(&self, snapshot: &OiaSnapshot, change: OiaChange);
}

/// Handle for removing a previously added listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Operator status for one session
///
/// Initial state: keyboard unlocked, not inhibited, message light off, insert
/// mode off, no buffered keys, script inactive.
#[derive(Default)]
pub struct OperatorStatus {
    keyboard_locked: bool,
    input_inhibited: bool,
    inhibit_code: InhibitCode,
    inhibited_text: Option<String>,
    message_light: bool,
    insert_mode: bool,
    keys_buffered: bool,
    script_active: bool,
    owner: i32,
    comm_check_code: u16,
    machine_check_code: u16,
    level: u64,
    listeners: Vec<(ListenerId, Arc<dyn OiaListener>)>,
    next_listener_id: u64,
}

impl std::fmt::Debug for OperatorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorStatus")
            .field("keyboard_locked", &self.keyboard_locked)
            .field("input_inhibited", &self.input_inhibited)
            .field("inhibit_code", &self.inhibit_code)
            .field("message_light", &self.message_light)
            .field("insert_mode", &self.insert_mode)
            .field("keys_buffered", &self.keys_buffered)
            .field("script_active", &self.script_active)
            .field("owner", &self.owner)
            .field("level", &self.level)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl OperatorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Accessors =====

    pub fn is_keyboard_locked(&self) -> bool {
        self.keyboard_locked
    }

    pub fn is_input_inhibited(&self) -> bool {
        self.input_inhibited
    }

    pub fn inhibit_code(&self) -> InhibitCode {
        self.inhibit_code
    }

    pub fn inhibited_text(&self) -> Option<&str> {
        self.inhibited_text.as_deref()
    }

    pub fn is_message_light_on(&self) -> bool {
        self.message_light
    }

    pub fn is_insert_mode(&self) -> bool {
        self.insert_mode
    }

    pub fn is_keys_buffered(&self) -> bool {
        self.keys_buffered
    }

    pub fn is_script_active(&self) -> bool {
        self.script_active
    }

    pub fn owner(&self) -> i32 {
        self.owner
    }

    pub fn comm_check_code(&self) -> u16 {
        self.comm_check_code
    }

    pub fn machine_check_code(&self) -> u16 {
        self.machine_check_code
    }

    /// Monotonic change counter, incremented exactly once per observable
    /// state change; cheap change detection for pollers
    pub fn level(&self) -> u64 {
        self.level
    }

    pub fn snapshot(&self) -> OiaSnapshot {
        OiaSnapshot {
            keyboard_locked: self.keyboard_locked,
            input_inhibited: self.input_inhibited,
            inhibit_code: self.inhibit_code,
            inhibited_text: self.inhibited_text.clone(),
            message_light: self.message_light,
            insert_mode: self.insert_mode,
            keys_buffered: self.keys_buffered,
            script_active: self.script_active,
            owner: self.owner,
            level: self.level,
        }
    }

    // ===== Transitions =====

    /// Lock the keyboard; no-op when already locked
    pub fn lock_keyboard(&mut self) {
        self.set_keyboard_locked(true);
    }

    /// Unlock the keyboard; no-op when already unlocked
    pub fn unlock_keyboard(&mut self) {
        self.set_keyboard_locked(false);
    }

    pub fn set_keyboard_locked(&mut self, locked: bool) {
        if self.keyboard_locked == locked {
            return;
        }
        self.keyboard_locked = locked;
        self.fire(OiaChange::KeyboardLocked);
    }

    /// Record an input-inhibit condition with an optional check code and
    /// message. CommCheck and MachineCheck store their code for later query.
    pub fn set_input_inhibited(
        &mut self,
        code: InhibitCode,
        what_code: u16,
        message: Option<&str>,
    ) {
        let inhibited = code != InhibitCode::NotInhibited;
        if self.input_inhibited == inhibited
            && self.inhibit_code == code
            && self.inhibited_text.as_deref() == message
        {
            return;
        }
        self.input_inhibited = inhibited;
        self.inhibit_code = code;
        self.inhibited_text = message.map(str::to_owned);
        match code {
            InhibitCode::CommCheck => self.comm_check_code = what_code,
            InhibitCode::MachineCheck => self.machine_check_code = what_code,
            _ => {}
        }
        self.fire(OiaChange::InputInhibited);
    }

    /// Clear the inhibit condition. The inhibit message may have been left by
    /// a different subsystem, so it is only discarded on explicit request.
    pub fn clear_input_inhibited(&mut self, clear_message: bool) {
        if !self.input_inhibited && self.inhibit_code == InhibitCode::NotInhibited {
            if clear_message && self.inhibited_text.is_some() {
                self.inhibited_text = None;
                self.fire(OiaChange::InputInhibited);
            }
            return;
        }
        self.input_inhibited = false;
        self.inhibit_code = InhibitCode::NotInhibited;
        if clear_message {
            self.inhibited_text = None;
        }
        self.fire(OiaChange::InputInhibited);
    }

    pub fn set_message_light(&mut self, on: bool) {
        if self.message_light == on {
            return;
        }
        self.message_light = on;
        self.fire(OiaChange::MessageLight);
    }

    pub fn set_insert_mode(&mut self, on: bool) {
        if self.insert_mode == on {
            return;
        }
        self.insert_mode = on;
        self.fire(OiaChange::InsertMode);
    }

    pub fn set_keys_buffered(&mut self, on: bool) {
        if self.keys_buffered == on {
            return;
        }
        self.keys_buffered = on;
        self.fire(OiaChange::KeysBuffered);
    }

    pub fn set_script_active(&mut self, on: bool) {
        if self.script_active == on {
            return;
        }
        self.script_active = on;
        self.fire(OiaChange::ScriptActive);
    }

    /// Identify which logical sub-session/window owns the status
    pub fn set_owner(&mut self, owner: i32) {
        if self.owner == owner {
            return;
        }
        self.owner = owner;
        self.fire(OiaChange::Owner);
    }

    /// Host rang the audible bell. Momentary: nothing persists, but the
    /// occurrence still bumps the level and reaches listeners.
    pub fn ring_bell(&mut self) {
        self.fire(OiaChange::Bell);
    }

    /// Host cleared the screen. Momentary, like ring_bell().
    pub fn signal_clear_screen(&mut self) {
        self.fire(OiaChange::ClearScreen);
    }

    // ===== Listener registry =====

    pub fn add_listener(&mut self, listener: Arc<dyn OiaListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Removal takes effect before the next notification
    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    fn fire(&mut self, change: OiaChange) {
        self.level += 1;
        if self.listeners.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for (_, listener) in &self.listeners {
            listener.on_oia_changed(&snapshot, change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: AtomicUsize,
    }

    impl OiaListener for CountingListener {
        fn on_oia_changed(&self, _snapshot: &OiaSnapshot, _change: OiaChange) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_initial_state() {
        let oia = OperatorStatus::new();
        assert!(!oia.is_keyboard_locked());
        assert!(!oia.is_input_inhibited());
        assert_eq!(oia.inhibit_code(), InhibitCode::NotInhibited);
        assert!(!oia.is_message_light_on());
        assert!(!oia.is_insert_mode());
        assert_eq!(oia.level(), 0);
    }

    #[test]
    fn test_lock_is_idempotent() {
        let mut oia = OperatorStatus::new();
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0) });
        oia.add_listener(listener.clone());

        oia.lock_keyboard();
        oia.lock_keyboard();
        assert_eq!(oia.level(), 1, "second lock must not bump the level");
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_state_isolation() {
        let mut oia = OperatorStatus::new();
        oia.lock_keyboard();
        oia.set_message_light(true);
        oia.set_insert_mode(true);
        assert!(oia.is_keyboard_locked());
        assert!(oia.is_message_light_on());
        oia.set_insert_mode(false);
        assert!(oia.is_keyboard_locked(), "insert mode must not touch keyboard lock");
        assert!(oia.is_message_light_on(), "insert mode must not touch message light");
        assert_eq!(oia.inhibit_code(), InhibitCode::NotInhibited);
    }

    #[test]
    fn test_inhibit_records_check_code() {
        let mut oia = OperatorStatus::new();
        oia.set_input_inhibited(InhibitCode::CommCheck, 508, Some("COMM 508"));
        assert!(oia.is_input_inhibited());
        assert_eq!(oia.comm_check_code(), 508);
        assert_eq!(oia.inhibited_text(), Some("COMM 508"));
    }

    #[test]
    fn test_clear_inhibited_keeps_message_unless_asked() {
        let mut oia = OperatorStatus::new();
        oia.set_input_inhibited(InhibitCode::SystemWait, 0, Some("X SYSTEM"));
        oia.clear_input_inhibited(false);
        assert!(!oia.is_input_inhibited());
        assert_eq!(oia.inhibited_text(), Some("X SYSTEM"));
        oia.clear_input_inhibited(true);
        assert_eq!(oia.inhibited_text(), None);
    }

    #[test]
    fn test_bell_is_momentary_but_observable() {
        let mut oia = OperatorStatus::new();
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0) });
        oia.add_listener(listener.clone());
        let before = oia.level();
        oia.ring_bell();
        oia.ring_bell();
        assert_eq!(oia.level(), before + 2);
        assert_eq!(listener.count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_removed_listener_not_notified() {
        let mut oia = OperatorStatus::new();
        let listener = Arc::new(CountingListener { count: AtomicUsize::new(0) });
        let id = oia.add_listener(listener.clone());
        oia.lock_keyboard();
        oia.remove_listener(id);
        oia.unlock_keyboard();
        assert_eq!(listener.count.load(Ordering::SeqCst), 1);
    }
}
