/// SCREEN BUFFER: Multi-plane terminal screen state
/// Character, attribute and overlay planes with save/restore and dirty tracking
pub mod screen;

/// OPERATOR STATUS: Operator Information Area state machine
/// Keyboard lock, input inhibit codes, indicators and change notification
pub mod oia;

/// SESSION: Headless terminal sessions
/// Protocol update application, synchronization waits and listener dispatch
pub mod session;

pub mod config;
pub mod error;
pub mod keyboard;
pub mod pool;
pub mod update;

pub use config::{ConfigValue, SessionConfig};
pub use error::{ConfigError, HeadlessError, PoolError, ScreenError, SessionError};
pub use keyboard::{DefaultKeyMapper, KeyMapper, KeyMnemonic, KeyToken};
pub use oia::{InhibitCode, ListenerId, OiaChange, OiaListener, OiaSnapshot, OperatorStatus};
pub use pool::{
    AcquisitionMode, EvictionPolicy, PoolConfig, SessionFactory, SessionPool, ValidationStrategy,
};
pub use screen::{
    Cell, ContentMask, ErrorState, Rect, ResavePolicy, SaveFrame, SaveScope, ScreenBuffer,
};
pub use session::{
    HeadlessSession, ScreenRenderer, SessionEvent, SessionListener, SessionListenerId,
    SessionTransport, StubSession, TerminalSession,
};
pub use update::{apply_update, ProtocolUpdate};
