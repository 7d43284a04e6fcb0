//! Error types for the headless 5250 session core
//!
//! This module provides structured error types for screen buffer operations,
//! pool configuration and acquisition, and session-level failures. Bounds and
//! configuration errors are programmer errors and fail fast; pool exhaustion
//! and factory errors are surfaced so the caller can make its own
//! retry/backoff decision.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use crate::screen::SaveScope;

/// Top-level error type for tn5250h operations
#[derive(Debug)]
pub enum HeadlessError {
    /// Screen buffer errors (bounds, save stack)
    Screen(ScreenError),
    /// Pool configuration errors
    Config(ConfigError),
    /// Pool acquisition and lifecycle errors
    Pool(PoolError),
    /// Session-level errors
    Session(SessionError),
}

/// Screen buffer related errors
#[derive(Debug)]
pub enum ScreenError {
    /// Cell coordinates outside the buffer; never clamped
    Bounds { row: usize, col: usize, rows: usize, cols: usize },
    /// Save requested beyond the configured stack depth for a scope
    StackOverflow { scope: SaveScope, max_depth: usize },
    /// Re-save rejected while a frame for the scope is outstanding
    /// (only under ResavePolicy::Reject)
    SaveOutstanding { scope: SaveScope },
    /// Malformed region (inverted row range, region outside the buffer)
    InvalidRegion { description: String },
}

/// Pool configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// minIdle exceeds maxSize on a bounded pool
    MinIdleExceedsMax { min_idle: usize, max_size: usize },
    /// A required duration was zero
    ZeroDuration { parameter: &'static str },
}

/// Pool acquisition and lifecycle errors
#[derive(Debug)]
pub enum PoolError {
    /// No session available under the active acquisition policy; also raised
    /// for borrows that were blocked when the pool shut down
    Exhausted { reason: String },
    /// The injected session factory failed; pool bookkeeping stays consistent
    Factory(anyhow::Error),
    /// Pool used before configure()
    NotConfigured,
}

/// Session-level errors
#[derive(Debug)]
pub enum SessionError {
    /// Operation requires a connected session
    NotConnected { session: String },
    /// Transport failed to open
    ConnectFailed { session: String, reason: String },
    /// wait_for_keyboard_unlock / wait_for_keyboard_lock_cycle timed out
    WaitTimeout { what: &'static str, waited: Duration },
    /// Transport refused or dropped the keystroke payload
    SendFailed { session: String, reason: String },
    /// A decoded protocol update could not be applied to the screen
    UpdateRejected { session: String, reason: String },
    /// Unknown key mnemonic in a send_keys string
    UnknownMnemonic { mnemonic: String },
}

impl fmt::Display for HeadlessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadlessError::Screen(err) => write!(f, "Screen error: {err}"),
            HeadlessError::Config(err) => write!(f, "Configuration error: {err}"),
            HeadlessError::Pool(err) => write!(f, "Pool error: {err}"),
            HeadlessError::Session(err) => write!(f, "Session error: {err}"),
        }
    }
}

impl fmt::Display for ScreenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenError::Bounds { row, col, rows, cols } =>
                write!(f, "Cell ({row}, {col}) outside {rows}x{cols} buffer"),
            ScreenError::StackOverflow { scope, max_depth } =>
                write!(f, "Save stack for {scope:?} is at its maximum depth of {max_depth}"),
            ScreenError::SaveOutstanding { scope } =>
                write!(f, "A save for {scope:?} is already outstanding and re-save is configured to reject"),
            ScreenError::InvalidRegion { description } =>
                write!(f, "Invalid screen region: {description}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MinIdleExceedsMax { min_idle, max_size } =>
                write!(f, "min_idle {min_idle} exceeds max_size {max_size}"),
            ConfigError::ZeroDuration { parameter } =>
                write!(f, "Duration parameter '{parameter}' must be non-zero"),
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted { reason } =>
                write!(f, "Pool exhausted: {reason}"),
            PoolError::Factory(err) =>
                write!(f, "Session factory failed: {err}"),
            PoolError::NotConfigured =>
                write!(f, "Pool is not configured - call configure() before borrowing"),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotConnected { session } =>
                write!(f, "Session '{session}' is not connected"),
            SessionError::ConnectFailed { session, reason } =>
                write!(f, "Session '{session}' failed to connect: {reason}"),
            SessionError::WaitTimeout { what, waited } =>
                write!(f, "Timed out waiting for {what} after {}ms", waited.as_millis()),
            SessionError::SendFailed { session, reason } =>
                write!(f, "Failed to send keys on session '{session}': {reason}"),
            SessionError::UpdateRejected { session, reason } =>
                write!(f, "Update rejected on session '{session}': {reason}"),
            SessionError::UnknownMnemonic { mnemonic } =>
                write!(f, "Unknown key mnemonic: [{mnemonic}]"),
        }
    }
}

impl StdError for HeadlessError {}
impl StdError for ScreenError {}
impl StdError for ConfigError {}
impl StdError for PoolError {}
impl StdError for SessionError {}

impl From<ScreenError> for HeadlessError {
    fn from(err: ScreenError) -> Self {
        HeadlessError::Screen(err)
    }
}

impl From<ConfigError> for HeadlessError {
    fn from(err: ConfigError) -> Self {
        HeadlessError::Config(err)
    }
}

impl From<PoolError> for HeadlessError {
    fn from(err: PoolError) -> Self {
        HeadlessError::Pool(err)
    }
}

impl From<SessionError> for HeadlessError {
    fn from(err: SessionError) -> Self {
        HeadlessError::Session(err)
    }
}
