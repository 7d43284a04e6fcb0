//! Decoded protocol updates
//!
//! The transport/codec collaborator parses 5250 wire data elsewhere and
//! delivers the result here as ProtocolUpdate values: cell writes, cursor
//! moves, save/restore commands and operator-status changes. This keeps the
//! core free of wire parsing while giving the transport one narrow "apply
//! incoming update" interface onto the screen and OIA.

use crate::error::ScreenError;
use crate::oia::{InhibitCode, OperatorStatus};
use crate::screen::{ContentMask, ErrorState, SaveScope, ScreenBuffer};

/// One decoded host-to-terminal event
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolUpdate {
    /// Displayable character write
    WriteChar { row: usize, col: usize, ch: char, attribute: u8 },
    /// A field-attribute byte occupies the cell
    WriteFieldAttribute { row: usize, col: usize, attribute: u8 },
    /// GUI-rendering hint (window borders, line drawing)
    SetOverlay { row: usize, col: usize, overlay: u8 },
    /// SBA/IC cursor positioning
    MoveCursor { row: usize, col: usize },
    /// Clear Unit
    ClearScreen,
    /// Save Screen / Save Partial Screen command
    SaveScreen { scope: SaveScope, mask: ContentMask },
    /// Restore Screen / Restore Partial Screen command
    RestoreScreen { scope: SaveScope },
    /// Write Error Code state transitions
    SetErrorState(ErrorState),
    LockKeyboard,
    UnlockKeyboard,
    SetInputInhibited { code: InhibitCode, what_code: u16, message: Option<String> },
    ClearInputInhibited { clear_message: bool },
    SetMessageLight(bool),
    SetInsertMode(bool),
    Bell,
}

/// Apply one decoded update to the screen/OIA pair.
///
/// Bounds and stack errors propagate; a RestoreScreen with nothing saved is
/// a no-op, matching the buffer's restore contract.
pub fn apply_update(
    screen: &mut ScreenBuffer,
    oia: &mut OperatorStatus,
    update: &ProtocolUpdate,
) -> Result<(), ScreenError> {
    match update {
        ProtocolUpdate::WriteChar { row, col, ch, attribute } => {
            screen.write(*row, *col, *ch, *attribute, false)?;
        }
        ProtocolUpdate::WriteFieldAttribute { row, col, attribute } => {
            screen.write(*row, *col, ' ', *attribute, true)?;
        }
        ProtocolUpdate::SetOverlay { row, col, overlay } => {
            screen.set_overlay(*row, *col, *overlay)?;
        }
        ProtocolUpdate::MoveCursor { row, col } => {
            screen.set_cursor(*row, *col)?;
        }
        ProtocolUpdate::ClearScreen => {
            screen.clear();
            oia.signal_clear_screen();
        }
        ProtocolUpdate::SaveScreen { scope, mask } => {
            screen.save(*scope, *mask)?;
        }
        ProtocolUpdate::RestoreScreen { scope } => {
            screen.restore(*scope);
        }
        ProtocolUpdate::SetErrorState(state) => {
            screen.set_error_state(*state);
        }
        ProtocolUpdate::LockKeyboard => {
            oia.lock_keyboard();
        }
        ProtocolUpdate::UnlockKeyboard => {
            oia.unlock_keyboard();
        }
        ProtocolUpdate::SetInputInhibited { code, what_code, message } => {
            oia.set_input_inhibited(*code, *what_code, message.as_deref());
        }
        ProtocolUpdate::ClearInputInhibited { clear_message } => {
            oia.clear_input_inhibited(*clear_message);
        }
        ProtocolUpdate::SetMessageLight(on) => {
            oia.set_message_light(*on);
        }
        ProtocolUpdate::SetInsertMode(on) => {
            oia.set_insert_mode(*on);
        }
        ProtocolUpdate::Bell => {
            oia.ring_bell();
        }
    }
    Ok(())
}
