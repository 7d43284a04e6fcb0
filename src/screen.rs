//! Screen buffer for the 5250 protocol
//!
//! This module owns the in-memory representation of one terminal screen: four
//! parallel planes (text, attributes, field-attribute markers, GUI overlay
//! hints), a cursor, per-scope save/restore stacks used for transient
//! overlays such as the error line, and a dirty-region accumulator consumed
//! by the rendering collaborator.

use std::collections::HashMap;
use std::fmt;

use crate::error::ScreenError;

// Standard IBM 5250 screen geometries
pub const TERMINAL_ROWS: usize = 24;
pub const TERMINAL_COLS: usize = 80;
pub const WIDE_TERMINAL_ROWS: usize = 27;
pub const WIDE_TERMINAL_COLS: usize = 132;

/// Default maximum save-stack depth per scope class
pub const DEFAULT_SAVE_DEPTH: usize = 16;

/// A rectangular cell region, inclusive on both corners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Rect {
    pub fn cell(row: usize, col: usize) -> Self {
        Self { top: row, left: col, bottom: row, right: col }
    }

    pub fn rows(first: usize, last: usize, cols: usize) -> Self {
        Self { top: first, left: 0, bottom: last, right: cols.saturating_sub(1) }
    }

    /// Minimal bounding rectangle covering both rects
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }
}

/// Region selector for save/restore operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveScope {
    /// The whole screen
    Full,
    /// An inclusive row range (all columns)
    Rows { first: usize, last: usize },
    /// The error line (bottom row), used for transient error overlays
    ErrorLine,
}

/// Stack key for a scope. Row-range saves share one stack regardless of the
/// exact range; each frame remembers its own region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ScopeClass {
    Full,
    Rows,
    ErrorLine,
}

impl SaveScope {
    fn class(&self) -> ScopeClass {
        match self {
            SaveScope::Full => ScopeClass::Full,
            SaveScope::Rows { .. } => ScopeClass::Rows,
            SaveScope::ErrorLine => ScopeClass::ErrorLine,
        }
    }
}

/// Which planes a save captures (and a restore puts back)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMask {
    /// Text plane only
    Text,
    /// Attribute plane only
    Attributes,
    /// Field-attribute marker plane only
    Fields,
    /// All four planes
    All,
}

impl ContentMask {
    fn text(&self) -> bool {
        matches!(self, ContentMask::Text | ContentMask::All)
    }

    fn attributes(&self) -> bool {
        matches!(self, ContentMask::Attributes | ContentMask::All)
    }

    fn fields(&self) -> bool {
        matches!(self, ContentMask::Fields | ContentMask::All)
    }

    fn overlay(&self) -> bool {
        matches!(self, ContentMask::All)
    }
}

/// Error-line state tag carried with every save frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorState {
    #[default]
    None,
    Pending,
    Cleared,
}

/// What a save into an already-occupied scope does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResavePolicy {
    /// Push another frame (LIFO); the default
    #[default]
    Stack,
    /// Fail with SaveOutstanding while a frame for the scope exists
    Reject,
}

/// One cell read out of the buffer: all four planes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attribute: u8,
    pub is_attr_marker: bool,
    pub overlay: u8,
}

/// Immutable snapshot of a region, produced by save() and consumed by
/// restore(). Unselected planes are left empty.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveFrame {
    scope: SaveScope,
    region: Rect,
    mask: ContentMask,
    text: Vec<char>,
    attributes: Vec<u8>,
    attr_markers: Vec<bool>,
    overlay: Vec<u8>,
    error_state: ErrorState,
}

impl SaveFrame {
    pub fn scope(&self) -> SaveScope {
        self.scope
    }

    pub fn region(&self) -> Rect {
        self.region
    }

    pub fn mask(&self) -> ContentMask {
        self.mask
    }

    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }
}

/// The character/attribute buffer for one terminal screen
///
/// All four planes always hold exactly rows*cols entries; every mutation is
/// bounds-checked and out-of-range coordinates are rejected, never clamped.
#[derive(Debug)]
pub struct ScreenBuffer {
    rows: usize,
    cols: usize,
    text: Vec<char>,
    attributes: Vec<u8>,
    attr_markers: Vec<bool>,
    overlay: Vec<u8>,
    cursor_row: usize,
    cursor_col: usize,
    error_state: ErrorState,
    dirty: Option<Rect>,
    save_stacks: HashMap<ScopeClass, Vec<SaveFrame>>,
    max_save_depth: usize,
    resave_policy: ResavePolicy,
}

impl ScreenBuffer {
    /// Create a buffer with the given geometry and default save limits.
    /// Panics when either dimension is zero, like with_save_limits().
    pub fn new(rows: usize, cols: usize) -> Self {
        Self::with_save_limits(rows, cols, DEFAULT_SAVE_DEPTH, ResavePolicy::Stack)
    }

    /// Create a buffer with explicit save-stack depth and re-save policy
    ///
    /// # Panics
    ///
    /// Panics when either dimension is zero; a screen always has at least
    /// one cell.
    pub fn with_save_limits(
        rows: usize,
        cols: usize,
        max_save_depth: usize,
        resave_policy: ResavePolicy,
    ) -> Self {
        assert!(rows > 0 && cols > 0, "screen dimensions must be non-zero, got {rows}x{cols}");
        let len = rows * cols;
        Self {
            rows,
            cols,
            text: vec![' '; len],
            attributes: vec![0; len],
            attr_markers: vec![false; len],
            overlay: vec![0; len],
            cursor_row: 0,
            cursor_col: 0,
            error_state: ErrorState::None,
            dirty: None,
            save_stacks: HashMap::new(),
            max_save_depth,
            resave_policy,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn index(&self, row: usize, col: usize) -> Result<usize, ScreenError> {
        if row >= self.rows || col >= self.cols {
            return Err(ScreenError::Bounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    /// Write a cell: text, attribute and field-attribute marker planes.
    /// The overlay plane is untouched; see set_overlay().
    pub fn write(
        &mut self,
        row: usize,
        col: usize,
        ch: char,
        attribute: u8,
        is_attr_marker: bool,
    ) -> Result<(), ScreenError> {
        let idx = self.index(row, col)?;
        self.text[idx] = ch;
        self.attributes[idx] = attribute;
        self.attr_markers[idx] = is_attr_marker;
        self.extend_dirty(Rect::cell(row, col));
        Ok(())
    }

    /// Read all four planes at one cell
    pub fn read(&self, row: usize, col: usize) -> Result<Cell, ScreenError> {
        let idx = self.index(row, col)?;
        Ok(Cell {
            ch: self.text[idx],
            attribute: self.attributes[idx],
            is_attr_marker: self.attr_markers[idx],
            overlay: self.overlay[idx],
        })
    }

    /// Set the GUI-rendering hint plane at one cell
    pub fn set_overlay(&mut self, row: usize, col: usize, overlay: u8) -> Result<(), ScreenError> {
        let idx = self.index(row, col)?;
        self.overlay[idx] = overlay;
        self.extend_dirty(Rect::cell(row, col));
        Ok(())
    }

    /// Clear the whole screen to blanks and home the cursor
    /// (Clear Unit in protocol terms)
    pub fn clear(&mut self) {
        self.text.fill(' ');
        self.attributes.fill(0);
        self.attr_markers.fill(false);
        self.overlay.fill(0);
        self.cursor_row = 0;
        self.cursor_col = 0;
        self.extend_dirty(Rect::rows(0, self.rows - 1, self.cols));
    }

    pub fn set_cursor(&mut self, row: usize, col: usize) -> Result<(), ScreenError> {
        self.index(row, col)?;
        self.cursor_row = row;
        self.cursor_col = col;
        Ok(())
    }

    /// Current cursor position (row, col), 0-based
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    pub fn set_error_state(&mut self, state: ErrorState) {
        self.error_state = state;
    }

    /// Text of one row as a string
    pub fn row_text(&self, row: usize) -> Result<String, ScreenError> {
        let start = self.index(row, 0)?;
        Ok(self.text[start..start + self.cols].iter().collect())
    }

    // ===== Save/restore stacks =====

    fn region_of(&self, scope: SaveScope) -> Result<Rect, ScreenError> {
        match scope {
            SaveScope::Full => Ok(Rect::rows(0, self.rows - 1, self.cols)),
            SaveScope::Rows { first, last } => {
                if first > last || last >= self.rows {
                    return Err(ScreenError::InvalidRegion {
                        description: format!(
                            "row range {first}..={last} outside 0..={}",
                            self.rows - 1
                        ),
                    });
                }
                Ok(Rect::rows(first, last, self.cols))
            }
            SaveScope::ErrorLine => Ok(Rect::rows(self.rows - 1, self.rows - 1, self.cols)),
        }
    }

    /// Snapshot a region onto the save stack for its scope class.
    ///
    /// Fails with StackOverflow at the configured depth and, under
    /// ResavePolicy::Reject, with SaveOutstanding when a frame for the scope
    /// is already outstanding. Never evicts silently.
    pub fn save(&mut self, scope: SaveScope, mask: ContentMask) -> Result<&SaveFrame, ScreenError> {
        let region = self.region_of(scope)?;
        let stack = self.save_stacks.entry(scope.class()).or_default();
        if self.resave_policy == ResavePolicy::Reject && !stack.is_empty() {
            return Err(ScreenError::SaveOutstanding { scope });
        }
        if stack.len() >= self.max_save_depth {
            return Err(ScreenError::StackOverflow {
                scope,
                max_depth: self.max_save_depth,
            });
        }

        let mut frame = SaveFrame {
            scope,
            region,
            mask,
            text: Vec::new(),
            attributes: Vec::new(),
            attr_markers: Vec::new(),
            overlay: Vec::new(),
            error_state: self.error_state,
        };
        for row in region.top..=region.bottom {
            let start = row * self.cols + region.left;
            let end = row * self.cols + region.right + 1;
            if mask.text() {
                frame.text.extend_from_slice(&self.text[start..end]);
            }
            if mask.attributes() {
                frame.attributes.extend_from_slice(&self.attributes[start..end]);
            }
            if mask.fields() {
                frame.attr_markers.extend_from_slice(&self.attr_markers[start..end]);
            }
            if mask.overlay() {
                frame.overlay.extend_from_slice(&self.overlay[start..end]);
            }
        }

        let stack = self.save_stacks.get_mut(&scope.class()).unwrap();
        stack.push(frame);
        Ok(stack.last().unwrap())
    }

    /// Pop and apply the most recent frame for the scope class.
    ///
    /// Restoring with nothing saved is a no-op returning None; it never
    /// mutates the buffer.
    pub fn restore(&mut self, scope: SaveScope) -> Option<SaveFrame> {
        let frame = self.save_stacks.get_mut(&scope.class())?.pop()?;
        let region = frame.region;
        let width = region.right - region.left + 1;
        for (i, row) in (region.top..=region.bottom).enumerate() {
            let src = i * width;
            let dst = row * self.cols + region.left;
            if frame.mask.text() {
                self.text[dst..dst + width].copy_from_slice(&frame.text[src..src + width]);
            }
            if frame.mask.attributes() {
                self.attributes[dst..dst + width]
                    .copy_from_slice(&frame.attributes[src..src + width]);
            }
            if frame.mask.fields() {
                self.attr_markers[dst..dst + width]
                    .copy_from_slice(&frame.attr_markers[src..src + width]);
            }
            if frame.mask.overlay() {
                self.overlay[dst..dst + width].copy_from_slice(&frame.overlay[src..src + width]);
            }
        }
        self.error_state = frame.error_state;
        self.extend_dirty(region);
        Some(frame)
    }

    /// Whether any frame for the scope is outstanding
    pub fn is_saved(&self, scope: SaveScope) -> bool {
        self.saved_depth(scope) > 0
    }

    /// Number of outstanding frames for the scope class
    pub fn saved_depth(&self, scope: SaveScope) -> usize {
        self.save_stacks
            .get(&scope.class())
            .map(|s| s.len())
            .unwrap_or(0)
    }

    // ===== Dirty region accumulation =====

    fn extend_dirty(&mut self, rect: Rect) {
        self.dirty = Some(match self.dirty {
            Some(existing) => existing.union(&rect),
            None => rect,
        });
    }

    /// Mark a region dirty; accumulated as the minimal bounding rectangle
    pub fn mark_dirty(&mut self, rect: Rect) -> Result<(), ScreenError> {
        if rect.top > rect.bottom || rect.left > rect.right
            || rect.bottom >= self.rows || rect.right >= self.cols
        {
            return Err(ScreenError::InvalidRegion {
                description: format!("dirty rect {rect:?} outside {}x{}", self.rows, self.cols),
            });
        }
        self.extend_dirty(rect);
        Ok(())
    }

    /// Take the accumulated dirty rect; None when nothing changed since the
    /// last clear
    pub fn clear_dirty(&mut self) -> Option<Rect> {
        self.dirty.take()
    }

    /// Peek at the dirty rect without clearing it
    pub fn dirty_region(&self) -> Option<Rect> {
        self.dirty
    }
}

impl fmt::Display for ScreenBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            let start = row * self.cols;
            for ch in &self.text[start..start + self.cols] {
                write!(f, "{ch}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_blank() {
        let buf = ScreenBuffer::new(TERMINAL_ROWS, TERMINAL_COLS);
        let cell = buf.read(0, 0).unwrap();
        assert_eq!(cell.ch, ' ');
        assert_eq!(cell.attribute, 0);
        assert!(!cell.is_attr_marker);
        assert_eq!(buf.cursor(), (0, 0));
    }

    #[test]
    #[should_panic(expected = "screen dimensions must be non-zero")]
    fn test_zero_rows_rejected() {
        let _ = ScreenBuffer::new(0, 80);
    }

    #[test]
    #[should_panic(expected = "screen dimensions must be non-zero")]
    fn test_zero_cols_rejected() {
        let _ = ScreenBuffer::new(24, 0);
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut buf = ScreenBuffer::new(24, 80);
        buf.write(5, 10, 'X', 0x22, false).unwrap();
        let cell = buf.read(5, 10).unwrap();
        assert_eq!(cell.ch, 'X');
        assert_eq!(cell.attribute, 0x22);
    }

    #[test]
    fn test_out_of_range_is_rejected_not_clamped() {
        let mut buf = ScreenBuffer::new(24, 80);
        assert!(matches!(
            buf.write(24, 0, 'A', 0, false),
            Err(ScreenError::Bounds { row: 24, .. })
        ));
        assert!(matches!(
            buf.read(0, 80),
            Err(ScreenError::Bounds { col: 80, .. })
        ));
        // Nothing was written anywhere
        assert!(buf.clear_dirty().is_none());
    }

    #[test]
    fn test_save_restore_error_line() {
        let mut buf = ScreenBuffer::new(24, 80);
        buf.write(23, 0, 'E', 0x21, false).unwrap();
        buf.save(SaveScope::ErrorLine, ContentMask::All).unwrap();
        buf.write(23, 0, 'Z', 0, false).unwrap();

        assert!(buf.is_saved(SaveScope::ErrorLine));
        let frame = buf.restore(SaveScope::ErrorLine).unwrap();
        assert_eq!(frame.scope(), SaveScope::ErrorLine);
        assert_eq!(buf.read(23, 0).unwrap().ch, 'E');
        assert!(!buf.is_saved(SaveScope::ErrorLine));
    }

    #[test]
    fn test_restore_empty_stack_is_noop() {
        let mut buf = ScreenBuffer::new(24, 80);
        buf.write(0, 0, 'A', 0, false).unwrap();
        assert!(buf.restore(SaveScope::Full).is_none());
        assert_eq!(buf.read(0, 0).unwrap().ch, 'A');
    }

    #[test]
    fn test_stack_overflow_rejected() {
        let mut buf = ScreenBuffer::with_save_limits(24, 80, 2, ResavePolicy::Stack);
        buf.save(SaveScope::ErrorLine, ContentMask::Text).unwrap();
        buf.save(SaveScope::ErrorLine, ContentMask::Text).unwrap();
        assert!(matches!(
            buf.save(SaveScope::ErrorLine, ContentMask::Text),
            Err(ScreenError::StackOverflow { max_depth: 2, .. })
        ));
        assert_eq!(buf.saved_depth(SaveScope::ErrorLine), 2);
    }

    #[test]
    fn test_reject_policy_refuses_resave() {
        let mut buf = ScreenBuffer::with_save_limits(24, 80, 8, ResavePolicy::Reject);
        buf.write(23, 0, '1', 0, false).unwrap();
        buf.save(SaveScope::ErrorLine, ContentMask::Text).unwrap();
        buf.write(23, 0, '2', 0, false).unwrap();
        assert!(matches!(
            buf.save(SaveScope::ErrorLine, ContentMask::Text),
            Err(ScreenError::SaveOutstanding { .. })
        ));
        // First save wins on restore
        buf.restore(SaveScope::ErrorLine).unwrap();
        assert_eq!(buf.read(23, 0).unwrap().ch, '1');
    }

    #[test]
    fn test_dirty_union() {
        let mut buf = ScreenBuffer::new(24, 80);
        assert!(buf.clear_dirty().is_none());
        buf.write(2, 10, 'a', 0, false).unwrap();
        buf.write(8, 4, 'b', 0, false).unwrap();
        let dirty = buf.clear_dirty().unwrap();
        assert_eq!(dirty, Rect { top: 2, left: 4, bottom: 8, right: 10 });
        assert!(buf.clear_dirty().is_none());
    }

    #[test]
    fn test_row_range_scope_validation() {
        let mut buf = ScreenBuffer::new(24, 80);
        assert!(matches!(
            buf.save(SaveScope::Rows { first: 10, last: 5 }, ContentMask::All),
            Err(ScreenError::InvalidRegion { .. })
        ));
        assert!(matches!(
            buf.save(SaveScope::Rows { first: 0, last: 24 }, ContentMask::All),
            Err(ScreenError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_mask_limits_restore_planes() {
        let mut buf = ScreenBuffer::new(24, 80);
        buf.write(0, 0, 'T', 0x20, false).unwrap();
        buf.save(SaveScope::Rows { first: 0, last: 0 }, ContentMask::Text).unwrap();
        buf.write(0, 0, 'X', 0x3A, true).unwrap();
        buf.restore(SaveScope::Rows { first: 0, last: 0 }).unwrap();
        let cell = buf.read(0, 0).unwrap();
        // Text came back, attribute and marker planes kept the newer values
        assert_eq!(cell.ch, 'T');
        assert_eq!(cell.attribute, 0x3A);
        assert!(cell.is_attr_marker);
    }

    #[test]
    fn test_error_state_travels_with_frame() {
        let mut buf = ScreenBuffer::new(24, 80);
        buf.set_error_state(ErrorState::Pending);
        buf.save(SaveScope::ErrorLine, ContentMask::All).unwrap();
        buf.set_error_state(ErrorState::Cleared);
        buf.restore(SaveScope::ErrorLine).unwrap();
        assert_eq!(buf.error_state(), ErrorState::Pending);
    }
}
