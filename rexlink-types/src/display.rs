//! Character display parameters

use bitflags::bitflags;

bitflags! {
    /// Display/cursor visibility sent with `DisplaySetCursor`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CursorMode: u32 {
        const DISPLAY_ON = 0b100;
        const CURSOR_ON = 0b010;
        const BLINKING = 0b001;
    }
}

impl Default for CursorMode {
    fn default() -> Self {
        Self::DISPLAY_ON
    }
}

bitflags! {
    /// Entry mode sent with `DisplaySetEntryMode`
    ///
    /// Empty means the cursor advances to the left and the text stays put.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryMode: u32 {
        /// Shift the whole message instead of the cursor
        const MOVE_MESSAGE = 0b01;
        const TO_RIGHT = 0b10;
    }
}

impl EntryMode {
    /// Wire value; bit 2 is always set
    pub fn wire_value(self) -> u32 {
        0b100 | self.bits()
    }
}

/// What a display shift moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftTarget {
    Cursor,
    Message,
}
