//! Character display

use rexlink_core::{
    constants::{display_move, DISPLAY_BUS_WIDTH},
    Command,
};
use rexlink_types::{text, CursorMode, EntryMode, OutputKind, ShiftTarget};

use crate::error::Result;
use crate::io::DigitalOutput;
use crate::sink::{words, SinkRef};

/// Character display of the device
///
/// Present only when the features response reports one. Text is sent as
/// single-byte ASCII; characters outside ASCII become `?`.
#[derive(Debug, Clone)]
pub struct Display {
    sink: SinkRef,
    backlight: DigitalOutput,
}

impl Display {
    pub(crate) fn new(sink: SinkRef) -> Self {
        Self {
            backlight: DigitalOutput::new(OutputKind::DisplayBacklight, 0, sink.clone()),
            sink,
        }
    }

    /// Backlight output of the display
    pub fn backlight(&self) -> &DigitalOutput {
        &self.backlight
    }

    /// Initialize the controller for a `width` x `height` character grid
    pub async fn initialize(&self, width: u32, height: u32, font_5x10: bool) -> Result<()> {
        let payload = words(&[width, height, DISPLAY_BUS_WIDTH, u32::from(font_5x10)], &[]);
        self.sink.send(Command::DisplayInitialize, payload).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.sink.send(Command::DisplayClear, words(&[], &[])).await
    }

    pub async fn set_entry_mode(&self, mode: EntryMode) -> Result<()> {
        self.sink
            .send(Command::DisplaySetEntryMode, words(&[mode.wire_value()], &[]))
            .await
    }

    pub async fn set_cursor(&self, mode: CursorMode) -> Result<()> {
        self.sink
            .send(Command::DisplaySetCursor, words(&[mode.bits()], &[]))
            .await
    }

    /// Write at the current cursor position
    pub async fn write(&self, text: &str) -> Result<()> {
        self.write_at(text, -1, -1).await
    }

    /// Write starting at `row`, `col`; `-1` keeps the current coordinate
    pub async fn write_at(&self, text: &str, row: i32, col: i32) -> Result<()> {
        let payload = words(&[row as u32, col as u32, 0], &text::encode(text));
        self.sink.send(Command::DisplayWrite, payload).await
    }

    /// Shift the cursor or the whole message
    ///
    /// Positive offsets move right, negative ones left.
    pub async fn shift(&self, target: ShiftTarget, offset: i32) -> Result<()> {
        let code = match (target, offset < 0) {
            (ShiftTarget::Cursor, true) => display_move::CURSOR_LEFT,
            (ShiftTarget::Cursor, false) => display_move::CURSOR_RIGHT,
            (ShiftTarget::Message, true) => display_move::MESSAGE_LEFT,
            (ShiftTarget::Message, false) => display_move::MESSAGE_RIGHT,
        };
        let payload = words(&[code, offset.unsigned_abs()], &[]);
        self.sink.send(Command::DisplayMove, payload).await
    }
}
