//! Digital inputs and outputs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rexlink_core::Command;
use rexlink_types::OutputKind;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::sink::{words, SinkRef};

const CHANGE_CAPACITY: usize = 64;

/// A digital input of the device
///
/// Updated only by the session's receive loop. Every reported value fires
/// a notification, even when it equals the previous one.
pub struct DigitalInput {
    index: usize,
    value: AtomicBool,
    changes: broadcast::Sender<bool>,
}

impl DigitalInput {
    pub(crate) fn new(index: usize) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            index,
            value: AtomicBool::new(false),
            changes,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Last value reported by the device (false until the first report)
    pub fn value(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    /// Subscribe to value reports
    pub fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.changes.subscribe()
    }

    pub(crate) fn update(&self, value: bool) {
        self.value.store(value, Ordering::Release);
        debug!(index = self.index, value, "Digital input changed");
        // No subscribers is fine
        let _ = self.changes.send(value);
    }
}

impl fmt::Debug for DigitalInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalInput")
            .field("index", &self.index)
            .field("value", &self.value())
            .finish()
    }
}

/// A relay, LED, buzzer or display backlight
///
/// Holds no state; every call sends a `DigitalOutput` command.
#[derive(Clone)]
pub struct DigitalOutput {
    kind: OutputKind,
    index: usize,
    sink: SinkRef,
}

impl DigitalOutput {
    pub(crate) fn new(kind: OutputKind, index: usize, sink: SinkRef) -> Self {
        Self { kind, index, sink }
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Pulse the output
    ///
    /// Stays on for `on_ms`, then off for `off_ms`, `repeats` times.
    pub async fn toggle(&self, on_ms: u32, off_ms: u32, repeats: u32) -> Result<()> {
        let payload = words(
            &[self.kind.into(), self.index as u32, on_ms, off_ms, repeats],
            &[],
        );
        self.sink.send(Command::DigitalOutput, payload).await
    }

    /// Switch the output on or off
    pub async fn set(&self, on: bool) -> Result<()> {
        if on {
            self.toggle(1, 0, 0).await
        } else {
            self.toggle(0, 1, 0).await
        }
    }

    /// Turn on for `on_ms`, then off
    pub async fn hold(&self, on_ms: u32) -> Result<()> {
        self.toggle(on_ms, 0, 1).await
    }
}

impl fmt::Debug for DigitalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigitalOutput")
            .field("kind", &self.kind)
            .field("index", &self.index)
            .finish()
    }
}

impl fmt::Display for DigitalOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CommandSink, MockCommandSink};
    use std::sync::Arc;

    fn expect_io(mock: &mut MockCommandSink, expected: [u32; 5]) {
        let payload = words(&expected, &[]);
        mock.expect_send_command()
            .withf(move |command, sent| *command == Command::DigitalOutput && *sent == payload)
            .times(1)
            .returning(|_, _| Ok(()));
    }

    fn output(kind: OutputKind, index: usize, mock: MockCommandSink) -> (DigitalOutput, Arc<dyn CommandSink>) {
        let sink: Arc<dyn CommandSink> = Arc::new(mock);
        (DigitalOutput::new(kind, index, SinkRef::from_arc(&sink)), sink)
    }

    #[tokio::test]
    async fn test_toggle_payload() {
        let mut mock = MockCommandSink::new();
        expect_io(&mut mock, [1, 1, 500, 250, 3]);

        let (relay, _sink) = output(OutputKind::Relay, 1, mock);
        relay.toggle(500, 250, 3).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_and_hold() {
        let mut mock = MockCommandSink::new();
        expect_io(&mut mock, [2, 0, 1, 0, 0]);
        expect_io(&mut mock, [2, 0, 0, 1, 0]);
        expect_io(&mut mock, [2, 0, 1000, 0, 1]);

        let (led, _sink) = output(OutputKind::Led, 0, mock);
        led.set(true).await.unwrap();
        led.set(false).await.unwrap();
        led.hold(1000).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_session_dropped() {
        let (buzzer, sink) = output(OutputKind::Buzzer, 0, MockCommandSink::new());
        drop(sink);

        assert!(buzzer.set(true).await.unwrap_err().is_disconnected());
    }

    #[test]
    fn test_input_notifies_every_report() {
        let input = DigitalInput::new(1);
        let mut changes = input.subscribe();

        input.update(true);
        input.update(true);

        assert!(input.value());
        assert_eq!(changes.try_recv().unwrap(), true);
        assert_eq!(changes.try_recv().unwrap(), true);
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn test_display_name() {
        let sink: Arc<dyn CommandSink> = Arc::new(MockCommandSink::new());
        let relay = DigitalOutput::new(OutputKind::Relay, 2, SinkRef::from_arc(&sink));
        assert_eq!(relay.to_string(), "Relay #2");
    }
}
