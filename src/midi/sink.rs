use super::MidiMessage;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Destination for outbound MIDI messages.
///
/// Implementations must be safe to call from the clock driver and the note-off
/// timer concurrently, and must keep the order of sends issued by one thread.
pub trait OutputSink: Send + Sync {
    fn send(&self, message: &MidiMessage) -> Result<()>;

    /// Human-readable destination name.
    fn name(&self) -> String;
}

pub type SharedSink = Arc<dyn OutputSink>;

/// Keeps every message in memory, in send order.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<MidiMessage>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<MidiMessage> {
        self.messages.lock().clone()
    }

    pub fn take(&self) -> Vec<MidiMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl OutputSink for RecordingSink {
    fn send(&self, message: &MidiMessage) -> Result<()> {
        self.messages.lock().push(message.clone());
        Ok(())
    }

    fn name(&self) -> String {
        "recording".to_string()
    }
}

/// Writes messages to the log instead of hardware. Clock pulses go to `trace`.
#[derive(Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn send(&self, message: &MidiMessage) -> Result<()> {
        if matches!(message, MidiMessage::Clock) {
            tracing::trace!("{message}");
        } else {
            info!("{message}");
        }
        Ok(())
    }

    fn name(&self) -> String {
        "dry-run".to_string()
    }
}
