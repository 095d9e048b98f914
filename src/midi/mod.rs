//! MIDI wire messages, output sinks and device connection.

mod device;
mod message;
mod sink;

pub use device::{connect_output, list_output_ports, MidirSink};
pub use message::{Channel, MidiMessage, u7};
pub use sink::{LogSink, OutputSink, RecordingSink, SharedSink};
