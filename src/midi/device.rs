use super::{MidiMessage, OutputSink};
use crate::error::{Error, Result};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Hardware output through midir. The connection lock serialises all writers.
pub struct MidirSink {
    port_name: String,
    connection: Mutex<MidiOutputConnection>,
}

impl OutputSink for MidirSink {
    fn send(&self, message: &MidiMessage) -> Result<()> {
        let bytes = message.to_bytes();
        self.connection.lock().send(&bytes)?;
        Ok(())
    }

    fn name(&self) -> String {
        self.port_name.clone()
    }
}

pub fn list_output_ports(client_name: &str) -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(client_name)?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|p| midi_out.port_name(p).ok())
        .collect())
}

/// Connects to the first output port whose name contains `port_fragment`.
pub fn connect_output(client_name: &str, port_fragment: &str) -> Result<MidirSink> {
    let midi_out = MidiOutput::new(client_name)?;

    let ports = midi_out.ports();
    for port in &ports {
        debug!(
            "Found MIDI output: {}",
            midi_out.port_name(port).unwrap_or_default()
        );
    }

    let port = ports
        .iter()
        .find(|p| {
            midi_out
                .port_name(p)
                .map(|name| name.contains(port_fragment))
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            warn!("Could not find MIDI output port for {}", port_fragment);
            Error::MidiDevice(format!("no MIDI output port matching '{}'", port_fragment))
        })?;

    let port_name = midi_out.port_name(port).unwrap_or_default();
    let connection = midi_out.connect(port, &format!("{}-output", client_name))?;
    info!("Connected to MIDI output: {}", port_name);

    Ok(MidirSink {
        port_name,
        connection: Mutex::new(connection),
    })
}
