use super::{pulse_of, PULSES_PER_BEAT};
use crate::error::{Error, Result};
use crate::midi::MidiMessage;

/// Highest position a Song Position Pointer can carry (14 bits).
pub const MAX_SONG_POSITION: u16 = 0x3FFF;

/// Decides when the receiving sequencer is started and whether it is
/// stopped again.
///
/// Before the start pulse nothing transport-related goes out: no clock, no
/// start. A deferred start is preceded by a Song Position Pointer so the
/// receiver counts from the intended beat instead of its last position.
#[derive(Debug, Clone, PartialEq)]
pub struct Transport {
    start_pulse: u32,
    song_position: Option<u16>,
    enabled: bool,
    send_stop: bool,
    started: bool,
}

impl Transport {
    /// `send_clock = false` disables transport entirely: no start, clock or
    /// stop is ever sent.
    pub fn new(midi_start_at_beat: f64, send_clock: bool, send_stop: bool) -> Result<Self> {
        if !midi_start_at_beat.is_finite() || midi_start_at_beat < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "midi_start_at_beat {midi_start_at_beat} must be a non-negative number"
            )));
        }
        let song_position = if midi_start_at_beat > 0.0 {
            let sixteenths = (midi_start_at_beat * 4.0).floor();
            if sixteenths > MAX_SONG_POSITION as f64 {
                return Err(Error::out_of_range(
                    "song position",
                    sixteenths,
                    0.0,
                    MAX_SONG_POSITION as f64,
                ));
            }
            Some(sixteenths as u16)
        } else {
            None
        };
        Ok(Transport {
            start_pulse: pulse_of(midi_start_at_beat),
            song_position,
            enabled: send_clock,
            send_stop,
            started: false,
        })
    }

    /// Plain playback from beat 0 with clock and stop.
    pub fn immediate() -> Self {
        Transport {
            start_pulse: 0,
            song_position: None,
            enabled: true,
            send_stop: true,
            started: false,
        }
    }

    pub fn start_pulse(&self) -> u32 {
        self.start_pulse
    }

    pub fn start_beat(&self) -> f64 {
        self.start_pulse as f64 / PULSES_PER_BEAT as f64
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True once the start sequence has gone out; clock pulses follow from
    /// then on.
    pub fn is_running(&self) -> bool {
        self.started
    }

    /// The start sequence, exactly once, at the start pulse.
    pub fn on_pulse(&mut self, pulse: u32) -> Vec<MidiMessage> {
        if !self.enabled || self.started || pulse != self.start_pulse {
            return Vec::new();
        }
        self.started = true;
        let mut messages = Vec::with_capacity(2);
        if let Some(position) = self.song_position {
            messages.push(MidiMessage::SongPosition(position));
        }
        messages.push(MidiMessage::Start);
        messages
    }

    /// Stop message for the end of the session. Only sent if a start was.
    pub fn finish(&mut self) -> Option<MidiMessage> {
        if self.started && self.send_stop {
            self.started = false;
            Some(MidiMessage::Stop)
        } else {
            None
        }
    }
}
