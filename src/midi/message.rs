use crate::error::{Error, Result};
use std::fmt;

/// Zero-based MIDI channel (0-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Channel(u8);

impl Channel {
    /// Converts the 1-16 numbering used at the tool boundary.
    pub fn from_user(channel: u8) -> Result<Self> {
        if (1..=16).contains(&channel) {
            Ok(Channel(channel - 1))
        } else {
            Err(Error::out_of_range("channel", channel as f64, 1.0, 16.0))
        }
    }

    pub fn from_index(index: u8) -> Result<Self> {
        if index < 16 {
            Ok(Channel(index))
        } else {
            Err(Error::out_of_range("channel index", index as f64, 0.0, 15.0))
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// 1-16 numbering, for user-facing text.
    pub fn number(self) -> u8 {
        self.0 + 1
    }
}

/// Validates a 7-bit data byte.
pub fn u7(value: i64, what: &str) -> Result<u8> {
    if (0..=127).contains(&value) {
        Ok(value as u8)
    } else {
        Err(Error::out_of_range(what, value as f64, 0.0, 127.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn {
        channel: Channel,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: Channel,
        note: u8,
    },
    ControlChange {
        channel: Channel,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: Channel,
        program: u8,
    },
    Clock,
    Start,
    Stop,
    Continue,
    /// Position in sixteenth notes (14 bits).
    SongPosition(u16),
    /// SysEx payload without the F0/F7 framing.
    SysEx(Vec<u8>),
}

impl MidiMessage {
    pub fn control_change(channel: Channel, controller: u8, value: u8) -> Self {
        MidiMessage::ControlChange {
            channel,
            controller,
            value,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | channel.index(), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff { channel, note } => vec![0x80 | channel.index(), note & 0x7F, 0],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | channel.index(), controller & 0x7F, value & 0x7F],
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | channel.index(), program & 0x7F]
            }
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::SongPosition(position) => {
                let position = position & 0x3FFF;
                vec![0xF2, (position & 0x7F) as u8, (position >> 7) as u8]
            }
            MidiMessage::SysEx(data) => {
                let mut bytes = Vec::with_capacity(data.len() + 2);
                bytes.push(0xF0);
                bytes.extend(data.iter().map(|b| b & 0x7F));
                bytes.push(0xF7);
                bytes
            }
        }
    }

    pub fn is_realtime(&self) -> bool {
        matches!(
            self,
            MidiMessage::Clock | MidiMessage::Start | MidiMessage::Stop | MidiMessage::Continue
        )
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "Note ON  ch={} note={} vel={}", channel.number(), note, velocity),
            MidiMessage::NoteOff { channel, note } => {
                write!(f, "Note OFF ch={} note={}", channel.number(), note)
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "CC       ch={} ctrl={} val={}", channel.number(), controller, value),
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "PC       ch={} program={}", channel.number(), program)
            }
            MidiMessage::Clock => write!(f, "Clock"),
            MidiMessage::Start => write!(f, "Start"),
            MidiMessage::Stop => write!(f, "Stop"),
            MidiMessage::Continue => write!(f, "Continue"),
            MidiMessage::SongPosition(position) => write!(f, "Song position {}", position),
            MidiMessage::SysEx(data) => write!(f, "SysEx {:02X?}", data),
        }
    }
}
