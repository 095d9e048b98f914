//! Crate-wide error type.
//!
//! Every failure that can reach the tool boundary is one of these variants, so the
//! engine can turn it into a single descriptive message.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown parameter '{name}'. Available parameters: {available}")]
    UnknownParameter { name: String, available: String },

    #[error("Value {value} out of range for {what} (valid range: {min}-{max})")]
    OutOfRange {
        what: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Not connected to a MIDI output port")]
    NotConnected,

    #[error("Malformed {list} entry #{index}: {reason}")]
    MalformedEntry {
        list: &'static str,
        index: usize,
        reason: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("A playback session is already running")]
    PlaybackBusy,

    #[error("Preset not found: {0}")]
    PresetNotFound(String),

    #[error("No melody has been played yet")]
    NoMelody,

    #[error("MIDI port error: {0}")]
    MidiPort(String),

    #[error("MIDI device error: {0}")]
    MidiDevice(String),

    #[error("MIDI file error: {0}")]
    MidiFile(String),

    #[error("RON error: {0}")]
    Ron(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn out_of_range(what: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        Error::OutOfRange {
            what: what.into(),
            value,
            min,
            max,
        }
    }

    pub fn malformed(list: &'static str, index: usize, reason: impl Into<String>) -> Self {
        Error::MalformedEntry {
            list,
            index,
            reason: reason.into(),
        }
    }
}

impl From<midir::InitError> for Error {
    fn from(e: midir::InitError) -> Self {
        Error::MidiDevice(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(e: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::MidiPort(e.to_string())
    }
}

impl From<midir::SendError> for Error {
    fn from(e: midir::SendError) -> Self {
        Error::MidiPort(e.to_string())
    }
}

impl From<midly::Error> for Error {
    fn from(e: midly::Error) -> Self {
        Error::MidiFile(e.to_string())
    }
}

impl From<ron::Error> for Error {
    fn from(e: ron::Error) -> Self {
        Error::Ron(e.to_string())
    }
}

impl From<ron::error::SpannedError> for Error {
    fn from(e: ron::error::SpannedError) -> Self {
        Error::Ron(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
