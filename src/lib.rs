//! Drives an Elektron Digitakt II over MIDI from line-delimited JSON tool calls.
//!
//! Timed work (patterns, sweeps, note sequences) runs on a pulse clock at
//! 24 pulses per beat; everything else is sent immediately.

pub mod config;
pub mod engine;
pub mod error;
pub mod melody;
pub mod midi;
pub mod params;
pub mod preset;
pub mod sysex;
pub mod timing;
pub mod tools;

pub use config::Config;
pub use engine::{spawn_engine, Engine, EngineCommand, EngineHandle, EngineUpdate, Pacing};
pub use error::{Error, Result};
