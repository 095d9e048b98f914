//! Beat-indexed scheduling and the pulse clock that plays it out.

mod clock;
mod encoder;
mod envelope;
mod note_off;
mod scheduler;
mod sequence;
mod transport;

pub use clock::{
    DriverState, Pace, Pacer, PlaybackReport, PulseClockDriver, RealTimePacer, SessionHandle,
    Unpaced, MAX_BPM, MIN_BPM,
};
pub use encoder::{encode, DATA_ENTRY_LSB, DATA_ENTRY_MSB, NRPN_LSB, NRPN_MSB};
pub use envelope::{play_envelope, Curve, Envelope, EnvelopePoint, SweepReport};
pub use note_off::NoteOffTimers;
pub use scheduler::{
    EventKind, EventQueue, LoopTable, Schedule, ScheduleBuilder, ScheduledEvent,
    DEFAULT_TRIGGER_GATE_SEC, MAX_BARS, MIN_BARS,
};
pub use sequence::{parse_all, AutomationPoint, LoopNote, LoopPattern, MelodyNote, TrackTrigger};
pub use transport::{Transport, MAX_SONG_POSITION};

use crate::error::{Error, Result};
use std::time::Duration;

/// Clock resolution: MIDI clock runs at 24 pulses per quarter note.
pub const PULSES_PER_BEAT: u32 = 24;
pub const BEATS_PER_BAR: f64 = 4.0;
pub const PULSES_PER_BAR: u32 = PULSES_PER_BEAT * 4;

/// Beat (quarter notes) to pulse index. Truncates, so every beat inside a
/// pulse lands on that pulse.
pub fn pulse_of(beat: f64) -> u32 {
    (beat * PULSES_PER_BEAT as f64).floor() as u32
}

pub fn seconds_per_pulse(bpm: f64) -> f64 {
    60.0 / (bpm * PULSES_PER_BEAT as f64)
}

/// Longest note, gap or envelope stage accepted anywhere.
pub const MAX_NOTE_SEC: f64 = 3600.0;

/// Checks a caller-supplied length in seconds: positive (or zero when
/// `allow_zero`) and at most [`MAX_NOTE_SEC`].
pub fn check_seconds(what: &str, value: f64, allow_zero: bool) -> Result<f64> {
    let low_ok = if allow_zero { value >= 0.0 } else { value > 0.0 };
    if !value.is_finite() || !low_ok || value > MAX_NOTE_SEC {
        return Err(Error::out_of_range(what, value, 0.0, MAX_NOTE_SEC));
    }
    Ok(value)
}

/// Seconds to a [`Duration`] without panicking on huge or negative input.
pub fn duration_of(what: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::InvalidArgument(format!("{what} {seconds} s: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_conversion_truncates() {
        assert_eq!(pulse_of(0.0), 0);
        assert_eq!(pulse_of(0.03), 0);
        assert_eq!(pulse_of(0.5), 12);
        assert_eq!(pulse_of(1.0), 24);
        assert_eq!(pulse_of(4.0), 96);
        assert_eq!(pulse_of(1.0 / 24.0 - 1e-9), 0);
    }

    #[test]
    fn lengths_are_bounded() {
        assert_eq!(check_seconds("duration", 0.1, false).unwrap(), 0.1);
        assert!(check_seconds("duration", 0.0, false).is_err());
        assert_eq!(check_seconds("delay", 0.0, true).unwrap(), 0.0);
        assert!(check_seconds("duration", 1e20, false).is_err());
        assert!(check_seconds("duration", f64::NAN, true).is_err());

        assert!(duration_of("offset", 1e20).is_err());
        assert!(duration_of("offset", -1.0).is_err());
        assert_eq!(duration_of("offset", 0.5).unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn pulse_length_at_120_bpm() {
        assert!((seconds_per_pulse(120.0) - 60.0 / 2880.0).abs() < 1e-12);
    }
}
