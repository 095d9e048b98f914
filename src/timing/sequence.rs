//! Caller-facing event tuples in beat coordinates.
//!
//! Every list arrives as loosely-typed number arrays; each entry is parsed
//! into a typed record here so a bad entry is reported by list and index
//! instead of failing somewhere inside the schedule build.

use super::check_seconds;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_MELODY_VELOCITY: u8 = 100;
const DEFAULT_MELODY_DURATION: f64 = 0.1;

fn required(list: &'static str, index: usize, fields: &[f64], at: usize, name: &str) -> Result<f64> {
    let value = fields
        .get(at)
        .copied()
        .ok_or_else(|| Error::malformed(list, index, format!("missing {name}")))?;
    if !value.is_finite() {
        return Err(Error::malformed(list, index, format!("{name} is not a number")));
    }
    Ok(value)
}

fn beat(list: &'static str, index: usize, fields: &[f64], at: usize) -> Result<f64> {
    let value = required(list, index, fields, at, "beat")?;
    if value < 0.0 {
        return Err(Error::malformed(list, index, format!("beat {value} is negative")));
    }
    Ok(value)
}

/// A whole number in `min..=max`.
fn whole(
    list: &'static str,
    index: usize,
    value: f64,
    name: &str,
    min: i64,
    max: i64,
) -> Result<i64> {
    if value.fract() != 0.0 {
        return Err(Error::malformed(list, index, format!("{name} {value} is not a whole number")));
    }
    let value = value as i64;
    if value < min || value > max {
        return Err(Error::malformed(
            list,
            index,
            format!("{name} {value} outside {min}-{max}"),
        ));
    }
    Ok(value)
}

/// A percussion hit on one of the device's tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackTrigger {
    pub beat: f64,
    pub note: u8,
    pub velocity: u8,
}

impl TrackTrigger {
    /// `[beat, track, velocity]` triggers track 1-16 (note = track - 1).
    /// `[beat, track, velocity, note]` plays `note` chromatically instead.
    pub fn from_fields(index: usize, fields: &[f64]) -> Result<Self> {
        const LIST: &str = "track trigger";
        if fields.len() > 4 {
            return Err(Error::malformed(LIST, index, "expected [beat, track, velocity, note?]"));
        }
        let beat = beat(LIST, index, fields, 0)?;
        let track = whole(LIST, index, required(LIST, index, fields, 1, "track")?, "track", 1, 16)?;
        let velocity = whole(
            LIST,
            index,
            required(LIST, index, fields, 2, "velocity")?,
            "velocity",
            0,
            127,
        )?;
        let note = match fields.get(3) {
            Some(&note) => whole(LIST, index, note, "note", 0, 127)?,
            None => track - 1,
        };
        Ok(TrackTrigger {
            beat,
            note: note as u8,
            velocity: velocity as u8,
        })
    }
}

/// A pitched note. Melody beats are shifted by the preroll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MelodyNote {
    pub beat: f64,
    pub note: u8,
    pub velocity: u8,
    pub duration_sec: f64,
}

impl MelodyNote {
    /// `[beat, note, velocity = 100, duration = 0.1]`
    pub fn from_fields(index: usize, fields: &[f64]) -> Result<Self> {
        const LIST: &str = "melody note";
        if fields.len() > 4 {
            return Err(Error::malformed(LIST, index, "expected [beat, note, velocity?, duration?]"));
        }
        let beat = beat(LIST, index, fields, 0)?;
        let note = whole(LIST, index, required(LIST, index, fields, 1, "note")?, "note", 0, 127)?;
        let velocity = match fields.get(2) {
            Some(&v) => whole(LIST, index, v, "velocity", 0, 127)? as u8,
            None => DEFAULT_MELODY_VELOCITY,
        };
        let duration_sec = match fields.get(3) {
            Some(&d) => check_seconds("duration", d, false)
                .map_err(|e| Error::malformed(LIST, index, e.to_string()))?,
            None => DEFAULT_MELODY_DURATION,
        };
        Ok(MelodyNote {
            beat,
            note: note as u8,
            velocity,
            duration_sec,
        })
    }
}

/// One entry of a repeating loop, positioned relative to the loop start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopNote {
    pub beat_offset: f64,
    pub note: u8,
    pub velocity: u8,
}

impl LoopNote {
    /// `[beat_offset, note, velocity]`
    pub fn from_fields(index: usize, fields: &[f64]) -> Result<Self> {
        const LIST: &str = "loop note";
        if fields.len() != 3 {
            return Err(Error::malformed(LIST, index, "expected [beat_offset, note, velocity]"));
        }
        let beat_offset = beat(LIST, index, fields, 0)?;
        let note = whole(LIST, index, fields[1], "note", 0, 127)?;
        let velocity = whole(LIST, index, fields[2], "velocity", 0, 127)?;
        Ok(LoopNote {
            beat_offset,
            note: note as u8,
            velocity: velocity as u8,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopPattern {
    pub length_bars: f64,
    pub notes: Vec<LoopNote>,
}

/// One value of a parameter lane. The value is range-checked against the
/// parameter when the lane is resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationPoint {
    pub beat: f64,
    pub value: i64,
}

impl AutomationPoint {
    /// `[beat, value]`
    pub fn from_fields(index: usize, fields: &[f64]) -> Result<Self> {
        const LIST: &str = "automation point";
        if fields.len() != 2 {
            return Err(Error::malformed(LIST, index, "expected [beat, value]"));
        }
        let beat = beat(LIST, index, fields, 0)?;
        let value = required(LIST, index, fields, 1, "value")?;
        if value.fract() != 0.0 {
            return Err(Error::malformed(LIST, index, format!("value {value} is not a whole number")));
        }
        Ok(AutomationPoint {
            beat,
            value: value as i64,
        })
    }
}

/// Parses every entry of a tuple list, failing on the first bad one.
pub fn parse_all<T>(
    entries: &[Vec<f64>],
    parse: impl Fn(usize, &[f64]) -> Result<T>,
) -> Result<Vec<T>> {
    entries
        .iter()
        .enumerate()
        .map(|(index, fields)| parse(index, fields))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_number_maps_to_zero_based_note() {
        let trig = TrackTrigger::from_fields(0, &[1.0, 1.0, 100.0]).unwrap();
        assert_eq!(trig.note, 0);
        let trig = TrackTrigger::from_fields(0, &[1.0, 16.0, 90.0]).unwrap();
        assert_eq!(trig.note, 15);
        assert_eq!(trig.velocity, 90);
    }

    #[test]
    fn chromatic_trigger_uses_explicit_note() {
        let trig = TrackTrigger::from_fields(0, &[0.0, 1.0, 100.0, 60.0]).unwrap();
        assert_eq!(trig.note, 60);
    }

    #[test]
    fn short_trigger_names_the_entry() {
        let err = TrackTrigger::from_fields(3, &[0.0, 1.0]).unwrap_err();
        match err {
            Error::MalformedEntry { list, index, reason } => {
                assert_eq!(list, "track trigger");
                assert_eq!(index, 3);
                assert!(reason.contains("velocity"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn melody_defaults() {
        let note = MelodyNote::from_fields(0, &[2.0, 48.0]).unwrap();
        assert_eq!(note.velocity, 100);
        assert_eq!(note.duration_sec, 0.1);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(MelodyNote::from_fields(0, &[0.0, 128.0]).is_err());
        assert!(MelodyNote::from_fields(0, &[-1.0, 60.0]).is_err());
        assert!(MelodyNote::from_fields(0, &[0.0, 60.0, 100.0, 0.0]).is_err());
        assert!(TrackTrigger::from_fields(0, &[0.0, 17.0, 100.0]).is_err());
        assert!(TrackTrigger::from_fields(0, &[0.0, 1.5, 100.0]).is_err());
        assert!(LoopNote::from_fields(0, &[0.0, 2.0]).is_err());
        assert!(AutomationPoint::from_fields(0, &[0.0, 1.5]).is_err());
    }

    #[test]
    fn huge_melody_duration_is_malformed() {
        let err = MelodyNote::from_fields(2, &[0.0, 60.0, 100.0, 1e20]).unwrap_err();
        assert!(matches!(err, Error::MalformedEntry { index: 2, .. }));
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn parse_all_stops_at_first_bad_entry() {
        let entries = vec![vec![0.0, 10.0], vec![1.0], vec![2.0, 20.0]];
        let err = parse_all(&entries, AutomationPoint::from_fields).unwrap_err();
        assert!(matches!(err, Error::MalformedEntry { index: 1, .. }));
    }
}
