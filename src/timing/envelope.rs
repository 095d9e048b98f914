use super::clock::{Pace, Pacer};
use super::encoder::encode;
use super::duration_of;
use super::sequence::AutomationPoint;
use crate::error::{Error, Result};
use crate::midi::{Channel, SharedSink};
use crate::params::ParameterSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// ADSR attack peak.
const PEAK: f64 = 127.0;
const MAX_STEPS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    Linear,
    /// Moves fast at first, then settles.
    Exponential,
    /// Moves slowly at first, then accelerates.
    Logarithmic,
}

impl Curve {
    /// Progress at normalized time `t` in `0..=1`.
    pub fn shape(self, t: f64) -> f64 {
        match self {
            Curve::Linear => t,
            Curve::Exponential => 1.0 - (-3.0 * t).exp(),
            Curve::Logarithmic => (3.0 * (t - 1.0)).exp(),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Curve::Linear => "linear",
            Curve::Exponential => "exponential",
            Curve::Logarithmic => "logarithmic",
        })
    }
}

/// One generated value and the time since the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    pub interval_sec: f64,
    pub value: i64,
}

fn default_steps() -> u32 {
    50
}

fn default_steps_per_stage() -> u32 {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    /// A single ramp from `start_value` to `end_value`.
    Sweep {
        start_value: f64,
        end_value: f64,
        duration_sec: f64,
        #[serde(default)]
        curve: Curve,
        #[serde(default = "default_steps")]
        steps: u32,
    },
    /// Attack to 127, decay to sustain, hold, release to 0.
    Adsr {
        attack_sec: f64,
        decay_sec: f64,
        sustain_level: f64,
        release_sec: f64,
        #[serde(default = "default_steps_per_stage")]
        steps_per_stage: u32,
    },
}

fn check_seconds(what: &str, value: f64) -> Result<()> {
    super::check_seconds(what, value, true).map(|_| ())
}

fn check_steps(what: &str, steps: u32) -> Result<()> {
    if steps == 0 || steps > MAX_STEPS {
        return Err(Error::out_of_range(what, steps as f64, 1.0, MAX_STEPS as f64));
    }
    Ok(())
}

/// `steps` segments of a ramp; yields `steps + 1` points when the first is
/// included.
fn ramp(
    points: &mut Vec<EnvelopePoint>,
    from: f64,
    to: f64,
    duration_sec: f64,
    steps: u32,
    curve: Curve,
    include_first: bool,
) {
    let interval = duration_sec / steps as f64;
    let first = if include_first { 0 } else { 1 };
    for i in first..=steps {
        let t = i as f64 / steps as f64;
        points.push(EnvelopePoint {
            interval_sec: if i == 0 { 0.0 } else { interval },
            value: (from + (to - from) * curve.shape(t)).round() as i64,
        });
    }
}

impl Envelope {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Envelope::Sweep {
                start_value,
                end_value,
                duration_sec,
                steps,
                ..
            } => {
                if !start_value.is_finite() || !end_value.is_finite() {
                    return Err(Error::InvalidArgument("sweep values must be numbers".into()));
                }
                check_seconds("duration_sec", duration_sec)?;
                check_steps("steps", steps)
            }
            Envelope::Adsr {
                attack_sec,
                decay_sec,
                sustain_level,
                release_sec,
                steps_per_stage,
            } => {
                check_seconds("attack_sec", attack_sec)?;
                check_seconds("decay_sec", decay_sec)?;
                check_seconds("release_sec", release_sec)?;
                if !(0.0..=PEAK).contains(&sustain_level) {
                    return Err(Error::out_of_range("sustain_level", sustain_level, 0.0, PEAK));
                }
                check_steps("steps_per_stage", steps_per_stage)
            }
        }
    }

    /// The value sequence. Both the real-time loop and scheduled automation
    /// are built from this, so they always agree.
    pub fn generate(&self) -> Result<Vec<EnvelopePoint>> {
        self.validate()?;
        let mut points = Vec::new();
        match *self {
            Envelope::Sweep {
                start_value,
                end_value,
                duration_sec,
                curve,
                steps,
            } => ramp(&mut points, start_value, end_value, duration_sec, steps, curve, true),
            Envelope::Adsr {
                attack_sec,
                decay_sec,
                sustain_level,
                release_sec,
                steps_per_stage,
            } => {
                let steps = steps_per_stage;
                ramp(&mut points, 0.0, PEAK, attack_sec, steps, Curve::Linear, true);
                ramp(&mut points, PEAK, sustain_level, decay_sec, steps, Curve::Linear, false);
                points.push(EnvelopePoint {
                    interval_sec: 0.0,
                    value: sustain_level.round() as i64,
                });
                ramp(&mut points, sustain_level, 0.0, release_sec, steps, Curve::Linear, false);
            }
        }
        Ok(points)
    }

    pub fn duration_sec(&self) -> f64 {
        match *self {
            Envelope::Sweep { duration_sec, .. } => duration_sec,
            Envelope::Adsr {
                attack_sec,
                decay_sec,
                release_sec,
                ..
            } => attack_sec + decay_sec + release_sec,
        }
    }

    /// Beat-coordinate automation starting at `start_beat`, for a schedule
    /// running at `bpm`.
    pub fn to_automation(&self, start_beat: f64, bpm: f64) -> Result<Vec<AutomationPoint>> {
        let beats_per_sec = bpm / 60.0;
        let mut elapsed = 0.0;
        Ok(self
            .generate()?
            .into_iter()
            .map(|p| {
                elapsed += p.interval_sec;
                AutomationPoint {
                    beat: start_beat + elapsed * beats_per_sec,
                    value: p.value,
                }
            })
            .collect())
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Sweep {
                start_value,
                end_value,
                duration_sec,
                curve,
                steps,
            } => write!(
                f,
                "{curve} sweep {start_value} -> {end_value} over {duration_sec}s ({steps} steps)"
            ),
            Envelope::Adsr {
                attack_sec,
                decay_sec,
                sustain_level,
                release_sec,
                ..
            } => write!(
                f,
                "ADSR envelope A={attack_sec}s D={decay_sec}s S={sustain_level} R={release_sec}s"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub parameter: String,
    pub values_sent: usize,
    pub total_values: usize,
    pub first_value: Option<u8>,
    pub last_value: Option<u8>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}': {} of {} values sent",
            if self.cancelled { "Cancelled" } else { "Completed" },
            self.parameter,
            self.values_sent,
            self.total_values
        )?;
        if let (Some(first), Some(last)) = (self.first_value, self.last_value) {
            write!(f, " ({first} -> {last})")?;
        }
        write!(f, " in {:.2}s", self.elapsed.as_secs_f64())
    }
}

/// Sends an envelope in real time, outside any clock session.
///
/// Every value is checked against the parameter before the first message
/// goes out. Waits are measured from one start instant.
pub fn play_envelope(
    envelope: &Envelope,
    parameter: &ParameterSpec,
    channel: Channel,
    sink: &SharedSink,
    pacer: &mut dyn Pacer,
) -> Result<SweepReport> {
    let points = envelope.generate()?;
    let values = points
        .iter()
        .map(|p| parameter.validate(p.value))
        .collect::<Result<Vec<u8>>>()?;

    info!("Sending {} to '{}'", envelope, parameter.name);
    let started = Instant::now();
    pacer.begin();

    let mut report = SweepReport {
        parameter: parameter.name.clone(),
        values_sent: 0,
        total_values: values.len(),
        first_value: values.first().copied(),
        last_value: None,
        cancelled: false,
        elapsed: Duration::ZERO,
    };
    let mut offset = 0.0;
    for (point, value) in points.iter().zip(values) {
        offset += point.interval_sec;
        if pacer.wait_until(duration_of("envelope offset", offset)?) == Pace::Cancelled {
            debug!("Envelope on '{}' cancelled", parameter.name);
            report.cancelled = true;
            break;
        }
        for message in encode(parameter.address, value, channel)? {
            sink.send(&message)?;
        }
        report.values_sent += 1;
        report.last_value = Some(value);
    }
    report.elapsed = started.elapsed();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{MidiMessage, RecordingSink};
    use crate::params::{DigitaktParameters, ParameterResolver};
    use crate::timing::{SessionHandle, Unpaced};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn adsr() -> Envelope {
        Envelope::Adsr {
            attack_sec: 0.5,
            decay_sec: 0.3,
            sustain_level: 64.0,
            release_sec: 1.0,
            steps_per_stage: 20,
        }
    }

    fn values(points: &[EnvelopePoint]) -> Vec<i64> {
        points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn linear_sweep_hits_both_ends() {
        let sweep = Envelope::Sweep {
            start_value: 20.0,
            end_value: 127.0,
            duration_sec: 2.0,
            curve: Curve::Linear,
            steps: 50,
        };
        let points = sweep.generate().unwrap();
        assert_eq!(points.len(), 51);
        assert_eq!(points[0].value, 20);
        assert_eq!(points[50].value, 127);
        assert_eq!(points[0].interval_sec, 0.0);
        let total: f64 = points.iter().map(|p| p.interval_sec).sum();
        assert_relative_eq!(total, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn curve_shapes() {
        assert_relative_eq!(Curve::Exponential.shape(0.0), 0.0);
        assert_relative_eq!(Curve::Exponential.shape(1.0), 1.0 - (-3.0f64).exp());
        assert_relative_eq!(Curve::Logarithmic.shape(1.0), 1.0);
        assert_relative_eq!(Curve::Logarithmic.shape(0.0), (-3.0f64).exp());
        // Fast start vs slow start at the midpoint.
        assert!(Curve::Exponential.shape(0.5) > 0.5);
        assert!(Curve::Logarithmic.shape(0.5) < 0.5);
    }

    #[test]
    fn adsr_stages() {
        let points = adsr().generate().unwrap();
        // attack 21 + decay 20 + sustain 1 + release 20
        assert_eq!(points.len(), 62);
        let v = values(&points);
        assert_eq!(v[0], 0);
        assert_eq!(v[20], 127);
        assert_eq!(v[40], 64);
        assert_eq!(v[41], 64);
        assert_eq!(points[41].interval_sec, 0.0);
        assert_eq!(*v.last().unwrap(), 0);

        let total: f64 = points.iter().map(|p| p.interval_sec).sum();
        assert_relative_eq!(total, 1.8, epsilon = 1.0 / 20.0);
        assert_relative_eq!(adsr().duration_sec(), 1.8, epsilon = 1e-9);
    }

    #[test]
    fn rejects_bad_envelopes() {
        let sweep = Envelope::Sweep {
            start_value: 0.0,
            end_value: 127.0,
            duration_sec: -1.0,
            curve: Curve::Linear,
            steps: 10,
        };
        assert!(sweep.generate().is_err());
        let adsr = Envelope::Adsr {
            attack_sec: 0.1,
            decay_sec: 0.1,
            sustain_level: 200.0,
            release_sec: 0.1,
            steps_per_stage: 10,
        };
        assert!(adsr.generate().is_err());
    }

    #[test]
    fn automation_matches_real_time_values() {
        let envelope = Envelope::Sweep {
            start_value: 127.0,
            end_value: 0.0,
            duration_sec: 2.5,
            curve: Curve::Logarithmic,
            steps: 50,
        };
        let scheduled: Vec<i64> = envelope
            .to_automation(4.0, 120.0)
            .unwrap()
            .iter()
            .map(|p| p.value)
            .collect();

        let recorder = Arc::new(RecordingSink::new());
        let recorder_sink: SharedSink = recorder.clone();
        let spec = DigitaktParameters.resolve("filter_cutoff").unwrap();
        let ch = Channel::from_user(1).unwrap();
        play_envelope(&envelope, &spec, ch, &recorder_sink, &mut Unpaced::new()).unwrap();

        let sent: Vec<i64> = recorder
            .messages()
            .iter()
            .filter_map(|m| match m {
                MidiMessage::ControlChange { value, .. } => Some(*value as i64),
                _ => None,
            })
            .collect();
        assert_eq!(sent, scheduled);
    }

    #[test]
    fn automation_beats_follow_tempo() {
        let envelope = Envelope::Sweep {
            start_value: 0.0,
            end_value: 100.0,
            duration_sec: 1.0,
            curve: Curve::Linear,
            steps: 4,
        };
        let points = envelope.to_automation(8.0, 120.0).unwrap();
        assert_relative_eq!(points[0].beat, 8.0);
        // 1 s at 120 BPM is 2 beats.
        assert_relative_eq!(points[4].beat, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn out_of_range_values_send_nothing() {
        let envelope = Envelope::Sweep {
            start_value: 0.0,
            end_value: 140.0,
            duration_sec: 0.1,
            curve: Curve::Linear,
            steps: 4,
        };
        let recorder = Arc::new(RecordingSink::new());
        let sink: SharedSink = recorder.clone();
        let spec = DigitaktParameters.resolve("filter_resonance").unwrap();
        let ch = Channel::from_user(1).unwrap();
        let err = play_envelope(&envelope, &spec, ch, &sink, &mut Unpaced::new()).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        assert!(recorder.messages().is_empty());
    }

    #[test]
    fn cancelled_envelope_stops_early() {
        let recorder = Arc::new(RecordingSink::new());
        let sink: SharedSink = recorder.clone();
        let spec = DigitaktParameters.resolve("filter_cutoff").unwrap();
        let (handle, cancel) = SessionHandle::pair();
        handle.cancel();
        let report = play_envelope(
            &adsr(),
            &spec,
            Channel::from_user(1).unwrap(),
            &sink,
            &mut Unpaced::with_cancel(cancel),
        )
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.values_sent, 0);
        assert!(recorder.messages().is_empty());
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{"sweep":{"start_value":0,"end_value":127,"duration_sec":3.0,"curve":"exponential"}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            envelope,
            Envelope::Sweep {
                start_value: 0.0,
                end_value: 127.0,
                duration_sec: 3.0,
                curve: Curve::Exponential,
                steps: 50,
            }
        );
    }
}
