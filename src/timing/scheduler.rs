use super::sequence::{AutomationPoint, LoopPattern, MelodyNote, TrackTrigger};
use super::{check_seconds, pulse_of, BEATS_PER_BAR, PULSES_PER_BAR};
use crate::error::{Error, Result};
use crate::midi::Channel;
use crate::params::{ParameterAddress, ParameterResolver};
use tracing::debug;

pub const MIN_BARS: f64 = 0.25;
/// Longest run: 4096 bars keeps every pulse index, and every looped copy,
/// well inside `u32`.
pub const MAX_BARS: f64 = 4096.0;
pub const DEFAULT_TRIGGER_GATE_SEC: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Note {
        note: u8,
        velocity: u8,
        duration_sec: f64,
        channel: Channel,
    },
    Parameter {
        parameter: String,
        address: ParameterAddress,
        value: u8,
        channel: Channel,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub pulse: u32,
    pub kind: EventKind,
}

/// Events sorted by pulse; equal pulses keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQueue {
    events: Vec<ScheduledEvent>,
}

impl EventQueue {
    fn from_unsorted(mut events: Vec<ScheduledEvent>) -> Self {
        // `sort_by_key` is stable.
        events.sort_by_key(|e| e.pulse);
        EventQueue { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    /// Events due at `pulse`, starting from the read cursor `next`. Advances
    /// the cursor past them.
    pub fn due_at(&self, pulse: u32, next: &mut usize) -> &[ScheduledEvent] {
        let start = *next;
        while *next < self.events.len() && self.events[*next].pulse <= pulse {
            *next += 1;
        }
        &self.events[start..*next]
    }
}

/// A repeating note pattern, evaluated against every pulse instead of
/// being expanded up front.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopTable {
    loop_pulses: u32,
    entries: Vec<(u32, u8, u8)>,
}

impl LoopTable {
    fn new(pattern: &LoopPattern) -> Result<Self> {
        let loop_pulses = (pattern.length_bars * PULSES_PER_BAR as f64).floor();
        if !loop_pulses.is_finite() || loop_pulses < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "loop length {} bars is shorter than one pulse",
                pattern.length_bars
            )));
        }
        let entries = pattern
            .notes
            .iter()
            .map(|n| (pulse_of(n.beat_offset), n.note, n.velocity))
            .collect();
        Ok(LoopTable {
            loop_pulses: loop_pulses as u32,
            entries,
        })
    }

    pub fn loop_pulses(&self) -> u32 {
        self.loop_pulses
    }

    /// `(note, velocity)` of every entry whose offset equals the loop
    /// position of `pulse`. Offsets past the loop end never match.
    pub fn notes_at(&self, pulse: u32) -> impl Iterator<Item = (u8, u8)> + '_ {
        let position = pulse % self.loop_pulses;
        self.entries
            .iter()
            .filter(move |(offset, _, _)| *offset == position)
            .map(|&(_, note, velocity)| (note, velocity))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub total_pulses: u32,
    pub channel: Channel,
    pub trigger_gate_sec: f64,
    pub queue: EventQueue,
    pub loop_table: Option<LoopTable>,
}

impl Schedule {
    pub fn note_count(&self) -> usize {
        self.queue
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Note { .. }))
            .count()
    }

    pub fn parameter_count(&self) -> usize {
        self.queue.len() - self.note_count()
    }
}

/// Collects beat-coordinate inputs and turns them into a pulse-indexed
/// [`Schedule`].
#[derive(Debug, Clone)]
pub struct ScheduleBuilder {
    bars: f64,
    channel: Channel,
    trigger_gate_sec: f64,
    preroll_bars: f64,
    triggers: Vec<TrackTrigger>,
    melody: Vec<MelodyNote>,
    loop_pattern: Option<LoopPattern>,
    automation: Vec<(String, Vec<AutomationPoint>)>,
    automation_loop_bars: Option<f64>,
}

impl ScheduleBuilder {
    pub fn new(bars: f64, channel: Channel) -> Self {
        ScheduleBuilder {
            bars,
            channel,
            trigger_gate_sec: DEFAULT_TRIGGER_GATE_SEC,
            preroll_bars: 0.0,
            triggers: Vec::new(),
            melody: Vec::new(),
            loop_pattern: None,
            automation: Vec::new(),
            automation_loop_bars: None,
        }
    }

    pub fn trigger_gate(mut self, seconds: f64) -> Self {
        self.trigger_gate_sec = seconds;
        self
    }

    pub fn preroll_bars(mut self, bars: f64) -> Self {
        self.preroll_bars = bars;
        self
    }

    pub fn track_triggers(mut self, triggers: impl IntoIterator<Item = TrackTrigger>) -> Self {
        self.triggers.extend(triggers);
        self
    }

    pub fn melody(mut self, notes: impl IntoIterator<Item = MelodyNote>) -> Self {
        self.melody.extend(notes);
        self
    }

    pub fn loop_pattern(mut self, pattern: LoopPattern) -> Self {
        self.loop_pattern = Some(pattern);
        self
    }

    /// Adds one parameter lane. Lanes keep the order they were added in.
    pub fn automation(mut self, parameter: impl Into<String>, points: Vec<AutomationPoint>) -> Self {
        self.automation.push((parameter.into(), points));
        self
    }

    pub fn automation_loop_bars(mut self, bars: f64) -> Self {
        self.automation_loop_bars = Some(bars);
        self
    }

    /// Resolves and validates everything, then lays the events out by pulse.
    /// Fails before producing anything if a parameter name or value is bad.
    pub fn build(&self, resolver: &dyn ParameterResolver) -> Result<Schedule> {
        if !self.bars.is_finite() || !(MIN_BARS..=MAX_BARS).contains(&self.bars) {
            return Err(Error::out_of_range("bars", self.bars, MIN_BARS, MAX_BARS));
        }
        if !self.preroll_bars.is_finite() || self.preroll_bars < 0.0 {
            return Err(Error::out_of_range("preroll_bars", self.preroll_bars, 0.0, f64::MAX));
        }
        check_seconds("trigger gate", self.trigger_gate_sec, false)?;
        for note in &self.melody {
            check_seconds("melody note duration", note.duration_sec, false)?;
        }
        let total_pulses = (self.bars * PULSES_PER_BAR as f64).floor() as u32;

        let mut events = Vec::new();

        for (name, points) in &self.automation {
            let mut lane = self.parameter_lane(resolver, name, points)?;
            if let Some(loop_bars) = self.automation_loop_bars {
                lane = self.repeat_lane(lane, loop_bars, total_pulses)?;
            }
            events.extend(lane);
        }

        events.extend(self.triggers.iter().map(|t| ScheduledEvent {
            pulse: pulse_of(t.beat),
            kind: EventKind::Note {
                note: t.note,
                velocity: t.velocity,
                duration_sec: self.trigger_gate_sec,
                channel: self.channel,
            },
        }));

        let preroll_beats = self.preroll_bars * BEATS_PER_BAR;
        events.extend(self.melody.iter().map(|n| ScheduledEvent {
            pulse: pulse_of(n.beat + preroll_beats),
            kind: EventKind::Note {
                note: n.note,
                velocity: n.velocity,
                duration_sec: n.duration_sec,
                channel: self.channel,
            },
        }));

        let loop_table = self.loop_pattern.as_ref().map(LoopTable::new).transpose()?;

        let queue = EventQueue::from_unsorted(events);
        debug!(
            "Built schedule: {} events over {} pulses{}",
            queue.len(),
            total_pulses,
            if loop_table.is_some() { " with loop" } else { "" }
        );

        Ok(Schedule {
            total_pulses,
            channel: self.channel,
            trigger_gate_sec: self.trigger_gate_sec,
            queue,
            loop_table,
        })
    }

    fn parameter_lane(
        &self,
        resolver: &dyn ParameterResolver,
        name: &str,
        points: &[AutomationPoint],
    ) -> Result<Vec<ScheduledEvent>> {
        let spec = resolver.resolve(name)?;
        let mut lane = points
            .iter()
            .map(|p| {
                Ok(ScheduledEvent {
                    pulse: pulse_of(p.beat),
                    kind: EventKind::Parameter {
                        parameter: spec.name.clone(),
                        address: spec.address,
                        value: spec.validate(p.value)?,
                        channel: self.channel,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        lane.sort_by_key(|e| e.pulse);
        Ok(lane)
    }

    /// Copies the part of a lane inside the first loop to every later loop,
    /// dropping copies that land at or past the end of the run.
    fn repeat_lane(
        &self,
        lane: Vec<ScheduledEvent>,
        loop_bars: f64,
        total_pulses: u32,
    ) -> Result<Vec<ScheduledEvent>> {
        let loop_pulses = (loop_bars * PULSES_PER_BAR as f64).floor();
        if !loop_pulses.is_finite() || loop_pulses < 1.0 {
            return Err(Error::InvalidArgument(format!(
                "automation loop of {loop_bars} bars is shorter than one pulse"
            )));
        }
        let loop_pulses = loop_pulses as u32;
        if total_pulses <= loop_pulses {
            return Ok(lane);
        }

        let loops = (self.bars / loop_bars).ceil() as u32;
        let base: Vec<ScheduledEvent> = lane
            .iter()
            .filter(|e| e.pulse < loop_pulses)
            .cloned()
            .collect();

        let mut repeated = lane;
        for loop_number in 1..loops {
            let Some(shift) = loop_number.checked_mul(loop_pulses) else {
                break;
            };
            if shift >= total_pulses {
                break;
            }
            for event in &base {
                match event.pulse.checked_add(shift) {
                    Some(pulse) if pulse < total_pulses => repeated.push(ScheduledEvent {
                        pulse,
                        kind: event.kind.clone(),
                    }),
                    _ => {}
                }
            }
        }
        repeated.sort_by_key(|e| e.pulse);
        Ok(repeated)
    }
}
