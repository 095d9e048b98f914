use super::encoder::encode;
use super::note_off::NoteOffTimers;
use super::scheduler::{EventKind, Schedule};
use super::transport::Transport;
use super::{duration_of, seconds_per_pulse, PULSES_PER_BAR, PULSES_PER_BEAT};
use crate::error::{Error, Result};
use crate::midi::{Channel, MidiMessage, SharedSink};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const MIN_BPM: f64 = 30.0;
pub const MAX_BPM: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    Continue,
    Cancelled,
}

/// Decides how long the driver waits between pulses.
pub trait Pacer {
    /// Marks the session start. Offsets passed to `wait_until` are relative
    /// to this instant.
    fn begin(&mut self) {}

    /// Blocks until `offset` after `begin`. Returns at once if the deadline
    /// has passed.
    fn wait_until(&mut self, offset: Duration) -> Pace;
}

/// Wall-clock pacing against a single start instant, so waits never
/// accumulate drift. A cancel signal wakes the wait early.
pub struct RealTimePacer {
    start: Instant,
    cancel: Receiver<()>,
}

impl RealTimePacer {
    pub fn new(cancel: Receiver<()>) -> Self {
        RealTimePacer {
            start: Instant::now(),
            cancel,
        }
    }
}

impl Pacer for RealTimePacer {
    fn begin(&mut self) {
        self.start = Instant::now();
    }

    fn wait_until(&mut self, offset: Duration) -> Pace {
        let deadline = self.start + offset;
        match self.cancel.recv_deadline(deadline) {
            Ok(()) => Pace::Cancelled,
            Err(RecvTimeoutError::Timeout) => Pace::Continue,
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody can cancel any more; keep time without the channel.
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
                Pace::Continue
            }
        }
    }
}

/// Runs sessions as fast as possible. Optionally honours a cancel signal.
#[derive(Default)]
pub struct Unpaced {
    cancel: Option<Receiver<()>>,
}

impl Unpaced {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: Receiver<()>) -> Self {
        Unpaced {
            cancel: Some(cancel),
        }
    }
}

impl Pacer for Unpaced {
    fn wait_until(&mut self, _offset: Duration) -> Pace {
        match self.cancel.as_ref().map(|rx| rx.try_recv()) {
            Some(Ok(())) => Pace::Cancelled,
            Some(Err(TryRecvError::Empty | TryRecvError::Disconnected)) | None => Pace::Continue,
        }
    }
}

/// Cancels a running session from another thread.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: Sender<()>,
}

impl SessionHandle {
    /// A handle and the receiver the session's pacer listens on.
    pub fn pair() -> (SessionHandle, Receiver<()>) {
        let (tx, rx) = bounded(1);
        (SessionHandle { cancel: tx }, rx)
    }

    /// Returns false if the session already ended.
    pub fn cancel(&self) -> bool {
        match self.cancel.try_send(()) {
            Ok(()) => true,
            // A cancel is already pending.
            Err(crossbeam::channel::TrySendError::Full(())) => true,
            Err(crossbeam::channel::TrySendError::Disconnected(())) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriverState::Idle => "idle",
            DriverState::Running => "running",
            DriverState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Run-state of one playback call.
struct ClockSession {
    current_pulse: u32,
    total_pulses: u32,
    start_wall_time: Instant,
    midi_started: bool,
    next_queue_index: usize,
}

/// What a session did, for the caller's summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackReport {
    pub bpm: f64,
    pub total_pulses: u32,
    pub pulses_played: u32,
    pub notes_sent: usize,
    pub parameter_changes: usize,
    pub clock_pulses: usize,
    /// Pulse the transport start went out on, if it did.
    pub started_at_pulse: Option<u32>,
    pub stop_sent: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl fmt::Display for PlaybackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bars = self.total_pulses as f64 / PULSES_PER_BAR as f64;
        if self.cancelled {
            write!(
                f,
                "Playback cancelled at pulse {} of {} ({} bars at {} BPM)",
                self.pulses_played, self.total_pulses, bars, self.bpm
            )?;
        } else {
            write!(
                f,
                "Played {} bars ({} pulses) at {} BPM",
                bars, self.total_pulses, self.bpm
            )?;
        }
        write!(
            f,
            ": {} notes, {} parameter changes, {} clock pulses",
            self.notes_sent, self.parameter_changes, self.clock_pulses
        )?;
        match self.started_at_pulse {
            Some(pulse) => {
                write!(
                    f,
                    "; transport started at beat {}",
                    pulse as f64 / PULSES_PER_BEAT as f64
                )?;
                if self.stop_sent {
                    write!(f, ", stop sent")?;
                }
            }
            None => write!(f, "; no transport sent")?,
        }
        write!(f, " ({:.2}s)", self.elapsed.as_secs_f64())
    }
}

/// Ticks the pulse clock over a [`Schedule`] and writes everything due to
/// the sink.
pub struct PulseClockDriver {
    sink: SharedSink,
    state: DriverState,
}

impl PulseClockDriver {
    pub fn new(sink: SharedSink) -> Self {
        PulseClockDriver {
            sink,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn enter(&mut self, state: DriverState) {
        debug!("Clock driver {} -> {}", self.state, state);
        self.state = state;
    }

    pub fn play(
        &mut self,
        schedule: &Schedule,
        mut transport: Transport,
        bpm: f64,
        pacer: &mut dyn Pacer,
    ) -> Result<PlaybackReport> {
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(Error::out_of_range("bpm", bpm, MIN_BPM, MAX_BPM));
        }
        let spp = seconds_per_pulse(bpm);
        let timers = NoteOffTimers::spawn(self.sink.clone())?;

        self.enter(DriverState::Running);
        pacer.begin();
        let mut session = ClockSession {
            current_pulse: 0,
            total_pulses: schedule.total_pulses,
            start_wall_time: Instant::now(),
            midi_started: false,
            next_queue_index: 0,
        };
        let mut report = PlaybackReport {
            bpm,
            total_pulses: schedule.total_pulses,
            ..Default::default()
        };
        info!(
            "Playback started: {} pulses at {} BPM, {} notes, {} parameter changes, transport {}",
            session.total_pulses,
            bpm,
            schedule.note_count(),
            schedule.parameter_count(),
            if transport.is_enabled() { "on" } else { "off" }
        );

        let outcome = self.run_pulses(
            schedule,
            &mut transport,
            spp,
            pacer,
            &timers,
            &mut session,
            &mut report,
        );

        self.enter(DriverState::Stopped);
        // Stop goes out on cancel and error too, so the receiver never keeps
        // running on its own.
        let stop = transport.finish();
        if let Some(stop) = &stop {
            let sent = self.sink.send(stop);
            report.stop_sent = sent.is_ok();
            if outcome.is_ok() {
                sent?;
            }
        }

        if report.cancelled || outcome.is_err() {
            timers.cancel();
        } else {
            timers.finish();
        }

        report.elapsed = session.start_wall_time.elapsed();
        self.enter(DriverState::Idle);
        outcome?;

        info!("{}", report);
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pulses(
        &self,
        schedule: &Schedule,
        transport: &mut Transport,
        spp: f64,
        pacer: &mut dyn Pacer,
        timers: &NoteOffTimers,
        session: &mut ClockSession,
        report: &mut PlaybackReport,
    ) -> Result<()> {
        for pulse in 0..session.total_pulses {
            session.current_pulse = pulse;

            let start = transport.on_pulse(pulse);
            if !start.is_empty() {
                for message in &start {
                    self.sink.send(message)?;
                }
                session.midi_started = true;
                report.started_at_pulse = Some(pulse);
                info!("Transport started at pulse {}", pulse);
            }

            if session.midi_started {
                self.sink.send(&MidiMessage::Clock)?;
                report.clock_pulses += 1;
            }

            for event in schedule.queue.due_at(pulse, &mut session.next_queue_index) {
                match &event.kind {
                    EventKind::Note {
                        note,
                        velocity,
                        duration_sec,
                        channel,
                    } => {
                        self.note(timers, *channel, *note, *velocity, *duration_sec)?;
                        report.notes_sent += 1;
                    }
                    EventKind::Parameter {
                        address,
                        value,
                        channel,
                        ..
                    } => {
                        for message in encode(*address, *value, *channel)? {
                            self.sink.send(&message)?;
                        }
                        report.parameter_changes += 1;
                    }
                }
            }

            if let Some(table) = &schedule.loop_table {
                for (note, velocity) in table.notes_at(pulse) {
                    self.note(timers, schedule.channel, note, velocity, schedule.trigger_gate_sec)?;
                    report.notes_sent += 1;
                }
            }

            report.pulses_played = pulse + 1;
            let deadline = duration_of("pulse deadline", (pulse + 1) as f64 * spp)?;
            if pacer.wait_until(deadline) == Pace::Cancelled {
                info!("Playback cancelled at pulse {}", session.current_pulse);
                report.cancelled = true;
                break;
            }
        }
        Ok(())
    }

    fn note(
        &self,
        timers: &NoteOffTimers,
        channel: Channel,
        note: u8,
        velocity: u8,
        duration_sec: f64,
    ) -> Result<()> {
        // Checked before the note goes on, so a bad length never leaves it hanging.
        let length = duration_of("note duration", duration_sec)?;
        self.sink.send(&MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })?;
        timers.schedule(length, MidiMessage::NoteOff { channel, note });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::RecordingSink;
    use crate::params::DigitaktParameters;
    use crate::timing::sequence::{AutomationPoint, LoopNote, LoopPattern, TrackTrigger};
    use crate::timing::ScheduleBuilder;
    use std::sync::Arc;

    fn ch() -> Channel {
        Channel::from_user(1).unwrap()
    }

    fn on_air(messages: &[MidiMessage]) -> Vec<MidiMessage> {
        // Note-offs arrive from the timer thread at wall-clock times.
        messages
            .iter()
            .filter(|m| !matches!(m, MidiMessage::NoteOff { .. }))
            .cloned()
            .collect()
    }

    fn trigger(beat: f64, track: f64) -> TrackTrigger {
        TrackTrigger::from_fields(0, &[beat, track, 100.0]).unwrap()
    }

    #[test]
    fn clock_starts_with_transport_and_stops_at_end() {
        let sink = Arc::new(RecordingSink::new());
        let schedule = ScheduleBuilder::new(1.0, ch())
            .track_triggers([trigger(0.0, 1.0), trigger(1.0, 1.0)])
            .build(&DigitaktParameters)
            .unwrap();
        let mut driver = PulseClockDriver::new(sink.clone());
        let report = driver
            .play(&schedule, Transport::immediate(), 120.0, &mut Unpaced::new())
            .unwrap();

        let sent = on_air(&sink.messages());
        assert_eq!(sent[0], MidiMessage::Start);
        assert_eq!(sent[1], MidiMessage::Clock);
        assert!(matches!(sent[2], MidiMessage::NoteOn { note: 0, .. }));
        assert_eq!(sent.last(), Some(&MidiMessage::Stop));
        assert_eq!(sent.iter().filter(|m| **m == MidiMessage::Clock).count(), 96);

        assert_eq!(report.clock_pulses, 96);
        assert_eq!(report.notes_sent, 2);
        assert!(report.stop_sent);
        assert_eq!(driver.state(), DriverState::Idle);

        let offs = sink
            .messages()
            .iter()
            .filter(|m| matches!(m, MidiMessage::NoteOff { note: 0, .. }))
            .count();
        assert_eq!(offs, 2);
    }

    #[test]
    fn loop_notes_repeat_every_loop() {
        let sink = Arc::new(RecordingSink::new());
        let notes = [[0.0, 0.0, 100.0], [2.0, 2.0, 90.0]]
            .iter()
            .enumerate()
            .map(|(i, fields)| LoopNote::from_fields(i, fields).unwrap())
            .collect();
        let schedule = ScheduleBuilder::new(2.0, ch())
            .loop_pattern(LoopPattern {
                length_bars: 1.0,
                notes,
            })
            .build(&DigitaktParameters)
            .unwrap();
        let report = PulseClockDriver::new(sink.clone())
            .play(&schedule, Transport::immediate(), 120.0, &mut Unpaced::new())
            .unwrap();

        // (clocks sent so far, note) for every note-on.
        let mut clocks = 0;
        let mut hits = Vec::new();
        for message in on_air(&sink.messages()) {
            match message {
                MidiMessage::Clock => clocks += 1,
                MidiMessage::NoteOn { note, .. } => hits.push((clocks, note)),
                _ => {}
            }
        }
        // Pulses 0, 48, 96 and 144; each note follows its pulse's clock.
        assert_eq!(hits, vec![(1, 0), (49, 2), (97, 0), (145, 2)]);
        assert_eq!(report.notes_sent, 4);
    }

    #[test]
    fn deferred_start_holds_clock_until_start_pulse() {
        let sink = Arc::new(RecordingSink::new());
        let schedule = ScheduleBuilder::new(2.0, ch())
            .track_triggers([trigger(0.0, 1.0)])
            .build(&DigitaktParameters)
            .unwrap();
        let transport = Transport::new(4.0, true, true).unwrap();
        let report = PulseClockDriver::new(sink.clone())
            .play(&schedule, transport, 120.0, &mut Unpaced::new())
            .unwrap();

        let sent = on_air(&sink.messages());
        // Count-in trigger goes out before any transport message.
        assert!(matches!(sent[0], MidiMessage::NoteOn { .. }));
        assert_eq!(sent[1], MidiMessage::SongPosition(16));
        assert_eq!(sent[2], MidiMessage::Start);
        assert_eq!(sent[3], MidiMessage::Clock);
        assert_eq!(sent.iter().filter(|m| **m == MidiMessage::Start).count(), 1);
        assert_eq!(report.clock_pulses, 96);
        assert_eq!(report.started_at_pulse, Some(96));
    }

    #[test]
    fn start_beyond_end_sends_no_transport() {
        let sink = Arc::new(RecordingSink::new());
        let schedule = ScheduleBuilder::new(1.0, ch())
            .track_triggers([trigger(0.0, 1.0)])
            .build(&DigitaktParameters)
            .unwrap();
        let transport = Transport::new(8.0, true, true).unwrap();
        let report = PulseClockDriver::new(sink.clone())
            .play(&schedule, transport, 120.0, &mut Unpaced::new())
            .unwrap();

        assert!(sink.messages().iter().all(|m| !m.is_realtime()));
        assert_eq!(report.started_at_pulse, None);
        assert!(!report.stop_sent);
        assert!(report.to_string().contains("no transport sent"));
    }

    #[test]
    fn parameter_events_are_encoded() {
        let sink = Arc::new(RecordingSink::new());
        let schedule = ScheduleBuilder::new(1.0, ch())
            .automation(
                "filter_resonance",
                vec![AutomationPoint { beat: 0.0, value: 64 }],
            )
            .build(&DigitaktParameters)
            .unwrap();
        let transport = Transport::new(0.0, false, true).unwrap();
        let report = PulseClockDriver::new(sink.clone())
            .play(&schedule, transport, 120.0, &mut Unpaced::new())
            .unwrap();

        let bytes: Vec<Vec<u8>> = sink.messages().iter().map(|m| m.to_bytes()).collect();
        assert_eq!(
            bytes,
            vec![vec![0xB0, 99, 1], vec![0xB0, 98, 21], vec![0xB0, 6, 64], vec![0xB0, 38, 0]]
        );
        assert_eq!(report.parameter_changes, 1);
        assert_eq!(report.clock_pulses, 0);
    }

    #[test]
    fn cancel_stops_and_releases_notes() {
        let sink = Arc::new(RecordingSink::new());
        let melody = crate::timing::MelodyNote::from_fields(0, &[0.0, 60.0, 100.0, 30.0]).unwrap();
        let schedule = ScheduleBuilder::new(4.0, ch())
            .melody([melody])
            .build(&DigitaktParameters)
            .unwrap();
        let (handle, cancel) = SessionHandle::pair();
        assert!(handle.cancel());

        let started = Instant::now();
        let report = PulseClockDriver::new(sink.clone())
            .play(&schedule, Transport::immediate(), 120.0, &mut Unpaced::with_cancel(cancel))
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.pulses_played, 1);
        assert!(report.stop_sent);
        // The 30 s note is released right away rather than left hanging.
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(sink
            .messages()
            .contains(&MidiMessage::NoteOff { channel: ch(), note: 60 }));
    }

    #[test]
    fn real_time_pacing_tracks_wall_clock() {
        let sink = Arc::new(RecordingSink::new());
        let schedule = ScheduleBuilder::new(0.25, ch()).build(&DigitaktParameters).unwrap();
        let (_handle, cancel) = SessionHandle::pair();
        let mut pacer = RealTimePacer::new(cancel);
        // 24 pulses at 300 BPM is 0.2 s.
        let report = PulseClockDriver::new(sink)
            .play(&schedule, Transport::immediate(), 300.0, &mut pacer)
            .unwrap();
        assert!(report.elapsed >= Duration::from_millis(195));
        assert!(report.elapsed < Duration::from_secs(2));
    }

    #[test]
    fn rejects_tempo_outside_range() {
        let sink = Arc::new(RecordingSink::new());
        let schedule = ScheduleBuilder::new(1.0, ch()).build(&DigitaktParameters).unwrap();
        let err = PulseClockDriver::new(sink.clone())
            .play(&schedule, Transport::immediate(), 301.0, &mut Unpaced::new())
            .unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn cancel_after_session_reports_false() {
        let (handle, cancel) = SessionHandle::pair();
        drop(cancel);
        assert!(!handle.cancel());
    }
}
