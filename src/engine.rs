use crate::config::Config;
use crate::error::{Error, Result};
use crate::melody::MelodyTake;
use crate::midi::{u7, Channel, MidiMessage, SharedSink};
use crate::params::{nrpn_name, DigitaktParameters, ParameterAddress, ParameterResolver};
use crate::preset::{Preset, PresetStore};
use crate::sysex;
use crate::timing::{
    check_seconds, duration_of, encode, parse_all, play_envelope, AutomationPoint, Envelope, LoopNote, LoopPattern,
    MelodyNote, NoteOffTimers, Pace, Pacer, PulseClockDriver, RealTimePacer, Schedule,
    ScheduleBuilder, SessionHandle, TrackTrigger, Transport, Unpaced, MAX_BPM,
    MAX_SONG_POSITION, MIN_BPM,
};
use crate::tools::{self, PlayRequest, ToolCall, ToolOutput, ToolRequest, ToolResponse};
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// One raw request line.
    Request(String),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    Response(ToolResponse),
    /// Sent last; no responses follow.
    Stopped,
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
}

pub fn spawn_engine(engine: Engine) -> Result<EngineHandle> {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    thread::Builder::new()
        .name("engine".into())
        .spawn(move || {
            engine_thread(engine, command_rx, update_tx);
        })?;

    Ok(EngineHandle {
        command_tx,
        update_rx,
    })
}

fn engine_thread(
    mut engine: Engine,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    loop {
        match command_rx.recv() {
            Ok(EngineCommand::Request(line)) => {
                let tx = update_tx.clone();
                let handled = panic::catch_unwind(AssertUnwindSafe(|| {
                    engine.handle_line(
                        &line,
                        Box::new(move |response| {
                            let _ = tx.send(EngineUpdate::Response(response));
                        }),
                    );
                }));
                if handled.is_err() {
                    error!("Request panicked: {}", line);
                    let e = Error::InvalidArgument("request stopped unexpectedly".into());
                    let _ = update_tx.send(EngineUpdate::Response(
                        ToolOutput::error(&e).into_response(request_id(&line)),
                    ));
                }
            }
            Ok(EngineCommand::Shutdown) | Err(crossbeam::channel::RecvError) => break,
        }
    }

    // Lets a running session report before the final update.
    engine.shutdown();
    let _ = update_tx.send(EngineUpdate::Stopped);
}

/// Best-effort id of a raw request line.
fn request_id(line: &str) -> Value {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .unwrap_or(Value::Null)
}

/// Receives a tool's result, possibly later and from another thread.
pub type Responder = Box<dyn FnOnce(ToolOutput) + Send>;

type Job = Box<dyn FnOnce(&mut dyn Pacer) -> Result<String> + Send>;

/// How background sessions wait between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    RealTime,
    /// No waiting; for tests and offline checks.
    Unpaced,
}

struct Playback {
    kind: &'static str,
    handle: SessionHandle,
    thread: JoinHandle<()>,
}

/// Owns the connection, the parameter table, presets and the last melody,
/// and runs at most one timed session at a time.
pub struct Engine {
    config: Config,
    sink: Option<SharedSink>,
    params: DigitaktParameters,
    presets: PresetStore,
    last_melody: Arc<Mutex<Option<MelodyTake>>>,
    playback: Option<Playback>,
    note_offs: Option<NoteOffTimers>,
    pacing: Pacing,
}

/// A validated `play_pattern` request.
struct PreparedPattern {
    schedule: Schedule,
    transport: Transport,
    bpm: f64,
    melody: Option<MelodyTake>,
}

impl Engine {
    pub fn new(config: Config, sink: Option<SharedSink>) -> Self {
        let presets = PresetStore::new(config.preset_dir.clone());
        Engine {
            config,
            sink,
            params: DigitaktParameters::new(),
            presets,
            last_melody: Arc::new(Mutex::new(None)),
            playback: None,
            note_offs: None,
            pacing: Pacing::RealTime,
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn is_playing(&self) -> bool {
        self.playback
            .as_ref()
            .is_some_and(|p| !p.thread.is_finished())
    }

    /// Parses one request line and answers through `respond`.
    pub fn handle_line(&mut self, line: &str, respond: Box<dyn FnOnce(ToolResponse) + Send>) {
        let request: ToolRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request: {}", e);
                respond(ToolOutput::error(&Error::Json(e)).into_response(Value::Null));
                return;
            }
        };
        let id = request.id.clone();
        debug!("Request {}: {}", id, request.tool);
        match ToolCall::parse(&request.tool, request.arguments) {
            Ok(call) => self.invoke(call, Box::new(move |output| respond(output.into_response(id)))),
            Err(e) => respond(ToolOutput::error(&e).into_response(id)),
        }
    }

    pub fn invoke(&mut self, call: ToolCall, respond: Responder) {
        if call.needs_output() && self.sink.is_none() {
            respond(ToolOutput::error(&Error::NotConnected));
            return;
        }
        if call.is_timed() {
            // The session answers when it ends; only setup failures answer here.
            let mut respond = Some(respond);
            if let Err(e) = self.start_session(call, &mut respond) {
                warn!("Session not started: {}", e);
                if let Some(respond) = respond {
                    respond(ToolOutput::error(&e));
                }
            }
            return;
        }
        let result = self.run_now(call);
        if let Err(e) = &result {
            warn!("Tool failed: {}", e);
        }
        respond(result.into());
    }

    fn sink(&self) -> Result<SharedSink> {
        self.sink.clone().ok_or(Error::NotConnected)
    }

    fn send(&self, message: &MidiMessage) -> Result<()> {
        self.sink()?.send(message)
    }

    fn run_now(&mut self, call: ToolCall) -> Result<String> {
        match call {
            ToolCall::SendNote(args) => {
                let channel = Channel::from_user(args.channel)?;
                let note = u7(args.note, "note")?;
                let velocity = u7(args.velocity, "velocity")?;
                let duration = check_seconds("duration", args.duration, false)?;
                let length = duration_of("duration", duration)?;
                self.send(&MidiMessage::NoteOn {
                    channel,
                    note,
                    velocity,
                })?;
                self.note_offs()?
                    .schedule(length, MidiMessage::NoteOff { channel, note });
                Ok(format!(
                    "Sent note {} (velocity {}) on channel {} for {}s",
                    note,
                    velocity,
                    channel.number(),
                    args.duration
                ))
            }
            ToolCall::SendCc(args) => {
                let channel = Channel::from_user(args.channel)?;
                let controller = u7(args.cc_number, "CC number")?;
                let value = u7(args.value, "CC value")?;
                self.send(&MidiMessage::control_change(channel, controller, value))?;
                Ok(format!(
                    "Sent CC {} = {} on channel {}",
                    controller,
                    value,
                    channel.number()
                ))
            }
            ToolCall::SendProgramChange(args) => {
                let channel = Channel::from_user(args.channel)?;
                let program = u7(args.program, "program")?;
                self.send(&MidiMessage::ProgramChange { channel, program })?;
                Ok(format!(
                    "Sent Program Change to {} on channel {}",
                    program,
                    channel.number()
                ))
            }
            ToolCall::SendNrpn(args) => {
                let channel = Channel::from_user(args.channel)?;
                let msb = u7(args.msb, "NRPN MSB")?;
                let lsb = u7(args.lsb, "NRPN LSB")?;
                let value = u7(args.value, "NRPN value")?;
                for message in encode(ParameterAddress::Nrpn { msb, lsb }, value, channel)? {
                    self.send(&message)?;
                }
                let label = nrpn_name(msb, lsb)
                    .map(|name| format!(" ({name})"))
                    .unwrap_or_default();
                Ok(format!(
                    "Sent NRPN {}:{}{} = {} on channel {}",
                    msb,
                    lsb,
                    label,
                    value,
                    channel.number()
                ))
            }
            ToolCall::SendParameter(args) => {
                let channel = Channel::from_user(args.channel)?;
                let spec = self.params.resolve(&args.parameter)?;
                let value = spec.validate(args.value)?;
                let messages = encode(spec.address, value, channel)?;
                for message in &messages {
                    self.send(message)?;
                }
                let via = match spec.address {
                    ParameterAddress::ControlChange { controller } => format!("CC {controller}"),
                    ParameterAddress::Nrpn { msb, lsb } => format!("NRPN {msb}:{lsb}"),
                };
                Ok(format!(
                    "Set {} = {} via {} on channel {}",
                    spec.name,
                    value,
                    via,
                    channel.number()
                ))
            }
            ToolCall::SendTransport(args) => {
                let (message, label) = match args.command {
                    tools::TransportCommand::Start => (MidiMessage::Start, "Start"),
                    tools::TransportCommand::Stop => (MidiMessage::Stop, "Stop"),
                    tools::TransportCommand::Continue => (MidiMessage::Continue, "Continue"),
                };
                self.send(&message)?;
                Ok(format!("Sent MIDI {label}"))
            }
            ToolCall::SendSongPosition(args) => {
                if !(0..=MAX_SONG_POSITION as i64).contains(&args.position) {
                    return Err(Error::out_of_range(
                        "song position",
                        args.position as f64,
                        0.0,
                        MAX_SONG_POSITION as f64,
                    ));
                }
                let position = args.position as u16;
                self.send(&MidiMessage::SongPosition(position))?;
                Ok(format!(
                    "Sent Song Position {} (beat {})",
                    position,
                    position as f64 / 4.0
                ))
            }
            ToolCall::SendSysex(args) => {
                let payload = match (&args.data, &args.hex_string) {
                    (Some(data), _) if !data.is_empty() => sysex::payload_from_bytes(data)?,
                    (_, Some(hex)) if !hex.trim().is_empty() => sysex::parse_hex(hex)?,
                    _ => {
                        return Err(Error::InvalidArgument(
                            "Must provide either 'data' array or 'hex_string'".into(),
                        ));
                    }
                };
                let shown = sysex::display(&payload);
                self.send(&MidiMessage::SysEx(payload))?;
                Ok(format!("Sent SysEx message: {shown}"))
            }
            ToolCall::RequestSysexDump(args) => {
                let payload = sysex::dump_request(args.dump_type, args.bank, args.pattern_number)?;
                let shown = sysex::display(&payload);
                self.send(&MidiMessage::SysEx(payload))?;
                Ok(format!(
                    "Sent SysEx dump request for {}: {}\n\nExperimental: the dump request \
                     format is undocumented and these command bytes are unverified. Capture \
                     the device's reply separately.",
                    args.dump_type.label(),
                    shown
                ))
            }
            ToolCall::CancelPlayback(_) => Ok(self.cancel_playback()),
            ToolCall::ListParameters(args) => self.list_parameters(args.category.as_deref()),
            ToolCall::SavePreset(args) => {
                // Only presets that would play are stored.
                self.prepare_pattern(&args.automation)?;
                let preset = Preset {
                    name: args.name,
                    description: args.description,
                    automation: args.automation,
                };
                let path = self.presets.save(&preset)?;
                Ok(format!("Saved preset '{}' to {}", preset.name, path.display()))
            }
            ToolCall::LoadPreset(args) => {
                let preset = self.presets.load(&args.name)?;
                Ok(serde_json::to_string_pretty(&preset)?)
            }
            ToolCall::ListPresets(_) => {
                let presets = self.presets.list()?;
                if presets.is_empty() {
                    return Ok(format!("No presets in {}", self.presets.dir().display()));
                }
                let mut text = format!("{} presets:\n", presets.len());
                for (name, description) in presets {
                    text.push_str(&format!("- {name}: {description}\n"));
                }
                Ok(text)
            }
            ToolCall::SaveLastMelody(args) => {
                let take = self.last_melody.lock().clone().ok_or(Error::NoMelody)?;
                let mut path = PathBuf::from(&args.filename);
                if path.extension().is_none() {
                    path.set_extension("mid");
                }
                take.save(&path)?;
                Ok(format!(
                    "Saved {} notes at {} BPM to {}",
                    take.notes.len(),
                    take.bpm,
                    path.display()
                ))
            }
            ToolCall::MidiStatus(_) => Ok(self.status()),
            ToolCall::ListTools(_) => Ok(tools::list_tools()),
            ToolCall::PlayPattern(_)
            | ToolCall::PlayPreset(_)
            | ToolCall::SendParameterSweep(_)
            | ToolCall::SendParameterEnvelope(_)
            | ToolCall::SendNoteSequence(_) => Err(Error::InvalidArgument(
                "timed tools run as sessions".into(),
            )),
        }
    }

    fn note_offs(&mut self) -> Result<&NoteOffTimers> {
        if self.note_offs.is_none() {
            self.note_offs = Some(NoteOffTimers::spawn(self.sink()?)?);
        }
        self.note_offs.as_ref().ok_or(Error::NotConnected)
    }

    fn cancel_playback(&mut self) -> String {
        match &self.playback {
            Some(playback) if !playback.thread.is_finished() => {
                if playback.handle.cancel() {
                    info!("Cancelling {}", playback.kind);
                    format!("Cancelling {}; pending note-offs are being sent", playback.kind)
                } else {
                    "Nothing to cancel".to_string()
                }
            }
            _ => "Nothing to cancel".to_string(),
        }
    }

    fn list_parameters(&self, category: Option<&str>) -> Result<String> {
        fn normalize(s: &str) -> String {
            s.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .map(|c| c.to_ascii_lowercase())
                .collect()
        }

        let groups = self.params.by_category();
        let wanted = category.map(normalize);
        let mut text = String::new();
        for (cat, names) in &groups {
            if let Some(wanted) = &wanted {
                if !normalize(cat.label()).starts_with(wanted.as_str()) {
                    continue;
                }
            }
            text.push_str(&format!("{}: {}\n", cat.label(), names.join(", ")));
        }
        if text.is_empty() {
            let labels: Vec<&str> = groups.keys().map(|c| c.label()).collect();
            return Err(Error::InvalidArgument(format!(
                "Unknown category '{}'. Categories: {}",
                category.unwrap_or_default(),
                labels.join(", ")
            )));
        }
        Ok(text)
    }

    fn status(&self) -> String {
        let connection = match &self.sink {
            Some(sink) => format!("Connected to {}", sink.name()),
            None => format!("Not connected (looking for '{}')", self.config.port_name),
        };
        let playback = match &self.playback {
            Some(p) if !p.thread.is_finished() => format!("{} running", p.kind),
            _ => "idle".to_string(),
        };
        let melody = match &*self.last_melody.lock() {
            Some(take) => format!("{} notes at {} BPM", take.notes.len(), take.bpm),
            None => "none".to_string(),
        };
        format!(
            "{connection}\nPlayback: {playback}\nLast melody: {melody}\nPresets: {}",
            self.presets.dir().display()
        )
    }

    fn prepare_pattern(&self, request: &PlayRequest) -> Result<PreparedPattern> {
        let channel = Channel::from_user(request.channel)?;
        let bpm = request.bpm.unwrap_or(self.config.default_bpm);
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(Error::out_of_range("bpm", bpm, MIN_BPM, MAX_BPM));
        }

        let triggers = parse_all(&request.track_triggers, TrackTrigger::from_fields)?;
        let melody = parse_all(&request.melody_notes, MelodyNote::from_fields)?;

        let mut builder = ScheduleBuilder::new(request.bars, channel)
            .trigger_gate(self.config.trigger_gate_sec)
            .preroll_bars(request.preroll_bars)
            .track_triggers(triggers)
            .melody(melody.iter().copied());

        if let Some(pattern) = &request.loop_pattern {
            builder = builder.loop_pattern(LoopPattern {
                length_bars: pattern.length_bars,
                notes: parse_all(&pattern.notes, LoopNote::from_fields)?,
            });
        }
        for (parameter, entries) in &request.parameter_automation {
            builder = builder.automation(
                parameter.as_str(),
                parse_all(entries, AutomationPoint::from_fields)?,
            );
        }
        for scheduled in &request.envelopes {
            if !scheduled.start_beat.is_finite() || scheduled.start_beat < 0.0 {
                return Err(Error::InvalidArgument(format!(
                    "envelope start_beat {} must be non-negative",
                    scheduled.start_beat
                )));
            }
            builder = builder.automation(
                scheduled.parameter.as_str(),
                scheduled.envelope.to_automation(scheduled.start_beat, bpm)?,
            );
        }
        if let Some(loop_bars) = request.automation_loop_bars {
            builder = builder.automation_loop_bars(loop_bars);
        }

        let schedule = builder.build(&self.params)?;
        let transport = Transport::new(
            request.midi_start_at_beat,
            request.send_clock,
            request.send_stop,
        )?;

        let melody = (!melody.is_empty()).then(|| MelodyTake {
            bpm,
            channel,
            notes: melody,
        });
        Ok(PreparedPattern {
            schedule,
            transport,
            bpm,
            melody,
        })
    }

    fn pacer(&self, cancel: Receiver<()>) -> Box<dyn Pacer + Send> {
        match self.pacing {
            Pacing::RealTime => Box::new(RealTimePacer::new(cancel)),
            Pacing::Unpaced => Box::new(Unpaced::with_cancel(cancel)),
        }
    }

    /// Validates a timed call fully, then runs it on the playback thread.
    /// `respond` is taken only once the session has started.
    fn start_session(&mut self, call: ToolCall, respond: &mut Option<Responder>) -> Result<()> {
        if self.is_playing() {
            return Err(Error::PlaybackBusy);
        }
        if let Some(finished) = self.playback.take() {
            let _ = finished.thread.join();
        }
        let sink = self.sink()?;

        let (kind, job): (&'static str, Job) = match call {
            ToolCall::PlayPattern(request) => ("pattern", self.pattern_job(&request, None, sink)?),
            ToolCall::PlayPreset(args) => {
                let preset = self.presets.load(&args.name)?;
                let job = self.pattern_job(&preset.automation, Some(preset.name.clone()), sink)?;
                ("preset", job)
            }
            ToolCall::SendParameterSweep(args) => {
                let channel = Channel::from_user(args.channel)?;
                ("sweep", self.envelope_job(&args.parameter, args.envelope(), channel, sink)?)
            }
            ToolCall::SendParameterEnvelope(args) => {
                let channel = Channel::from_user(args.channel)?;
                ("envelope", self.envelope_job(&args.parameter, args.envelope(), channel, sink)?)
            }
            ToolCall::SendNoteSequence(args) => {
                let channel = Channel::from_user(args.channel)?;
                let notes = parse_sequence(&args.notes)?;
                let delay = check_seconds("delay", args.delay, true)?;
                let job: Job = Box::new(move |pacer: &mut dyn Pacer| {
                    play_sequence(&notes, delay, channel, &sink, pacer)
                });
                ("note sequence", job)
            }
            other => {
                return Err(Error::InvalidArgument(format!("{other:?} is not a timed tool")));
            }
        };

        let Some(respond) = respond.take() else {
            return Err(Error::InvalidArgument("session already answered".into()));
        };
        let (handle, cancel) = SessionHandle::pair();
        let mut pacer = self.pacer(cancel);
        let thread = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| job(&mut *pacer)))
                    .unwrap_or_else(|_| {
                        error!("{} panicked", kind);
                        Err(Error::InvalidArgument(format!("{kind} stopped unexpectedly")))
                    });
                if let Err(e) = &result {
                    warn!("{} failed: {}", kind, e);
                }
                respond(result.into());
            })?;

        self.playback = Some(Playback {
            kind,
            handle,
            thread,
        });
        Ok(())
    }

    fn pattern_job(
        &self,
        request: &PlayRequest,
        preset: Option<String>,
        sink: SharedSink,
    ) -> Result<Job> {
        let prepared = self.prepare_pattern(request)?;
        if let Some(take) = prepared.melody {
            *self.last_melody.lock() = Some(take);
        }
        let PreparedPattern {
            schedule,
            transport,
            bpm,
            ..
        } = prepared;
        Ok(Box::new(move |pacer: &mut dyn Pacer| {
            let mut driver = PulseClockDriver::new(sink);
            let report = driver.play(&schedule, transport, bpm, pacer)?;
            Ok(match preset {
                Some(name) => format!("Preset '{name}': {report}"),
                None => report.to_string(),
            })
        }))
    }

    fn envelope_job(
        &self,
        parameter: &str,
        envelope: Envelope,
        channel: Channel,
        sink: SharedSink,
    ) -> Result<Job> {
        let spec = self.params.resolve(parameter)?;
        // Fail before the session starts if any value is out of range.
        for point in envelope.generate()? {
            spec.validate(point.value)?;
        }
        Ok(Box::new(move |pacer: &mut dyn Pacer| {
            let report = play_envelope(&envelope, &spec, channel, &sink, pacer)?;
            Ok(report.to_string())
        }))
    }

    /// Cancels any session and waits for it to report.
    pub fn shutdown(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.handle.cancel();
            if playback.thread.join().is_err() {
                error!("Playback thread panicked");
            }
        }
        if let Some(timers) = self.note_offs.take() {
            timers.finish();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// `[note, velocity, duration_sec]` entries of a note sequence.
fn parse_sequence(notes: &[Vec<f64>]) -> Result<Vec<(u8, u8, f64)>> {
    const LIST: &str = "note sequence";
    if notes.is_empty() {
        return Err(Error::InvalidArgument("note sequence is empty".into()));
    }
    notes
        .iter()
        .enumerate()
        .map(|(index, fields)| {
            let [note, velocity, duration] = fields[..] else {
                return Err(Error::malformed(LIST, index, "expected [note, velocity, duration]"));
            };
            let byte = |value: f64, what: &str| {
                if value.fract() == 0.0 && (0.0..=127.0).contains(&value) {
                    Ok(value as u8)
                } else {
                    Err(Error::malformed(LIST, index, format!("{what} {value} outside 0-127")))
                }
            };
            let duration = check_seconds("duration", duration, false)
                .map_err(|e| Error::malformed(LIST, index, e.to_string()))?;
            Ok((byte(note, "note")?, byte(velocity, "velocity")?, duration))
        })
        .collect()
}

/// Plays notes back to back: each held for its duration, then `delay`
/// before the next. Every note that went on is released, even on cancel.
fn play_sequence(
    notes: &[(u8, u8, f64)],
    delay: f64,
    channel: Channel,
    sink: &SharedSink,
    pacer: &mut dyn Pacer,
) -> Result<String> {
    pacer.begin();
    let mut at = 0.0;
    let mut played = 0;
    let mut cancelled = false;
    for &(note, velocity, duration) in notes {
        if pacer.wait_until(duration_of("note offset", at)?) == Pace::Cancelled {
            cancelled = true;
            break;
        }
        let release = duration_of("note offset", at + duration)?;
        sink.send(&MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        })?;
        at += duration;
        cancelled = pacer.wait_until(release) == Pace::Cancelled;
        sink.send(&MidiMessage::NoteOff { channel, note })?;
        played += 1;
        if cancelled {
            break;
        }
        at += delay;
    }
    Ok(format!(
        "{} sequence of {} of {} notes on channel {}",
        if cancelled { "Cancelled" } else { "Sent" },
        played,
        notes.len(),
        channel.number()
    ))
}
