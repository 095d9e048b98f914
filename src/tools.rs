//! The tool surface: request/response shapes and typed arguments.
//!
//! A request names a tool and carries a JSON argument object. Each tool
//! maps to one [`ToolCall`] variant, deserialized in one step so argument
//! errors come back as ordinary tool errors.

use crate::error::{Error, Result};
use crate::sysex::DumpKind;
use crate::timing::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// `(name, description)` of every tool, in listing order.
pub const TOOLS: &[(&str, &str)] = &[
    ("send_note", "Play one note: note, velocity=100, duration=0.1 s, channel=1"),
    ("send_cc", "Send a Control Change: cc_number, value, channel=1"),
    ("send_program_change", "Switch pattern with a Program Change: program, channel=1"),
    ("send_nrpn", "Send an NRPN parameter change: msb, lsb, value, channel=1"),
    ("send_parameter", "Set a named parameter: parameter, value, channel=1"),
    (
        "send_note_sequence",
        "Play notes one after another: notes [[note, velocity, duration]], delay=0.25 s, channel=1",
    ),
    ("send_transport", "Send a transport command: command (start | stop | continue)"),
    ("send_song_position", "Move the song position pointer: position in sixteenths (0-16383)"),
    ("send_sysex", "Send a SysEx message: data [bytes] or hex_string; F0/F7 are added"),
    (
        "request_sysex_dump",
        "Experimental: request a dump (pattern | sound | kit | project); command bytes are unverified",
    ),
    (
        "play_pattern",
        "Play a clock-synced pattern: bars, bpm, track_triggers, melody_notes, loop_pattern, \
         parameter_automation, automation_loop_bars, envelopes, midi_start_at_beat, preroll_bars, \
         send_clock, send_stop, channel",
    ),
    (
        "send_parameter_sweep",
        "Sweep a parameter in real time: parameter, start_value, end_value, duration_sec, \
         curve (linear | exponential | logarithmic), steps=50",
    ),
    (
        "send_parameter_envelope",
        "Run an ADSR envelope on a parameter: parameter, attack_sec, decay_sec, sustain_level, \
         release_sec, steps_per_stage=20",
    ),
    ("cancel_playback", "Cancel the running pattern or sweep; pending note-offs are sent"),
    ("list_parameters", "List named parameters, optionally for one category"),
    ("save_preset", "Save play_pattern arguments as a named preset: name, description, automation"),
    ("load_preset", "Show a saved preset: name"),
    ("list_presets", "List saved presets"),
    ("play_preset", "Play a saved preset: name"),
    ("save_last_melody", "Save the last played melody as a Standard MIDI File: filename"),
    ("midi_status", "Show the MIDI connection and playback state"),
    ("list_tools", "List the available tools"),
];

/// Incoming line: `{"id", "tool", "arguments"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Outgoing line: `{"id", "is_error", "text"}`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    pub id: Value,
    pub is_error: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub is_error: bool,
    pub text: String,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        ToolOutput {
            is_error: false,
            text: text.into(),
        }
    }

    pub fn error(error: &Error) -> Self {
        ToolOutput {
            is_error: true,
            text: format!("Error: {error}"),
        }
    }

    pub fn into_response(self, id: Value) -> ToolResponse {
        ToolResponse {
            id,
            is_error: self.is_error,
            text: self.text,
        }
    }
}

impl From<Result<String>> for ToolOutput {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) => ToolOutput::ok(text),
            Err(e) => ToolOutput::error(&e),
        }
    }
}

fn default_channel() -> u8 {
    1
}

fn default_velocity() -> i64 {
    100
}

fn default_note_duration() -> f64 {
    0.1
}

fn default_sequence_delay() -> f64 {
    0.25
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct NoArgs {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoteArgs {
    pub note: i64,
    #[serde(default = "default_velocity")]
    pub velocity: i64,
    #[serde(default = "default_note_duration")]
    pub duration: f64,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CcArgs {
    pub cc_number: i64,
    pub value: i64,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgramChangeArgs {
    pub program: i64,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NrpnArgs {
    pub msb: i64,
    pub lsb: i64,
    pub value: i64,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterArgs {
    pub parameter: String,
    pub value: i64,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoteSequenceArgs {
    /// `[note, velocity, duration_sec]`
    pub notes: Vec<Vec<f64>>,
    #[serde(default = "default_sequence_delay")]
    pub delay: f64,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportCommand {
    Start,
    Stop,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransportArgs {
    pub command: TransportCommand,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SongPositionArgs {
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SysexArgs {
    #[serde(default)]
    pub data: Option<Vec<i64>>,
    #[serde(default)]
    pub hex_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DumpArgs {
    pub dump_type: DumpKind,
    #[serde(default)]
    pub bank: u8,
    #[serde(default)]
    pub pattern_number: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopRequest {
    pub length_bars: f64,
    /// `[beat_offset, note, velocity]`
    pub notes: Vec<Vec<f64>>,
}

/// An envelope placed on the beat grid of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEnvelope {
    pub parameter: String,
    #[serde(default)]
    pub start_beat: f64,
    pub envelope: Envelope,
}

/// Arguments of `play_pattern`, and the body of a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRequest {
    pub bars: f64,
    /// Configured default tempo when absent.
    #[serde(default)]
    pub bpm: Option<f64>,
    /// `[beat, track, velocity, note?]`
    #[serde(default)]
    pub track_triggers: Vec<Vec<f64>>,
    /// `[beat, note, velocity?, duration?]`
    #[serde(default)]
    pub melody_notes: Vec<Vec<f64>>,
    #[serde(default)]
    pub loop_pattern: Option<LoopRequest>,
    /// Parameter name to `[[beat, value], ...]`.
    #[serde(default)]
    pub parameter_automation: BTreeMap<String, Vec<Vec<f64>>>,
    #[serde(default)]
    pub automation_loop_bars: Option<f64>,
    #[serde(default)]
    pub envelopes: Vec<ScheduledEnvelope>,
    #[serde(default)]
    pub midi_start_at_beat: f64,
    #[serde(default)]
    pub preroll_bars: f64,
    #[serde(default = "yes")]
    pub send_clock: bool,
    #[serde(default = "yes")]
    pub send_stop: bool,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SweepArgs {
    pub parameter: String,
    pub start_value: f64,
    pub end_value: f64,
    pub duration_sec: f64,
    #[serde(default)]
    pub curve: crate::timing::Curve,
    #[serde(default = "default_sweep_steps")]
    pub steps: u32,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_sweep_steps() -> u32 {
    50
}

fn default_stage_steps() -> u32 {
    20
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvelopeArgs {
    pub parameter: String,
    pub attack_sec: f64,
    pub decay_sec: f64,
    pub sustain_level: f64,
    pub release_sec: f64,
    #[serde(default = "default_stage_steps")]
    pub steps_per_stage: u32,
    #[serde(default = "default_channel")]
    pub channel: u8,
}

impl SweepArgs {
    pub fn envelope(&self) -> Envelope {
        Envelope::Sweep {
            start_value: self.start_value,
            end_value: self.end_value,
            duration_sec: self.duration_sec,
            curve: self.curve,
            steps: self.steps,
        }
    }
}

impl EnvelopeArgs {
    pub fn envelope(&self) -> Envelope {
        Envelope::Adsr {
            attack_sec: self.attack_sec,
            decay_sec: self.decay_sec,
            sustain_level: self.sustain_level,
            release_sec: self.release_sec,
            steps_per_stage: self.steps_per_stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListParametersArgs {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavePresetArgs {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub automation: PlayRequest,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresetNameArgs {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SaveMelodyArgs {
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    SendNote(NoteArgs),
    SendCc(CcArgs),
    SendProgramChange(ProgramChangeArgs),
    SendNrpn(NrpnArgs),
    SendParameter(ParameterArgs),
    SendNoteSequence(NoteSequenceArgs),
    SendTransport(TransportArgs),
    SendSongPosition(SongPositionArgs),
    SendSysex(SysexArgs),
    RequestSysexDump(DumpArgs),
    PlayPattern(PlayRequest),
    SendParameterSweep(SweepArgs),
    SendParameterEnvelope(EnvelopeArgs),
    CancelPlayback(NoArgs),
    ListParameters(ListParametersArgs),
    SavePreset(SavePresetArgs),
    LoadPreset(PresetNameArgs),
    ListPresets(NoArgs),
    PlayPreset(PresetNameArgs),
    SaveLastMelody(SaveMelodyArgs),
    MidiStatus(NoArgs),
    ListTools(NoArgs),
}

impl ToolCall {
    pub fn parse(tool: &str, arguments: Value) -> Result<Self> {
        if !TOOLS.iter().any(|(name, _)| *name == tool) {
            return Err(Error::InvalidArgument(format!("Unknown tool: {tool}")));
        }
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        serde_json::from_value(json!({ "tool": tool, "arguments": arguments })).map_err(|e| {
            Error::InvalidArgument(format!("bad arguments for {tool}: {e}"))
        })
    }

    /// Calls that drive the output and so need a connection.
    pub fn needs_output(&self) -> bool {
        !matches!(
            self,
            ToolCall::CancelPlayback(_)
                | ToolCall::ListParameters(_)
                | ToolCall::SavePreset(_)
                | ToolCall::LoadPreset(_)
                | ToolCall::ListPresets(_)
                | ToolCall::SaveLastMelody(_)
                | ToolCall::MidiStatus(_)
                | ToolCall::ListTools(_)
        )
    }

    /// Calls that run as a background session and answer when it ends.
    pub fn is_timed(&self) -> bool {
        matches!(
            self,
            ToolCall::PlayPattern(_)
                | ToolCall::PlayPreset(_)
                | ToolCall::SendParameterSweep(_)
                | ToolCall::SendParameterEnvelope(_)
                | ToolCall::SendNoteSequence(_)
        )
    }
}

pub fn list_tools() -> String {
    let mut text = String::from("Available tools:\n");
    for (name, description) in TOOLS {
        text.push_str(&format!("- {name}: {description}\n"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_tool_parses() {
        let samples = json!({
            "send_note": {"note": 60},
            "send_cc": {"cc_number": 74, "value": 10},
            "send_program_change": {"program": 3},
            "send_nrpn": {"msb": 1, "lsb": 21, "value": 64},
            "send_parameter": {"parameter": "filter_cutoff", "value": 64},
            "send_note_sequence": {"notes": [[60, 100, 0.1]]},
            "send_transport": {"command": "start"},
            "send_song_position": {"position": 16},
            "send_sysex": {"hex_string": "00203C"},
            "request_sysex_dump": {"dump_type": "pattern"},
            "play_pattern": {"bars": 1},
            "send_parameter_sweep": {"parameter": "filter_cutoff", "start_value": 0,
                                     "end_value": 127, "duration_sec": 1.0},
            "send_parameter_envelope": {"parameter": "filter_cutoff", "attack_sec": 0.1,
                                        "decay_sec": 0.1, "sustain_level": 64, "release_sec": 0.2},
            "cancel_playback": null,
            "list_parameters": {},
            "save_preset": {"name": "a", "automation": {"bars": 1}},
            "load_preset": {"name": "a"},
            "list_presets": null,
            "play_preset": {"name": "a"},
            "save_last_melody": {"filename": "x.mid"},
            "midi_status": {},
            "list_tools": {}
        });
        for (name, _) in TOOLS {
            let args = samples[*name].clone();
            assert!(ToolCall::parse(name, args).is_ok(), "{name} did not parse");
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        match ToolCall::parse("send_note", json!({"note": 36})).unwrap() {
            ToolCall::SendNote(args) => {
                assert_eq!(args.velocity, 100);
                assert_eq!(args.duration, 0.1);
                assert_eq!(args.channel, 1);
            }
            other => panic!("unexpected call {other:?}"),
        }

        match ToolCall::parse("play_pattern", json!({"bars": 2})).unwrap() {
            ToolCall::PlayPattern(req) => {
                assert_eq!(req.bpm, None);
                assert!(req.send_clock);
                assert!(req.send_stop);
                assert_eq!(req.midi_start_at_beat, 0.0);
                assert_eq!(req.channel, 1);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_and_bad_arguments() {
        let err = ToolCall::parse("launch_rocket", Value::Null).unwrap_err();
        assert!(err.to_string().contains("Unknown tool: launch_rocket"));
        let err = ToolCall::parse("send_cc", json!({"value": 3})).unwrap_err();
        assert!(err.to_string().contains("cc_number"));
    }

    #[test]
    fn scheduled_envelopes_parse() {
        let req: PlayRequest = serde_json::from_value(json!({
            "bars": 4,
            "envelopes": [{
                "parameter": "filter_cutoff",
                "start_beat": 4,
                "envelope": {"sweep": {"start_value": 0, "end_value": 127, "duration_sec": 1}}
            }]
        }))
        .unwrap();
        assert_eq!(req.envelopes.len(), 1);
        assert_eq!(req.envelopes[0].start_beat, 4.0);
    }

    #[test]
    fn responses_serialize_as_one_object() {
        let response = ToolOutput::ok("done").into_response(json!(7));
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"id": 7, "is_error": false, "text": "done"})
        );
    }
}
