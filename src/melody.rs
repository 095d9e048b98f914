//! The most recently played melody and its Standard MIDI File export.

use crate::error::{Error, Result};
use crate::midi::Channel;
use crate::timing::MelodyNote;
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;
use tracing::info;

pub const TICKS_PER_BEAT: u16 = 480;

#[derive(Debug, Clone, PartialEq)]
pub struct MelodyTake {
    pub bpm: f64,
    pub channel: Channel,
    pub notes: Vec<MelodyNote>,
}

impl MelodyTake {
    fn ticks(beats: f64) -> u32 {
        (beats * TICKS_PER_BEAT as f64) as u32
    }

    /// One track: tempo, then note on/off pairs. Beats map to ticks
    /// directly; durations are seconds and go through the tempo.
    pub fn to_smf(&self) -> Smf<'static> {
        let seconds_per_beat = 60.0 / self.bpm;
        let channel = self.channel.index().into();

        let mut events: Vec<(u32, TrackEventKind<'static>)> = Vec::with_capacity(self.notes.len() * 2);
        for note in &self.notes {
            let on = Self::ticks(note.beat);
            let off = on + Self::ticks(note.duration_sec / seconds_per_beat);
            events.push((
                on,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn {
                        key: note.note.into(),
                        vel: note.velocity.into(),
                    },
                },
            ));
            events.push((
                off,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff {
                        key: note.note.into(),
                        vel: 0.into(),
                    },
                },
            ));
        }
        events.sort_by_key(|(tick, _)| *tick);

        let mut track = Track::new();
        let us_per_beat = (60_000_000.0 / self.bpm) as u32;
        track.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat.into())),
        });
        let mut last_tick = 0;
        for (tick, kind) in events {
            track.push(TrackEvent {
                delta: tick.saturating_sub(last_tick).into(),
                kind,
            });
            last_tick = tick;
        }
        track.push(TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        Smf {
            header: Header {
                format: Format::SingleTrack,
                timing: Timing::Metrical(TICKS_PER_BEAT.into()),
            },
            tracks: vec![track],
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if self.notes.is_empty() {
            return Err(Error::NoMelody);
        }
        let mut bytes = Vec::new();
        self.to_smf()
            .write(&mut bytes)
            .map_err(|e| Error::MidiFile(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, bytes)?;
        info!("Saved {} notes to {}", self.notes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take() -> MelodyTake {
        let notes = [
            [0.0, 60.0, 100.0, 0.2],
            [1.0, 62.0, 100.0, 0.2],
            [2.0, 64.0, 90.0, 0.4],
        ]
        .iter()
        .enumerate()
        .map(|(i, fields)| MelodyNote::from_fields(i, fields).unwrap())
        .collect();
        MelodyTake {
            bpm: 120.0,
            channel: Channel::from_user(1).unwrap(),
            notes,
        }
    }

    fn absolute_midi(smf: &Smf) -> Vec<(u32, MidiMessage)> {
        let mut tick = 0;
        let mut out = Vec::new();
        for event in &smf.tracks[0] {
            tick += event.delta.as_int();
            if let TrackEventKind::Midi { message, .. } = event.kind {
                out.push((tick, message));
            }
        }
        out
    }

    #[test]
    fn beats_and_durations_become_ticks() {
        let smf = take().to_smf();
        let events = absolute_midi(&smf);
        assert_eq!(events.len(), 6);
        assert_eq!(events[0].0, 0);
        // 0.2 s at 120 BPM is 0.4 beats = 192 ticks.
        assert_eq!(events[1].0, 192);
        assert!(matches!(events[1].1, MidiMessage::NoteOff { .. }));
        assert_eq!(events[2].0, 480);
        assert_eq!(events[5].0, 960 + 384);
    }

    #[test]
    fn tempo_meta_comes_first() {
        let smf = take().to_smf();
        assert_eq!(smf.header.timing, Timing::Metrical(480.into()));
        match smf.tracks[0][0].kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => assert_eq!(t.as_int(), 500_000),
            ref other => panic!("expected tempo, got {other:?}"),
        }
    }

    #[test]
    fn saved_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takes").join("melody.mid");
        take().save(&path).unwrap();

        let bytes = fs::read(&path).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 1);
        assert_eq!(absolute_midi(&smf).len(), 6);
    }

    #[test]
    fn empty_take_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let empty = MelodyTake {
            notes: Vec::new(),
            ..take()
        };
        assert!(matches!(
            empty.save(&dir.path().join("x.mid")),
            Err(Error::NoMelody)
        ));
    }
}
