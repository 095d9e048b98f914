//! Digitakt II CC and NRPN map (OS 1.03, manual appendix B).

use super::{ParameterAddress, ParameterResolver, ParameterSpec};
use std::collections::BTreeMap;

mod cc {
    pub const TRACK_MUTE: u8 = 94;
    pub const TRACK_LEVEL: u8 = 95;

    pub const TUNE: u8 = 16;
    pub const SAMPLE_LEVEL: u8 = 23;

    pub const FILTER_ATTACK: u8 = 70;
    pub const FILTER_DECAY: u8 = 71;
    pub const FILTER_SUSTAIN: u8 = 72;
    pub const FILTER_RELEASE: u8 = 73;
    pub const FILTER_FREQUENCY: u8 = 74;
    pub const FILTER_ENV_DEPTH: u8 = 77;

    pub const AMP_ATTACK: u8 = 79;
    pub const AMP_HOLD: u8 = 80;
    pub const AMP_DECAY: u8 = 81;
    pub const AMP_SUSTAIN: u8 = 82;
    pub const AMP_RELEASE: u8 = 83;
    pub const AMP_VOLUME: u8 = 89;
    pub const AMP_PAN: u8 = 90;

    pub const CHORUS_SEND: u8 = 12;
    pub const DELAY_SEND: u8 = 84;
    pub const REVERB_SEND: u8 = 85;
    pub const OVERDRIVE: u8 = 57;
}

/// NRPN MSB categories.
const TRACK_MSB: u8 = 1;
const FX_MSB: u8 = 2;
const TRIG_MSB: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Category {
    Filter,
    FilterEnvelope,
    Amp,
    AmpEnvelope,
    Source,
    Lfo1,
    Lfo2,
    Lfo3,
    FxSends,
    Delay,
    Reverb,
    Chorus,
    Track,
    Trig,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::Filter => "Filter",
            Category::FilterEnvelope => "Filter Envelope",
            Category::Amp => "Amp",
            Category::AmpEnvelope => "Amp Envelope",
            Category::Source => "Source/Sample",
            Category::Lfo1 => "LFO 1",
            Category::Lfo2 => "LFO 2",
            Category::Lfo3 => "LFO 3",
            Category::FxSends => "FX Sends",
            Category::Delay => "Delay FX",
            Category::Reverb => "Reverb FX",
            Category::Chorus => "Chorus FX",
            Category::Track => "Track",
            Category::Trig => "Trig",
        }
    }
}

struct Entry {
    name: &'static str,
    address: ParameterAddress,
    category: Category,
}

const fn control(name: &'static str, controller: u8, category: Category) -> Entry {
    Entry {
        name,
        address: ParameterAddress::ControlChange { controller },
        category,
    }
}

const fn nrpn(name: &'static str, msb: u8, lsb: u8, category: Category) -> Entry {
    Entry {
        name,
        address: ParameterAddress::Nrpn { msb, lsb },
        category,
    }
}

use Category::*;

const ENTRIES: &[Entry] = &[
    control("filter_cutoff", cc::FILTER_FREQUENCY, Filter),
    control("filter_frequency", cc::FILTER_FREQUENCY, Filter),
    nrpn("filter_resonance", TRACK_MSB, 21, Filter),
    nrpn("filter_type", TRACK_MSB, 22, Filter),
    control("filter_attack", cc::FILTER_ATTACK, FilterEnvelope),
    control("filter_decay", cc::FILTER_DECAY, FilterEnvelope),
    control("filter_sustain", cc::FILTER_SUSTAIN, FilterEnvelope),
    control("filter_release", cc::FILTER_RELEASE, FilterEnvelope),
    control("filter_env_depth", cc::FILTER_ENV_DEPTH, FilterEnvelope),
    control("filter_envelope_depth", cc::FILTER_ENV_DEPTH, FilterEnvelope),
    control("amp_volume", cc::AMP_VOLUME, Amp),
    control("amp_pan", cc::AMP_PAN, Amp),
    control("volume", cc::AMP_VOLUME, Amp),
    control("pan", cc::AMP_PAN, Amp),
    control("amp_attack", cc::AMP_ATTACK, AmpEnvelope),
    control("amp_hold", cc::AMP_HOLD, AmpEnvelope),
    control("amp_decay", cc::AMP_DECAY, AmpEnvelope),
    control("amp_sustain", cc::AMP_SUSTAIN, AmpEnvelope),
    control("amp_release", cc::AMP_RELEASE, AmpEnvelope),
    nrpn("amp_mode", TRACK_MSB, 40, AmpEnvelope),
    nrpn("amp_env_reset", TRACK_MSB, 41, AmpEnvelope),
    control("tune", cc::TUNE, Source),
    control("pitch", cc::TUNE, Source),
    control("sample_level", cc::SAMPLE_LEVEL, Source),
    nrpn("fine_tune", TRACK_MSB, 1, Source),
    nrpn("sample_slot", TRACK_MSB, 2, Source),
    nrpn("sample_start", TRACK_MSB, 3, Source),
    nrpn("sample_length", TRACK_MSB, 4, Source),
    nrpn("sample_loop", TRACK_MSB, 5, Source),
    nrpn("sample_volume", TRACK_MSB, 6, Source),
    nrpn("lfo1_speed", TRACK_MSB, 42, Lfo1),
    nrpn("lfo1_multiplier", TRACK_MSB, 43, Lfo1),
    nrpn("lfo1_fade", TRACK_MSB, 44, Lfo1),
    nrpn("lfo1_destination", TRACK_MSB, 45, Lfo1),
    nrpn("lfo1_waveform", TRACK_MSB, 46, Lfo1),
    nrpn("lfo1_start_phase", TRACK_MSB, 47, Lfo1),
    nrpn("lfo1_trig_mode", TRACK_MSB, 48, Lfo1),
    nrpn("lfo1_depth", TRACK_MSB, 49, Lfo1),
    nrpn("lfo2_speed", TRACK_MSB, 50, Lfo2),
    nrpn("lfo2_multiplier", TRACK_MSB, 51, Lfo2),
    nrpn("lfo2_fade", TRACK_MSB, 52, Lfo2),
    nrpn("lfo2_destination", TRACK_MSB, 53, Lfo2),
    nrpn("lfo2_waveform", TRACK_MSB, 54, Lfo2),
    nrpn("lfo2_start_phase", TRACK_MSB, 55, Lfo2),
    nrpn("lfo2_trig_mode", TRACK_MSB, 56, Lfo2),
    nrpn("lfo2_depth", TRACK_MSB, 57, Lfo2),
    nrpn("lfo3_speed", TRACK_MSB, 58, Lfo3),
    nrpn("lfo3_multiplier", TRACK_MSB, 59, Lfo3),
    nrpn("lfo3_fade", TRACK_MSB, 60, Lfo3),
    nrpn("lfo3_destination", TRACK_MSB, 61, Lfo3),
    nrpn("lfo3_waveform", TRACK_MSB, 62, Lfo3),
    nrpn("lfo3_start_phase", TRACK_MSB, 70, Lfo3),
    nrpn("lfo3_trig_mode", TRACK_MSB, 71, Lfo3),
    nrpn("lfo3_depth", TRACK_MSB, 72, Lfo3),
    control("chorus_send", cc::CHORUS_SEND, FxSends),
    control("delay_send", cc::DELAY_SEND, FxSends),
    control("reverb_send", cc::REVERB_SEND, FxSends),
    control("overdrive", cc::OVERDRIVE, FxSends),
    nrpn("delay_time", FX_MSB, 0, Delay),
    nrpn("delay_pingpong", FX_MSB, 1, Delay),
    nrpn("delay_stereo_width", FX_MSB, 2, Delay),
    nrpn("delay_feedback", FX_MSB, 3, Delay),
    nrpn("delay_hpf", FX_MSB, 4, Delay),
    nrpn("delay_lpf", FX_MSB, 5, Delay),
    nrpn("delay_reverb_send", FX_MSB, 6, Delay),
    nrpn("delay_mix", FX_MSB, 7, Delay),
    nrpn("reverb_predelay", FX_MSB, 8, Reverb),
    nrpn("reverb_decay", FX_MSB, 9, Reverb),
    nrpn("reverb_shelving_freq", FX_MSB, 10, Reverb),
    nrpn("reverb_shelving_gain", FX_MSB, 11, Reverb),
    nrpn("reverb_hpf", FX_MSB, 12, Reverb),
    nrpn("reverb_lpf", FX_MSB, 13, Reverb),
    nrpn("reverb_mix", FX_MSB, 15, Reverb),
    nrpn("chorus_depth", FX_MSB, 41, Chorus),
    nrpn("chorus_speed", FX_MSB, 42, Chorus),
    nrpn("chorus_hpf", FX_MSB, 43, Chorus),
    nrpn("chorus_width", FX_MSB, 44, Chorus),
    nrpn("chorus_delay_send", FX_MSB, 45, Chorus),
    nrpn("chorus_reverb_send", FX_MSB, 46, Chorus),
    nrpn("chorus_mix", FX_MSB, 47, Chorus),
    control("track_level", cc::TRACK_LEVEL, Track),
    control("track_mute", cc::TRACK_MUTE, Track),
    nrpn("trig_note", TRIG_MSB, 0, Trig),
    nrpn("trig_velocity", TRIG_MSB, 1, Trig),
    nrpn("trig_length", TRIG_MSB, 2, Trig),
];

const NRPN_NAMES: &[((u8, u8), &str)] = &[
    ((1, 100), "Track Level"),
    ((1, 101), "Global Mute"),
    ((1, 102), "Solo"),
    ((1, 104), "Pattern Mute"),
    ((3, 0), "Trig Note"),
    ((3, 1), "Trig Velocity"),
    ((3, 2), "Trig Length"),
    ((1, 0), "Source Tune"),
    ((1, 1), "Source Fine Tune"),
    ((1, 2), "Sample Slot"),
    ((1, 3), "Sample Start"),
    ((1, 4), "Sample Length"),
    ((1, 5), "Sample Loop"),
    ((1, 6), "Sample Volume"),
    ((1, 7), "Sample Level"),
    ((1, 16), "Filter Attack"),
    ((1, 17), "Filter Decay"),
    ((1, 18), "Filter Sustain"),
    ((1, 19), "Filter Release"),
    ((1, 20), "Filter Frequency"),
    ((1, 21), "Filter Resonance"),
    ((1, 22), "Filter Type"),
    ((1, 23), "Filter Envelope Depth"),
    ((1, 30), "Amp Attack"),
    ((1, 31), "Amp Hold"),
    ((1, 32), "Amp Decay"),
    ((1, 33), "Amp Sustain"),
    ((1, 34), "Amp Release"),
    ((1, 35), "Chorus Send"),
    ((1, 36), "Delay Send"),
    ((1, 37), "Reverb Send"),
    ((1, 38), "Pan"),
    ((1, 39), "Volume"),
    ((1, 40), "Amp Mode"),
    ((1, 41), "Amp Env Reset"),
    ((1, 42), "LFO1 Speed"),
    ((1, 43), "LFO1 Multiplier"),
    ((1, 44), "LFO1 Fade"),
    ((1, 45), "LFO1 Destination"),
    ((1, 46), "LFO1 Waveform"),
    ((1, 47), "LFO1 Start Phase"),
    ((1, 48), "LFO1 Trig Mode"),
    ((1, 49), "LFO1 Depth"),
    ((1, 50), "LFO2 Speed"),
    ((1, 51), "LFO2 Multiplier"),
    ((1, 52), "LFO2 Fade"),
    ((1, 53), "LFO2 Destination"),
    ((1, 54), "LFO2 Waveform"),
    ((1, 55), "LFO2 Start Phase"),
    ((1, 56), "LFO2 Trig Mode"),
    ((1, 57), "LFO2 Depth"),
    ((1, 58), "LFO3 Speed"),
    ((1, 59), "LFO3 Multiplier"),
    ((1, 60), "LFO3 Fade"),
    ((1, 61), "LFO3 Destination"),
    ((1, 62), "LFO3 Waveform"),
    ((1, 70), "LFO3 Start Phase"),
    ((1, 71), "LFO3 Trig Mode"),
    ((1, 72), "LFO3 Depth"),
    ((2, 0), "Delay Time"),
    ((2, 1), "Delay Pingpong"),
    ((2, 2), "Delay Stereo Width"),
    ((2, 3), "Delay Feedback"),
    ((2, 4), "Delay HPF"),
    ((2, 5), "Delay LPF"),
    ((2, 6), "Delay Reverb Send"),
    ((2, 7), "Delay Mix"),
    ((2, 8), "Reverb Predelay"),
    ((2, 9), "Reverb Decay"),
    ((2, 10), "Reverb Shelving Freq"),
    ((2, 11), "Reverb Shelving Gain"),
    ((2, 12), "Reverb HPF"),
    ((2, 13), "Reverb LPF"),
    ((2, 15), "Reverb Mix"),
    ((2, 41), "Chorus Depth"),
    ((2, 42), "Chorus Speed"),
    ((2, 43), "Chorus HPF"),
    ((2, 44), "Chorus Width"),
    ((2, 45), "Chorus Delay Send"),
    ((2, 46), "Chorus Reverb Send"),
    ((2, 47), "Chorus Mix"),
];

/// Human-readable name of an NRPN address, if the device documents it.
pub fn nrpn_name(msb: u8, lsb: u8) -> Option<&'static str> {
    NRPN_NAMES
        .iter()
        .find(|(addr, _)| *addr == (msb, lsb))
        .map(|(_, name)| *name)
}

/// The Digitakt II parameter table. Every parameter is 7-bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitaktParameters;

impl DigitaktParameters {
    pub fn new() -> Self {
        Self
    }

    /// Parameter names grouped by category, each group sorted.
    pub fn by_category(&self) -> BTreeMap<Category, Vec<&'static str>> {
        let mut groups: BTreeMap<Category, Vec<&'static str>> = BTreeMap::new();
        for entry in ENTRIES {
            groups.entry(entry.category).or_default().push(entry.name);
        }
        for names in groups.values_mut() {
            names.sort_unstable();
        }
        groups
    }

    pub fn category_of(&self, name: &str) -> Option<Category> {
        ENTRIES.iter().find(|e| e.name == name).map(|e| e.category)
    }
}

impl ParameterResolver for DigitaktParameters {
    fn lookup(&self, name: &str) -> Option<ParameterSpec> {
        ENTRIES.iter().find(|e| e.name == name).map(|e| ParameterSpec {
            name: e.name.to_string(),
            address: e.address,
            range: 0..=127,
        })
    }

    fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = ENTRIES.iter().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique() {
        let params = DigitaktParameters::new();
        let names = params.names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn aliases_share_an_address() {
        let params = DigitaktParameters::new();
        assert_eq!(
            params.resolve("filter_cutoff").unwrap().address,
            params.resolve("filter_frequency").unwrap().address
        );
        assert_eq!(
            params.resolve("volume").unwrap().address,
            ParameterAddress::ControlChange { controller: 89 }
        );
    }

    #[test]
    fn nrpn_parameters_resolve() {
        let params = DigitaktParameters::new();
        assert_eq!(
            params.resolve("filter_resonance").unwrap().address,
            ParameterAddress::Nrpn { msb: 1, lsb: 21 }
        );
        assert_eq!(
            params.resolve("trig_note").unwrap().address,
            ParameterAddress::Nrpn { msb: 3, lsb: 0 }
        );
    }

    #[test]
    fn unknown_parameter_lists_the_valid_set() {
        let params = DigitaktParameters::new();
        match params.resolve("flux_capacitor") {
            Err(Error::UnknownParameter { name, available }) => {
                assert_eq!(name, "flux_capacitor");
                assert!(available.contains("filter_cutoff"));
            }
            other => panic!("expected UnknownParameter, got {:?}", other),
        }
    }

    #[test]
    fn validation_never_clamps() {
        let spec = DigitaktParameters::new().resolve("pan").unwrap();
        assert_eq!(spec.validate(64).unwrap(), 64);
        assert!(spec.validate(128).is_err());
        assert!(spec.validate(-1).is_err());
    }

    #[test]
    fn categories_cover_every_parameter() {
        let params = DigitaktParameters::new();
        let grouped: usize = params.by_category().values().map(Vec::len).sum();
        assert_eq!(grouped, params.names().len());
        assert_eq!(params.category_of("lfo3_depth"), Some(Category::Lfo3));
    }

    #[test]
    fn nrpn_reverse_lookup() {
        assert_eq!(nrpn_name(2, 15), Some("Reverb Mix"));
        assert_eq!(nrpn_name(9, 9), None);
    }
}
