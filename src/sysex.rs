//! SysEx payload handling.
//!
//! Payloads are carried without the F0/F7 framing; [`MidiMessage::SysEx`]
//! adds it on the wire.
//!
//! [`MidiMessage::SysEx`]: crate::midi::MidiMessage::SysEx

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

pub const ELEKTRON_MANUFACTURER_ID: [u8; 3] = [0x00, 0x20, 0x3C];

/// Device byte used by dump requests. Not confirmed against hardware.
pub const DIGITAKT_DEVICE_ID: u8 = 0x0E;

/// Bytes shown before a payload display is shortened.
const DISPLAY_BYTES: usize = 16;

/// Validates a payload given as integers. Framing bytes and anything else
/// above 0x7F are rejected.
pub fn payload_from_bytes(data: &[i64]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Err(Error::InvalidArgument("SysEx payload is empty".into()));
    }
    data.iter()
        .enumerate()
        .map(|(i, &b)| {
            if (0..=0x7F).contains(&b) {
                Ok(b as u8)
            } else {
                Err(Error::out_of_range(format!("SysEx byte #{i}"), b as f64, 0.0, 127.0))
            }
        })
        .collect()
}

/// Parses `"00 20 3C"`, `"00203C"` or `"0x00 0x20 0x3C"`.
pub fn parse_hex(hex: &str) -> Result<Vec<u8>> {
    let digits: String = hex
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(Error::InvalidArgument(format!(
            "hex string has an odd number of digits: '{hex}'"
        )));
    }
    let bytes = (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = digits.get(i..i + 2).unwrap_or_default();
            u8::from_str_radix(pair, 16)
                .map(i64::from)
                .map_err(|_| Error::InvalidArgument(format!("invalid hex byte '{pair}'")))
        })
        .collect::<Result<Vec<i64>>>()?;
    payload_from_bytes(&bytes)
}

/// `F0 00 20 3C ... F7`, shortened after the first few bytes.
pub fn display(payload: &[u8]) -> String {
    let mut text = String::from("F0");
    for b in payload.iter().take(DISPLAY_BYTES) {
        let _ = write!(text, " {b:02X}");
    }
    if payload.len() > DISPLAY_BYTES {
        let _ = write!(text, " ... ({} bytes total)", payload.len());
    }
    text.push_str(" F7");
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpKind {
    Pattern,
    Sound,
    Kit,
    Project,
}

impl DumpKind {
    pub fn label(self) -> &'static str {
        match self {
            DumpKind::Pattern => "pattern",
            DumpKind::Sound => "sound",
            DumpKind::Kit => "kit",
            DumpKind::Project => "project",
        }
    }
}

/// Builds a dump request.
///
/// Experimental: the device's dump request format is undocumented and the
/// command bytes below are unverified placeholders. Callers must present
/// the result as such.
pub fn dump_request(kind: DumpKind, bank: u8, pattern: u8) -> Result<Vec<u8>> {
    if bank > 15 {
        return Err(Error::out_of_range("bank", bank as f64, 0.0, 15.0));
    }
    if pattern > 15 {
        return Err(Error::out_of_range("pattern_number", pattern as f64, 0.0, 15.0));
    }
    let mut data = ELEKTRON_MANUFACTURER_ID.to_vec();
    data.push(DIGITAKT_DEVICE_ID);
    match kind {
        DumpKind::Pattern => data.extend([0x67, bank, pattern]),
        DumpKind::Sound => data.extend([0x68, 0x00]),
        DumpKind::Kit => data.extend([0x69, 0x00]),
        DumpKind::Project => data.extend([0x6A, 0x00]),
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formats() {
        assert_eq!(parse_hex("00203C").unwrap(), vec![0x00, 0x20, 0x3C]);
        assert_eq!(parse_hex("00 20 3c").unwrap(), vec![0x00, 0x20, 0x3C]);
        assert_eq!(parse_hex("0x00 0x20 0x3C 0x01").unwrap(), vec![0, 0x20, 0x3C, 1]);
    }

    #[test]
    fn hex_errors() {
        assert!(parse_hex("00 2").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("").is_err());
        // F0 framing is added on the wire, never accepted in the payload.
        assert!(parse_hex("F0 00 F7").is_err());
    }

    #[test]
    fn byte_payloads() {
        assert_eq!(payload_from_bytes(&[0, 32, 60]).unwrap(), vec![0, 32, 60]);
        assert!(payload_from_bytes(&[0, 128]).is_err());
        assert!(payload_from_bytes(&[]).is_err());
    }

    #[test]
    fn long_payload_display_is_shortened() {
        assert_eq!(display(&[0x00, 0x20, 0x3C]), "F0 00 20 3C F7");
        let long = vec![0x01; 20];
        let shown = display(&long);
        assert!(shown.ends_with("... (20 bytes total) F7"));
        assert_eq!(shown.matches(" 01").count(), 16);
    }

    #[test]
    fn dump_requests() {
        assert_eq!(
            dump_request(DumpKind::Pattern, 2, 5).unwrap(),
            vec![0x00, 0x20, 0x3C, 0x0E, 0x67, 2, 5]
        );
        assert_eq!(
            dump_request(DumpKind::Kit, 0, 0).unwrap(),
            vec![0x00, 0x20, 0x3C, 0x0E, 0x69, 0x00]
        );
        assert!(dump_request(DumpKind::Pattern, 16, 0).is_err());
    }
}
