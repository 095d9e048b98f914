use crate::error::{Error, Result};
use crate::midi::{Channel, MidiMessage};
use crate::params::ParameterAddress;

pub const NRPN_MSB: u8 = 99;
pub const NRPN_LSB: u8 = 98;
pub const DATA_ENTRY_MSB: u8 = 6;
pub const DATA_ENTRY_LSB: u8 = 38;

/// Turns one parameter change into the messages that carry it.
///
/// NRPN changes are always the full burst in receiver order: parameter
/// msb, parameter lsb, data msb, data lsb (0). The value must already be
/// in range; anything above 127 is an error, never clamped, and nothing is
/// returned in that case.
pub fn encode(address: ParameterAddress, value: u8, channel: Channel) -> Result<Vec<MidiMessage>> {
    if value > 127 {
        return Err(Error::out_of_range("parameter value", value as f64, 0.0, 127.0));
    }
    Ok(match address {
        ParameterAddress::ControlChange { controller } => {
            vec![MidiMessage::control_change(channel, controller, value)]
        }
        ParameterAddress::Nrpn { msb, lsb } => vec![
            MidiMessage::control_change(channel, NRPN_MSB, msb),
            MidiMessage::control_change(channel, NRPN_LSB, lsb),
            MidiMessage::control_change(channel, DATA_ENTRY_MSB, value),
            MidiMessage::control_change(channel, DATA_ENTRY_LSB, 0),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_change_is_single_message() {
        let ch = Channel::from_index(0).unwrap();
        let msgs = encode(ParameterAddress::ControlChange { controller: 74 }, 90, ch).unwrap();
        assert_eq!(msgs, vec![MidiMessage::control_change(ch, 74, 90)]);
    }

    #[test]
    fn nrpn_burst_order() {
        let ch = Channel::from_index(0).unwrap();
        let msgs = encode(ParameterAddress::Nrpn { msb: 3, lsb: 0 }, 64, ch).unwrap();
        let bytes: Vec<Vec<u8>> = msgs.iter().map(|m| m.to_bytes()).collect();
        assert_eq!(
            bytes,
            vec![
                vec![0xB0, 99, 3],
                vec![0xB0, 98, 0],
                vec![0xB0, 6, 64],
                vec![0xB0, 38, 0],
            ]
        );
    }

    #[test]
    fn oversized_value_fails_without_messages() {
        let ch = Channel::from_index(3).unwrap();
        assert!(encode(ParameterAddress::Nrpn { msb: 1, lsb: 8 }, 128, ch).is_err());
        assert!(encode(ParameterAddress::ControlChange { controller: 7 }, 200, ch).is_err());
    }
}
