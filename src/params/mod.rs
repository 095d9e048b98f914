//! Parameter names and their wire addresses.

mod digitakt;

pub use digitakt::{nrpn_name, Category, DigitaktParameters};

use crate::error::{Error, Result};
use std::ops::RangeInclusive;

/// Where a parameter lives on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterAddress {
    /// A single Control Change.
    ControlChange { controller: u8 },
    /// The four-message NRPN burst: category (msb), index (lsb), data.
    Nrpn { msb: u8, lsb: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub address: ParameterAddress,
    pub range: RangeInclusive<u8>,
}

impl ParameterSpec {
    /// Rejects values outside the parameter's range. Never clamps.
    pub fn validate(&self, value: i64) -> Result<u8> {
        let (min, max) = (*self.range.start() as i64, *self.range.end() as i64);
        if value < min || value > max {
            return Err(Error::out_of_range(
                format!("'{}'", self.name),
                value as f64,
                min as f64,
                max as f64,
            ));
        }
        Ok(value as u8)
    }
}

/// Static name -> address lookup.
pub trait ParameterResolver: Send + Sync {
    fn lookup(&self, name: &str) -> Option<ParameterSpec>;

    /// All known names, sorted.
    fn names(&self) -> Vec<&'static str>;

    fn resolve(&self, name: &str) -> Result<ParameterSpec> {
        self.lookup(name).ok_or_else(|| Error::UnknownParameter {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }
}
