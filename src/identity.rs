//! Device identity parsing.
//!
//! Some devices report their capabilities (voltage range, channel count,
//! output variant) in the identity reply, and the driver cannot build its
//! channels until that reply has been parsed. The parsed [`DeviceIdentity`]
//! is immutable and shared by `Arc` with every channel that needs it to
//! build commands.

use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::error::{AppResult, DaqError};

/// Output stage variant encoded as one character in the identity reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Bipolar,
    Unipolar,
    Quadrupole,
    Steerer,
    BipolarMillivolt,
}

impl OutputType {
    const TABLE: [(char, OutputType); 5] = [
        ('b', OutputType::Bipolar),
        ('u', OutputType::Unipolar),
        ('q', OutputType::Quadrupole),
        ('s', OutputType::Steerer),
        ('m', OutputType::BipolarMillivolt),
    ];

    pub fn from_code(code: char) -> Option<Self> {
        Self::TABLE.iter().find(|(c, _)| *c == code).map(|(_, t)| *t)
    }

    pub fn code(self) -> char {
        Self::TABLE
            .iter()
            .find(|(_, t)| *t == self)
            .map(|(c, _)| *c)
            .unwrap_or('b')
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputType::Bipolar => "bipolar",
            OutputType::Unipolar => "unipolar",
            OutputType::Quadrupole => "quadrupole",
            OutputType::Steerer => "steerer",
            OutputType::BipolarMillivolt => "bipolar millivolt",
        };
        f.write_str(s)
    }
}

/// Capabilities reported by a multi-channel source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceIdentity {
    /// Model family prefix (`HV`, `BS`).
    pub model: String,
    /// Three-digit serial.
    pub serial: String,
    /// Full-scale output, in volts.
    pub range: f64,
    /// Number of output channels.
    pub channel_count: usize,
    pub variant: OutputType,
}

impl DeviceIdentity {
    /// Address prefix used by every command sent to this device.
    pub fn identifier(&self) -> String {
        format!("{}{}", self.model, self.serial)
    }

    /// Identity reply that [`IdentityParser::stahl`] parses back into `self`.
    pub fn to_reply(&self) -> String {
        format!(
            "{}{} {:03} {:02} {}",
            self.model,
            self.serial,
            self.range.round() as i64,
            self.channel_count,
            self.variant.code()
        )
    }
}

/// Fixed-grammar identity reply parser.
#[derive(Debug, Clone)]
pub struct IdentityParser {
    pattern: Regex,
}

impl IdentityParser {
    /// Parser for replies of the form `HV324 300 16 b`: model prefix and
    /// serial, three-digit range, two-digit channel count, variant code.
    /// The whole reply must match, apart from surrounding whitespace.
    pub fn stahl() -> Self {
        Self::with_pattern(r"^\s*(HV|BS)(\d{3}) (\d{3}) (\d{2}) ([buqsm])\s*$")
    }

    fn with_pattern(pattern: &str) -> Self {
        // Patterns are compile-time literals; a failure here is a programming error.
        #[allow(clippy::expect_used)]
        let pattern = Regex::new(pattern).expect("identity pattern must compile");
        Self { pattern }
    }

    /// Extract the identity fields from `reply`.
    ///
    /// # Errors
    /// `UnrecognizedDevice` when the reply does not match the grammar.
    pub fn parse(&self, reply: &str) -> AppResult<DeviceIdentity> {
        let unrecognized = || {
            DaqError::UnrecognizedDevice(format!(
                "identity reply '{}' does not match '{}'",
                reply.trim(),
                self.pattern.as_str()
            ))
        };
        let caps = self.pattern.captures(reply).ok_or_else(unrecognized)?;
        let field = |i: usize| caps.get(i).map(|m| m.as_str()).ok_or_else(unrecognized);

        let range = field(3)?.parse::<f64>().map_err(|_| unrecognized())?;
        let channel_count = field(4)?.parse::<usize>().map_err(|_| unrecognized())?;
        let variant = field(5)?
            .chars()
            .next()
            .and_then(OutputType::from_code)
            .ok_or_else(unrecognized)?;

        Ok(DeviceIdentity {
            model: field(1)?.to_string(),
            serial: field(2)?.to_string(),
            range,
            channel_count,
            variant,
        })
    }
}

/// Fields of a standard `*IDN?` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScpiIdentity {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
}

impl ScpiIdentity {
    /// Parse `vendor,model,serial,firmware`; missing trailing fields are
    /// left empty.
    pub fn parse(reply: &str) -> AppResult<Self> {
        let mut fields = reply.trim().split(',').map(|s| s.trim().to_string());
        let vendor = fields.next().filter(|s| !s.is_empty()).ok_or_else(|| {
            DaqError::UnrecognizedDevice(format!("empty *IDN? reply '{}'", reply))
        })?;
        Ok(Self {
            vendor,
            model: fields.next().unwrap_or_default(),
            serial: fields.next().unwrap_or_default(),
            firmware: fields.next().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stahl_reply() {
        let id = IdentityParser::stahl().parse("HV324 300 16 b\r").unwrap();
        assert_eq!(id.model, "HV");
        assert_eq!(id.serial, "324");
        assert_eq!(id.range, 300.0);
        assert_eq!(id.channel_count, 16);
        assert_eq!(id.variant, OutputType::Bipolar);
        assert_eq!(id.identifier(), "HV324");
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        let err = IdentityParser::stahl().parse("BS101 010 08 x").unwrap_err();
        assert!(matches!(err, DaqError::UnrecognizedDevice(_)));
    }

    #[test]
    fn test_reply_must_match_as_a_whole() {
        let parser = IdentityParser::stahl();
        let rejected = [
            "XHV3241 300 16 b",
            "HV324 300 16 bx",
            "HV3241 300 16 b",
            "ok HV324 300 16 b",
        ];
        for reply in rejected {
            let err = parser.parse(reply).unwrap_err();
            assert!(matches!(err, DaqError::UnrecognizedDevice(_)), "accepted '{reply}'");
        }
        assert!(parser.parse("  BS101 010 08 u\r\n").is_ok());
    }

    #[test]
    fn test_variant_codes() {
        for code in ['b', 'u', 'q', 's', 'm'] {
            let t = OutputType::from_code(code).unwrap();
            assert_eq!(t.code(), code);
        }
        assert_eq!(OutputType::BipolarMillivolt.to_string(), "bipolar millivolt");
        assert!(OutputType::from_code('z').is_none());
    }

    #[test]
    fn test_scpi_identity() {
        let idn = ScpiIdentity::parse("ANRITSU,MG3692C,062403,3.62\n").unwrap();
        assert_eq!(idn.vendor, "ANRITSU");
        assert_eq!(idn.model, "MG3692C");
        assert_eq!(idn.serial, "062403");
        assert_eq!(idn.firmware, "3.62");

        let short = ScpiIdentity::parse("VENDOR,MODEL").unwrap();
        assert_eq!(short.firmware, "");
        assert!(ScpiIdentity::parse("  ").is_err());
    }
}
