//! Bidirectional mapping between symbolic values and wire tokens.
//!
//! `encode` turns a validated [`Value`] into the text that follows the
//! mnemonic of a set command; `decode` turns a reply line back into a value.
//! Decoding is tolerant of surrounding whitespace, multi-field replies and
//! unit-suffixed tokens such as `0.512mA`.

use std::fmt;
use thiserror::Error;

use crate::error::{AppResult, DaqError};
use crate::parameter::Value;

/// Reason a codec could not translate a value or a reply.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct CodecError(pub String);

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Pick one field out of a multi-field reply.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSelector {
    /// Field delimiter; `None` splits on runs of whitespace.
    pub delimiter: Option<char>,
    /// Zero-based field index.
    pub index: usize,
}

impl FieldSelector {
    /// Select field `index` of a `delimiter`-separated reply.
    pub fn new(delimiter: char, index: usize) -> Self {
        Self {
            delimiter: Some(delimiter),
            index,
        }
    }

    /// Select field `index` of a whitespace-separated reply.
    pub fn whitespace(index: usize) -> Self {
        Self {
            delimiter: None,
            index,
        }
    }

    fn select<'a>(&self, reply: &'a str) -> CodecResult<&'a str> {
        let field = match self.delimiter {
            Some(d) => reply.split(d).nth(self.index),
            None => reply.split_whitespace().nth(self.index),
        };
        field
            .map(str::trim)
            .ok_or_else(|| CodecError(format!("reply has no field {}", self.index)))
    }
}

/// Unit token stripped from replies before parsing, with the factor that
/// converts the remaining number into the parameter's unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSuffix {
    /// Literal suffix, e.g. `mA`.
    pub token: String,
    /// Multiplier applied after stripping, e.g. `1e-3` for mA -> A.
    pub multiplier: f64,
}

/// Integer or floating point wire numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    /// Parsed with `f64` semantics.
    Float,
    /// Parsed as `i64`; integral floats such as `2.0E+3` are accepted.
    Int,
}

/// Numeric formatter/parser pair.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericCodec {
    kind: NumberKind,
    precision: Option<usize>,
    field: Option<FieldSelector>,
    suffix: Option<UnitSuffix>,
}

impl NumericCodec {
    /// Floating point with default formatting.
    pub fn float() -> Self {
        Self {
            kind: NumberKind::Float,
            precision: None,
            field: None,
            suffix: None,
        }
    }

    /// Floating point with fixed decimal precision, as in `{:.3f}`.
    pub fn fixed(precision: usize) -> Self {
        Self {
            precision: Some(precision),
            ..Self::float()
        }
    }

    /// Integer.
    pub fn int() -> Self {
        Self {
            kind: NumberKind::Int,
            ..Self::float()
        }
    }

    /// Decode only the selected field of the reply.
    pub fn with_field(mut self, field: FieldSelector) -> Self {
        self.field = Some(field);
        self
    }

    /// Strip `token` from replies and scale by `multiplier`.
    pub fn with_suffix(mut self, token: impl Into<String>, multiplier: f64) -> Self {
        self.suffix = Some(UnitSuffix {
            token: token.into(),
            multiplier,
        });
        self
    }

    fn encode_number(&self, v: f64) -> String {
        match (self.kind, self.precision) {
            (NumberKind::Int, _) => format!("{}", v.round() as i64),
            (NumberKind::Float, Some(p)) => format!("{:.*}", p, v),
            (NumberKind::Float, None) => format!("{}", v),
        }
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        match self.kind {
            NumberKind::Int => value
                .as_i64()
                .map(|v| v.to_string())
                .ok_or_else(|| CodecError(format!("{} is not an integer", value))),
            NumberKind::Float => value
                .as_f64()
                .map(|v| self.encode_number(v))
                .ok_or_else(|| CodecError(format!("{} is not a number", value))),
        }
    }

    fn parse_number(&self, reply: &str) -> CodecResult<f64> {
        let mut token = match &self.field {
            Some(field) => field.select(reply)?,
            None => reply.trim(),
        };
        let mut multiplier = 1.0;
        if let Some(suffix) = &self.suffix {
            if let Some(stripped) = token.strip_suffix(suffix.token.as_str()) {
                token = stripped.trim_end();
                multiplier = suffix.multiplier;
            }
        }
        token
            .parse::<f64>()
            .map(|v| v * multiplier)
            .map_err(|_| CodecError(format!("'{}' is not a number", token)))
    }

    fn decode(&self, reply: &str) -> CodecResult<Value> {
        let v = self.parse_number(reply)?;
        match self.kind {
            NumberKind::Float => Ok(Value::Float(v)),
            NumberKind::Int if v.fract() == 0.0 => Ok(Value::Int(v as i64)),
            NumberKind::Int => Err(CodecError(format!("{} is not an integer", v))),
        }
    }

    fn step(&self) -> Option<f64> {
        match (self.kind, self.precision) {
            (NumberKind::Int, _) => Some(1.0),
            (NumberKind::Float, Some(p)) => Some(10f64.powi(-(p as i32))),
            (NumberKind::Float, None) => None,
        }
    }
}

/// Linear transform from a device-internal code to physical units:
/// `physical = (raw - offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    /// Multiplier from raw code to physical unit.
    pub scale: f64,
    /// Raw code corresponding to zero physical units.
    pub offset: f64,
    /// Decimal places kept when presenting physical values.
    pub decimals: Option<usize>,
}

impl LinearScale {
    fn to_physical(self, raw: f64) -> f64 {
        let physical = (raw - self.offset) * self.scale;
        match self.decimals {
            Some(d) => {
                let factor = 10f64.powi(d as i32);
                (physical * factor).round() / factor
            }
            None => physical,
        }
    }

    fn to_raw(self, physical: f64) -> f64 {
        physical / self.scale + self.offset
    }
}

/// Bijective symbol <-> token dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMap {
    pairs: Vec<(String, String)>,
}

impl SymbolMap {
    /// Build a mapping; duplicate symbols or tokens break bijectivity and are
    /// rejected.
    pub fn new<I, S, T>(pairs: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let mut out: Vec<(String, String)> = Vec::new();
        for (symbol, token) in pairs {
            let (symbol, token) = (symbol.into(), token.into());
            if out.iter().any(|(s, _)| *s == symbol) {
                return Err(DaqError::Configuration(format!(
                    "duplicate symbol '{}' in value mapping",
                    symbol
                )));
            }
            if out.iter().any(|(_, t)| *t == token) {
                return Err(DaqError::Configuration(format!(
                    "duplicate token '{}' in value mapping",
                    token
                )));
            }
            out.push((symbol, token));
        }
        if out.is_empty() {
            return Err(DaqError::Configuration("empty value mapping".into()));
        }
        Ok(Self { pairs: out })
    }

    /// Conventional `on`/`off` mapping onto the given wire tokens.
    pub fn on_off(on: &str, off: &str) -> AppResult<Self> {
        Self::new([("on", on), ("off", off)])
    }

    /// Symbols in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(s, _)| s.as_str())
    }

    fn encode(&self, value: &Value) -> CodecResult<String> {
        let symbol = value
            .as_str()
            .ok_or_else(|| CodecError(format!("{} is not a symbol", value)))?;
        self.pairs
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| CodecError(format!("unknown symbol '{}'", symbol)))
    }

    fn decode(&self, reply: &str) -> CodecResult<Value> {
        let token = reply.trim();
        if let Some((s, _)) = self.pairs.iter().find(|(_, t)| t == token) {
            return Ok(Value::Text(s.clone()));
        }
        // Devices may echo numeric codes with a different spelling ("1.0" for "1").
        if let Ok(reply_num) = token.parse::<f64>() {
            let hit = self
                .pairs
                .iter()
                .find(|(_, t)| t.parse::<f64>().map(|n| n == reply_num).unwrap_or(false));
            if let Some((s, _)) = hit {
                return Ok(Value::Text(s.clone()));
            }
        }
        Err(CodecError(format!("unexpected token '{}'", token)))
    }

    fn contains(&self, value: &Value) -> bool {
        value
            .as_str()
            .map(|v| self.pairs.iter().any(|(s, _)| s == v))
            .unwrap_or(false)
    }
}

impl fmt::Display for SymbolMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols: Vec<&str> = self.symbols().collect();
        write!(f, "one of {{{}}}", symbols.join(", "))
    }
}

/// Translation between the symbolic and wire domains of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueCodec {
    /// Plain numbers.
    Numeric(NumericCodec),
    /// Numbers presented through a linear transform.
    Scaled {
        /// Wire-side formatting of the raw code.
        raw: NumericCodec,
        /// Raw -> physical transform.
        scale: LinearScale,
    },
    /// Enumerated symbols.
    Mapping(SymbolMap),
    /// Free text, trimmed on decode.
    Text,
    /// Delimited numeric sequence.
    Array {
        /// Separator between elements.
        delimiter: char,
    },
}

impl Default for ValueCodec {
    fn default() -> Self {
        ValueCodec::Text
    }
}

impl ValueCodec {
    /// `{}`-formatted float.
    pub fn float() -> Self {
        ValueCodec::Numeric(NumericCodec::float())
    }

    /// Fixed-point float with `precision` decimals.
    pub fn fixed(precision: usize) -> Self {
        ValueCodec::Numeric(NumericCodec::fixed(precision))
    }

    /// Integer.
    pub fn int() -> Self {
        ValueCodec::Numeric(NumericCodec::int())
    }

    /// Enumerated mapping.
    pub fn mapping(map: SymbolMap) -> Self {
        ValueCodec::Mapping(map)
    }

    /// Comma-separated float trace.
    pub fn csv_array() -> Self {
        ValueCodec::Array { delimiter: ',' }
    }

    /// Linear-scaled number; `raw` formats the device code.
    pub fn scaled(raw: NumericCodec, scale: LinearScale) -> Self {
        ValueCodec::Scaled { raw, scale }
    }

    /// Symbolic value -> wire token.
    pub fn encode(&self, value: &Value) -> CodecResult<String> {
        match self {
            ValueCodec::Numeric(n) => n.encode(value),
            ValueCodec::Scaled { raw, scale } => {
                let physical = value
                    .as_f64()
                    .ok_or_else(|| CodecError(format!("{} is not a number", value)))?;
                raw.encode(&Value::Float(scale.to_raw(physical)))
            }
            ValueCodec::Mapping(map) => map.encode(value),
            ValueCodec::Text => match value {
                Value::Text(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            },
            ValueCodec::Array { delimiter } => {
                let seq = value
                    .as_array()
                    .ok_or_else(|| CodecError(format!("{} is not a sequence", value)))?;
                let parts: Vec<String> = seq.iter().map(|v| v.to_string()).collect();
                Ok(parts.join(&delimiter.to_string()))
            }
        }
    }

    /// Wire reply -> symbolic value.
    pub fn decode(&self, reply: &str) -> CodecResult<Value> {
        match self {
            ValueCodec::Numeric(n) => n.decode(reply),
            ValueCodec::Scaled { raw, scale } => {
                let code = raw.parse_number(reply)?;
                Ok(Value::Float(scale.to_physical(code)))
            }
            ValueCodec::Mapping(map) => map.decode(reply),
            ValueCodec::Text => Ok(Value::Text(reply.trim().to_string())),
            ValueCodec::Array { delimiter } => reply
                .trim()
                .split(*delimiter)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<f64>()
                        .map_err(|_| CodecError(format!("'{}' is not a number", s)))
                })
                .collect::<CodecResult<Vec<f64>>>()
                .map(Value::Array),
        }
    }

    /// Whether `value` belongs to the codec's symbolic domain at all.
    ///
    /// Enum codecs double as set-membership validators.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueCodec::Numeric(n) => match n.kind {
                NumberKind::Int => value.as_i64().is_some(),
                NumberKind::Float => value.as_f64().is_some(),
            },
            ValueCodec::Scaled { .. } => value.as_f64().is_some(),
            ValueCodec::Mapping(map) => map.contains(value),
            ValueCodec::Text => true,
            ValueCodec::Array { .. } => value.as_array().is_some(),
        }
    }

    /// Description of the symbolic domain for error messages.
    pub fn describe_domain(&self) -> String {
        match self {
            ValueCodec::Numeric(n) if n.kind == NumberKind::Int => "an integer".into(),
            ValueCodec::Numeric(_) | ValueCodec::Scaled { .. } => "a number".into(),
            ValueCodec::Mapping(map) => map.to_string(),
            ValueCodec::Text => "text".into(),
            ValueCodec::Array { .. } => "a numeric sequence".into(),
        }
    }

    /// Smallest representable change in physical units, if the wire format
    /// quantizes.
    pub fn quantization_step(&self) -> Option<f64> {
        match self {
            ValueCodec::Numeric(n) => n.step(),
            ValueCodec::Scaled { raw, scale } => raw.step().map(|s| s * scale.scale.abs()),
            _ => None,
        }
    }

    /// Value the device will actually receive after formatting `value`.
    ///
    /// Used to warn callers whose input is finer than the wire precision.
    pub fn applied_value(&self, value: &Value) -> Option<f64> {
        let token = self.encode(value).ok()?;
        match self {
            ValueCodec::Numeric(n) => n.decode(&token).ok()?.as_f64(),
            ValueCodec::Scaled { raw, scale } => {
                let code = raw.parse_number(&token).ok()?;
                Some((code - scale.offset) * scale.scale)
            }
            _ => None,
        }
    }
}
