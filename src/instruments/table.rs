//! Declarative parameter tables.
//!
//! Most instrument parameters differ only in their mnemonic, unit, codec and
//! admissible domain. Drivers list them as `const` [`ParamSpec`] arrays and
//! [`populate`] turns each row into a [`Parameter`] bound to the driver's
//! transport. Parameters that need custom logic are built by hand next to
//! the table.

use std::sync::Arc;

use crate::adapters::Transport;
use crate::channel::Channel;
use crate::error::AppResult;
use crate::parameter::{
    FieldSelector, NumericCodec, Parameter, ParameterBuilder, SymbolMap, Validator, ValueCodec,
};

/// Wire format of a table row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CodecSpec {
    Text,
    Float,
    /// Fixed decimal places on write, as in `{:.3f}`.
    Fixed(usize),
    Int,
    /// Symbol -> token pairs.
    Map(&'static [(&'static str, &'static str)]),
    /// Float taken from one field of a multi-field reply.
    Field {
        delimiter: Option<char>,
        index: usize,
    },
    /// Comma-separated floats.
    Array,
}

impl CodecSpec {
    fn build(self) -> AppResult<ValueCodec> {
        Ok(match self {
            CodecSpec::Text => ValueCodec::Text,
            CodecSpec::Float => ValueCodec::float(),
            CodecSpec::Fixed(p) => ValueCodec::fixed(p),
            CodecSpec::Int => ValueCodec::int(),
            CodecSpec::Map(pairs) => ValueCodec::mapping(SymbolMap::new(pairs.iter().copied())?),
            CodecSpec::Field { delimiter, index } => {
                let field = match delimiter {
                    Some(d) => FieldSelector::new(d, index),
                    None => FieldSelector::whitespace(index),
                };
                ValueCodec::Numeric(NumericCodec::float().with_field(field))
            }
            CodecSpec::Array => ValueCodec::csv_array(),
        })
    }
}

/// Admissible domain of a table row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidatorSpec {
    Range(f64, f64),
    Ints(i64, i64),
    OneOf(&'static [i64]),
    Shape(usize),
}

impl ValidatorSpec {
    fn build(self) -> Validator {
        match self {
            ValidatorSpec::Range(lo, hi) => Validator::range(lo, hi),
            ValidatorSpec::Ints(lo, hi) => Validator::int_range(lo, hi),
            ValidatorSpec::OneOf(values) => Validator::one_of(values.iter().copied()),
            ValidatorSpec::Shape(len) => Validator::fixed_shape(len),
        }
    }
}

/// One row of a driver table.
///
/// `get` is a literal query; `set` is a template containing `{value}`. Both
/// may contain `{ch}`, replaced with the channel number by
/// [`TableContext::with_channel`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub label: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub get: Option<&'static str>,
    pub set: Option<&'static str>,
    pub codec: CodecSpec,
    pub validator: Option<ValidatorSpec>,
    pub doc: Option<&'static str>,
}

#[allow(missing_docs)]
impl ParamSpec {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            label: None,
            unit: None,
            get: None,
            set: None,
            codec: CodecSpec::Text,
            validator: None,
            doc: None,
        }
    }

    pub const fn label(mut self, label: &'static str) -> Self {
        self.label = Some(label);
        self
    }

    pub const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn get(mut self, command: &'static str) -> Self {
        self.get = Some(command);
        self
    }

    pub const fn set(mut self, template: &'static str) -> Self {
        self.set = Some(template);
        self
    }

    pub const fn codec(mut self, codec: CodecSpec) -> Self {
        self.codec = codec;
        self
    }

    pub const fn range(mut self, lo: f64, hi: f64) -> Self {
        self.validator = Some(ValidatorSpec::Range(lo, hi));
        self
    }

    pub const fn ints(mut self, lo: i64, hi: i64) -> Self {
        self.validator = Some(ValidatorSpec::Ints(lo, hi));
        self
    }

    pub const fn one_of(mut self, values: &'static [i64]) -> Self {
        self.validator = Some(ValidatorSpec::OneOf(values));
        self
    }

    pub const fn shape(mut self, len: usize) -> Self {
        self.validator = Some(ValidatorSpec::Shape(len));
        self
    }

    pub const fn doc(mut self, doc: &'static str) -> Self {
        self.doc = Some(doc);
        self
    }

    /// Builder pre-filled from this row; drivers may refine it before
    /// calling `build`.
    pub fn builder(&self, ctx: &TableContext) -> AppResult<ParameterBuilder> {
        let mut b = Parameter::builder(self.name)
            .scope(ctx.scope.clone())
            .codec(self.codec.build()?)
            .transport(Arc::clone(&ctx.transport));
        if let Some(label) = self.label {
            b = b.label(ctx.expand(label));
        }
        if let Some(unit) = self.unit {
            b = b.unit(unit);
        }
        if let Some(doc) = self.doc {
            b = b.docstring(doc);
        }
        if let Some(get) = self.get {
            b = b.get_cmd(ctx.expand(get));
        }
        if let Some(set) = self.set {
            b = b.set_cmd(ctx.expand(set));
        }
        if let Some(v) = self.validator {
            b = b.validator(v.build());
        }
        Ok(b)
    }
}

/// Shared inputs for building one channel's table.
#[derive(Clone)]
pub struct TableContext {
    transport: Arc<dyn Transport>,
    scope: String,
    channel: Option<usize>,
}

impl TableContext {
    pub fn new(transport: Arc<dyn Transport>, scope: impl Into<String>) -> Self {
        Self {
            transport,
            scope: scope.into(),
            channel: None,
        }
    }

    /// Context for channel `index`, nested under this scope as `name`.
    pub fn with_channel(&self, name: &str, index: usize) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            scope: format!("{}.{}", self.scope, name),
            channel: Some(index),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn expand(&self, template: &str) -> String {
        match self.channel {
            Some(ch) => template.replace("{ch}", &ch.to_string()),
            None => template.to_string(),
        }
    }
}

/// Build every row of `specs` into `channel`.
pub fn populate(channel: &mut Channel, specs: &[ParamSpec], ctx: &TableContext) -> AppResult<()> {
    for spec in specs {
        channel.add_parameter(spec.builder(ctx)?.build()?)?;
    }
    Ok(())
}
