//! Value validators.
//!
//! A validator is a pure predicate over a candidate [`Value`]. Parameters run
//! it in the symbolic domain before `set` touches the transport and in the
//! decoded domain after `get` parses a reply.
//!
//! Cross-parameter constraints (a sweep start that must stay below the
//! current stop) need the *live* value of a sibling and therefore I/O; they
//! are modelled separately as [`SiblingBound`].

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{AppResult, DaqError};
use crate::parameter::{Parameter, Value};

/// Expected sequence length, re-evaluated on every check.
pub type LengthSource = Arc<dyn Fn() -> Option<usize> + Send + Sync>;

/// Whether range bounds themselves are admissible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    /// `lo <= v <= hi`
    Inclusive,
    /// `lo < v < hi`
    Exclusive,
}

/// Stateless predicate over candidate values.
#[derive(Clone)]
pub enum Validator {
    /// Numeric range over floats (integers are accepted and widened).
    Range { lo: f64, hi: f64, bounds: Bounds },

    /// Integer range, inclusive. Non-integral floats are rejected.
    IntRange { lo: i64, hi: i64 },

    /// Membership in a fixed set of admissible values.
    OneOf(Vec<Value>),

    /// Numeric sequence whose length must equal a possibly time-varying
    /// integer, e.g. the instrument's current sweep point count.
    Shape { len: LengthSource },
}

#[allow(missing_docs)]
impl Validator {
    pub fn range(lo: f64, hi: f64) -> Self {
        Validator::Range {
            lo,
            hi,
            bounds: Bounds::Inclusive,
        }
    }

    pub fn exclusive_range(lo: f64, hi: f64) -> Self {
        Validator::Range {
            lo,
            hi,
            bounds: Bounds::Exclusive,
        }
    }

    pub fn int_range(lo: i64, hi: i64) -> Self {
        Validator::IntRange { lo, hi }
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Validator::OneOf(values.into_iter().map(Into::into).collect())
    }

    pub fn shape(len: impl Fn() -> Option<usize> + Send + Sync + 'static) -> Self {
        Validator::Shape { len: Arc::new(len) }
    }

    /// Fixed-length sequence.
    pub fn fixed_shape(len: usize) -> Self {
        Self::shape(move || Some(len))
    }

    /// Returns `true` when `value` lies in the admissible domain.
    pub fn check(&self, value: &Value) -> bool {
        match self {
            Validator::Range { lo, hi, bounds } => match value.as_f64() {
                Some(v) if v.is_finite() => match bounds {
                    Bounds::Inclusive => *lo <= v && v <= *hi,
                    Bounds::Exclusive => *lo < v && v < *hi,
                },
                _ => false,
            },
            Validator::IntRange { lo, hi } => match value.as_i64() {
                Some(v) => *lo <= v && v <= *hi,
                None => false,
            },
            Validator::OneOf(allowed) => allowed.iter().any(|a| a.matches(value)),
            Validator::Shape { len } => match (value.as_array(), len()) {
                (Some(seq), Some(expected)) => seq.len() == expected,
                // Unknown expected length: nothing to compare against yet.
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }

    /// Human-readable description of the admissible domain.
    pub fn describe(&self) -> String {
        match self {
            Validator::Range {
                lo,
                hi,
                bounds: Bounds::Inclusive,
            } => format!("[{}, {}]", lo, hi),
            Validator::Range {
                lo,
                hi,
                bounds: Bounds::Exclusive,
            } => format!("({}, {})", lo, hi),
            Validator::IntRange { lo, hi } => format!("integers in [{}, {}]", lo, hi),
            Validator::OneOf(allowed) => {
                let items: Vec<String> = allowed.iter().map(ToString::to_string).collect();
                format!("one of {{{}}}", items.join(", "))
            }
            Validator::Shape { len } => match len() {
                Some(n) => format!("sequence of length {}", n),
                None => "sequence".to_string(),
            },
        }
    }

    /// Check and convert a failure into `InvalidValue`.
    pub fn validate(&self, parameter: &str, value: &Value) -> AppResult<()> {
        if self.check(value) {
            Ok(())
        } else {
            Err(DaqError::InvalidValue {
                parameter: parameter.to_string(),
                value: value.to_string(),
                allowed: self.describe(),
            })
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Shape { .. } => write!(f, "Shape(<length source>)"),
            other => write!(f, "{}", other.describe()),
        }
    }
}

/// Required ordering of a value relative to its sibling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// The value must be strictly below the sibling's live value.
    Below,
    /// The value must be strictly above the sibling's live value.
    Above,
}

/// Constraint against the live value of a sibling parameter.
///
/// Holds a weak reference so two parameters can bound each other (start
/// below stop, stop above start) without a reference cycle.
#[derive(Clone)]
pub struct SiblingBound {
    sibling: Weak<Parameter>,
    relation: Relation,
}

impl SiblingBound {
    /// Bound relative to `sibling`.
    pub fn new(sibling: &Arc<Parameter>, relation: Relation) -> Self {
        Self {
            sibling: Arc::downgrade(sibling),
            relation,
        }
    }

    /// Read the sibling's current value from the device and compare.
    pub async fn check(&self, parameter: &str, value: &Value) -> AppResult<()> {
        let sibling = self.sibling.upgrade().ok_or_else(|| {
            DaqError::Configuration(format!(
                "sibling of '{}' was dropped before its bound was checked",
                parameter
            ))
        })?;
        let live = sibling.get().await?;
        let (v, s) = match (value.as_f64(), live.as_f64()) {
            (Some(v), Some(s)) => (v, s),
            _ => {
                return Err(DaqError::InvalidValue {
                    parameter: parameter.to_string(),
                    value: value.to_string(),
                    allowed: format!("a number ordered against '{}'", sibling.name()),
                })
            }
        };
        let ok = match self.relation {
            Relation::Below => v < s,
            Relation::Above => v > s,
        };
        if ok {
            Ok(())
        } else {
            let word = match self.relation {
                Relation::Below => "smaller",
                Relation::Above => "larger",
            };
            Err(DaqError::InvalidValue {
                parameter: parameter.to_string(),
                value: value.to_string(),
                allowed: format!("{} than {} = {}", word, sibling.name(), s),
            })
        }
    }
}
