//! NF LI5660 lock-in amplifier.
//!
//! `:FETC?` returns the quantities selected by `output_config` as one
//! comma-separated line; R, T, X and Y are fixed fields of it.

use std::sync::Arc;

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};
use crate::parameter::{Parameter, Validator};

const FETCH: &str = ":FETC?";

const fn fetched(
    name: &'static str,
    label: &'static str,
    unit: &'static str,
    index: usize,
) -> ParamSpec {
    ParamSpec::new(name)
        .label(label)
        .unit(unit)
        .get(FETCH)
        .codec(CodecSpec::Field {
            delimiter: Some(','),
            index,
        })
}

pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::new("osc_frequency")
        .label("OSC Frequency")
        .unit("Hz")
        .get("SOUR:FREQ?")
        .set("SOUR:FREQ {value}")
        .codec(CodecSpec::Fixed(4))
        .range(5e-1, 11e6),
    ParamSpec::new("mod_frequency")
        .label("Modulation Frequency")
        .unit("Hz")
        .get("SENS:FREQ?")
        .codec(CodecSpec::Float)
        .range(5e-1, 11e6),
    ParamSpec::new("osc_amplitude")
        .label("OSC Amplitude")
        .unit("V")
        .get("SOUR:VOLT?")
        .set("SOUR:VOLT {value}")
        .codec(CodecSpec::Fixed(3))
        .range(0.0, 1.0),
    ParamSpec::new("slope")
        .label("Filter slope")
        .unit("dB/oct")
        .get(":FILT:SLOP?")
        .set(":FILT:SLOP {value}")
        .codec(CodecSpec::Int)
        .one_of(&[6, 12, 18, 24, 30]),
    ParamSpec::new("tc")
        .label("Filter timeconstant")
        .unit("s")
        .get(":FILT:TCON?")
        .set(":FILT:TCON {value}")
        .codec(CodecSpec::Float)
        .range(1e-6, 50e3),
    fetched("R", "Magnitude", "V", 0),
    fetched("T", "Phase", "deg", 1),
    fetched("X", "in-phase", "V", 2),
    fetched("Y", "out-phase", "V", 3),
];

const OUTPUT_CONFIG: ParamSpec = ParamSpec::new("output_config")
    .label("Output config")
    .get(":DATA?")
    .set("DATA {value}")
    .codec(CodecSpec::Map(&[("R,T", "6"), ("X,Y", "24"), ("R,T,X,Y", "30")]));

const DATA: ParamSpec = ParamSpec::new("get_data")
    .label("lock-In data")
    .get(FETCH)
    .codec(CodecSpec::Array);

/// Number of fields `:FETC?` returns for an output configuration.
pub fn fetched_len(config: &str) -> Option<usize> {
    match config {
        "R,T" | "X,Y" => Some(2),
        "R,T,X,Y" => Some(4),
        _ => None,
    }
}

/// Build the LI5660 parameter tree on `transport`.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let ctx = TableContext::new(Arc::clone(&transport), name);
    let mut root = Channel::new(name);
    populate(&mut root, PARAMETERS, &ctx)?;

    let config: Arc<Parameter> = root.add_parameter(OUTPUT_CONFIG.builder(&ctx)?.build()?)?;
    let data_len = move || {
        config
            .get_latest()
            .and_then(|v| v.as_str().and_then(fetched_len))
    };
    root.add_parameter(
        DATA.builder(&ctx)?
            .validator(Validator::shape(data_len))
            .build()?,
    )?;
    Ok(Instrument::new(root, Some(transport)))
}
