//! Stanford Research Systems SG384 RF signal generator.

use std::sync::Arc;

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};

const OFF_ON: CodecSpec = CodecSpec::Map(&[("OFF", "0"), ("ON", "1")]);

/// Signal synthesis and modulation settings.
pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::new("frequency")
        .label("Frequency")
        .unit("Hz")
        .get("FREQ?")
        .set("FREQ {value}")
        .codec(CodecSpec::Fixed(3))
        .range(9.5e5, 4.05e9),
    ParamSpec::new("phase")
        .label("Carrier phase")
        .unit("deg")
        .get("PHAS?")
        .set("PHAS {value}")
        .codec(CodecSpec::Fixed(1))
        .range(-360.0, 360.0),
    ParamSpec::new("amplitude_LF")
        .label("Power of BNC output")
        .unit("dBm")
        .get("AMPL?")
        .set("AMPL {value}")
        .codec(CodecSpec::Fixed(2))
        .range(-47.0, 13.0),
    ParamSpec::new("amplitude_RF")
        .label("Power of type-N RF output")
        .unit("dBm")
        .get("AMPR?")
        .set("AMPR {value}")
        .codec(CodecSpec::Fixed(2))
        .range(-110.0, 16.5),
    ParamSpec::new("noise_mode")
        .label("RF PLL loop filter mode")
        .get("NOIS?")
        .set("NOIS {value}")
        .codec(CodecSpec::Map(&[("Mode 1", "0"), ("Mode 2", "1")])),
    ParamSpec::new("enable_RF")
        .label("Type-N RF output")
        .get("ENBR?")
        .set("ENBR {value}")
        .codec(OFF_ON),
    ParamSpec::new("enable_LF")
        .label("BNC output")
        .get("ENBL?")
        .set("ENBL {value}")
        .codec(OFF_ON),
    ParamSpec::new("offset_bnc")
        .label("Low frequency BNC output")
        .unit("V")
        .get("OFSL?")
        .set("OFSL {value}")
        .codec(CodecSpec::Float)
        .range(-1.5, 1.5),
    ParamSpec::new("modulation_coupling")
        .label("External modulation input coupling")
        .get("COUP?")
        .set("COUP {value}")
        .codec(CodecSpec::Map(&[("AC", "0"), ("DC", "1")])),
    ParamSpec::new("FM_deviation")
        .label("Frequency modulation deviation")
        .unit("Hz")
        .get("FDEV?")
        .set("FDEV {value}")
        .codec(CodecSpec::Fixed(1))
        .range(0.1, 32e6),
    ParamSpec::new("modulation_function")
        .label("Modulation function for AM/FM/PhiM")
        .get("MFNC?")
        .set("MFNC {value}")
        .codec(CodecSpec::Map(&[
            ("Sine", "0"),
            ("Ramp", "1"),
            ("Triangle", "2"),
            ("Square", "3"),
            ("Noise", "4"),
            ("External", "5"),
        ])),
    ParamSpec::new("enable_modulation")
        .get("MODL?")
        .set("MODL {value}")
        .codec(OFF_ON),
    ParamSpec::new("modulation_rate")
        .unit("Hz")
        .get("RATE?")
        .set("RATE {value}")
        .codec(CodecSpec::Fixed(6))
        .range(1e-6, 50e3),
    ParamSpec::new("modulation_type")
        .label("Current modulation type")
        .get("TYPE?")
        .set("TYPE {value}")
        .codec(CodecSpec::Map(&[
            ("AM", "0"),
            ("FM", "1"),
            ("Phi", "2"),
            ("Sweep", "3"),
            ("Pulse", "4"),
            ("Blank", "5"),
            ("IQ", "6"),
        ])),
];

/// Build the SG384 parameter tree on `transport`.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let ctx = TableContext::new(Arc::clone(&transport), name);
    let mut root = Channel::new(name);
    populate(&mut root, PARAMETERS, &ctx)?;
    Ok(Instrument::new(root, Some(transport)))
}
