//! Tektronix AFG31000 arbitrary function generator.
//!
//! The model is checked against `*IDN?` at connection; its amplitude limit
//! bounds both amplitude and offset of every channel.

use std::sync::Arc;
use tracing::info;

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::{AppResult, DaqError};
use crate::identity::ScpiIdentity;
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};

/// Output channels per unit.
pub const CHANNEL_COUNT: usize = 2;

/// Supported models and their amplitude limit in volts.
pub const MODEL_AMPLITUDES: &[(&str, f64)] = &[("31252", 2.0)];

/// Model number from an identity model field such as `AFG31252`.
pub fn model_number(idn: &ScpiIdentity) -> &str {
    idn.model.get(3..).unwrap_or("")
}

fn channel_table(max_amplitude: f64) -> [ParamSpec; 7] {
    [
        ParamSpec::new("state")
            .label("Channel {ch} state")
            .get("OUTPut{ch}:STATe?")
            .set("OUTPut{ch}:STATe {value}")
            .codec(CodecSpec::Int)
            .ints(0, 1),
        ParamSpec::new("amplitude")
            .label("Channel {ch} amplitude")
            .unit("V")
            .get("SOURce{ch}:VOLTage:LEVel:IMMediate:AMPLitude?")
            .set("SOURce{ch}:VOLTage:LEVel:IMMediate:AMPLitude {value}")
            .codec(CodecSpec::Float)
            .range(0.0, max_amplitude),
        ParamSpec::new("offset")
            .label("Channel {ch} offset")
            .unit("V")
            .get("SOURce{ch}:VOLTage:LEVel:IMMediate:OFFSet?")
            .set("SOURce{ch}:VOLTage:LEVel:IMMediate:OFFSet {value}")
            .codec(CodecSpec::Float)
            .range(0.0, max_amplitude),
        ParamSpec::new("type")
            .label("Channel {ch} type")
            .get("SOURce{ch}:FUNCtion:SHAPe?")
            .set("SOURce{ch}:FUNCtion:SHAPe {value}")
            .codec(CodecSpec::Map(&[
                ("SINE", "SIN"),
                ("SQUARE", "SQU"),
                ("PULSE", "PULS"),
                ("RAMP", "RAMP"),
                ("NOISE", "PRN"),
                ("DC", "DC"),
                ("SINC", "SINC"),
                ("GAUSS", "GAUS"),
                ("LORENTZ", "LOR"),
                ("ERISE", "ERIS"),
                ("EDECAY", "EDEC"),
                ("HAVERSINE", "HAV"),
            ])),
        ParamSpec::new("pulse_period")
            .label("Channel {ch} pulse period")
            .unit("s")
            .get("SOURce{ch}:PULSe:PERiod?")
            .set("SOURce{ch}:PULSe:PERiod {value}")
            .codec(CodecSpec::Float),
        ParamSpec::new("pulse_width")
            .label("Channel {ch} pulse width")
            .unit("s")
            .get("SOURce{ch}:PULSe:WIDTh?")
            .set("SOURce{ch}:PULSe:WIDTh {value}")
            .codec(CodecSpec::Float),
        ParamSpec::new("cw_freq")
            .label("Channel {ch} cw frequency")
            .unit("Hz")
            .get("SOURce{ch}:FREQuency:CW?")
            .set("SOURce{ch}:FREQuency:CW {value}")
            .codec(CodecSpec::Float),
    ]
}

/// Check the model and build both channels.
///
/// # Errors
/// `UnrecognizedDevice` when `*IDN?` reports an unsupported model.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let idn = ScpiIdentity::parse(&transport.query("*IDN?").await?)?;
    let model = model_number(&idn);
    let max_amplitude = MODEL_AMPLITUDES
        .iter()
        .find(|(m, _)| *m == model)
        .map(|(_, amp)| *amp)
        .ok_or_else(|| {
            DaqError::UnrecognizedDevice(format!(
                "unknown model type '{}'; is this the right driver for the instrument?",
                model
            ))
        })?;
    info!(instrument = %name, model = %model, max_amplitude, "connected");

    let ctx = TableContext::new(Arc::clone(&transport), name);
    let table = channel_table(max_amplitude);
    let mut root = Channel::new(name);
    for index in 1..=CHANNEL_COUNT {
        let ch_name = format!("ch{}", index);
        let mut channel = Channel::indexed(ch_name.as_str(), index, CHANNEL_COUNT)?;
        populate(&mut channel, &table, &ctx.with_channel(&ch_name, index))?;
        root.attach(channel)?;
    }
    Ok(Instrument::new(root, Some(transport)).with_idn(idn))
}
