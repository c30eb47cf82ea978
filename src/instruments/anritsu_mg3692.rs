//! Anritsu MG3692 scalar RF source.

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::identity::ScpiIdentity;
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};

pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::new("power")
        .label("Power")
        .unit("dBm")
        .get("SOUR:POW?")
        .set("SOUR:POW {value}")
        .codec(CodecSpec::Fixed(2))
        .range(-130.0, 19.0),
    ParamSpec::new("frequency")
        .label("Frequency")
        .unit("Hz")
        .get("SOUR:FREQ?")
        .set("SOUR:FREQ {value}")
        .codec(CodecSpec::Fixed(2))
        .range(9e3, 240e9),
    ParamSpec::new("rf_output")
        .get("OUTP:STAT?")
        .set("OUTP:STAT {value}")
        .codec(CodecSpec::Map(&[("on", "1"), ("off", "0")])),
    ParamSpec::new("get_reference")
        .get("SOUR:ROSC:SOUR?")
        .codec(CodecSpec::Text)
        .doc("Reference oscillator source"),
];

/// Build the MG3692 parameter tree and read its `*IDN?`.
///
/// An unreadable identity is logged; the source is still usable.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let ctx = TableContext::new(Arc::clone(&transport), name);
    let mut root = Channel::new(name);
    populate(&mut root, PARAMETERS, &ctx)?;

    let idn = match transport.query("*IDN?").await {
        Ok(reply) => ScpiIdentity::parse(&reply).map_err(|e| {
            warn!(instrument = %name, error = %e, "unexpected identity reply");
            e
        }),
        Err(e) => {
            warn!(instrument = %name, error = %e, "identity query failed");
            Err(e)
        }
    };

    let instrument = Instrument::new(root, Some(transport));
    Ok(match idn {
        Ok(idn) => {
            info!(
                instrument = %name,
                vendor = %idn.vendor,
                model = %idn.model,
                serial = %idn.serial,
                "connected"
            );
            instrument.with_idn(idn)
        }
        Err(_) => instrument,
    })
}
