//! NF LI5640 lock-in amplifier.

use std::sync::Arc;

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};

pub const PARAMETERS: &[ParamSpec] = &[
    ParamSpec::new("R")
        .label("Magnitude")
        .unit("V")
        .get("OTYP 1; DOUT?")
        .codec(CodecSpec::Float),
    ParamSpec::new("T")
        .label("Phase")
        .unit("deg")
        .get("OTYP 2; DOUT?")
        .codec(CodecSpec::Float),
    ParamSpec::new("get_data")
        .label("lock-In data")
        .get("OTYP 1,2; DOUT?")
        .codec(CodecSpec::Array)
        .shape(2),
    // `AMPL?` answers `amplitude,range`; the range code is kept at 0 on write.
    ParamSpec::new("amplitude")
        .label("osc out amplitude")
        .unit("V")
        .get("AMPL?")
        .set("AMPL {value},0")
        .codec(CodecSpec::Field {
            delimiter: Some(','),
            index: 0,
        }),
];

/// Build the LI5640 parameter tree on `transport`.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let ctx = TableContext::new(Arc::clone(&transport), name);
    let mut root = Channel::new(name);
    populate(&mut root, PARAMETERS, &ctx)?;
    Ok(Instrument::new(root, Some(transport)))
}
