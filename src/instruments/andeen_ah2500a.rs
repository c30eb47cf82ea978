//! Andeen-Hagerling AH2500A capacitance bridge.

use std::sync::Arc;

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};

pub const PARAMETERS: &[ParamSpec] = &[
    // The bridge takes the bare mode keyword as a command.
    ParamSpec::new("mode")
        .label("measurement mode")
        .set("{value}")
        .codec(CodecSpec::Map(&[("single", "SINGLE"), ("cont", "CONTINUOUS")])),
    // `TRG` answers e.g. `C= 12.34567 PF L= 0.00012 NS`.
    ParamSpec::new("C")
        .label("Capacitance")
        .unit("pF")
        .get("TRG")
        .codec(CodecSpec::Field {
            delimiter: None,
            index: 1,
        }),
];

/// Build the AH2500A parameter tree on `transport`.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let ctx = TableContext::new(Arc::clone(&transport), name);
    let mut root = Channel::new(name);
    populate(&mut root, PARAMETERS, &ctx)?;
    Ok(Instrument::new(root, Some(transport)))
}
