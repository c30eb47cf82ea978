//! Anritsu MS2830 spectrum analyser.
//!
//! Start and stop are bounded by each other's live value and verified by
//! read-back. Center and span move both edges, so their setters refresh the
//! cached start and stop. The frequency axis and the trace are validated
//! against the cached point count at every read.

use std::sync::Arc;

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::{AppResult, DaqError};
use crate::instruments::table::{populate, CodecSpec, ParamSpec, TableContext};
use crate::parameter::{
    Parameter, ReadbackCheck, Relation, SiblingBound, Validator, Value, ValueCodec,
};

/// Lowest frequency of the analyser.
pub const MIN_FREQ: f64 = 9e3;
/// Highest frequency of the analyser.
pub const MAX_FREQ: f64 = 26.5e9;

/// Largest accepted difference between a requested and a read-back edge.
const EDGE_TOLERANCE_HZ: f64 = 1.0;

const START: ParamSpec = ParamSpec::new("start")
    .unit("Hz")
    .get(":SENSe:FREQuency:STARt?")
    .set(":SENSe:FREQuency:STARt {value}")
    .codec(CodecSpec::Float)
    .range(MIN_FREQ, MAX_FREQ - 10.0)
    .doc("start frequency for the sweep");

const STOP: ParamSpec = ParamSpec::new("stop")
    .unit("Hz")
    .get(":SENSe:FREQuency:STOP?")
    .set(":SENSe:FREQuency:STOP {value}")
    .codec(CodecSpec::Float)
    .range(MIN_FREQ + 10.0, MAX_FREQ)
    .doc("stop frequency for the sweep");

const CENTER: ParamSpec = ParamSpec::new("center")
    .unit("Hz")
    .get(":SENSe:FREQuency:CENTer?")
    .codec(CodecSpec::Float)
    .range(MIN_FREQ + 5.0, MAX_FREQ - 5.0)
    .doc("center frequency of the sweep");

const SPAN: ParamSpec = ParamSpec::new("span")
    .unit("Hz")
    .get(":SENSe:FREQuency:SPAN?")
    .codec(CodecSpec::Float)
    .range(10.0, MAX_FREQ - MIN_FREQ)
    .doc("frequency span of the sweep");

const NPTS: ParamSpec = ParamSpec::new("npts")
    .get(":SENSe:SWEep:POINts?")
    .set(":SENSe:SWEep:POINts {value}")
    .codec(CodecSpec::Int)
    .ints(1, 20001)
    .doc("Number of points for the sweep");

const SINGLE: ParamSpec = ParamSpec::new("single")
    .codec(CodecSpec::Int)
    .ints(1, 9999)
    .doc("Averaged single sweep; the value is the average count");

/// Plain get/set settings and markers.
pub const SETTINGS: &[ParamSpec] = &[
    ParamSpec::new("average")
        .get(":SENSe:AVERage:COUNt?")
        .set(":SENSe:AVERage:COUNt {value}")
        .codec(CodecSpec::Int)
        .doc("trace average count"),
    ParamSpec::new("RBW")
        .unit("Hz")
        .get(":BAND?")
        .set(":BAND {value}")
        .codec(CodecSpec::Int)
        .doc("resolution bandwidth"),
    ParamSpec::new("cont_meas")
        .get(":INITiate:CONTinuous?")
        .set(":INITiate:CONTinuous {value}")
        .codec(CodecSpec::Map(&[("on", "ON"), ("off", "OFF")]))
        .doc("Enables or disables continuous measurement."),
    ParamSpec::new("marker1X")
        .unit("Hz")
        .get(":CALCulate:MARKer1:X?")
        .set(":CALCulate:MARKer1:X {value}")
        .codec(CodecSpec::Float),
    ParamSpec::new("marker2X")
        .unit("Hz")
        .get(":CALCulate:MARKer2:X?")
        .set(":CALCulate:MARKer2:X {value}")
        .codec(CodecSpec::Float),
    ParamSpec::new("marker3X")
        .unit("Hz")
        .get(":CALCulate:MARKer3:X?")
        .set(":CALCulate:MARKer3:X {value}")
        .codec(CodecSpec::Float),
    ParamSpec::new("marker1Y")
        .unit("V")
        .get(":CALCulate:MARKer1:Y?")
        .codec(CodecSpec::Float),
    ParamSpec::new("marker2Y")
        .unit("V")
        .get(":CALCulate:MARKer2:Y?")
        .codec(CodecSpec::Float),
    ParamSpec::new("marker3Y")
        .unit("V")
        .get(":CALCulate:MARKer3:Y?")
        .codec(CodecSpec::Float),
];

const SPECTRUM: ParamSpec = ParamSpec::new("spectrum")
    .label("Spectrum")
    .unit("dBm")
    .get("TRAC? TRAC1")
    .codec(CodecSpec::Array);

/// `n` evenly spaced points from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

fn number(parameter: &Parameter, value: Value) -> AppResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| DaqError::protocol(parameter.full_name(), value.to_string(), "not a number"))
}

fn cached_points(npts: &Arc<Parameter>) -> impl Fn() -> Option<usize> + Send + Sync + 'static {
    let npts = Arc::clone(npts);
    move || {
        npts.get_latest()
            .and_then(|v| v.as_i64())
            .and_then(|n| usize::try_from(n).ok())
    }
}

/// Setter that writes one edge-moving command and then refreshes the
/// cached start and stop.
fn edge_mover(
    mnemonic: &'static str,
    transport: &Arc<dyn Transport>,
    start: &Arc<Parameter>,
    stop: &Arc<Parameter>,
) -> impl Fn(Value) -> futures::future::BoxFuture<'static, AppResult<()>> + Send + Sync + 'static {
    let transport = Arc::clone(transport);
    let (start, stop) = (Arc::clone(start), Arc::clone(stop));
    move |value: Value| {
        let (transport, start, stop) =
            (Arc::clone(&transport), Arc::clone(&start), Arc::clone(&stop));
        Box::pin(async move {
            transport.write(&format!("{} {}", mnemonic, value)).await?;
            start.get().await?;
            stop.get().await?;
            Ok(())
        })
    }
}

/// Build the MS2830 parameter tree on `transport`.
pub async fn connect(name: &str, transport: Arc<dyn Transport>) -> AppResult<Instrument> {
    let ctx = TableContext::new(Arc::clone(&transport), name);
    let mut root = Channel::new(name);

    let readback = ReadbackCheck::Tolerance(EDGE_TOLERANCE_HZ);
    let start = root.add_parameter(START.builder(&ctx)?.verify_readback(readback).build()?)?;
    let stop = root.add_parameter(STOP.builder(&ctx)?.verify_readback(readback).build()?)?;
    start.add_guard(SiblingBound::new(&stop, Relation::Below));
    stop.add_guard(SiblingBound::new(&start, Relation::Above));

    root.add_parameter(
        CENTER
            .builder(&ctx)?
            .set_fn(edge_mover(":SENSe:FREQuency:CENTer", &transport, &start, &stop))
            .build()?,
    )?;
    root.add_parameter(
        SPAN.builder(&ctx)?
            .set_fn(edge_mover(":SENSe:FREQuency:SPAN", &transport, &start, &stop))
            .build()?,
    )?;

    let npts = root.add_parameter(NPTS.builder(&ctx)?.build()?)?;
    populate(&mut root, SETTINGS, &ctx)?;

    let sweep = Arc::clone(&transport);
    root.add_parameter(
        SINGLE
            .builder(&ctx)?
            .set_fn(move |count: Value| {
                let transport = Arc::clone(&sweep);
                async move {
                    transport
                        .write(&format!(":SENSe:AVERage:COUNt {}", count))
                        .await?;
                    transport.write("TRAC1:STOR:MODE AVER").await?;
                    transport.write(":INITiate:SWP").await?;
                    transport.write("*WAI").await?;
                    transport.query(":INITiate:SWP?").await?;
                    Ok(())
                }
            })
            .build()?,
    )?;

    let (axis_start, axis_stop, axis_npts) = (start.clone(), stop.clone(), npts.clone());
    root.add_parameter(
        Parameter::builder("freq_axis")
            .scope(name)
            .label("Freq Axis")
            .unit("Hz")
            .codec(ValueCodec::csv_array())
            .validator(Validator::shape(cached_points(&npts)))
            .get_fn(move || {
                let (start, stop, npts) =
                    (axis_start.clone(), axis_stop.clone(), axis_npts.clone());
                async move {
                    let f0 = number(&start, start.get().await?)?;
                    let f1 = number(&stop, stop.get().await?)?;
                    let n = npts.get().await?.as_i64().unwrap_or(0).max(0) as usize;
                    Ok(Value::Array(linspace(f0, f1, n)))
                }
            })
            .build()?,
    )?;

    root.add_parameter(
        SPECTRUM
            .builder(&ctx)?
            .validator(Validator::shape(cached_points(&npts)))
            .build()?,
    )?;

    Ok(Instrument::new(root, Some(transport)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
        assert!(linspace(3.0, 4.0, 0).is_empty());
    }
}
