//! BlueFors dilution refrigerator, read from its log files.
//!
//! The driver never talks to the fridge electronics. Pressures come from the
//! daily maxigauge log, temperatures from one daily log per thermometer
//! channel.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::log_sampled::{DatedLog, LogSampledParameter};

/// Log folder and sensor channel assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueForsOptions {
    /// Root of the fridge log folder (contains one folder per day).
    pub folder_path: PathBuf,
    pub channel_vacuum_can: usize,
    pub channel_pumping_line: usize,
    pub channel_compressor_outlet: usize,
    pub channel_compressor_inlet: usize,
    pub channel_mixture_tank: usize,
    pub channel_venting_line: usize,
    pub channel_50k_plate: usize,
    pub channel_4k_plate: usize,
    pub channel_still: usize,
    pub channel_mixing_chamber: usize,
    pub channel_cell: usize,
    /// Not every fridge has a magnet thermometer.
    #[serde(default)]
    pub channel_magnet: Option<usize>,
}

/// Status report lines: label and parameter name.
const PRESSURE_REPORT: &[(&str, &str)] = &[
    ("VC(P1)", "pressure_vacuum_can"),
    ("DR out (P2)", "pressure_pumping_line"),
    ("DR in (P3)", "pressure_compressor_outlet"),
    ("CT in (P4)", "pressure_compressor_inlet"),
    ("He3 tank (P5)", "pressure_mixture_tank"),
    ("GHS Manifold (P6)", "pressure_venting_line"),
];

const TEMPERATURE_REPORT: &[(&str, &str)] = &[
    ("50K", "temperature_50k_plate"),
    ("4K", "temperature_4k_plate"),
    ("Still", "temperature_still"),
    ("MXC", "temperature_mixing_chamber"),
    ("Cell", "temperature_cell"),
];

const RULE: &str = "--------------------------------------";

/// Build the log-sampled parameter tree, reading today's files in local time.
pub fn connect(name: &str, options: &BlueForsOptions) -> AppResult<Instrument> {
    connect_with_date(name, options, || Local::now().date_naive())
}

/// Build the tree with an explicit clock.
pub fn connect_with_date(
    name: &str,
    options: &BlueForsOptions,
    today: impl Fn() -> NaiveDate + Send + Sync + Clone + 'static,
) -> AppResult<Instrument> {
    let root_dir = &options.folder_path;
    let mut root = Channel::new(name);

    let pressures = [
        ("vacuum_can", "vacuum can", options.channel_vacuum_can),
        ("pumping_line", "pumping line", options.channel_pumping_line),
        ("compressor_outlet", "compressor outlet", options.channel_compressor_outlet),
        ("compressor_inlet", "compressor inlet", options.channel_compressor_inlet),
        ("mixture_tank", "mixture tank", options.channel_mixture_tank),
        ("venting_line", "venting line", options.channel_venting_line),
    ];
    for (key, what, channel) in pressures {
        let source = LogSampledParameter::new(DatedLog::maxigauge(root_dir, channel)?)
            .with_date_provider(today.clone());
        root.add_parameter(source.into_parameter(
            format!("pressure_{}", key),
            "mBar",
            &format!("Pressure of the {}", what),
        )?)?;
    }

    let mut temperatures = vec![
        ("50k_plate", "50K plate", options.channel_50k_plate),
        ("4k_plate", "4K plate", options.channel_4k_plate),
    ];
    if let Some(magnet) = options.channel_magnet {
        temperatures.push(("magnet", "magnet", magnet));
    }
    temperatures.extend([
        ("still", "still", options.channel_still),
        ("mixing_chamber", "mixing chamber", options.channel_mixing_chamber),
        ("cell", "cell", options.channel_cell),
    ]);
    for (key, what, channel) in temperatures {
        let source = LogSampledParameter::new(DatedLog::temperature(root_dir, channel))
            .with_date_provider(today.clone());
        root.add_parameter(source.into_parameter(
            format!("temperature_{}", key),
            "K",
            &format!("Temperature of the {}", what),
        )?)?;
    }

    Ok(Instrument::new(root, None))
}

/// Human-readable summary of the latest pressures and temperatures.
///
/// Unavailable readings show as `NaN`.
pub async fn status_report(instrument: &Instrument) -> AppResult<String> {
    let mut out = String::new();
    let sections: [(&[(&str, &str)], &str); 2] =
        [(PRESSURE_REPORT, "mbar"), (TEMPERATURE_REPORT, "K")];
    for (lines, unit) in sections {
        let _ = writeln!(out, "{}", RULE);
        for (label, path) in lines {
            let value = instrument.parameter(path)?.get().await?;
            let _ = writeln!(out, "{} = {} {}", label, value, unit);
        }
    }
    let _ = writeln!(out, "{}", RULE);
    Ok(out)
}
