//! CLI entry point for scpi_daq
//!
//! Every subcommand reads the instrument definitions from the configuration
//! file (default `config/scpi_daq.toml`) and connects only the instruments
//! it needs.
//!
//! # Usage
//!
//! ```bash
//! scpi_daq list
//! scpi_daq get sg384 frequency
//! scpi_daq set sg384 frequency 1e9
//! scpi_daq ramp hv ch01.voltage 2.5 --step 0.1 --delay 200ms
//! scpi_daq snapshot --update
//! scpi_daq monitor fridge temperature_mixing_chamber pressure_vacuum_can --interval 10s
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use scpi_daq::config::{DaqConfig, InstrumentDefinition};
use scpi_daq::ramp::CancelFlag;
use scpi_daq::{instruments, logging, Instrument, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "scpi_daq")]
#[command(about = "Get, set, ramp and monitor laboratory instrument parameters", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = scpi_daq::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured instruments, or the parameters of one instrument
    List {
        /// Instrument id
        instrument: Option<String>,
    },

    /// Read a parameter
    Get {
        instrument: String,
        /// Dotted parameter path, e.g. `ch01.voltage`
        path: String,
    },

    /// Write a parameter
    Set {
        instrument: String,
        path: String,
        value: String,
    },

    /// Step a numeric parameter to a target value
    Ramp {
        instrument: String,
        path: String,
        target: f64,
        #[arg(long)]
        step: f64,
        /// Pause between steps, e.g. `100ms`
        #[arg(long, default_value = "100ms", value_parser = parse_duration)]
        delay: Duration,
    },

    /// Print the latest values of instruments as JSON
    Snapshot {
        /// Instrument id; all enabled instruments when omitted
        instrument: Option<String>,
        /// Read every parameter before printing
        #[arg(long)]
        update: bool,
    },

    /// Poll parameters until interrupted
    Monitor {
        instrument: String,
        paths: Vec<String>,
        /// Polling period, e.g. `10s`; must be non-zero
        #[arg(long, default_value = "1s", value_parser = parse_interval)]
        interval: Duration,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DaqConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    logging::init_from_config(&config)?;
    info!(application = %config.application.name, "configuration loaded");

    match cli.command {
        Commands::List { instrument } => list(&config, instrument.as_deref()).await,
        Commands::Get { instrument, path } => {
            let instrument = open(&config, &instrument).await?;
            let parameter = instrument.parameter(&path)?;
            let value = parameter.get().await?;
            println!("{} = {} {}", parameter.full_name(), value, parameter.unit().unwrap_or(""));
            Ok(())
        }
        Commands::Set {
            instrument,
            path,
            value,
        } => {
            let instrument = open(&config, &instrument).await?;
            let parameter = instrument.parameter(&path)?;
            parameter.set(parse_value(&value)).await?;
            println!("{} <- {} {}", parameter.full_name(), value, parameter.unit().unwrap_or(""));
            Ok(())
        }
        Commands::Ramp {
            instrument,
            path,
            target,
            step,
            delay,
        } => {
            let instrument = open(&config, &instrument).await?;
            let cancel = CancelFlag::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping ramp");
                    on_interrupt.cancel();
                }
            });
            instrument
                .ramp(&path, target, step, delay, Some(cancel))
                .await?;
            Ok(())
        }
        Commands::Snapshot { instrument, update } => {
            let ids: Vec<&str> = match &instrument {
                Some(id) => vec![id.as_str()],
                None => config
                    .enabled_instruments()
                    .into_iter()
                    .map(|d| d.id.as_str())
                    .collect(),
            };
            let mut tree = serde_json::Map::new();
            for id in ids {
                let instrument = open(&config, id).await?;
                tree.insert(id.to_string(), instrument.snapshot(update).await);
            }
            println!("{}", serde_json::to_string_pretty(&tree)?);
            Ok(())
        }
        Commands::Monitor {
            instrument,
            paths,
            interval,
        } => monitor(&config, &instrument, &paths, interval).await,
    }
}

fn definition<'a>(config: &'a DaqConfig, id: &str) -> Result<&'a InstrumentDefinition> {
    config
        .instrument(id)
        .ok_or_else(|| anyhow!("no instrument '{}' in configuration", id))
}

async fn open(config: &DaqConfig, id: &str) -> Result<Instrument> {
    let definition = definition(config, id)?;
    instruments::connect(definition)
        .await
        .with_context(|| format!("connecting to '{}'", id))
}

/// Integers first, then floats, then text.
fn parse_value(raw: &str) -> Value {
    if let Ok(v) = raw.parse::<i64>() {
        Value::Int(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        Value::Float(v)
    } else {
        Value::Text(raw.to_string())
    }
}

async fn list(config: &DaqConfig, id: Option<&str>) -> Result<()> {
    let Some(id) = id else {
        for definition in &config.instruments {
            println!(
                "{:<16} {:<10} {:<20} {}",
                definition.id,
                definition.driver,
                definition.port.as_deref().unwrap_or("-"),
                if definition.enabled { "enabled" } else { "disabled" }
            );
        }
        return Ok(());
    };

    let instrument = open(config, id).await?;
    for (path, parameter) in instrument.parameters() {
        let access = match (parameter.is_gettable(), parameter.is_settable()) {
            (true, true) => "rw",
            (true, false) => "r",
            (false, true) => "w",
            (false, false) => "-",
        };
        println!(
            "{:<32} {:<3} {:<6} {}",
            path,
            access,
            parameter.unit().unwrap_or("-"),
            parameter.label()
        );
    }
    Ok(())
}

async fn monitor(
    config: &DaqConfig,
    id: &str,
    paths: &[String],
    interval: Duration,
) -> Result<()> {
    let instrument = open(config, id).await?;
    let parameters = if paths.is_empty() {
        instrument.parameters()
    } else {
        paths
            .iter()
            .map(|p| instrument.parameter(p).map(|parameter| (p.clone(), parameter)))
            .collect::<scpi_daq::AppResult<Vec<_>>>()?
    };

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
        let stamp = chrono::Local::now().format("%H:%M:%S");
        for (path, parameter) in &parameters {
            if !parameter.is_gettable() {
                continue;
            }
            match parameter.get().await {
                Ok(value) => {
                    println!("{} {} = {} {}", stamp, path, value, parameter.unit().unwrap_or(""))
                }
                Err(e) if e.can_recover() => {
                    warn!(parameter = %path, error = %e, "read failed, retrying next tick")
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn parse_duration(s: &str) -> Result<Duration> {
    Ok(humantime_serde::re::humantime::parse_duration(s)?)
}

fn parse_interval(s: &str) -> Result<Duration> {
    let interval = parse_duration(s)?;
    if interval.is_zero() {
        return Err(anyhow!("interval must be greater than zero"));
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("5"), Value::Int(5));
        assert_eq!(parse_value("1e9"), Value::Float(1e9));
        assert_eq!(parse_value("ON"), Value::Text("ON".into()));
    }

    #[test]
    fn test_cli_parses_ramp() {
        let cli = Cli::try_parse_from([
            "scpi_daq", "ramp", "hv", "ch01.voltage", "2.5", "--step", "0.1", "--delay", "50ms",
        ])
        .unwrap();
        match cli.command {
            Commands::Ramp { step, delay, .. } => {
                assert_eq!(step, 0.1);
                assert_eq!(delay, Duration::from_millis(50));
            }
            _ => panic!("expected ramp"),
        }
    }

    #[test]
    fn test_monitor_rejects_zero_interval() {
        for interval in ["0s", "0ms"] {
            let parsed =
                Cli::try_parse_from(["scpi_daq", "monitor", "fridge", "--interval", interval]);
            assert!(parsed.is_err(), "interval {interval} accepted");
        }

        let cli = Cli::try_parse_from(["scpi_daq", "monitor", "fridge", "--interval", "250ms"])
            .unwrap();
        match cli.command {
            Commands::Monitor { interval, .. } => assert_eq!(interval, Duration::from_millis(250)),
            _ => panic!("expected monitor"),
        }
    }
}
