//! Configuration for scpi_daq
//!
//! Figment-based loading from `config/scpi_daq.toml`, overridable through
//! `SCPI_DAQ_`-prefixed environment variables. Nested keys are separated by a
//! double underscore so that field names keep their own underscores:
//!
//! ```bash
//! SCPI_DAQ_APPLICATION__LOG_LEVEL=debug scpi_daq list
//! ```
//!
//! Every instrument entry names its driver and, for transport-backed drivers,
//! the serial port. Driver-specific settings live in a free-form `options`
//! table that the driver deserializes itself.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, DaqError};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/scpi_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SCPI_DAQ_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaqConfig {
    pub application: ApplicationConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    pub name: String,
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub log_level: String,
    /// `pretty`, `compact` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Supported instrument drivers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    Sg384,
    Mg3692,
    Ms2830,
    Li5640,
    Li5660,
    Ah2500a,
    Afg31000,
    Hv324,
    Bluefors,
}

impl Driver {
    /// Whether the driver talks to the device over a transport.
    pub fn needs_transport(self) -> bool {
        !matches!(self, Driver::Bluefors)
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Driver::Sg384 => "sg384",
            Driver::Mg3692 => "mg3692",
            Driver::Ms2830 => "ms2830",
            Driver::Li5640 => "li5640",
            Driver::Li5660 => "li5660",
            Driver::Ah2500a => "ah2500a",
            Driver::Afg31000 => "afg31000",
            Driver::Hv324 => "hv324",
            Driver::Bluefors => "bluefors",
        };
        f.write_str(name)
    }
}

/// One configured instrument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentDefinition {
    /// Instrument name; also the root scope of its parameters.
    pub id: String,
    pub driver: Driver,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Serial device path, required by transport-backed drivers.
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Reply timeout, e.g. `"500ms"` or `"2s"`.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Line terminator override.
    #[serde(default)]
    pub terminator: Option<String>,
    #[serde(default)]
    pub options: toml::Table,
}

impl InstrumentDefinition {
    /// Deserialize the driver-specific `options` table.
    ///
    /// # Errors
    /// `Configuration` when the table does not match `T`.
    pub fn options<T: DeserializeOwned>(&self) -> AppResult<T> {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e| {
                DaqError::Configuration(format!(
                    "Invalid options for instrument '{}': {}",
                    self.id, e
                ))
            })
    }
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl DaqConfig {
    /// Load from the default file and environment.
    ///
    /// # Errors
    /// `ConfigLoad` when the sources cannot be merged or extracted.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` merged with the environment.
    pub fn load_from(path: impl AsRef<Path>) -> AppResult<Self> {
        let config: DaqConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Check the settings serde cannot express.
    ///
    /// # Errors
    /// `Configuration` naming the first offending entry.
    pub fn validate(&self) -> AppResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(instrument.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "Duplicate instrument ID: {}",
                    instrument.id
                )));
            }
            if instrument.driver.needs_transport()
                && instrument.port.as_deref().map_or(true, str::is_empty)
            {
                return Err(DaqError::Configuration(format!(
                    "Instrument '{}' ({}) needs a port",
                    instrument.id, instrument.driver
                )));
            }
            let has_folder = matches!(
                instrument.options.get("folder_path"),
                Some(toml::Value::String(s)) if !s.is_empty()
            );
            if instrument.driver == Driver::Bluefors && !has_folder {
                return Err(DaqError::Configuration(format!(
                    "Instrument '{}' (bluefors) needs options.folder_path",
                    instrument.id
                )));
            }
        }
        Ok(())
    }

    /// Instruments with `enabled = true`.
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments.iter().filter(|i| i.enabled).collect()
    }

    /// Look up an instrument by id.
    pub fn instrument(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments.iter().find(|i| i.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn definition(id: &str, driver: Driver, port: Option<&str>) -> InstrumentDefinition {
        InstrumentDefinition {
            id: id.to_string(),
            driver,
            enabled: true,
            port: port.map(str::to_string),
            baud_rate: None,
            timeout: default_timeout(),
            terminator: None,
            options: toml::Table::new(),
        }
    }

    fn config(instruments: Vec<InstrumentDefinition>) -> DaqConfig {
        DaqConfig {
            application: ApplicationConfig {
                name: "Test".to_string(),
                log_level: "info".to_string(),
                log_format: default_log_format(),
            },
            instruments,
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "lab"
log_level = "debug"

[[instruments]]
id = "hv"
driver = "hv324"
port = "/dev/ttyUSB0"
timeout = "250ms"

[instruments.options]
voltage_limit = 5.0

[instruments.options.channel_names]
"1" = "gate"

[[instruments]]
id = "fridge"
driver = "bluefors"
enabled = false

[instruments.options]
folder_path = "/data/fridge"
"#
        )
        .unwrap();

        let config = DaqConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "lab");
        assert_eq!(config.application.log_format, "pretty");
        assert_eq!(config.instruments.len(), 2);
        let hv = config.instrument("hv").unwrap();
        assert_eq!(hv.driver, Driver::Hv324);
        assert_eq!(hv.timeout, Duration::from_millis(250));
        assert_eq!(
            hv.options
                .get("channel_names")
                .and_then(|t| t.get("1"))
                .and_then(|v| v.as_str()),
            Some("gate")
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.enabled_instruments().len(), 1);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = config(vec![]);
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let config = config(vec![
            definition("sg", Driver::Sg384, Some("/dev/ttyUSB0")),
            definition("sg", Driver::Mg3692, Some("/dev/ttyUSB1")),
        ]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate instrument ID"));
    }

    #[test]
    fn test_validate_missing_port() {
        let config = config(vec![definition("lockin", Driver::Li5640, None)]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("needs a port"));
    }

    #[test]
    fn test_validate_bluefors_folder() {
        let mut fridge = definition("fridge", Driver::Bluefors, None);
        assert!(config(vec![fridge.clone()]).validate().is_err());

        fridge
            .options
            .insert("folder_path".into(), toml::Value::String("/data".into()));
        assert!(config(vec![fridge]).validate().is_ok());
    }

    #[test]
    fn test_typed_options() {
        #[derive(Deserialize)]
        struct Limit {
            voltage_limit: f64,
        }

        let mut hv = definition("hv", Driver::Hv324, Some("/dev/ttyUSB0"));
        hv.options
            .insert("voltage_limit".into(), toml::Value::Float(2.5));
        assert_eq!(hv.options::<Limit>().unwrap().voltage_limit, 2.5);

        hv.options
            .insert("voltage_limit".into(), toml::Value::String("high".into()));
        assert!(matches!(
            hv.options::<Limit>(),
            Err(DaqError::Configuration(_))
        ));
    }
}
