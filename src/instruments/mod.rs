//! Instrument drivers and the configuration-driven factory.
//!
//! Each driver module exposes a `connect` that builds an [`Instrument`] from a
//! transport (or, for BlueFors, from a log folder). Table-driven drivers
//! describe their parameters with [`table::ParamSpec`].

use std::sync::Arc;
use tracing::info;

use crate::adapters::{LineSettings, Transport};
use crate::channel::Instrument;
use crate::config::{Driver, InstrumentDefinition};
use crate::error::{AppResult, DaqError};

pub mod andeen_ah2500a;
pub mod anritsu_mg3692;
pub mod anritsu_ms2830;
pub mod bluefors;
pub mod nf_li5640;
pub mod nf_li5660;
pub mod srs_sg384;
pub mod stahl_hv324;
pub mod table;
pub mod tektronix_afg31000;

/// Serial speed used when a definition does not name one.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Line framing of `definition`: its overrides, else the driver default.
pub fn line_settings(definition: &InstrumentDefinition) -> LineSettings {
    let default = match definition.driver {
        Driver::Hv324 => stahl_hv324::TERMINATOR,
        _ => "\n",
    };
    let terminator = definition.terminator.as_deref().unwrap_or(default);
    LineSettings::with_terminator(terminator).timeout(definition.timeout)
}

/// Serial speed of `definition`.
pub fn baud_rate(definition: &InstrumentDefinition) -> u32 {
    definition.baud_rate.unwrap_or(match definition.driver {
        Driver::Hv324 => stahl_hv324::BAUD_RATE,
        _ => DEFAULT_BAUD_RATE,
    })
}

/// Open the serial transport of `definition`.
///
/// # Errors
/// `FeatureNotEnabled` unless built with the `tokio_serial` feature;
/// `Configuration` when no port is set.
#[cfg(feature = "tokio_serial")]
pub fn open_transport(definition: &InstrumentDefinition) -> AppResult<Arc<dyn Transport>> {
    let port = definition.port.as_deref().ok_or_else(|| {
        DaqError::Configuration(format!("Instrument '{}' has no port", definition.id))
    })?;
    let adapter = crate::adapters::SerialAdapter::open(
        port,
        baud_rate(definition),
        line_settings(definition),
    )?;
    Ok(Arc::new(adapter))
}

/// Open the serial transport of `definition`.
///
/// # Errors
/// `FeatureNotEnabled` unless built with the `tokio_serial` feature;
/// `Configuration` when no port is set.
#[cfg(not(feature = "tokio_serial"))]
pub fn open_transport(_definition: &InstrumentDefinition) -> AppResult<Arc<dyn Transport>> {
    Err(DaqError::FeatureNotEnabled("tokio_serial".into()))
}

/// Open the transport (when the driver needs one) and build the instrument.
pub async fn connect(definition: &InstrumentDefinition) -> AppResult<Instrument> {
    let transport = if definition.driver.needs_transport() {
        Some(open_transport(definition)?)
    } else {
        None
    };
    connect_with(definition, transport).await
}

/// Build the instrument of `definition` on an already open transport.
///
/// # Errors
/// `Configuration` when a transport-backed driver gets none, or when the
/// driver options do not deserialize.
pub async fn connect_with(
    definition: &InstrumentDefinition,
    transport: Option<Arc<dyn Transport>>,
) -> AppResult<Instrument> {
    let name = definition.id.as_str();
    if definition.driver == Driver::Bluefors {
        let options: bluefors::BlueForsOptions = definition.options()?;
        let instrument = bluefors::connect(name, &options)?;
        info!(
            instrument = %name,
            driver = %definition.driver,
            folder = %options.folder_path.display(),
            "connected"
        );
        return Ok(instrument);
    }

    let transport = transport.ok_or_else(|| {
        DaqError::Configuration(format!(
            "Instrument '{}' ({}) needs a transport",
            name, definition.driver
        ))
    })?;
    let link = transport.info();
    let instrument = match definition.driver {
        Driver::Sg384 => srs_sg384::connect(name, transport).await?,
        Driver::Mg3692 => anritsu_mg3692::connect(name, transport).await?,
        Driver::Ms2830 => anritsu_ms2830::connect(name, transport).await?,
        Driver::Li5640 => nf_li5640::connect(name, transport).await?,
        Driver::Li5660 => nf_li5660::connect(name, transport).await?,
        Driver::Ah2500a => andeen_ah2500a::connect(name, transport).await?,
        Driver::Afg31000 => tektronix_afg31000::connect(name, transport).await?,
        Driver::Hv324 => {
            let options: stahl_hv324::HvOptions = definition.options()?;
            stahl_hv324::connect(name, transport, &options).await?
        }
        Driver::Bluefors => unreachable!("handled above"),
    };
    info!(instrument = %name, driver = %definition.driver, transport = %link, "connected");
    Ok(instrument)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use std::time::Duration;

    fn definition(driver: Driver) -> InstrumentDefinition {
        InstrumentDefinition {
            id: "dev".into(),
            driver,
            enabled: true,
            port: Some("/dev/ttyUSB0".into()),
            baud_rate: None,
            timeout: Duration::from_millis(500),
            terminator: None,
            options: toml::Table::new(),
        }
    }

    #[test]
    fn test_line_defaults() {
        let hv = definition(Driver::Hv324);
        assert_eq!(line_settings(&hv).terminator, "\r");
        assert_eq!(baud_rate(&hv), 115_200);

        let mut sg = definition(Driver::Sg384);
        assert_eq!(line_settings(&sg).terminator, "\n");
        assert_eq!(line_settings(&sg).timeout, Duration::from_millis(500));
        sg.baud_rate = Some(19_200);
        sg.terminator = Some("\r\n".into());
        assert_eq!(baud_rate(&sg), 19_200);
        assert_eq!(line_settings(&sg).terminator, "\r\n");
    }

    #[cfg(not(feature = "tokio_serial"))]
    #[test]
    fn test_serial_requires_feature() {
        assert!(matches!(
            open_transport(&definition(Driver::Sg384)),
            Err(DaqError::FeatureNotEnabled(_))
        ));
    }

    #[tokio::test]
    async fn test_transport_driver_without_transport() {
        let err = connect_with(&definition(Driver::Li5640), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_connect_with_mock() {
        let mock = Arc::new(MockAdapter::new());
        let instrument = connect_with(&definition(Driver::Sg384), Some(mock as Arc<dyn Transport>))
            .await
            .unwrap();
        assert_eq!(instrument.name(), "dev");
        assert!(instrument.parameter("frequency").is_ok());
    }
}
