//! Stahl HV/BS series multi-channel high-voltage source.
//!
//! The device reports its model, serial, full-scale range, channel count and
//! output type in reply to `IDN`. Every later command is prefixed with the
//! identifier (`HV324`), so channels are built only after that reply has
//! been parsed.
//!
//! Voltages travel as a raw 0..1 code: `physical = (raw - 0.5) * 2 * range`.
//! Writes are acknowledged with a single ACK byte.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::Transport;
use crate::channel::{Channel, Instrument};
use crate::error::AppResult;
use crate::hardware::capabilities::Annotator;
use crate::identity::{DeviceIdentity, IdentityParser};
use crate::parameter::{LinearScale, NumericCodec, Parameter, Validator, ValueCodec};

/// Reply confirming a set command.
pub const ACK: &str = "\u{6}";

/// Line terminator of the serial protocol.
pub const TERMINATOR: &str = "\r";

/// Default serial speed.
pub const BAUD_RATE: u32 = 115_200;

/// Driver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HvOptions {
    /// Custom channel names keyed by one-based channel number (`"1"`,
    /// `"2"`, ...); other channels are named `chNN`.
    pub channel_names: HashMap<String, String>,
    /// Largest accepted absolute voltage, in volts.
    pub voltage_limit: f64,
}

impl Default for HvOptions {
    fn default() -> Self {
        Self {
            channel_names: HashMap::new(),
            voltage_limit: 10.0,
        }
    }
}

impl HvOptions {
    /// Name of channel `index`.
    pub fn channel_name(&self, index: usize) -> String {
        self.channel_names
            .get(&index.to_string())
            .cloned()
            .unwrap_or_else(|| format!("ch{:02}", index))
    }
}

/// Display line of one channel, used to annotate ramps.
pub struct ChannelDisplay {
    transport: Arc<dyn Transport>,
    identifier: String,
    index: usize,
    name: String,
}

impl ChannelDisplay {
    fn line(&self, text: &str) -> String {
        format!("{} DIS L{:02} {} {}", self.identifier, self.index, self.name, text)
    }
}

#[async_trait]
impl Annotator for ChannelDisplay {
    async fn annotate(&self, text: &str) -> AppResult<()> {
        self.transport.query(&self.line(text)).await?;
        Ok(())
    }
}

/// Send a display/housekeeping command, warning when it is not acknowledged.
async fn command(transport: &Arc<dyn Transport>, line: &str) -> AppResult<()> {
    let reply = transport.query(line).await?;
    if reply.trim() != ACK {
        warn!(command = %line, reply = %reply.escape_default(), "command not acknowledged");
    }
    Ok(())
}

fn voltage(
    identity: &DeviceIdentity,
    index: usize,
    label: &str,
    limit: f64,
    scope: &str,
    transport: &Arc<dyn Transport>,
) -> AppResult<Parameter> {
    let id = identity.identifier();
    Parameter::builder("voltage")
        .scope(scope)
        .label(format!("{} Voltage", label))
        .unit("V")
        .get_cmd(format!("{} V{:02}", id, index))
        .set_cmd(format!("{} CH{:02} {{value}}", id, index))
        .ack(ACK)
        .codec(ValueCodec::scaled(
            NumericCodec::fixed(6),
            LinearScale {
                scale: 2.0 * identity.range,
                offset: 0.5,
                decimals: Some(6),
            },
        ))
        .validator(Validator::range(-limit, limit))
        .transport(Arc::clone(transport))
        .build()
}

fn current(
    identity: &DeviceIdentity,
    index: usize,
    scope: &str,
    transport: &Arc<dyn Transport>,
) -> AppResult<Parameter> {
    Parameter::builder("current")
        .scope(scope)
        .unit("A")
        .get_cmd(format!("{} I{:02}", identity.identifier(), index))
        .codec(ValueCodec::Numeric(NumericCodec::float().with_suffix("mA", 1e-3)))
        .transport(Arc::clone(transport))
        .build()
}

/// Identify the device and build one channel per reported output.
///
/// # Errors
/// `UnrecognizedDevice` when the `IDN` reply does not parse.
pub async fn connect(
    name: &str,
    transport: Arc<dyn Transport>,
    options: &HvOptions,
) -> AppResult<Instrument> {
    let reply = transport.query("IDN").await?;
    let identity = Arc::new(IdentityParser::stahl().parse(&reply)?);
    let id = identity.identifier();
    info!(
        instrument = %name,
        identifier = %id,
        range = identity.range,
        channels = identity.channel_count,
        output = %identity.variant,
        "identified"
    );

    command(&transport, &format!("{} DIS AUTO 0", id)).await?;

    let mut root = Channel::new(name).with_identity(Arc::clone(&identity));
    let mut displays = Vec::new();
    for index in 1..=identity.channel_count {
        let ch_name = options.channel_name(index);
        let scope = format!("{}.{}", name, ch_name);
        let mut channel = Channel::numbered(ch_name.as_str(), index, &identity)?;
        channel.add_parameter(voltage(
            &identity,
            index,
            &ch_name,
            options.voltage_limit,
            &scope,
            &transport,
        )?)?;
        channel.add_parameter(current(&identity, index, &scope, &transport)?)?;
        root.attach(channel)?;

        command(&transport, &format!("{} DIS L{:02} {}", id, index, ch_name)).await?;
        displays.push(ChannelDisplay {
            transport: Arc::clone(&transport),
            identifier: id.clone(),
            index,
            name: ch_name,
        });
    }

    let mut instrument = Instrument::new(root, Some(transport));
    for display in displays {
        let path = display.name.clone();
        instrument = instrument.with_annotator(&path, Arc::new(display));
    }
    Ok(instrument)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        let mut options = HvOptions::default();
        options.channel_names.insert("2".into(), "gate".into());
        assert_eq!(options.channel_name(1), "ch01");
        assert_eq!(options.channel_name(2), "gate");
    }

    #[test]
    fn test_display_line() {
        let display = ChannelDisplay {
            transport: Arc::new(crate::adapters::MockAdapter::new()),
            identifier: "HV324".into(),
            index: 3,
            name: "ch03".into(),
        };
        assert_eq!(
            display.line("ramp  1.0000V"),
            "HV324 DIS L03 ch03 ramp  1.0000V"
        );
    }
}
