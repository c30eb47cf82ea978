//! Serial transport for RS-232/USB-Serial instruments
//!
//! Wraps a `tokio-serial` stream behind a `tokio::sync::Mutex`. The lock is
//! held for a whole query, so the half-duplex exchange of one command and one
//! reply can never interleave with another caller's. A timed-out reply is
//! flushed from the buffer and the port input queue, and every query drains
//! stale input before it writes.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace};

use crate::adapters::line_reader::{drain_pending, read_reply};
use crate::adapters::{LineSettings, Transport};
use crate::error::{AppResult, DaqError};

/// Serial adapter for line-oriented instruments.
pub struct SerialAdapter {
    port_name: String,
    baud_rate: u32,
    settings: LineSettings,
    port: Mutex<BufReader<SerialStream>>,
}

impl SerialAdapter {
    /// Open `port_name` at `baud_rate`, 8N1, no flow control.
    ///
    /// # Errors
    /// Returns error if the serial port cannot be opened
    pub fn open(port_name: &str, baud_rate: u32, settings: LineSettings) -> AppResult<Self> {
        let port = tokio_serial::new(port_name, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                DaqError::Transport(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    port_name, baud_rate, e
                ))
            })?;

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            settings,
            port: Mutex::new(BufReader::new(port)),
        })
    }

    async fn write_locked(
        &self,
        port: &mut BufReader<SerialStream>,
        command: &str,
    ) -> AppResult<()> {
        let line = format!("{}{}", command, self.settings.terminator);
        trace!(port = %self.port_name, command = %line.escape_default(), "serial write");
        port.get_mut().write_all(line.as_bytes()).await?;
        port.get_mut().flush().await?;
        Ok(())
    }

    async fn read_locked(&self, port: &mut BufReader<SerialStream>) -> AppResult<String> {
        let result = read_reply(port, &self.settings, &self.port_name).await;
        if let Err(DaqError::Timeout(_)) = &result {
            self.clear_input(port)?;
        }
        let response = result?;
        trace!(port = %self.port_name, response = %response.escape_default(), "serial read");
        Ok(response)
    }

    async fn discard_stale(&self, port: &mut BufReader<SerialStream>) {
        let dropped = drain_pending(port).await;
        if dropped > 0 {
            debug!(port = %self.port_name, bytes = dropped, "discarded stale input");
        }
    }

    fn clear_input(&self, port: &BufReader<SerialStream>) -> AppResult<()> {
        port.get_ref().clear(ClearBuffer::Input).map_err(|e| {
            DaqError::Transport(format!(
                "Failed to clear input of serial port '{}': {}",
                self.port_name, e
            ))
        })
    }
}

#[async_trait]
impl Transport for SerialAdapter {
    async fn write(&self, command: &str) -> AppResult<()> {
        let mut port = self.port.lock().await;
        self.write_locked(&mut port, command).await
    }

    async fn read_line(&self) -> AppResult<String> {
        let mut port = self.port.lock().await;
        self.read_locked(&mut port).await
    }

    async fn query(&self, command: &str) -> AppResult<String> {
        let mut port = self.port.lock().await;
        self.discard_stale(&mut port).await;
        self.write_locked(&mut port, command).await?;
        self.read_locked(&mut port).await
    }

    fn info(&self) -> String {
        format!("SerialAdapter({} @ {} baud)", self.port_name, self.baud_rate)
    }
}
