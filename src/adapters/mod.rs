//! Line-oriented request/response transports.
//!
//! The parameter engine only needs a half-duplex text channel: write one
//! command line, read one reply line. Physical links (RS-232, USB-serial) and
//! the test mock implement [`Transport`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AppResult;

#[cfg_attr(not(feature = "tokio_serial"), allow(dead_code))]
pub(crate) mod line_reader;
pub mod mock_adapter;
pub use mock_adapter::MockAdapter;

#[cfg(feature = "tokio_serial")]
pub mod serial_adapter;
#[cfg(feature = "tokio_serial")]
pub use serial_adapter::SerialAdapter;

/// Blocking-style request/response channel to one instrument.
///
/// Implementations append their line terminator on write and strip it on
/// read. `query` must perform the write and the read as a single exchange so
/// two callers sharing a transport cannot interleave their replies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one command line.
    async fn write(&self, command: &str) -> AppResult<()>;

    /// Read one reply line, bounded by the transport timeout.
    async fn read_line(&self) -> AppResult<String>;

    /// Send a command and read its reply.
    async fn query(&self, command: &str) -> AppResult<String> {
        self.write(command).await?;
        self.read_line().await
    }

    /// Short description for logs.
    fn info(&self) -> String;
}

/// Framing and timing shared by all transports.
#[derive(Debug, Clone, PartialEq)]
pub struct LineSettings {
    /// Appended to every command.
    pub terminator: String,
    /// Byte that ends a reply.
    pub response_delimiter: u8,
    /// Upper bound for one reply.
    pub timeout: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            terminator: "\n".to_string(),
            response_delimiter: b'\n',
            timeout: Duration::from_secs(1),
        }
    }
}

impl LineSettings {
    /// Settings with the same terminator on both directions.
    pub fn with_terminator(terminator: &str) -> Self {
        Self {
            terminator: terminator.to_string(),
            response_delimiter: terminator.bytes().last().unwrap_or(b'\n'),
            ..Self::default()
        }
    }

    /// Override the reply timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_settings_from_terminator() {
        let cr = LineSettings::with_terminator("\r");
        assert_eq!(cr.response_delimiter, b'\r');
        let crlf = LineSettings::with_terminator("\r\n").timeout(Duration::from_millis(250));
        assert_eq!(crlf.response_delimiter, b'\n');
        assert_eq!(crlf.timeout, Duration::from_millis(250));
    }
}
