//! Reply framing over a buffered byte stream.
//!
//! A reply read that times out leaves the rest of the late reply in the
//! stream. [`drain_pending`] discards it so the next exchange only ever sees
//! its own answer.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::adapters::LineSettings;
use crate::error::{AppResult, DaqError};

/// Read one reply line with the terminator stripped.
///
/// On timeout everything already received is dropped before returning
/// `Timeout`.
pub(crate) async fn read_reply<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    settings: &LineSettings,
    source: &str,
) -> AppResult<String> {
    let mut buffer = Vec::new();
    let read = reader.read_until(settings.response_delimiter, &mut buffer);
    let n = match tokio::time::timeout(settings.timeout, read).await {
        Ok(result) => result?,
        Err(_) => {
            drain_pending(reader).await;
            return Err(DaqError::Timeout(settings.timeout));
        }
    };
    if n == 0 {
        return Err(DaqError::Transport(format!("Unexpected EOF from '{}'", source)));
    }
    Ok(String::from_utf8_lossy(&buffer)
        .trim_end_matches(&['\r', '\n'][..])
        .to_string())
}

/// Discard buffered bytes and whatever is immediately readable from the
/// stream. Returns the number of bytes dropped.
pub(crate) async fn drain_pending<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> usize {
    let mut dropped = 0;
    loop {
        let available = match tokio::time::timeout(Duration::ZERO, reader.fill_buf()).await {
            Ok(Ok(buf)) if !buf.is_empty() => buf.len(),
            _ => break,
        };
        reader.consume(available);
        dropped += available;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn settings() -> LineSettings {
        LineSettings::default().timeout(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_read_reply_strips_terminator() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut reader = BufReader::new(host);
        device.write_all(b"1.25\r\n").await.unwrap();

        let reply = read_reply(&mut reader, &settings(), "duplex").await.unwrap();
        assert_eq!(reply, "1.25");
    }

    #[tokio::test]
    async fn test_late_reply_is_not_read_as_next_answer() {
        let (mut device, host) = tokio::io::duplex(64);
        let mut reader = BufReader::new(host);

        // first reply only partially arrives before the deadline
        device.write_all(b"1.").await.unwrap();
        let err = read_reply(&mut reader, &settings(), "duplex").await.unwrap_err();
        assert!(matches!(err, DaqError::Timeout(_)));

        // its tail lands afterwards and is dropped before the next exchange
        device.write_all(b"0\n").await.unwrap();
        assert_eq!(drain_pending(&mut reader).await, 2);

        device.write_all(b"2.0\n").await.unwrap();
        let reply = read_reply(&mut reader, &settings(), "duplex").await.unwrap();
        assert_eq!(reply, "2.0");
    }

    #[tokio::test]
    async fn test_drain_on_empty_stream_returns_immediately() {
        let (_device, host) = tokio::io::duplex(64);
        let mut reader = BufReader::new(host);
        assert_eq!(drain_pending(&mut reader).await, 0);
    }

    #[tokio::test]
    async fn test_eof_is_transport_error() {
        let (device, host) = tokio::io::duplex(64);
        drop(device);
        let mut reader = BufReader::new(host);
        let err = read_reply(&mut reader, &settings(), "duplex").await.unwrap_err();
        assert!(matches!(err, DaqError::Transport(_)));
    }
}
