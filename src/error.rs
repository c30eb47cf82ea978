//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`, shared by the
//! parameter engine, the transports and the instrument drivers. Using the
//! `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur between a symbolic
//! `get`/`set` call and the wire.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: bad construction-time setup (duplicate names, a
//!   malformed command template, a driver option of the wrong type).
//! - **`ConfigLoad`**: wraps errors from `figment` while reading the
//!   configuration file and environment.
//! - **`InvalidValue`**: a value rejected by a validator. Raised before any
//!   transport I/O, so no side effect has occurred.
//! - **`InvalidChannel`**: a channel index outside `1..=channel_count`.
//! - **`UnrecognizedDevice`**: the identity reply did not match the driver's
//!   pattern. Fatal at construction.
//! - **`Protocol`**: a reply that could not be decoded. The cache keeps its
//!   previous value.
//! - **`Timeout`** / **`Io`** / **`Transport`**: failures of the underlying
//!   channel.
//!
//! Acknowledgement mismatches, read-back drift, precision loss and transient
//! log read failures are *not* errors: they are reported as `tracing`
//! warnings and the operation continues.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    #[error("Invalid value {value} for parameter '{parameter}'; allowed: {allowed}")]
    InvalidValue {
        parameter: String,
        value: String,
        allowed: String,
    },

    #[error("Invalid channel {index}; device reports {channel_count} channel(s)")]
    InvalidChannel { index: usize, channel_count: usize },

    #[error("Unrecognized device: {0}")]
    UnrecognizedDevice(String),

    #[error("Protocol error on '{parameter}': {reason} (reply: {reply:?})")]
    Protocol {
        parameter: String,
        reply: String,
        reason: String,
    },

    #[error("Transport timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parameter '{0}' has no getter")]
    NotGettable(String),

    #[error("Parameter '{0}' has no setter")]
    NotSettable(String),

    #[error("Unknown parameter or channel: {0}")]
    UnknownParameter(String),

    #[error("Operation on '{0}' was cancelled")]
    Cancelled(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Whether a polling loop may continue after this error.
    ///
    /// Transport hiccups and undecodable replies are recoverable by the next
    /// call; configuration and identity errors are not.
    pub fn can_recover(&self) -> bool {
        matches!(
            self,
            DaqError::Protocol { .. }
                | DaqError::Timeout(_)
                | DaqError::Io(_)
                | DaqError::Transport(_)
                | DaqError::InvalidValue { .. }
                | DaqError::Cancelled(_)
        )
    }

    pub(crate) fn protocol(
        parameter: impl Into<String>,
        reply: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DaqError::Protocol {
            parameter: parameter.into(),
            reply: reply.into(),
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::ConfigLoad(Box::new(value))
    }
}
