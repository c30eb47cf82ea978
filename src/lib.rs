//! # scpi_daq
//!
//! Parameter engine and drivers for line-oriented laboratory instruments.
//!
//! A driver is a tree of named [`parameter::Parameter`]s grouped into
//! [`channel::Channel`]s under one [`channel::Instrument`]. Every parameter
//! turns symbolic values into command strings and reply strings back into
//! values, validates before any I/O, and keeps a cache of the last value it
//! read or wrote.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: the [`adapters::Transport`] trait, the scripted mock and
//!   the serial transport (feature `tokio_serial`).
//! - **`parameter`**: values, validators, codecs and the parameter engine.
//! - **`ramp`**: stepwise approach of numeric parameters with cancellation.
//! - **`channel`**: channel trees, path resolution and JSON snapshots.
//! - **`identity`**: identity reply parsing (`*IDN?` and Stahl `IDN`).
//! - **`log_sampled`**: parameters backed by dated CSV log files.
//! - **`hardware`**: capability traits for value sources and displays.
//! - **`instruments`**: the concrete drivers and the configuration factory.
//! - **`config`**: figment-based configuration.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: the crate error type.

pub mod adapters;
pub mod channel;
pub mod config;
pub mod error;
pub mod hardware;
pub mod identity;
pub mod instruments;
pub mod log_sampled;
pub mod logging;
pub mod parameter;
pub mod ramp;

pub use channel::{Channel, Instrument};
pub use error::{AppResult, DaqError};
pub use parameter::{Parameter, Value};
