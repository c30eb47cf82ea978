//! Atomic capabilities
//!
//! Small traits that let the parameter engine talk to things that are not a
//! command/response transport:
//!
//! - [`ValueSource`]: anything that can produce a current value on demand.
//!   Log-sampled readings implement it, and a [`Parameter`] built on a source
//!   behaves exactly like a transport-backed one (validation, cache,
//!   snapshots), so monitoring code never needs to know where a value comes
//!   from.
//! - [`Annotator`]: a device display or annotation line that ramps write
//!   their intent to.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Focuses on ONE thing
//!
//! [`Parameter`]: crate::parameter::Parameter

use async_trait::async_trait;

use crate::error::AppResult;
use crate::parameter::Value;

/// Capability: on-demand value production.
///
/// # Contract
/// - Returns the freshest value available at call time
/// - Sources that cannot reach their backing store may return a sentinel
///   (e.g. NaN) instead of an error when the failure is transient
#[async_trait]
pub trait ValueSource: Send + Sync {
    /// Produce the current value.
    async fn read(&self) -> AppResult<Value>;

    /// Short description for logs and snapshots.
    fn describe(&self) -> String {
        "value source".to_string()
    }
}

/// Capability: free-text annotation on the device.
///
/// # Contract
/// - Best effort: callers log failures and continue
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Show `text` on the device display.
    async fn annotate(&self, text: &str) -> AppResult<()>;
}
