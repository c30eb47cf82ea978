//! Closed-loop ramping of numeric parameters.
//!
//! A ramp walks a parameter from its current value to a target in
//! increments no larger than `step`, pausing `inter_delay` between
//! increments. The last increment is clipped so the walk lands exactly on the
//! target.
//!
//! A parameter carries a standing [`RampConfig`]; when its `step` is set,
//! every `set` walks. [`RampController`] installs a ramp-specific
//! configuration for one call and restores the previous one when it returns,
//! fails or is cancelled (the restore lives in a `Drop` guard, so it also runs
//! if the ramp future itself is dropped).
//!
//! Ramps are not safe against a concurrent ramp or `set` on the same
//! parameter: callers serialize access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Annotator;
use crate::parameter::{Parameter, Value};

/// Standing step/delay configuration of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RampConfig {
    /// Largest increment per write; `None` writes the target directly.
    pub step: Option<f64>,
    /// Pause between consecutive writes of a walk.
    pub inter_delay: Duration,
}

/// Cooperative cancellation, polled between ramp steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every ramp observing this flag.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Most increments a single walk may take.
pub const MAX_RAMP_STEPS: f64 = 1.0e6;

/// Intermediate values of a walk from `start` to `target`, excluding `start`
/// and ending exactly on `target`.
///
/// `step` must be positive and finite. Values are produced lazily.
pub fn ramp_values(start: f64, target: f64, step: f64) -> RampValues {
    RampValues {
        start,
        target,
        step,
        direction: (target - start).signum(),
        k: 0,
        done: false,
    }
}

/// Iterator returned by [`ramp_values`].
#[derive(Debug, Clone)]
pub struct RampValues {
    start: f64,
    target: f64,
    step: f64,
    direction: f64,
    k: u64,
    done: bool,
}

impl Iterator for RampValues {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.done {
            return None;
        }
        if self.start == self.target {
            self.done = true;
            return Some(self.target);
        }
        self.k += 1;
        let v = self.start + self.direction * self.step * self.k as f64;
        // Float accumulation must never carry a step past the target.
        if (self.target - v) * self.direction <= 0.0 {
            self.done = true;
            return Some(self.target);
        }
        Some(v)
    }
}

/// Reject walks that would take more than [`MAX_RAMP_STEPS`] increments.
///
/// # Errors
/// `InvalidValue` naming the step of `parameter`.
pub fn check_step_count(parameter: &str, start: f64, target: f64, step: f64) -> AppResult<()> {
    let count = ((target - start).abs() / step).ceil();
    if count <= MAX_RAMP_STEPS {
        return Ok(());
    }
    Err(DaqError::InvalidValue {
        parameter: format!("{}.step", parameter),
        value: step.to_string(),
        allowed: format!(
            "at most {} steps over {} (at least {})",
            MAX_RAMP_STEPS,
            (target - start).abs(),
            (target - start).abs() / MAX_RAMP_STEPS
        ),
    })
}

/// Restores a parameter's ramp configuration on drop.
struct ScopedRampConfig<'a> {
    parameter: &'a Parameter,
    previous: RampConfig,
}

impl<'a> ScopedRampConfig<'a> {
    fn install(parameter: &'a Parameter, config: RampConfig) -> Self {
        let previous = parameter.ramp_config();
        parameter.set_ramp_config(config);
        Self {
            parameter,
            previous,
        }
    }
}

impl Drop for ScopedRampConfig<'_> {
    fn drop(&mut self) {
        self.parameter.set_ramp_config(self.previous);
    }
}

/// Drives one numeric parameter to a target with bounded steps.
pub struct RampController {
    parameter: Arc<Parameter>,
    annotator: Option<Arc<dyn Annotator>>,
    cancel: Option<CancelFlag>,
}

impl RampController {
    /// Controller for `parameter`.
    pub fn new(parameter: Arc<Parameter>) -> Self {
        Self {
            parameter,
            annotator: None,
            cancel: None,
        }
    }

    /// Announce ramps on a device display.
    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Observe `flag` between steps.
    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Walk to `target` in steps of at most `step`, sleeping `inter_delay`
    /// between writes.
    pub async fn ramp(&self, target: f64, step: f64, inter_delay: Duration) -> AppResult<()> {
        if !(step.is_finite() && step > 0.0) {
            return Err(DaqError::InvalidValue {
                parameter: format!("{}.step", self.parameter.full_name()),
                value: step.to_string(),
                allowed: "a positive finite number".into(),
            });
        }

        let _scope = ScopedRampConfig::install(
            &self.parameter,
            RampConfig {
                step: Some(step),
                inter_delay,
            },
        );

        let unit = self.parameter.unit().unwrap_or("");
        info!(
            parameter = %self.parameter.full_name(),
            target,
            step,
            delay_ms = inter_delay.as_millis() as u64,
            "starting ramp"
        );
        self.annotate(&format!("ramp  {:.4}{}", target, unit)).await;

        self.parameter
            .set_with_cancel(Value::Float(target), self.cancel.as_ref())
            .await?;

        self.annotate(&format!("set  {:.4}{}", target, unit)).await;
        Ok(())
    }

    async fn annotate(&self, text: &str) {
        if let Some(annotator) = &self.annotator {
            if let Err(e) = annotator.annotate(text).await {
                warn!(
                    parameter = %self.parameter.full_name(),
                    error = %e,
                    "ramp annotation failed"
                );
            }
        }
    }
}
