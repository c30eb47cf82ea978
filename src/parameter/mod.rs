//! Parameter - declarative, validated, cached instrument settings
//!
//! A [`Parameter`] binds a name to one remote setting or reading. It owns
//! the get/set protocol so that instrument drivers are mostly tables:
//!
//! - `get`: query (or call a getter / value source), decode the reply,
//!   validate it, then update the cache
//! - `set`: validate (codec domain, validator, sibling bounds), encode,
//!   format the command template, write, then optionally check the
//!   acknowledgement and read the value back
//!
//! Validation always happens before any transport I/O. A rejected `set`
//! leaves both the device and the cache untouched.
//!
//! The cache is a `tokio::sync::watch` channel; [`Parameter::subscribe`]
//! hands out receivers that see every cache update.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use scpi_daq::adapters::MockAdapter;
//! use scpi_daq::parameter::{Parameter, Validator, ValueCodec};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let transport = Arc::new(MockAdapter::echo());
//! let frequency = Parameter::builder("frequency")
//!     .unit("Hz")
//!     .get_cmd("FREQ?")
//!     .set_cmd("FREQ {value}")
//!     .codec(ValueCodec::fixed(3))
//!     .validator(Validator::range(9.5e5, 4.05e9))
//!     .transport(transport)
//!     .build()
//!     .unwrap();
//!
//! frequency.set(2.5e6).await.unwrap();
//! assert_eq!(frequency.get().await.unwrap().as_f64(), Some(2.5e6));
//! assert!(frequency.set(1.0).await.is_err());
//! # })
//! ```

pub mod codec;
pub mod validator;
pub mod value;

pub use codec::{FieldSelector, LinearScale, NumericCodec, SymbolMap, ValueCodec};
pub use validator::{Relation, SiblingBound, Validator};
pub use value::Value;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::ValueSource;
use crate::ramp::{self, CancelFlag, RampConfig};

/// Placeholder substituted into set-command templates.
pub const VALUE_PLACEHOLDER: &str = "value";

/// Programmatic getter.
pub type GetFn = Arc<dyn Fn() -> BoxFuture<'static, AppResult<Value>> + Send + Sync>;

/// Programmatic setter; receives the validated symbolic value.
pub type SetFn = Arc<dyn Fn(Value) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

// =============================================================================
// Access paths
// =============================================================================

enum Getter {
    None,
    Command(String),
    Callable(GetFn),
    Source(Arc<dyn ValueSource>),
}

enum Setter {
    None,
    Command {
        template: String,
        ack: Option<String>,
    },
    Callable(SetFn),
}

/// How a successful write is verified by reading it back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadbackCheck {
    /// Warn when the read-back differs by more than one quantization step of
    /// the codec.
    Quantization,
    /// Warn when the read-back differs by more than the given amount.
    Tolerance(f64),
}

/// Last value seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedValue {
    /// The value in the symbolic domain.
    pub value: Value,
    /// `false` when the device did not confirm the write that produced it.
    pub valid: bool,
    /// When the value was stored.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Parameter
// =============================================================================

/// One named, typed, validated remote setting or reading.
pub struct Parameter {
    name: String,
    scope: Option<String>,
    label: Option<String>,
    unit: Option<String>,
    docstring: Option<String>,
    getter: Getter,
    setter: Setter,
    validator: Option<Validator>,
    codec: ValueCodec,
    guards: RwLock<Vec<SiblingBound>>,
    readback: Option<ReadbackCheck>,
    transport: Option<Arc<dyn Transport>>,
    cache: watch::Sender<Option<CachedValue>>,
    ramp: Mutex<RampConfig>,
}

impl Parameter {
    /// Start building a parameter called `name`.
    pub fn builder(name: impl Into<String>) -> ParameterBuilder {
        ParameterBuilder::new(name)
    }

    /// Short name, unique within the owning channel.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted name including the owning scope, used in logs and errors.
    pub fn full_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}.{}", scope, self.name),
            None => self.name.clone(),
        }
    }

    /// Display label; falls back to the name.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn docstring(&self) -> Option<&str> {
        self.docstring.as_deref()
    }

    pub fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    /// Whether `get` can reach the device (or a value source).
    pub fn is_gettable(&self) -> bool {
        !matches!(self.getter, Getter::None)
    }

    /// Whether `set` is supported.
    pub fn is_settable(&self) -> bool {
        !matches!(self.setter, Setter::None)
    }

    /// Require this parameter's value to stay ordered against a sibling.
    ///
    /// Guards are installed after construction because siblings usually
    /// bound each other.
    pub fn add_guard(&self, guard: SiblingBound) {
        self.guards
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(guard);
    }

    // -------------------------------------------------------------------------
    // Cache
    // -------------------------------------------------------------------------

    /// Most recent cached value with its validity flag and timestamp.
    pub fn latest(&self) -> Option<CachedValue> {
        self.cache.borrow().clone()
    }

    /// Cached value without touching the device.
    pub fn get_latest(&self) -> Option<Value> {
        self.cache.borrow().as_ref().map(|c| c.value.clone())
    }

    /// Observe cache updates.
    pub fn subscribe(&self) -> watch::Receiver<Option<CachedValue>> {
        self.cache.subscribe()
    }

    fn store(&self, value: Value, valid: bool) {
        self.cache.send_replace(Some(CachedValue {
            value,
            valid,
            timestamp: Utc::now(),
        }));
    }

    // -------------------------------------------------------------------------
    // Ramp configuration
    // -------------------------------------------------------------------------

    fn ramp_lock(&self) -> MutexGuard<'_, RampConfig> {
        self.ramp.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current step/delay configuration.
    pub fn ramp_config(&self) -> RampConfig {
        *self.ramp_lock()
    }

    /// Replace the step/delay configuration.
    pub fn set_ramp_config(&self, config: RampConfig) {
        *self.ramp_lock() = config;
    }

    /// Largest increment per write, if stepping is enabled.
    pub fn step(&self) -> Option<f64> {
        self.ramp_lock().step
    }

    /// Enable (`Some`) or disable (`None`) stepping for every `set`.
    pub fn set_step(&self, step: Option<f64>) -> AppResult<()> {
        if let Some(s) = step {
            if !(s.is_finite() && s > 0.0) {
                return Err(DaqError::InvalidValue {
                    parameter: format!("{}.step", self.full_name()),
                    value: s.to_string(),
                    allowed: "a positive finite number".into(),
                });
            }
        }
        self.ramp_lock().step = step;
        Ok(())
    }

    pub fn inter_delay(&self) -> Duration {
        self.ramp_lock().inter_delay
    }

    pub fn set_inter_delay(&self, delay: Duration) {
        self.ramp_lock().inter_delay = delay;
    }

    // -------------------------------------------------------------------------
    // Get
    // -------------------------------------------------------------------------

    /// Read the current value from the device.
    ///
    /// # Errors
    /// - `NotGettable` when the parameter has no read path
    /// - `Protocol` when the reply cannot be decoded (cache unchanged)
    /// - `InvalidValue` when the decoded value fails the validator
    pub async fn get(&self) -> AppResult<Value> {
        let value = match &self.getter {
            Getter::None => return Err(DaqError::NotGettable(self.full_name())),
            Getter::Command(command) => {
                let reply = self.transport()?.query(command).await?;
                self.codec
                    .decode(&reply)
                    .map_err(|e| DaqError::protocol(self.full_name(), reply.as_str(), e.0))?
            }
            Getter::Callable(getter) => getter().await?,
            Getter::Source(source) => source.read().await?,
        };

        if let Some(validator) = &self.validator {
            validator.validate(&self.full_name(), &value)?;
        }

        debug!(parameter = %self.full_name(), value = %value, "get");
        self.store(value.clone(), true);
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // Set
    // -------------------------------------------------------------------------

    /// Validate and apply `value`, stepping when a ramp step is configured.
    ///
    /// # Errors
    /// - `NotSettable` for read-only parameters
    /// - `InvalidValue` before any I/O when validation fails
    /// - transport errors from the write
    pub async fn set(&self, value: impl Into<Value>) -> AppResult<()> {
        self.set_with_cancel(value.into(), None).await
    }

    pub(crate) async fn set_with_cancel(
        &self,
        value: Value,
        cancel: Option<&CancelFlag>,
    ) -> AppResult<()> {
        if !self.is_settable() {
            return Err(DaqError::NotSettable(self.full_name()));
        }
        self.validate(&value)?;
        let guards: Vec<SiblingBound> = self
            .guards
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for guard in &guards {
            guard.check(&self.full_name(), &value).await?;
        }

        let config = self.ramp_config();
        match (config.step, value.as_f64()) {
            (Some(step), Some(target)) => {
                self.walk(target, step, config.inter_delay, cancel).await?
            }
            _ => self.write_value(&value).await?,
        }

        if let Some(check) = self.readback {
            self.verify_readback(&value, check).await;
        }
        Ok(())
    }

    /// Check `value` against the codec domain and the validator.
    pub fn validate(&self, value: &Value) -> AppResult<()> {
        if !self.codec.accepts(value) {
            return Err(DaqError::InvalidValue {
                parameter: self.full_name(),
                value: value.to_string(),
                allowed: self.codec.describe_domain(),
            });
        }
        if let Some(validator) = &self.validator {
            validator.validate(&self.full_name(), value)?;
        }
        Ok(())
    }

    async fn walk(
        &self,
        target: f64,
        step: f64,
        inter_delay: Duration,
        cancel: Option<&CancelFlag>,
    ) -> AppResult<()> {
        let start = match self.get_latest().and_then(|v| v.as_f64()) {
            Some(v) if v.is_finite() => v,
            _ => self.get().await?.as_f64().ok_or_else(|| {
                DaqError::protocol(self.full_name(), "", "current value is not numeric")
            })?,
        };

        ramp::check_step_count(&self.full_name(), start, target, step)?;
        debug!(parameter = %self.full_name(), start, target, step, "stepping");
        let mut reached = start;
        for (i, v) in ramp::ramp_values(start, target, step).enumerate() {
            if cancel.map(CancelFlag::is_cancelled).unwrap_or(false) {
                warn!(parameter = %self.full_name(), at = reached, "ramp cancelled");
                return Err(DaqError::Cancelled(self.full_name()));
            }
            if i > 0 && !inter_delay.is_zero() {
                tokio::time::sleep(inter_delay).await;
            }
            let value = Value::Float(v);
            self.validate(&value)?;
            self.write_value(&value).await?;
            reached = v;
        }
        Ok(())
    }

    async fn write_value(&self, value: &Value) -> AppResult<()> {
        let confirmed = match &self.setter {
            Setter::None => return Err(DaqError::NotSettable(self.full_name())),
            Setter::Callable(setter) => {
                setter(value.clone()).await?;
                true
            }
            Setter::Command { template, ack } => {
                let token = self.codec.encode(value).map_err(|e| DaqError::InvalidValue {
                    parameter: self.full_name(),
                    value: value.to_string(),
                    allowed: e.0,
                })?;
                self.warn_on_precision_loss(value);
                let command = format_command(template, &token)?;
                let transport = self.transport()?;
                match ack {
                    None => {
                        transport.write(&command).await?;
                        true
                    }
                    Some(expected) => {
                        let reply = transport.query(&command).await?;
                        let ok = reply.trim() == expected.trim();
                        if !ok {
                            warn!(
                                parameter = %self.full_name(),
                                expected = %expected.escape_default(),
                                reply = %reply.escape_default(),
                                "acknowledgement mismatch, value presumed applied"
                            );
                        }
                        ok
                    }
                }
            }
        };

        debug!(parameter = %self.full_name(), value = %value, "set");
        self.store(value.clone(), confirmed);
        Ok(())
    }

    fn warn_on_precision_loss(&self, value: &Value) {
        if let (Some(requested), Some(applied)) =
            (value.as_f64(), self.codec.applied_value(value))
        {
            let tolerance = 1e-12 * requested.abs().max(1.0);
            if (requested - applied).abs() > tolerance {
                warn!(
                    parameter = %self.full_name(),
                    requested,
                    applied,
                    "value rounded to instrument precision"
                );
            }
        }
    }

    async fn verify_readback(&self, requested: &Value, check: ReadbackCheck) {
        let tolerance = match check {
            ReadbackCheck::Quantization => self.codec.quantization_step().unwrap_or(0.0),
            ReadbackCheck::Tolerance(t) => t,
        };
        match self.get().await {
            Ok(actual) => {
                let drifted = match (requested.as_f64(), actual.as_f64()) {
                    (Some(r), Some(a)) => (r - a).abs() > tolerance,
                    _ => !requested.matches(&actual),
                };
                if drifted {
                    warn!(
                        parameter = %self.full_name(),
                        requested = %requested,
                        actual = %actual,
                        "read-back differs from requested value"
                    );
                }
            }
            Err(e) => {
                warn!(parameter = %self.full_name(), error = %e, "read-back failed");
            }
        }
    }

    fn transport(&self) -> AppResult<&Arc<dyn Transport>> {
        self.transport.as_ref().ok_or_else(|| {
            DaqError::Configuration(format!("parameter '{}' has no transport", self.full_name()))
        })
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    /// JSON description of the parameter and its cached value, refreshing
    /// from the device first when `update` is set.
    ///
    /// A failed refresh is logged; the snapshot then reports the stale cache.
    pub async fn snapshot(&self, update: bool) -> serde_json::Value {
        if update && self.is_gettable() {
            if let Err(e) = self.get().await {
                warn!(parameter = %self.full_name(), error = %e, "snapshot refresh failed");
            }
        }
        let latest = self.latest();
        serde_json::json!({
            "name": self.name,
            "label": self.label(),
            "unit": self.unit,
            "value": latest.as_ref().map(|c| &c.value),
            "valid": latest.as_ref().map(|c| c.valid),
            "ts": latest.as_ref().map(|c| c.timestamp.to_rfc3339()),
        })
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.full_name())
            .field("unit", &self.unit)
            .field("codec", &self.codec)
            .field("validator", &self.validator)
            .field("gettable", &self.is_gettable())
            .field("settable", &self.is_settable())
            .finish()
    }
}

/// Substitute the encoded token into a set-command template.
pub fn format_command(template: &str, token: &str) -> AppResult<String> {
    let mut vars = HashMap::new();
    vars.insert(VALUE_PLACEHOLDER.to_string(), token.to_string());
    strfmt::strfmt(template, &vars).map_err(|e| {
        DaqError::Configuration(format!("bad command template '{}': {}", template, e))
    })
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Parameter`].
///
/// Exactly one read path (`get_cmd`, `get_fn`, `source`) and one write path
/// (`set_cmd`, `set_fn`) may be configured; omitting one makes the parameter
/// write-only or read-only.
pub struct ParameterBuilder {
    name: String,
    scope: Option<String>,
    label: Option<String>,
    unit: Option<String>,
    docstring: Option<String>,
    get_cmd: Option<String>,
    get_fn: Option<GetFn>,
    source: Option<Arc<dyn ValueSource>>,
    set_cmd: Option<String>,
    ack: Option<String>,
    set_fn: Option<SetFn>,
    validator: Option<Validator>,
    codec: ValueCodec,
    readback: Option<ReadbackCheck>,
    transport: Option<Arc<dyn Transport>>,
    ramp: RampConfig,
    initial: Option<Value>,
}

impl ParameterBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            label: None,
            unit: None,
            docstring: None,
            get_cmd: None,
            get_fn: None,
            source: None,
            set_cmd: None,
            ack: None,
            set_fn: None,
            validator: None,
            codec: ValueCodec::default(),
            readback: None,
            transport: None,
            ramp: RampConfig::default(),
            initial: None,
        }
    }

    /// Dotted path of the owning channel, for log context.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn docstring(mut self, docstring: impl Into<String>) -> Self {
        self.docstring = Some(docstring.into());
        self
    }

    /// Literal query command.
    pub fn get_cmd(mut self, command: impl Into<String>) -> Self {
        self.get_cmd = Some(command.into());
        self
    }

    /// Programmatic getter.
    pub fn get_fn<F, Fut>(mut self, getter: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<Value>> + Send + 'static,
    {
        self.get_fn = Some(Arc::new(move || Box::pin(getter())));
        self
    }

    /// Read from a non-transport value source.
    pub fn source(mut self, source: Arc<dyn ValueSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set-command template containing `{value}`.
    pub fn set_cmd(mut self, template: impl Into<String>) -> Self {
        self.set_cmd = Some(template.into());
        self
    }

    /// Expect `reply` after every set command.
    pub fn ack(mut self, reply: impl Into<String>) -> Self {
        self.ack = Some(reply.into());
        self
    }

    /// Programmatic setter.
    pub fn set_fn<F, Fut>(mut self, setter: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        self.set_fn = Some(Arc::new(move |v| Box::pin(setter(v))));
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Read the value back after every successful set.
    pub fn verify_readback(mut self, check: ReadbackCheck) -> Self {
        self.readback = Some(check);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Standing ramp step.
    pub fn step(mut self, step: f64) -> Self {
        self.ramp.step = Some(step);
        self
    }

    pub fn inter_delay(mut self, delay: Duration) -> Self {
        self.ramp.inter_delay = delay;
        self
    }

    /// Seed the cache, e.g. for parameters with no read path.
    pub fn initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    /// Check the configuration and build the parameter.
    ///
    /// # Errors
    /// `Configuration` when more than one read or write path is given, a
    /// command path has no transport, a set template lacks `{value}`, or the
    /// ramp step is not positive.
    pub fn build(self) -> AppResult<Parameter> {
        let name = self.name;
        let bad = |reason: &str| {
            Err(DaqError::Configuration(format!(
                "parameter '{}': {}",
                name, reason
            )))
        };

        let getter = match (self.get_cmd, self.get_fn, self.source) {
            (None, None, None) => Getter::None,
            (Some(cmd), None, None) => Getter::Command(cmd),
            (None, Some(f), None) => Getter::Callable(f),
            (None, None, Some(s)) => Getter::Source(s),
            _ => return bad("more than one read path"),
        };

        let setter = match (self.set_cmd, self.set_fn) {
            (None, None) => Setter::None,
            (Some(template), None) => {
                format_command(&template, "0")?;
                if !template.contains(&format!("{{{}", VALUE_PLACEHOLDER)) {
                    return bad("set command has no {value} placeholder");
                }
                Setter::Command {
                    template,
                    ack: self.ack,
                }
            }
            (None, Some(f)) => {
                if self.ack.is_some() {
                    return bad("acknowledgement requires a set command");
                }
                Setter::Callable(f)
            }
            (Some(_), Some(_)) => return bad("more than one write path"),
        };

        let uses_transport =
            matches!(getter, Getter::Command(_)) || matches!(setter, Setter::Command { .. });
        if uses_transport && self.transport.is_none() {
            return bad("command access requires a transport");
        }
        if self.readback.is_some() && matches!(getter, Getter::None) {
            return bad("read-back check requires a read path");
        }
        if let Some(step) = self.ramp.step {
            if !(step.is_finite() && step > 0.0) {
                return bad("ramp step must be positive");
            }
        }

        let initial = self.initial.map(|value| CachedValue {
            value,
            valid: true,
            timestamp: Utc::now(),
        });
        let (cache, _) = watch::channel(initial);

        Ok(Parameter {
            name,
            scope: self.scope,
            label: self.label,
            unit: self.unit,
            docstring: self.docstring,
            getter,
            setter,
            validator: self.validator,
            codec: self.codec,
            guards: RwLock::new(Vec::new()),
            readback: self.readback,
            transport: self.transport,
            cache,
            ramp: Mutex::new(self.ramp),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing_test::traced_test;

    fn mock_param(mock: &Arc<MockAdapter>) -> ParameterBuilder {
        Parameter::builder("phase")
            .get_cmd("PHAS?")
            .set_cmd("PHAS {value}")
            .codec(ValueCodec::fixed(1))
            .validator(Validator::range(-360.0, 360.0))
            .transport(mock.clone())
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let mock = Arc::new(MockAdapter::echo());
        let phase = mock_param(&mock).build().unwrap();
        phase.set(45.0).await.unwrap();
        assert_eq!(mock.writes(), vec!["PHAS 45.0"]);
        assert_eq!(phase.get().await.unwrap(), Value::Float(45.0));
        assert!(phase.latest().unwrap().valid);
    }

    #[tokio::test]
    async fn test_invalid_set_has_no_side_effect() {
        let mock = Arc::new(MockAdapter::echo());
        let phase = mock_param(&mock).build().unwrap();
        phase.set(10.0).await.unwrap();

        let err = phase.set(400.0).await.unwrap_err();
        assert!(matches!(err, DaqError::InvalidValue { .. }));
        assert_eq!(mock.writes(), vec!["PHAS 10.0"]);
        assert_eq!(phase.get_latest(), Some(Value::Float(10.0)));
    }

    #[tokio::test]
    async fn test_undecodable_reply_keeps_cache() {
        let mock = Arc::new(MockAdapter::new().with_reply("PHAS?", "garbage"));
        let phase = mock_param(&mock).initial_value(12.0).build().unwrap();
        let err = phase.get().await.unwrap_err();
        assert!(matches!(err, DaqError::Protocol { .. }));
        assert_eq!(phase.get_latest(), Some(Value::Float(12.0)));
    }

    #[tokio::test]
    async fn test_read_only_and_write_only() {
        let mock = Arc::new(MockAdapter::new().with_reply("FREQ?", "1.0"));
        let read_only = Parameter::builder("mod_frequency")
            .get_cmd("FREQ?")
            .codec(ValueCodec::float())
            .transport(mock.clone())
            .build()
            .unwrap();
        assert!(matches!(
            read_only.set(1.0).await,
            Err(DaqError::NotSettable(_))
        ));

        let write_only = Parameter::builder("display")
            .set_cmd("DIS {value}")
            .transport(mock.clone())
            .build()
            .unwrap();
        assert!(matches!(
            write_only.get().await,
            Err(DaqError::NotGettable(_))
        ));
    }

    #[tokio::test]
    async fn test_programmatic_accessors() {
        let stored = Arc::new(AtomicU64::new(0));
        let writer = stored.clone();
        let reader = stored.clone();
        let p = Parameter::builder("center")
            .set_fn(move |v| {
                let writer = writer.clone();
                async move {
                    writer.store(v.as_f64().unwrap_or(0.0).to_bits(), Ordering::SeqCst);
                    Ok(())
                }
            })
            .get_fn(move || {
                let reader = reader.clone();
                async move { Ok(Value::Float(f64::from_bits(reader.load(Ordering::SeqCst)))) }
            })
            .codec(ValueCodec::float())
            .build()
            .unwrap();
        p.set(3.5).await.unwrap();
        assert_eq!(p.get().await.unwrap(), Value::Float(3.5));
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let mock = Arc::new(MockAdapter::echo());
        let phase = mock_param(&mock).build().unwrap();
        let mut rx = phase.subscribe();
        phase.set(-90.0).await.unwrap();
        rx.changed().await.unwrap();
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.value, Value::Float(-90.0));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_ack_mismatch_is_a_warning() {
        let mock = Arc::new(MockAdapter::new().with_default_reply("NAK"));
        let p = Parameter::builder("voltage")
            .set_cmd("CH01 {value}")
            .ack("\u{6}")
            .codec(ValueCodec::fixed(6))
            .transport(mock.clone())
            .build()
            .unwrap();
        p.set(0.5).await.unwrap();
        assert!(!p.latest().unwrap().valid);
        assert!(logs_contain("acknowledgement mismatch"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_precision_loss_is_reported() {
        let mock = Arc::new(MockAdapter::echo());
        let phase = mock_param(&mock).build().unwrap();
        phase.set(12.34).await.unwrap();
        assert_eq!(mock.writes(), vec!["PHAS 12.3"]);
        assert!(logs_contain("value rounded to instrument precision"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_readback_drift_warns() {
        let mock = Arc::new(MockAdapter::new().with_reply("STAR?", "1005.0"));
        let p = Parameter::builder("start")
            .get_cmd("STAR?")
            .set_cmd("STAR {value}")
            .codec(ValueCodec::float())
            .verify_readback(ReadbackCheck::Tolerance(1.0))
            .transport(mock.clone())
            .build()
            .unwrap();
        p.set(1000.0).await.unwrap();
        assert!(logs_contain("read-back differs from requested value"));
        assert_eq!(p.get_latest(), Some(Value::Float(1005.0)));
    }

    #[tokio::test]
    async fn test_sibling_bounds() {
        let mock = Arc::new(MockAdapter::echo());
        let start = Arc::new(
            Parameter::builder("start")
                .get_cmd("STAR?")
                .set_cmd("STAR {value}")
                .codec(ValueCodec::float())
                .transport(mock.clone())
                .build()
                .unwrap(),
        );
        let stop = Arc::new(
            Parameter::builder("stop")
                .get_cmd("STOP?")
                .set_cmd("STOP {value}")
                .codec(ValueCodec::float())
                .transport(mock.clone())
                .build()
                .unwrap(),
        );
        start.add_guard(SiblingBound::new(&stop, Relation::Below));
        stop.add_guard(SiblingBound::new(&start, Relation::Above));

        mock.write("STOP 2000").await.unwrap();
        mock.write("STAR 100").await.unwrap();
        start.set(1500.0).await.unwrap();

        let err = start.set(2500.0).await.unwrap_err();
        match err {
            DaqError::InvalidValue { allowed, .. } => {
                assert_eq!(allowed, "smaller than stop = 2000")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(stop.set(1000.0).await.is_err());
    }

    #[tokio::test]
    async fn test_standing_step_walks() {
        let mock = Arc::new(MockAdapter::echo());
        let p = mock_param(&mock).step(10.0).initial_value(0.0).build().unwrap();
        p.set(25.0).await.unwrap();
        assert_eq!(mock.writes(), vec!["PHAS 10.0", "PHAS 20.0", "PHAS 25.0"]);
    }

    #[test]
    fn test_builder_rejects_inconsistent_paths() {
        let mock: Arc<dyn Transport> = Arc::new(MockAdapter::new());
        assert!(Parameter::builder("x")
            .set_cmd("X")
            .transport(mock.clone())
            .build()
            .is_err());
        assert!(Parameter::builder("x").get_cmd("X?").build().is_err());
        assert!(Parameter::builder("x")
            .get_cmd("X?")
            .get_fn(|| async { Ok(Value::Int(1)) })
            .transport(mock.clone())
            .build()
            .is_err());
        assert!(Parameter::builder("x")
            .set_fn(|_| async { Ok(()) })
            .ack("OK")
            .build()
            .is_err());
    }

    #[test]
    fn test_format_command() {
        assert_eq!(format_command("FREQ {value}", "1.000").unwrap(), "FREQ 1.000");
        assert_eq!(
            format_command("HV324 CH01 {value}", "0.5").unwrap(),
            "HV324 CH01 0.5"
        );
    }
}
