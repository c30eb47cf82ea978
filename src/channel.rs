//! Channels and instruments.
//!
//! A [`Channel`] is a named scope holding parameters and sub-channels in
//! insertion order. Names are unique within a scope, across both kinds of
//! child, so a dotted path such as `ch01.voltage` always resolves to exactly
//! one parameter.
//!
//! An [`Instrument`] is the root channel plus what the whole device shares:
//! its transport, its parsed identity and any per-channel annotators used by
//! ramps.

use futures::future::BoxFuture;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::adapters::Transport;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::Annotator;
use crate::identity::{DeviceIdentity, ScpiIdentity};
use crate::parameter::Parameter;
use crate::ramp::{CancelFlag, RampController};

/// Named scope of parameters and sub-channels.
#[derive(Debug)]
pub struct Channel {
    name: String,
    index: Option<usize>,
    identity: Option<Arc<DeviceIdentity>>,
    parameters: Vec<Arc<Parameter>>,
    channels: Vec<Channel>,
}

impl Channel {
    /// Unnumbered channel, e.g. the root of an instrument.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
            identity: None,
            parameters: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Channel `index` of a device whose identity reports its channel count.
    ///
    /// # Errors
    /// `InvalidChannel` unless `1 <= index <= identity.channel_count`.
    pub fn numbered(
        name: impl Into<String>,
        index: usize,
        identity: &Arc<DeviceIdentity>,
    ) -> AppResult<Self> {
        check_index(index, identity.channel_count)?;
        Ok(Self {
            index: Some(index),
            identity: Some(Arc::clone(identity)),
            ..Self::new(name)
        })
    }

    /// Channel `index` of a device with a fixed channel count.
    pub fn indexed(name: impl Into<String>, index: usize, channel_count: usize) -> AppResult<Self> {
        check_index(index, channel_count)?;
        Ok(Self {
            index: Some(index),
            ..Self::new(name)
        })
    }

    /// Share `identity` with this channel.
    pub fn with_identity(mut self, identity: Arc<DeviceIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-based channel number, if numbered.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn identity(&self) -> Option<&Arc<DeviceIdentity>> {
        self.identity.as_ref()
    }

    fn ensure_unique(&self, name: &str) -> AppResult<()> {
        let taken = self.parameters.iter().any(|p| p.name() == name)
            || self.channels.iter().any(|c| c.name == name);
        if taken {
            return Err(DaqError::Configuration(format!(
                "'{}' is already defined in '{}'",
                name, self.name
            )));
        }
        Ok(())
    }

    /// Register a parameter under its name.
    ///
    /// # Errors
    /// `Configuration` when the name is already used in this scope.
    pub fn add_parameter(&mut self, parameter: Parameter) -> AppResult<Arc<Parameter>> {
        self.ensure_unique(parameter.name())?;
        let parameter = Arc::new(parameter);
        self.parameters.push(Arc::clone(&parameter));
        Ok(parameter)
    }

    /// Register a sub-channel under its name.
    ///
    /// # Errors
    /// `Configuration` when the name is already used in this scope.
    pub fn attach(&mut self, channel: Channel) -> AppResult<()> {
        self.ensure_unique(&channel.name)?;
        self.channels.push(channel);
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&Arc<Parameter>> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Parameters in insertion order.
    pub fn parameters(&self) -> impl Iterator<Item = &Arc<Parameter>> {
        self.parameters.iter()
    }

    /// Sub-channels in insertion order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    /// Resolve a dotted path relative to this channel.
    ///
    /// # Errors
    /// `UnknownParameter` when any segment is missing.
    pub fn resolve(&self, path: &str) -> AppResult<Arc<Parameter>> {
        let unknown = || DaqError::UnknownParameter(format!("{}.{}", self.name, path));
        match path.split_once('.') {
            None => self.parameter(path).cloned().ok_or_else(unknown),
            Some((head, rest)) => self.channel(head).ok_or_else(unknown)?.resolve(rest),
        }
    }

    /// Every parameter below this channel with its dotted path.
    pub fn walk(&self) -> Vec<(String, Arc<Parameter>)> {
        let mut out = Vec::new();
        self.walk_into("", &mut out);
        out
    }

    fn walk_into(&self, prefix: &str, out: &mut Vec<(String, Arc<Parameter>)>) {
        for p in &self.parameters {
            out.push((format!("{}{}", prefix, p.name()), Arc::clone(p)));
        }
        for c in &self.channels {
            c.walk_into(&format!("{}{}.", prefix, c.name), out);
        }
    }

    /// JSON tree of cached values, refreshing gettable parameters first when
    /// `update` is set.
    pub fn snapshot(&self, update: bool) -> BoxFuture<'_, Json> {
        Box::pin(async move {
            let mut parameters = Map::new();
            for p in &self.parameters {
                parameters.insert(p.name().to_string(), p.snapshot(update).await);
            }
            let mut channels = Map::new();
            for c in &self.channels {
                channels.insert(c.name.clone(), c.snapshot(update).await);
            }
            let mut out = Map::new();
            out.insert("name".into(), Json::from(self.name.clone()));
            if let Some(index) = self.index {
                out.insert("index".into(), Json::from(index));
            }
            out.insert("parameters".into(), Json::Object(parameters));
            if !channels.is_empty() {
                out.insert("channels".into(), Json::Object(channels));
            }
            Json::Object(out)
        })
    }
}

fn check_index(index: usize, channel_count: usize) -> AppResult<()> {
    if index == 0 || index > channel_count {
        return Err(DaqError::InvalidChannel {
            index,
            channel_count,
        });
    }
    Ok(())
}

// =============================================================================
// Instrument
// =============================================================================

/// A connected device: root channel plus shared state.
pub struct Instrument {
    root: Channel,
    transport: Option<Arc<dyn Transport>>,
    idn: Option<ScpiIdentity>,
    annotators: HashMap<String, Arc<dyn Annotator>>,
}

impl Instrument {
    /// Wrap a fully built root channel.
    pub fn new(root: Channel, transport: Option<Arc<dyn Transport>>) -> Self {
        info!(
            instrument = %root.name(),
            transport = %transport.as_ref().map(|t| t.info()).unwrap_or_else(|| "none".into()),
            parameters = root.walk().len(),
            "instrument ready"
        );
        Self {
            root,
            transport,
            idn: None,
            annotators: HashMap::new(),
        }
    }

    /// Record the parsed `*IDN?` reply.
    pub fn with_idn(mut self, idn: ScpiIdentity) -> Self {
        self.idn = Some(idn);
        self
    }

    /// Announce ramps of parameters under `channel_path` through `annotator`.
    pub fn with_annotator(mut self, channel_path: &str, annotator: Arc<dyn Annotator>) -> Self {
        self.annotators.insert(channel_path.to_string(), annotator);
        self
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &Channel {
        &self.root
    }

    pub fn transport(&self) -> Option<&Arc<dyn Transport>> {
        self.transport.as_ref()
    }

    pub fn idn(&self) -> Option<&ScpiIdentity> {
        self.idn.as_ref()
    }

    /// Device identity shared by the channels, if the device reports one.
    pub fn identity(&self) -> Option<&Arc<DeviceIdentity>> {
        self.root.identity()
    }

    /// Resolve a dotted parameter path such as `ch01.voltage`.
    pub fn parameter(&self, path: &str) -> AppResult<Arc<Parameter>> {
        self.root.resolve(path)
    }

    /// Every parameter with its dotted path.
    pub fn parameters(&self) -> Vec<(String, Arc<Parameter>)> {
        self.root.walk()
    }

    /// Ramp the parameter at `path`, annotating when its channel has an
    /// annotator.
    pub async fn ramp(
        &self,
        path: &str,
        target: f64,
        step: f64,
        inter_delay: Duration,
        cancel: Option<CancelFlag>,
    ) -> AppResult<()> {
        let parameter = self.parameter(path)?;
        let mut controller = RampController::new(parameter);
        let channel_path = path.rsplit_once('.').map(|(c, _)| c).unwrap_or("");
        if let Some(annotator) = self.annotators.get(channel_path) {
            controller = controller.with_annotator(Arc::clone(annotator));
        }
        if let Some(flag) = cancel {
            controller = controller.with_cancel(flag);
        }
        controller.ramp(target, step, inter_delay).await
    }

    /// JSON tree of the instrument's latest values.
    pub async fn snapshot(&self, update: bool) -> Json {
        let mut tree = self.root.snapshot(update).await;
        if let (Json::Object(map), Some(idn)) = (&mut tree, &self.idn) {
            map.insert("idn".into(), serde_json::to_value(idn).unwrap_or(Json::Null));
        }
        if let (Json::Object(map), Some(identity)) = (&mut tree, self.identity()) {
            map.insert(
                "identity".into(),
                serde_json::to_value(identity.as_ref()).unwrap_or(Json::Null),
            );
        }
        tree
    }
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.name())
            .field("idn", &self.idn)
            .field("root", &self.root)
            .finish()
    }
}
