//! Pluggable voice building blocks.
//!
//! Each component kind (oscillator, filter, envelope, ...) is wrapped by one
//! `ComponentManager`. Managers are shared by every voice and hold no
//! per-voice state: everything a voice needs to address its nodes lives in
//! the `NodeBundle` returned by `create`.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::{AudioContext, ContextError, ContextResult, NodeId, ParamRef};
use crate::RAMP_SECS;

pub mod amp_envelope;
pub mod chorus;
pub mod contour;
pub mod delay;
pub mod distortion;
pub mod filter;
pub mod lfo;
pub mod loader;
pub mod oscillator;
pub mod output_gain;
pub mod registry;
pub mod sampler;
pub mod settings;

pub use loader::{Asset, SampleLibrary};
pub use registry::ComponentRegistry;
pub use settings::{ComponentPreset, SettingValue, Settings};

/// Built-in component kind identifiers.
pub mod kinds {
    pub const OSCILLATOR: &str = "oscillator";
    pub const SAMPLER: &str = "sampler";
    pub const AMPLITUDE_ENV: &str = "amplitudeEnv";
    pub const FILTER: &str = "filter";
    pub const DISTORTION: &str = "distortion";
    pub const CHORUS: &str = "chorus";
    pub const DELAY: &str = "delay";
    pub const OUTPUT_GAIN: &str = "outputGain";
    pub const PITCH_ENVELOPE: &str = "pitchEnvelope";
    pub const FILTER_ENVELOPE: &str = "filterEnvelope";
    pub const LFO1: &str = "lfo1";
}

pub type ComponentResult<T = ()> = Result<T, ComponentError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComponentError {
    #[error("component creation failed: {0}")]
    CreateFailed(String),
    #[error("operation on missing or disposed nodes")]
    InvalidNodes,
    #[error("`{param}` is not a declared modulation input")]
    UnsupportedModulationTarget { param: String },
    #[error("settings patch is empty")]
    EmptyPatch,
    #[error("{0} is not supported by this component")]
    Unsupported(&'static str),
    #[error(transparent)]
    Context(#[from] ContextError),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKind(String);

impl ComponentKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ComponentKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional-capability markers, checked by the assembler before calling the
/// matching optional operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Declares `mod_inputs`; accepts `connect_modulator`.
    pub const MODULATION_TARGET: Capabilities = Capabilities(1);
    /// Has a temporal phase; accepts `trigger_attack`/`trigger_release`.
    pub const TEMPORAL: Capabilities = Capabilities(1 << 1);
    /// Follows the played pitch through `set_pitch`.
    pub const KEY_TRACKING: Capabilities = Capabilities(1 << 2);
    /// `create` may return `Creation::Deferred`.
    pub const DEFERRED_CREATE: Capabilities = Capabilities(1 << 3);

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

/// The parameter `enable` drives to soft-bypass a component.
#[derive(Debug, Clone, Copy)]
pub struct Bypass {
    pub role: &'static str,
    pub param: &'static str,
}

/// Per-instantiation handles returned by `create`.
#[derive(Debug)]
pub struct NodeBundle {
    nodes: Option<Vec<(&'static str, NodeId)>>,
    pub audio_input: Option<NodeId>,
    pub audio_output: Option<NodeId>,
    pub mod_inputs: BTreeMap<&'static str, ParamRef>,
    pub mod_outputs: BTreeMap<&'static str, NodeId>,
    remembered: BTreeMap<&'static str, f32>,
    enabled: bool,
}

impl NodeBundle {
    pub fn new() -> Self {
        Self {
            nodes: Some(Vec::new()),
            audio_input: None,
            audio_output: None,
            mod_inputs: BTreeMap::new(),
            mod_outputs: BTreeMap::new(),
            remembered: BTreeMap::new(),
            enabled: true,
        }
    }

    /// Record an owned node under `role`, in creation order.
    pub fn push(&mut self, role: &'static str, node: NodeId) {
        if let Some(nodes) = self.nodes.as_mut() {
            nodes.push((role, node));
        }
    }

    pub fn node(&self, role: &str) -> ComponentResult<NodeId> {
        self.nodes
            .as_ref()
            .and_then(|nodes| nodes.iter().find(|(r, _)| *r == role))
            .map(|(_, id)| *id)
            .ok_or(ComponentError::InvalidNodes)
    }

    pub fn nodes(&self) -> &[(&'static str, NodeId)] {
        self.nodes.as_deref().unwrap_or(&[])
    }

    pub fn is_disposed(&self) -> bool {
        self.nodes.is_none()
    }

    pub fn ensure_live(&self) -> ComponentResult {
        if self.is_disposed() {
            Err(ComponentError::InvalidNodes)
        } else {
            Ok(())
        }
    }

    /// Take ownership of the node list, leaving the bundle disposed.
    pub fn take_nodes(&mut self) -> Option<Vec<(&'static str, NodeId)>> {
        self.audio_input = None;
        self.audio_output = None;
        self.mod_inputs.clear();
        self.mod_outputs.clear();
        self.nodes.take()
    }

    pub fn remember(&mut self, param: &'static str, value: f32) {
        self.remembered.insert(param, value);
    }

    pub fn remembered(&self, param: &str) -> Option<f32> {
        self.remembered.get(param).copied()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl Default for NodeBundle {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of `create`: either done, or waiting on an asset load.
pub enum Creation {
    Ready(ComponentResult<NodeBundle>),
    Deferred(loader::PendingAsset),
}

/// Ramp a continuous parameter over `RAMP_SECS` starting now.
pub fn ramp(ctx: &mut dyn AudioContext, param: ParamRef, value: f32) -> ContextResult {
    let now = ctx.now();
    ctx.ramp_param(param, value, now, RAMP_SECS)
}

/// Set a discrete parameter immediately.
pub fn set_now(ctx: &mut dyn AudioContext, param: ParamRef, value: f32) -> ContextResult {
    let now = ctx.now();
    ctx.set_param(param, value, now)
}

/// Release nodes created so far after a failed `create`, newest first.
pub fn release_partial(ctx: &mut dyn AudioContext, bundle: &mut NodeBundle) {
    let now = ctx.now();
    for (role, node) in bundle.take_nodes().unwrap_or_default().into_iter().rev() {
        if let Err(err) = ctx.release_node(node, now) {
            log::warn!(target: "voicegraph::component", "releasing partial `{role}` {node}: {err}");
        }
    }
}

/// Turn a manager's build result into the `create` outcome, releasing
/// whatever was built if it failed.
pub fn settle(
    ctx: &mut dyn AudioContext,
    mut bundle: NodeBundle,
    result: ComponentResult,
) -> ComponentResult<NodeBundle> {
    match result {
        Ok(()) => Ok(bundle),
        Err(err) => {
            release_partial(ctx, &mut bundle);
            Err(match err {
                ComponentError::CreateFailed(reason) => ComponentError::CreateFailed(reason),
                other => ComponentError::CreateFailed(other.to_string()),
            })
        }
    }
}

/// Uniform lifecycle over one kind of DSP node.
pub trait ComponentManager: Send + Sync {
    fn kind(&self) -> &str;

    /// An optional component may be absent from a voice without breaking
    /// the chain; its neighbours are connected to each other instead.
    fn is_optional(&self) -> bool {
        false
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn default_settings(&self) -> Settings;

    /// Build the component's nodes. Never panics; on failure every node
    /// created so far has already been released.
    fn create(&self, ctx: &mut dyn AudioContext, settings: &Settings) -> Creation;

    /// Complete a `Creation::Deferred` once its asset is available.
    fn finish_create(
        &self,
        _ctx: &mut dyn AudioContext,
        _settings: &Settings,
        _asset: Asset,
    ) -> ComponentResult<NodeBundle> {
        Err(ComponentError::Unsupported("deferred creation"))
    }

    /// Apply a partial settings patch. Continuous parameters ramp, discrete
    /// ones switch immediately.
    fn update(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &mut NodeBundle,
        patch: &Settings,
    ) -> ComponentResult;

    /// Wire the previous chain component's output into this component.
    fn connect_peers(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        prev_output: Option<NodeId>,
        _next_input: Option<NodeId>,
    ) -> ComponentResult {
        bundle.ensure_live()?;
        if let (Some(prev), Some(input)) = (prev_output, bundle.audio_input) {
            ctx.connect(prev, input)?;
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        None
    }

    /// Soft bypass: ramp the bypass parameter to zero, or back to the value
    /// it had before. Components without a bypass parameter accept the call
    /// and do nothing.
    fn enable(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &mut NodeBundle,
        enabled: bool,
    ) -> ComponentResult {
        bundle.ensure_live()?;
        if let Some(bypass) = self.bypass() {
            let param = ParamRef::new(bundle.node(bypass.role)?, bypass.param);
            let value = if enabled {
                bundle.remembered(bypass.param).unwrap_or(1.0)
            } else {
                0.0
            };
            ramp(ctx, param, value)?;
        }
        bundle.set_enabled(enabled);
        Ok(())
    }

    fn connect_modulator(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        param: &str,
        source: NodeId,
    ) -> ComponentResult {
        bundle.ensure_live()?;
        let target = bundle.mod_inputs.get(param).copied().ok_or_else(|| {
            ComponentError::UnsupportedModulationTarget {
                param: param.to_string(),
            }
        })?;
        ctx.connect_param(source, target)?;
        Ok(())
    }

    fn disconnect_modulator(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        param: &str,
        source: NodeId,
    ) -> ComponentResult {
        bundle.ensure_live()?;
        let target = bundle.mod_inputs.get(param).copied().ok_or_else(|| {
            ComponentError::UnsupportedModulationTarget {
                param: param.to_string(),
            }
        })?;
        ctx.disconnect_param(source, target)?;
        Ok(())
    }

    /// Disconnect then release every node, newest first. Idempotent; release
    /// failures are logged and the remaining nodes are still released.
    fn dispose(&self, ctx: &mut dyn AudioContext, bundle: &mut NodeBundle, at: f64) {
        let Some(nodes) = bundle.take_nodes() else {
            return;
        };
        for (role, node) in nodes.into_iter().rev() {
            if let Err(err) = ctx.disconnect_all(node, at) {
                log::warn!(target: "voicegraph::component", "{}: disconnecting `{role}` {node}: {err}", self.kind());
            }
            if let Err(err) = ctx.release_node(node, at) {
                log::warn!(target: "voicegraph::component", "{}: releasing `{role}` {node}: {err}", self.kind());
            }
        }
    }

    fn trigger_attack(
        &self,
        _ctx: &mut dyn AudioContext,
        _bundle: &NodeBundle,
        _at: f64,
        _velocity: f32,
    ) -> ComponentResult {
        Err(ComponentError::Unsupported("trigger_attack"))
    }

    fn trigger_release(&self, _ctx: &mut dyn AudioContext, _bundle: &NodeBundle, _at: f64) -> ComponentResult {
        Err(ComponentError::Unsupported("trigger_release"))
    }

    fn set_pitch(
        &self,
        _ctx: &mut dyn AudioContext,
        _bundle: &mut NodeBundle,
        _frequency: f32,
        _at: f64,
    ) -> ComponentResult {
        Err(ComponentError::Unsupported("set_pitch"))
    }

    /// Seconds the component keeps sounding after `trigger_release`.
    fn release_tail(&self, _settings: &Settings) -> f64 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeSpec, RecordingContext};

    struct Plain;

    impl ComponentManager for Plain {
        fn kind(&self) -> &str {
            "plain"
        }

        fn default_settings(&self) -> Settings {
            Settings::new()
        }

        fn create(&self, ctx: &mut dyn AudioContext, _settings: &Settings) -> Creation {
            let mut bundle = NodeBundle::new();
            let result = ctx
                .create_node(NodeSpec::Gain { gain: 1.0 })
                .map(|node| {
                    bundle.push("gain", node);
                    bundle.audio_input = Some(node);
                    bundle.audio_output = Some(node);
                    bundle.mod_inputs.insert("gain", ParamRef::new(node, "gain"));
                    bundle
                })
                .map_err(ComponentError::from);
            Creation::Ready(result)
        }

        fn update(&self, _: &mut dyn AudioContext, _: &mut NodeBundle, _: &Settings) -> ComponentResult {
            Ok(())
        }
    }

    fn ready(creation: Creation) -> NodeBundle {
        match creation {
            Creation::Ready(Ok(bundle)) => bundle,
            _ => panic!("expected a ready bundle"),
        }
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut ctx = RecordingContext::new(48_000.0);
        let mut bundle = ready(Plain.create(&mut ctx, &Settings::new()));

        Plain.dispose(&mut ctx, &mut bundle, 0.0);
        Plain.dispose(&mut ctx, &mut bundle, 0.0);

        assert_eq!(ctx.released().len(), 1);
        assert!(bundle.is_disposed());
        assert_eq!(bundle.node("gain"), Err(ComponentError::InvalidNodes));
    }

    #[test]
    fn connect_modulator_checks_declared_inputs() {
        let mut ctx = RecordingContext::new(48_000.0);
        let bundle = ready(Plain.create(&mut ctx, &Settings::new()));
        let source = ctx.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();

        assert!(Plain.connect_modulator(&mut ctx, &bundle, "gain", source).is_ok());
        assert_eq!(
            Plain.connect_modulator(&mut ctx, &bundle, "cutoff", source),
            Err(ComponentError::UnsupportedModulationTarget {
                param: "cutoff".into()
            })
        );
    }

    #[test]
    fn operations_on_disposed_bundle_fail() {
        let mut ctx = RecordingContext::new(48_000.0);
        let mut bundle = ready(Plain.create(&mut ctx, &Settings::new()));
        let source = ctx.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        Plain.dispose(&mut ctx, &mut bundle, 0.0);

        assert_eq!(
            Plain.connect_peers(&mut ctx, &bundle, Some(source), None),
            Err(ComponentError::InvalidNodes)
        );
        assert_eq!(Plain.enable(&mut ctx, &mut bundle, false), Err(ComponentError::InvalidNodes));
    }

    #[test]
    fn unsupported_optional_operations_report_it() {
        let mut ctx = RecordingContext::new(48_000.0);
        let bundle = ready(Plain.create(&mut ctx, &Settings::new()));
        assert!(matches!(
            Plain.trigger_attack(&mut ctx, &bundle, 0.0, 1.0),
            Err(ComponentError::Unsupported(_))
        ));
    }

    #[test]
    fn capabilities_combine() {
        let caps = Capabilities::TEMPORAL | Capabilities::KEY_TRACKING;
        assert!(caps.contains(Capabilities::TEMPORAL));
        assert!(!caps.contains(Capabilities::MODULATION_TARGET));
        assert!(caps.contains(Capabilities::NONE));
    }
}
