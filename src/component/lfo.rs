use crate::dsp::Waveform;
use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    ramp, set_now, settle, Bypass, Capabilities, ComponentError, ComponentManager,
    ComponentResult, Creation, NodeBundle, SettingValue, Settings,
};

/// Default modulation destination, `component.param`.
pub const DEFAULT_TARGET: &str = "filter.frequency";

/// Free-running or key-retriggered LFO scaled by a depth. The route's
/// destination is read from the `target` setting when the preset is built.
pub struct LfoManager {
    kind: String,
    defaults: Settings,
}

impl LfoManager {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            defaults: Settings::new()
                .with("type", "sine")
                .with("rate", 5.0)
                .with("depth", 0.01)
                .with("target", DEFAULT_TARGET)
                .with("retrigger", false),
        }
    }

    /// Override some of the default settings.
    pub fn with_defaults(mut self, overrides: Settings) -> Self {
        self.defaults = self.defaults.merged(&overrides);
        self
    }

    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let settings = self.defaults.merged(settings);
        let name = settings.text("type", "sine");
        let waveform = Waveform::parse(name)
            .ok_or_else(|| ComponentError::CreateFailed(format!("unknown waveform `{name}`")))?;
        let depth = settings.number("depth", 0.01);

        let lfo = ctx.create_node(NodeSpec::Lfo {
            waveform,
            rate: settings.number("rate", 5.0).max(0.0),
            retrigger: true,
        })?;
        bundle.push("lfo", lfo);
        let scaler = ctx.create_node(NodeSpec::Gain { gain: depth })?;
        bundle.push("depth", scaler);
        ctx.connect(lfo, scaler)?;

        bundle.mod_inputs.insert("rate", ParamRef::new(lfo, "rate"));
        bundle.mod_inputs.insert("depth", ParamRef::new(scaler, "gain"));
        bundle.mod_outputs.insert("output", scaler);
        bundle.remember("gain", depth);
        bundle.remember("retrigger", retrigger_flag(settings.flag("retrigger", false)));
        Ok(())
    }
}

fn retrigger_flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
    }
}

impl ComponentManager for LfoManager {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TEMPORAL | Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        self.defaults.clone()
    }

    fn create(&self, ctx: &mut dyn AudioContext, settings: &Settings) -> Creation {
        let mut bundle = NodeBundle::new();
        let result = self.build(ctx, settings, &mut bundle);
        Creation::Ready(settle(ctx, bundle, result))
    }

    fn update(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &mut NodeBundle,
        patch: &Settings,
    ) -> ComponentResult {
        if patch.is_empty() {
            return Err(ComponentError::EmptyPatch);
        }
        let lfo = bundle.node("lfo")?;

        if let Some(SettingValue::Text(name)) = patch.get("type") {
            match Waveform::parse(name) {
                Some(waveform) => set_now(ctx, ParamRef::new(lfo, "type"), waveform.index())?,
                None => log::warn!(target: "voicegraph::component", "{}: ignoring unknown waveform `{name}`", self.kind),
            }
        }
        if let Some(rate) = patch.try_number("rate") {
            ramp(ctx, ParamRef::new(lfo, "rate"), rate.max(0.0))?;
        }
        if let Some(depth) = patch.try_number("depth") {
            bundle.remember("gain", depth);
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(bundle.node("depth")?, "gain"), depth)?;
            }
        }
        if let Some(SettingValue::Flag(on)) = patch.get("retrigger") {
            bundle.remember("retrigger", retrigger_flag(*on));
        }
        if patch.contains("target") {
            log::debug!(target: "voicegraph::component", "{}: target changes apply to newly built voices", self.kind);
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "depth",
            param: "gain",
        })
    }

    /// Restarts the cycle only when retrigger is on.
    fn trigger_attack(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        at: f64,
        _velocity: f32,
    ) -> ComponentResult {
        let lfo = bundle.node("lfo")?;
        if bundle.remembered("retrigger").unwrap_or(0.0) > 0.0 {
            ctx.trigger_attack(lfo, at, 1.0)?;
        }
        Ok(())
    }

    /// The LFO keeps running through the release.
    fn trigger_release(&self, _ctx: &mut dyn AudioContext, bundle: &NodeBundle, _at: f64) -> ComponentResult {
        bundle.ensure_live()
    }
}
