use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, settle, Bypass, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, Settings,
};

/// Swept short-delay insert. Optional; bypassed through its wet level.
pub struct ChorusManager;

impl ChorusManager {
    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let wet = settings.number("wet", 0.0).clamp(0.0, 1.0);
        let chorus = ctx.create_node(NodeSpec::Chorus {
            frequency: settings.number("frequency", 1.5).max(0.0),
            depth: settings.number("depth", 0.7).clamp(0.0, 1.0),
            delay_ms: settings.number("delayTime", 3.5).max(0.0),
            wet,
        })?;
        bundle.push("chorus", chorus);
        bundle.audio_input = Some(chorus);
        bundle.audio_output = Some(chorus);
        for param in ["frequency", "depth", "wet"] {
            bundle.mod_inputs.insert(param, ParamRef::new(chorus, param));
        }
        bundle.remember("wet", wet);
        Ok(())
    }
}

impl ComponentManager for ChorusManager {
    fn kind(&self) -> &str {
        kinds::CHORUS
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("frequency", 1.5)
            .with("depth", 0.7)
            .with("delayTime", 3.5)
            .with("wet", 0.0)
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
        let chorus = bundle.node("chorus")?;

        if let Some(frequency) = patch.try_number("frequency") {
            ramp(ctx, ParamRef::new(chorus, "frequency"), frequency.max(0.0))?;
        }
        if let Some(depth) = patch.try_number("depth") {
            ramp(ctx, ParamRef::new(chorus, "depth"), depth.clamp(0.0, 1.0))?;
        }
        if let Some(delay_ms) = patch.try_number("delayTime") {
            ramp(ctx, ParamRef::new(chorus, "delayTime"), delay_ms.max(0.0))?;
        }
        if let Some(wet) = patch.try_number("wet") {
            let wet = wet.clamp(0.0, 1.0);
            bundle.remember("wet", wet);
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(chorus, "wet"), wet)?;
            }
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "chorus",
            param: "wet",
        })
    }

    /// The swept tap never lags more than twice the centre delay.
    fn release_tail(&self, settings: &Settings) -> f64 {
        if settings.number("wet", 0.0) <= 0.0 {
            return 0.0;
        }
        2.0 * settings.number("delayTime", 3.5).max(0.0) as f64 / 1000.0
    }
}
