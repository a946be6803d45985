use crate::dsp::EnvelopeShape;
use crate::graph::{AudioContext, NodeId, NodeSpec, ParamRef};

use super::{
    kinds, set_now, settle, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, Settings,
};

const STAGES: [&str; 4] = ["attack", "decay", "sustain", "release"];

pub(crate) fn shape_from(settings: &Settings, defaults: EnvelopeShape) -> EnvelopeShape {
    EnvelopeShape::new(
        settings.number("attack", defaults.attack),
        settings.number("decay", defaults.decay),
        settings.number("sustain", defaults.sustain),
        settings.number("release", defaults.release),
    )
}

/// Write the ADSR stages present in `patch` onto an envelope node.
pub(crate) fn update_stages(
    ctx: &mut dyn AudioContext,
    env: NodeId,
    patch: &Settings,
) -> ComponentResult {
    for stage in STAGES {
        if let Some(value) = patch.try_number(stage) {
            let value = if stage == "sustain" {
                value.clamp(0.0, 1.0)
            } else {
                value.max(crate::MIN_TIME)
            };
            set_now(ctx, ParamRef::new(env, stage), value)?;
        }
    }
    Ok(())
}

/// Velocity-sensitive ADSR driving a VCA. The VCA is both the audio input
/// and the audio output.
pub struct AmpEnvelopeManager;

impl AmpEnvelopeManager {
    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let env = ctx.create_node(NodeSpec::Envelope {
            shape: shape_from(settings, EnvelopeShape::default()),
        })?;
        bundle.push("env", env);
        let vca = ctx.create_node(NodeSpec::Gain { gain: 0.0 })?;
        bundle.push("vca", vca);
        ctx.connect_param(env, ParamRef::new(vca, "gain"))?;

        bundle.audio_input = Some(vca);
        bundle.audio_output = Some(vca);
        bundle.mod_inputs.insert("gain", ParamRef::new(vca, "gain"));
        Ok(())
    }
}

impl ComponentManager for AmpEnvelopeManager {
    fn kind(&self) -> &str {
        kinds::AMPLITUDE_ENV
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TEMPORAL | Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        let shape = EnvelopeShape::default();
        Settings::new()
            .with("attack", shape.attack)
            .with("decay", shape.decay)
            .with("sustain", shape.sustain)
            .with("release", shape.release)
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
        update_stages(ctx, bundle.node("env")?, patch)
    }

    fn trigger_attack(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        at: f64,
        velocity: f32,
    ) -> ComponentResult {
        ctx.trigger_attack(bundle.node("env")?, at, velocity)?;
        Ok(())
    }

    fn trigger_release(&self, ctx: &mut dyn AudioContext, bundle: &NodeBundle, at: f64) -> ComponentResult {
        ctx.trigger_release(bundle.node("env")?, at)?;
        Ok(())
    }

    fn release_tail(&self, settings: &Settings) -> f64 {
        settings.number("release", EnvelopeShape::default().release) as f64
    }
}
