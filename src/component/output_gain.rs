use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, settle, Bypass, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, Settings,
};

/// Final per-voice level. Always the voice's audio output.
pub struct OutputGainManager;

impl ComponentManager for OutputGainManager {
    fn kind(&self) -> &str {
        kinds::OUTPUT_GAIN
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        Settings::new().with("gain", 1.0)
    }

    fn create(&self, ctx: &mut dyn AudioContext, settings: &Settings) -> Creation {
        let mut bundle = NodeBundle::new();
        let gain = settings.number("gain", 1.0).max(0.0);
        let result = ctx
            .create_node(NodeSpec::Gain { gain })
            .map(|node| {
                bundle.push("gain", node);
                bundle.audio_input = Some(node);
                bundle.audio_output = Some(node);
                bundle.mod_inputs.insert("gain", ParamRef::new(node, "gain"));
                bundle.remember("gain", gain);
            })
            .map_err(ComponentError::from);
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
        let node = bundle.node("gain")?;
        if let Some(gain) = patch.try_number("gain") {
            let gain = gain.max(0.0);
            bundle.remember("gain", gain);
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(node, "gain"), gain)?;
            }
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "gain",
            param: "gain",
        })
    }
}
