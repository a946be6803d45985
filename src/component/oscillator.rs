use crate::dsp::Waveform;
use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, set_now, settle, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, SettingValue, Settings,
};

/// Pitched tone source. Key-tracked; frequency and detune accept modulation.
pub struct OscillatorManager;

impl OscillatorManager {
    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let name = settings.text("type", "triangle");
        let waveform = Waveform::parse(name)
            .ok_or_else(|| ComponentError::CreateFailed(format!("unknown waveform `{name}`")))?;

        let osc = ctx.create_node(NodeSpec::Oscillator {
            waveform,
            frequency: settings.number("frequency", 440.0),
            detune: settings.number("detune", 0.0),
        })?;
        bundle.push("osc", osc);
        bundle.audio_output = Some(osc);
        bundle.mod_inputs.insert("frequency", ParamRef::new(osc, "frequency"));
        bundle.mod_inputs.insert("detune", ParamRef::new(osc, "detune"));
        bundle.remember("portamento", settings.number("portamento", 0.0));
        Ok(())
    }
}

impl ComponentManager for OscillatorManager {
    fn kind(&self) -> &str {
        kinds::OSCILLATOR
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MODULATION_TARGET | Capabilities::KEY_TRACKING
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("type", "triangle")
            .with("frequency", 440.0)
            .with("detune", 0.0)
            .with("portamento", 0.0)
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
        let osc = bundle.node("osc")?;

        if let Some(SettingValue::Text(name)) = patch.get("type") {
            match Waveform::parse(name) {
                Some(waveform) => set_now(ctx, ParamRef::new(osc, "type"), waveform.index())?,
                None => log::warn!(target: "voicegraph::component", "oscillator: ignoring unknown waveform `{name}`"),
            }
        }
        if let Some(frequency) = patch.try_number("frequency") {
            ramp(ctx, ParamRef::new(osc, "frequency"), frequency)?;
        }
        if let Some(detune) = patch.try_number("detune") {
            ramp(ctx, ParamRef::new(osc, "detune"), detune)?;
        }
        if let Some(portamento) = patch.try_number("portamento") {
            bundle.remember("portamento", portamento.max(0.0));
        }
        Ok(())
    }

    /// The first pitch a voice receives jumps; later ones glide over the
    /// portamento time when it is non-zero.
    fn set_pitch(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &mut NodeBundle,
        frequency: f32,
        at: f64,
    ) -> ComponentResult {
        let param = ParamRef::new(bundle.node("osc")?, "frequency");
        let portamento = bundle.remembered("portamento").unwrap_or(0.0);
        let glide = portamento > 0.0 && bundle.remembered("pitch").is_some();
        if glide {
            ctx.ramp_param(param, frequency, at, portamento as f64)?;
        } else {
            ctx.set_param(param, frequency, at)?;
        }
        bundle.remember("pitch", frequency);
        Ok(())
    }
}
