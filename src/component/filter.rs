use crate::dsp::FilterType;
use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, set_now, settle, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, SettingValue, Settings,
};

/// Tone-shaping filter. Cutoff and resonance accept modulation.
pub struct FilterManager;

impl FilterManager {
    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let name = settings.text("type", "lowpass");
        let filter_type = FilterType::parse(name)
            .ok_or_else(|| ComponentError::CreateFailed(format!("unknown filter type `{name}`")))?;

        let filter = ctx.create_node(NodeSpec::Filter {
            filter_type,
            frequency: settings.number("frequency", 5000.0),
            q: settings.number("Q", 1.0),
        })?;
        bundle.push("filter", filter);
        bundle.audio_input = Some(filter);
        bundle.audio_output = Some(filter);
        bundle.mod_inputs.insert("frequency", ParamRef::new(filter, "frequency"));
        bundle.mod_inputs.insert("Q", ParamRef::new(filter, "Q"));
        Ok(())
    }
}

impl ComponentManager for FilterManager {
    fn kind(&self) -> &str {
        kinds::FILTER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("type", "lowpass")
            .with("frequency", 5000.0)
            .with("Q", 1.0)
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
        let filter = bundle.node("filter")?;

        if let Some(SettingValue::Text(name)) = patch.get("type") {
            match FilterType::parse(name) {
                Some(filter_type) => set_now(ctx, ParamRef::new(filter, "type"), filter_type.index())?,
                None => log::warn!(target: "voicegraph::component", "filter: ignoring unknown type `{name}`"),
            }
        }
        if let Some(frequency) = patch.try_number("frequency") {
            ramp(ctx, ParamRef::new(filter, "frequency"), frequency)?;
        }
        if let Some(q) = patch.try_number("Q") {
            ramp(ctx, ParamRef::new(filter, "Q"), q)?;
        }
        Ok(())
    }
}
