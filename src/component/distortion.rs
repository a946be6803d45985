use crate::dsp::DistortionCurve;
use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, set_now, settle, Bypass, Capabilities, ComponentError, ComponentManager,
    ComponentResult, Creation, NodeBundle, SettingValue, Settings,
};

/// Waveshaper insert. Optional; bypassed through its wet level.
pub struct DistortionManager;

impl DistortionManager {
    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let name = settings.text("type", "soft");
        let curve = DistortionCurve::parse(name)
            .ok_or_else(|| ComponentError::CreateFailed(format!("unknown distortion curve `{name}`")))?;
        let wet = settings.number("wet", 0.0).clamp(0.0, 1.0);
        let shaper = ctx.create_node(NodeSpec::Distortion {
            curve,
            amount: settings.number("distortion", 0.4).clamp(0.0, 1.0),
            wet,
        })?;
        bundle.push("shaper", shaper);
        bundle.audio_input = Some(shaper);
        bundle.audio_output = Some(shaper);
        for param in ["distortion", "wet"] {
            bundle.mod_inputs.insert(param, ParamRef::new(shaper, param));
        }
        bundle.remember("wet", wet);
        Ok(())
    }
}

impl ComponentManager for DistortionManager {
    fn kind(&self) -> &str {
        kinds::DISTORTION
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("distortion", 0.4)
            .with("wet", 0.0)
            .with("type", "soft")
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
        let shaper = bundle.node("shaper")?;

        if let Some(SettingValue::Text(name)) = patch.get("type") {
            match DistortionCurve::parse(name) {
                Some(curve) => set_now(ctx, ParamRef::new(shaper, "type"), curve.index())?,
                None => log::warn!(target: "voicegraph::component", "ignoring unknown distortion curve `{name}`"),
            }
        }
        if let Some(amount) = patch.try_number("distortion") {
            ramp(ctx, ParamRef::new(shaper, "distortion"), amount.clamp(0.0, 1.0))?;
        }
        if let Some(wet) = patch.try_number("wet") {
            let wet = wet.clamp(0.0, 1.0);
            bundle.remember("wet", wet);
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(shaper, "wet"), wet)?;
            }
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "shaper",
            param: "wet",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, RecordingContext};

    fn create(ctx: &mut RecordingContext, settings: &Settings) -> NodeBundle {
        match DistortionManager.create(ctx, settings) {
            Creation::Ready(Ok(bundle)) => bundle,
            _ => panic!("expected a ready bundle"),
        }
    }

    #[test]
    fn is_an_optional_modulatable_insert() {
        let mut ctx = RecordingContext::new(48_000.0);
        let bundle = create(&mut ctx, &Settings::new().with("wet", 1.0));

        assert!(DistortionManager.is_optional());
        assert!(DistortionManager.capabilities().contains(Capabilities::MODULATION_TARGET));
        assert_eq!(bundle.audio_input, bundle.audio_output);
        assert_eq!(ctx.live_of_kind(NodeKind::Distortion).len(), 1);
        assert!(bundle.mod_inputs.contains_key("distortion"));
    }

    #[test]
    fn bypass_ramps_wet_and_restores_it() {
        let mut ctx = RecordingContext::new(48_000.0);
        let mut bundle = create(&mut ctx, &Settings::new().with("wet", 0.8));
        let wet = ParamRef::new(bundle.node("shaper").unwrap(), "wet");

        DistortionManager.enable(&mut ctx, &mut bundle, false).unwrap();
        assert_eq!(ctx.param_value(wet), Some(0.0));

        DistortionManager
            .update(&mut ctx, &mut bundle, &Settings::new().with("wet", 0.6))
            .unwrap();
        assert_eq!(ctx.param_value(wet), Some(0.0));

        DistortionManager.enable(&mut ctx, &mut bundle, true).unwrap();
        assert_eq!(ctx.param_value(wet), Some(0.6));
    }

    #[test]
    fn curve_switches_and_amount_is_clamped() {
        let mut ctx = RecordingContext::new(48_000.0);
        let mut bundle = create(&mut ctx, &Settings::new());
        let shaper = bundle.node("shaper").unwrap();

        DistortionManager
            .update(
                &mut ctx,
                &mut bundle,
                &Settings::new().with("type", "foldback").with("distortion", 3.0),
            )
            .unwrap();

        assert_eq!(
            ctx.param_value(ParamRef::new(shaper, "type")),
            Some(DistortionCurve::Foldback.index())
        );
        assert_eq!(ctx.param_value(ParamRef::new(shaper, "distortion")), Some(1.0));
    }

    #[test]
    fn unknown_curve_fails_creation() {
        let mut ctx = RecordingContext::new(48_000.0);
        let creation = DistortionManager.create(&mut ctx, &Settings::new().with("type", "fuzz"));

        assert!(matches!(creation, Creation::Ready(Err(ComponentError::CreateFailed(_)))));
        assert_eq!(ctx.live_count(), 0);
    }
}
