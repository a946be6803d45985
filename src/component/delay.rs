use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, settle, Bypass, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, Settings,
};

/// Level below which a feedback echo is considered gone (-60 dB).
const TAIL_FLOOR: f64 = 0.001;

/// Feedback echo insert. Optional; bypassed through its wet level.
pub struct DelayManager;

impl DelayManager {
    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let wet = settings.number("wet", 0.0);
        let delay = ctx.create_node(NodeSpec::Delay {
            time: settings.number("delayTime", 0.25),
            feedback: settings.number("feedback", 0.3),
            wet,
        })?;
        bundle.push("delay", delay);
        bundle.audio_input = Some(delay);
        bundle.audio_output = Some(delay);
        for param in ["delayTime", "feedback", "wet"] {
            bundle.mod_inputs.insert(param, ParamRef::new(delay, param));
        }
        bundle.remember("wet", wet);
        Ok(())
    }
}

impl ComponentManager for DelayManager {
    fn kind(&self) -> &str {
        kinds::DELAY
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("delayTime", 0.25)
            .with("feedback", 0.3)
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
        let delay = bundle.node("delay")?;

        if let Some(time) = patch.try_number("delayTime") {
            ramp(ctx, ParamRef::new(delay, "delayTime"), time.max(0.0))?;
        }
        if let Some(feedback) = patch.try_number("feedback") {
            ramp(ctx, ParamRef::new(delay, "feedback"), feedback.clamp(0.0, 0.99))?;
        }
        if let Some(wet) = patch.try_number("wet") {
            let wet = wet.clamp(0.0, 1.0);
            bundle.remember("wet", wet);
            // A bypassed delay picks the new level up when re-enabled.
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(delay, "wet"), wet)?;
            }
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "delay",
            param: "wet",
        })
    }

    /// Time for the echoes to decay below -60 dB. Zero when fully dry.
    fn release_tail(&self, settings: &Settings) -> f64 {
        let wet = settings.number("wet", 0.0);
        if wet <= 0.0 {
            return 0.0;
        }
        let time = settings.number("delayTime", 0.25).max(0.0) as f64;
        let feedback = settings.number("feedback", 0.3).clamp(0.0, 0.99) as f64;
        if feedback <= 0.0 {
            return time;
        }
        time * (1.0 + TAIL_FLOOR.ln() / feedback.ln())
    }
}
