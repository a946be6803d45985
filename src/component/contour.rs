//! Envelope-shaped modulation sources: an ADSR scaled by an amount.
//!
//! The pitch contour's amount is in cents and is routed into the
//! oscillator's detune; the filter contour's amount is in Hz and is routed
//! into the filter cutoff. Both are velocity-insensitive.

use crate::dsp::EnvelopeShape;
use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::amp_envelope::{shape_from, update_stages};
use super::{
    kinds, ramp, settle, Bypass, Capabilities, ComponentError, ComponentManager, ComponentResult,
    Creation, NodeBundle, Settings,
};

pub struct ContourManager {
    kind: &'static str,
    output: &'static str,
    defaults: EnvelopeShape,
    amount: f32,
}

impl ContourManager {
    pub fn pitch() -> Self {
        Self {
            kind: kinds::PITCH_ENVELOPE,
            output: "pitch",
            defaults: EnvelopeShape::new(0.1, 0.1, 0.5, 0.2),
            amount: 100.0,
        }
    }

    pub fn filter() -> Self {
        Self {
            kind: kinds::FILTER_ENVELOPE,
            output: "output",
            defaults: EnvelopeShape::new(0.1, 0.2, 0.5, 0.5),
            amount: 0.0,
        }
    }

    /// Name of the modulation output routes read from.
    pub fn output(&self) -> &'static str {
        self.output
    }

    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let amount = settings.number("amount", self.amount);
        let env = ctx.create_node(NodeSpec::Envelope {
            shape: shape_from(settings, self.defaults),
        })?;
        bundle.push("env", env);
        let scaler = ctx.create_node(NodeSpec::Gain { gain: amount })?;
        bundle.push("amount", scaler);
        ctx.connect(env, scaler)?;

        bundle.mod_outputs.insert(self.output, scaler);
        bundle.remember("gain", amount);
        Ok(())
    }
}

impl ComponentManager for ContourManager {
    fn kind(&self) -> &str {
        self.kind
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::TEMPORAL
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("attack", self.defaults.attack)
            .with("decay", self.defaults.decay)
            .with("sustain", self.defaults.sustain)
            .with("release", self.defaults.release)
            .with("amount", self.amount)
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
        update_stages(ctx, bundle.node("env")?, patch)?;
        if let Some(amount) = patch.try_number("amount") {
            bundle.remember("gain", amount);
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(bundle.node("amount")?, "gain"), amount)?;
            }
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "amount",
            param: "gain",
        })
    }

    fn trigger_attack(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        at: f64,
        _velocity: f32,
    ) -> ComponentResult {
        ctx.trigger_attack(bundle.node("env")?, at, 1.0)?;
        Ok(())
    }

    fn trigger_release(&self, ctx: &mut dyn AudioContext, bundle: &NodeBundle, at: f64) -> ComponentResult {
        ctx.trigger_release(bundle.node("env")?, at)?;
        Ok(())
    }

    fn release_tail(&self, settings: &Settings) -> f64 {
        settings.number("release", self.defaults.release) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContextOp, RecordingContext};

    fn create(manager: &ContourManager, ctx: &mut RecordingContext, settings: &Settings) -> NodeBundle {
        match manager.create(ctx, settings) {
            Creation::Ready(Ok(bundle)) => bundle,
            _ => panic!("expected a ready bundle"),
        }
    }

    #[test]
    fn exposes_scaled_output_only() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = ContourManager::pitch();
        let bundle = create(&manager, &mut ctx, &Settings::new().with("amount", 300.0));
        let env = bundle.node("env").unwrap();
        let scaler = bundle.node("amount").unwrap();

        assert!(ctx.is_connected(env, scaler));
        assert_eq!(bundle.mod_outputs.get("pitch"), Some(&scaler));
        assert_eq!(bundle.audio_input, None);
        assert_eq!(bundle.audio_output, None);
        assert_eq!(ctx.param_value(ParamRef::new(scaler, "gain")), Some(300.0));
    }

    #[test]
    fn attack_ignores_velocity() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = ContourManager::filter();
        let bundle = create(&manager, &mut ctx, &Settings::new());
        ctx.clear_ops();

        manager.trigger_attack(&mut ctx, &bundle, 0.0, 0.2).unwrap();
        assert!(matches!(
            ctx.ops(),
            [ContextOp::TriggerAttack { velocity, .. }] if *velocity == 1.0
        ));
    }

    #[test]
    fn disabled_contour_holds_amount_at_zero() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = ContourManager::pitch();
        let mut bundle = create(&manager, &mut ctx, &Settings::new());
        let gain = ParamRef::new(bundle.node("amount").unwrap(), "gain");

        manager.enable(&mut ctx, &mut bundle, false).unwrap();
        manager
            .update(&mut ctx, &mut bundle, &Settings::new().with("amount", 50.0))
            .unwrap();
        assert_eq!(ctx.param_value(gain), Some(0.0));

        manager.enable(&mut ctx, &mut bundle, true).unwrap();
        assert_eq!(ctx.param_value(gain), Some(50.0));
    }

    #[test]
    fn connect_peers_does_not_touch_audio() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = ContourManager::pitch();
        let bundle = create(&manager, &mut ctx, &Settings::new());
        let other = ctx.create_node(NodeSpec::Gain { gain: 1.0 }).unwrap();
        ctx.clear_ops();

        manager.connect_peers(&mut ctx, &bundle, Some(other), None).unwrap();
        assert!(ctx.ops().is_empty());
    }
}
