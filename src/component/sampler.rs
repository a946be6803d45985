//! Sample-playback source. Creation waits on the sample library; the voice
//! builder polls the returned `PendingAsset` and calls `finish_create` once
//! the buffer arrives.

use std::sync::Arc;

use crate::graph::{AudioContext, NodeSpec, ParamRef};

use super::{
    kinds, ramp, settle, Asset, Bypass, Capabilities, ComponentError, ComponentManager,
    ComponentResult, Creation, NodeBundle, SampleLibrary, Settings,
};

/// Middle C, the pitch samples are assumed to be recorded at.
pub const DEFAULT_ROOT: f32 = 261.63;

pub struct SamplerManager {
    library: Arc<dyn SampleLibrary>,
}

impl SamplerManager {
    pub fn new(library: Arc<dyn SampleLibrary>) -> Self {
        Self { library }
    }

    fn build(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        asset: Asset,
        bundle: &mut NodeBundle,
    ) -> ComponentResult {
        let gain = settings.number("gain", 1.0).max(0.0);
        let root = settings.number("rootFrequency", DEFAULT_ROOT);
        if root <= 0.0 {
            return Err(ComponentError::CreateFailed(format!("root frequency {root} is not positive")));
        }
        let sampler = ctx.create_node(NodeSpec::Sampler {
            sample: asset,
            rate: 1.0,
            gain,
        })?;
        bundle.push("sampler", sampler);
        bundle.audio_output = Some(sampler);
        bundle.mod_inputs.insert("rate", ParamRef::new(sampler, "rate"));
        bundle.mod_inputs.insert("gain", ParamRef::new(sampler, "gain"));
        bundle.remember("gain", gain);
        bundle.remember("rootFrequency", root);
        bundle.remember("release", settings.number("release", 1.0).max(0.0));
        Ok(())
    }
}

impl ComponentManager for SamplerManager {
    fn kind(&self) -> &str {
        kinds::SAMPLER
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::DEFERRED_CREATE
            | Capabilities::TEMPORAL
            | Capabilities::KEY_TRACKING
            | Capabilities::MODULATION_TARGET
    }

    fn default_settings(&self) -> Settings {
        Settings::new()
            .with("instrument", "piano")
            .with("rootFrequency", DEFAULT_ROOT)
            .with("gain", 1.0)
            .with("release", 1.0)
    }

    fn create(&self, _ctx: &mut dyn AudioContext, settings: &Settings) -> Creation {
        let instrument = settings.text("instrument", "piano");
        log::debug!(target: "voicegraph::component", "sampler: loading `{instrument}`");
        Creation::Deferred(self.library.load(instrument))
    }

    fn finish_create(
        &self,
        ctx: &mut dyn AudioContext,
        settings: &Settings,
        asset: Asset,
    ) -> ComponentResult<NodeBundle> {
        let mut bundle = NodeBundle::new();
        let result = self.build(ctx, settings, asset, &mut bundle);
        settle(ctx, bundle, result)
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
        let sampler = bundle.node("sampler")?;

        if let Some(gain) = patch.try_number("gain") {
            let gain = gain.max(0.0);
            bundle.remember("gain", gain);
            if bundle.is_enabled() {
                ramp(ctx, ParamRef::new(sampler, "gain"), gain)?;
            }
        }
        if let Some(root) = patch.try_number("rootFrequency").filter(|r| *r > 0.0) {
            bundle.remember("rootFrequency", root);
        }
        if let Some(release) = patch.try_number("release") {
            bundle.remember("release", release.max(0.0));
        }
        if patch.contains("instrument") {
            log::debug!(target: "voicegraph::component", "sampler: instrument changes apply to newly built voices");
        }
        Ok(())
    }

    fn bypass(&self) -> Option<Bypass> {
        Some(Bypass {
            role: "sampler",
            param: "gain",
        })
    }

    /// Restart playback at full level; a previous release may have faded it.
    fn trigger_attack(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &NodeBundle,
        at: f64,
        velocity: f32,
    ) -> ComponentResult {
        let sampler = bundle.node("sampler")?;
        if bundle.is_enabled() {
            let gain = bundle.remembered("gain").unwrap_or(1.0);
            ctx.set_param(ParamRef::new(sampler, "gain"), gain, at)?;
        }
        ctx.trigger_attack(sampler, at, velocity)?;
        Ok(())
    }

    /// Fade the playing sample out over the release time.
    fn trigger_release(&self, ctx: &mut dyn AudioContext, bundle: &NodeBundle, at: f64) -> ComponentResult {
        let sampler = bundle.node("sampler")?;
        let release = bundle.remembered("release").unwrap_or(1.0) as f64;
        ctx.trigger_release(sampler, at)?;
        ctx.ramp_param(ParamRef::new(sampler, "gain"), 0.0, at, release)?;
        Ok(())
    }

    fn set_pitch(
        &self,
        ctx: &mut dyn AudioContext,
        bundle: &mut NodeBundle,
        frequency: f32,
        at: f64,
    ) -> ComponentResult {
        let sampler = bundle.node("sampler")?;
        let root = bundle.remembered("rootFrequency").unwrap_or(DEFAULT_ROOT);
        ctx.set_param(ParamRef::new(sampler, "rate"), frequency / root, at)?;
        Ok(())
    }

    fn release_tail(&self, settings: &Settings) -> f64 {
        settings.number("release", 1.0).max(0.0) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::loader::{AssetPoll, MemorySampleLibrary};
    use crate::dsp::sample::SampleBuffer;
    use crate::graph::RecordingContext;

    fn manager() -> SamplerManager {
        let library = MemorySampleLibrary::new().with("piano", SampleBuffer::new(vec![0.5; 480], 48_000.0));
        SamplerManager::new(Arc::new(library))
    }

    fn loaded(manager: &SamplerManager, ctx: &mut RecordingContext, settings: &Settings) -> NodeBundle {
        let Creation::Deferred(mut pending) = manager.create(ctx, settings) else {
            panic!("sampler always defers");
        };
        let AssetPoll::Ready(asset) = pending.poll() else {
            panic!("memory library completes immediately");
        };
        manager.finish_create(ctx, settings, asset).unwrap()
    }

    #[test]
    fn create_defers_without_touching_the_graph() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = manager();

        assert!(matches!(manager.create(&mut ctx, &Settings::new()), Creation::Deferred(_)));
        assert!(ctx.ops().is_empty());
    }

    #[test]
    fn missing_instrument_fails_the_load() {
        let mut ctx = RecordingContext::new(48_000.0);
        let Creation::Deferred(mut pending) = manager().create(&mut ctx, &Settings::new().with("instrument", "harp")) else {
            panic!("sampler always defers");
        };
        assert!(matches!(pending.poll(), AssetPoll::Failed(_)));
    }

    #[test]
    fn pitch_sets_playback_rate_against_root() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = manager();
        let settings = Settings::new().with("rootFrequency", 220.0);
        let mut bundle = loaded(&manager, &mut ctx, &settings);
        let rate = ParamRef::new(bundle.node("sampler").unwrap(), "rate");

        manager.set_pitch(&mut ctx, &mut bundle, 440.0, 0.0).unwrap();
        assert_eq!(ctx.param_value(rate), Some(2.0));
    }

    #[test]
    fn release_fades_and_attack_restores() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = manager();
        let bundle = loaded(&manager, &mut ctx, &Settings::new().with("gain", 0.6));
        let sampler = bundle.node("sampler").unwrap();
        let gain = ParamRef::new(sampler, "gain");

        manager.trigger_attack(&mut ctx, &bundle, 0.0, 1.0).unwrap();
        manager.trigger_release(&mut ctx, &bundle, 0.5).unwrap();
        assert_eq!(ctx.param_value(gain), Some(0.0));

        manager.trigger_attack(&mut ctx, &bundle, 1.0, 1.0).unwrap();
        assert_eq!(ctx.param_value(gain), Some(0.6));
        assert_eq!(ctx.attacks(sampler), 2);
    }

    #[test]
    fn invalid_root_releases_nothing_and_fails() {
        let mut ctx = RecordingContext::new(48_000.0);
        let manager = manager();
        let asset = Arc::new(SampleBuffer::new(vec![0.0; 4], 48_000.0));

        let result = manager.finish_create(&mut ctx, &Settings::new().with("rootFrequency", 0.0), asset);
        assert!(matches!(result, Err(ComponentError::CreateFailed(_))));
        assert_eq!(ctx.live_count(), 0);
    }
}
