use std::sync::Arc;

use voicegraph::component::loader::MemorySampleLibrary;
use voicegraph::component::{kinds, ComponentRegistry, Settings};
use voicegraph::dsp::sample::SampleBuffer;
use voicegraph::graph::{channel, AudioContext, GraphRenderer};
use voicegraph::synth::{ChainConfiguration, VoiceBuilder, VoicePool, VoicePreset};
use voicegraph::EngineConfig;

const SR: f32 = 48_000.0;

fn render(renderer: &mut GraphRenderer, secs: f64) -> Vec<f32> {
    let mut all = Vec::new();
    let mut block = [0.0f32; 256];
    let end = renderer.now() + secs;
    while renderer.now() < end {
        renderer.render_block(&mut block);
        all.extend_from_slice(&block);
    }
    all
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

fn pool_for(chain: ChainConfiguration, preset: VoicePreset) -> VoicePool {
    pool_with(EngineConfig::default(), chain, preset)
}

fn pool_with(config: EngineConfig, chain: ChainConfiguration, preset: VoicePreset) -> VoicePool {
    let piano = SampleBuffer::new((0..4800).map(|i| (i as f32 * 0.05).sin() * 0.5).collect(), SR);
    let library = MemorySampleLibrary::new().with("piano", piano);
    let registry = ComponentRegistry::standard(Arc::new(library));
    let builder = VoiceBuilder::new(Arc::new(registry), Arc::new(chain));
    VoicePool::new(config, builder, Arc::new(preset))
}

/// Steal the only voice, then follow the victim's effective output gain block
/// by block until the renderer drops its nodes.
fn stolen_voice_gain(preset: VoicePreset) -> Vec<f32> {
    let (mut context, mut renderer) = channel(SR, 1024);
    let config = EngineConfig::default().with_polyphony(1);
    let mut pool = pool_with(config, ChainConfiguration::standard(), preset);
    pool.ensure_initialized(&mut context).unwrap();

    let victim = pool.note_on(&mut context, 69, 1.0, 0.0).unwrap();
    render(&mut renderer, 0.5);
    let gain = pool.voice(victim).unwrap().param("outputGain.gain").unwrap();
    let now = context.now();
    pool.note_on(&mut context, 72, 1.0, now).unwrap();
    assert!(pool.voice(victim).is_none());

    let mut trail = Vec::new();
    let mut block = [0.0f32; 128];
    for _ in 0..64 {
        renderer.render_block(&mut block);
        match renderer.param_value(gain) {
            Some(value) => trail.push(value),
            None => break,
        }
    }
    assert!(renderer.param_value(gain).is_none(), "victim never released");
    pool.teardown(&mut context);
    trail
}

#[test]
fn renders_a_chord_and_falls_silent_after_release() {
    let (mut context, mut renderer) = channel(SR, 1024);
    let preset = VoicePreset::standard().with(
        kinds::AMPLITUDE_ENV,
        Settings::new().with("attack", 0.01).with("release", 0.1),
    );
    let mut pool = pool_for(ChainConfiguration::standard(), preset);
    pool.ensure_initialized(&mut context).unwrap();

    assert!(render(&mut renderer, 0.05).iter().all(|s| *s == 0.0));

    let handles: Vec<_> = [60, 64, 67]
        .into_iter()
        .map(|pitch| pool.note_on(&mut context, pitch, 0.8, 0.05).unwrap())
        .collect();
    let held = render(&mut renderer, 0.3);
    assert!(peak(&held) > 0.05, "peak {}", peak(&held));
    assert!(held.iter().all(|s| s.is_finite() && s.abs() <= 3.0));

    for handle in handles {
        pool.note_off(&mut context, handle, 0.35);
    }
    render(&mut renderer, 0.3);
    pool.poll(&mut context);
    assert_eq!(pool.active_count(), 0);

    let tail = render(&mut renderer, 0.05);
    assert!(peak(&tail) < 1e-4, "tail {}", peak(&tail));

    pool.teardown(&mut context);
    render(&mut renderer, 0.05);
    assert_eq!(renderer.node_count(), 0);
}

#[test]
fn sampler_voice_plays_its_sample() {
    let (mut context, mut renderer) = channel(SR, 1024);
    let chain = ChainConfiguration::standard().with_source(kinds::SAMPLER).unwrap();
    let preset = VoicePreset::standard().with(kinds::SAMPLER, Settings::new().with("rootFrequency", 440.0));
    let mut pool = pool_for(chain, preset);
    pool.ensure_initialized(&mut context).unwrap();

    pool.note_on(&mut context, 69, 1.0, 0.0).unwrap();
    let out = render(&mut renderer, 0.05);

    assert!(peak(&out) > 0.01, "peak {}", peak(&out));
    pool.teardown(&mut context);
}

#[test]
fn stolen_voice_fades_to_zero_before_release() {
    let trail = stolen_voice_gain(VoicePreset::standard());

    assert!(trail.len() > 2, "trail {trail:?}");
    assert!(trail.windows(2).all(|w| w[1] <= w[0]), "trail {trail:?}");
    let last = trail[trail.len() - 1];
    assert!(last < 1e-3, "last audible gain {last}, trail {trail:?}");
}

#[test]
fn modulation_on_the_output_stage_fades_with_a_stolen_voice() {
    let preset = VoicePreset::standard()
        .with(
            kinds::LFO1,
            Settings::new()
                .with("target", "outputGain.gain")
                .with("depth", 0.5)
                .with("rate", 3.0),
        )
        .with_standard_routes();
    let trail = stolen_voice_gain(preset);

    let last = trail[trail.len() - 1];
    assert!(last.abs() < 0.02, "last audible gain {last}, trail {trail:?}");
}

#[test]
fn distortion_and_chorus_inserts_shape_the_voice() {
    let (mut context, mut renderer) = channel(SR, 1024);
    let clean = VoicePreset::standard();
    let driven = VoicePreset::standard()
        .with(kinds::DISTORTION, Settings::new().with("distortion", 1.0).with("wet", 1.0).with("type", "hard"))
        .with(kinds::CHORUS, Settings::new().with("wet", 0.5));

    let mut outputs = Vec::new();
    for preset in [clean, driven] {
        let mut pool = pool_for(ChainConfiguration::standard(), preset);
        pool.ensure_initialized(&mut context).unwrap();
        let now = context.now();
        let handle = pool.note_on(&mut context, 57, 0.5, now).unwrap();
        let chained = [kinds::DISTORTION, kinds::CHORUS]
            .iter()
            .filter(|kind| pool.voice(handle).unwrap().bundle(kind).is_some())
            .count();
        let out = render(&mut renderer, 0.2);
        assert!(out.iter().all(|s| s.is_finite()));
        outputs.push((chained, out));
        pool.teardown(&mut context);
        render(&mut renderer, 0.05);
    }

    assert_eq!(outputs[0].0, 0);
    assert_eq!(outputs[1].0, 2);
    let differs = outputs[0]
        .1
        .iter()
        .zip(&outputs[1].1)
        .any(|(a, b)| (a - b).abs() > 0.01);
    assert!(differs);
    assert_eq!(renderer.node_count(), 0);
}
