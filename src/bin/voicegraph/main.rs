//! voicegraph - plays an arpeggio through a pooled, component-built voice
//!
//! Run with: cargo run [-- <config.toml>]

mod app;
mod arpeggio;

use app::Player;
use arpeggio::Arpeggio;
use color_eyre::eyre::Result as EyreResult;
use voicegraph::component::kinds;
use voicegraph::component::Settings;
use voicegraph::synth::VoicePreset;
use voicegraph::EngineConfig;

fn main() -> EyreResult<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;

    let preset = VoicePreset::standard()
        .with(kinds::OSCILLATOR, Settings::new().with("type", "sawtooth"))
        .with(
            kinds::AMPLITUDE_ENV,
            Settings::new()
                .with("attack", 0.005)
                .with("decay", 0.2)
                .with("sustain", 0.4)
                .with("release", 0.4),
        )
        .with(kinds::FILTER, Settings::new().with("frequency", 900.0).with("Q", 4.0))
        .with(kinds::FILTER_ENVELOPE, Settings::new().with("amount", 1800.0))
        .with(kinds::CHORUS, Settings::new().with("wet", 0.35))
        .with(
            kinds::DELAY,
            Settings::new()
                .with("delayTime", 0.3)
                .with("feedback", 0.35)
                .with("wet", 0.25),
        )
        .with(kinds::OUTPUT_GAIN, Settings::new().with("gain", 0.3))
        .with_standard_routes();

    // C minor, up and back down
    let notes = [48, 51, 55, 58, 60, 63, 67, 70, 72, 70, 67, 63, 60, 58, 55, 51];

    Player::new(config)
        .preset(preset)
        .play(Arpeggio::new(&notes).bpm(132.0).gate(0.6).repeat(4))
}

#[cfg(feature = "serde")]
fn load_config() -> EyreResult<EngineConfig> {
    use color_eyre::eyre::WrapErr;

    match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path).wrap_err_with(|| format!("reading {path}"))?;
            EngineConfig::from_toml_str(&source).wrap_err_with(|| format!("loading {path}"))
        }
        None => Ok(EngineConfig::default()),
    }
}

#[cfg(not(feature = "serde"))]
fn load_config() -> EyreResult<EngineConfig> {
    if std::env::args().nth(1).is_some() {
        log::warn!("config files need the `serde` feature; using defaults");
    }
    Ok(EngineConfig::default())
}
