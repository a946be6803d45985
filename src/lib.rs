pub mod component; // Pluggable voice building blocks and their registry
pub mod config;
pub mod dsp;
pub mod graph; // Node graph boundary and the in-process renderer
pub mod synth; // Voice assembly, polyphony and note handling

pub use config::EngineConfig;

pub const MAX_BLOCK_SIZE: usize = 2048;
pub const MAX_DELAY_SAMPLES: usize = 96_000;
pub const MAX_POLYPHONY: usize = 32;
pub(crate) const MIN_TIME: f32 = 1.0 / 48_000.0;

/// Duration of every parameter ramp issued by component updates (seconds).
pub const RAMP_SECS: f64 = 0.02;
