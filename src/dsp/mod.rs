//! Low-level DSP primitives used by the render graph nodes.
//!
//! Everything here is allocation-free after construction and safe to run on
//! the audio thread. The voice layer never touches these directly; it only
//! sees node handles through the graph context.

/// Feedback delay line.
pub mod delay;
/// Waveshaping curves.
pub mod distortion;
/// Attack/decay/sustain/release envelope generator.
pub mod envelope;
/// State-variable filter with four responses.
pub mod filter;
/// Block-rate modulation helpers.
pub mod modulate;
/// Phase-accumulator oscillator.
pub mod oscillator;
/// Sample buffers and playback.
pub mod sample;
/// Note-to-frequency conversion.
pub mod tuning;

pub use distortion::DistortionCurve;
pub use envelope::{EnvelopeShape, EnvelopeState};
pub use filter::FilterType;
pub use oscillator::Waveform;
