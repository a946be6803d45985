//! The node graph voices are assembled on.
//!
//! The voice layer only ever talks to an `AudioContext`: it creates nodes
//! from `NodeSpec`s, wires them, schedules parameter changes and gates. Two
//! contexts ship with the crate: the in-process renderer in `engine` and the
//! `RecordingContext` used to inspect assembly without producing sound.

/// `AudioContext` trait, node handles and node specs.
pub mod context;
/// Modulated short-delay insert.
pub mod chorus;
/// Feedback delay insert.
pub mod delay;
/// Waveshaper insert.
pub mod distortion;
/// Control/render split with lock-free command and garbage queues.
pub mod engine;
/// Gated ADSR source.
pub mod envelope;
/// State-variable filter node.
pub mod filter;
/// VCA, amount scaler and summing bus.
pub mod gain;
/// Low frequency oscillators for parameter modulation.
pub mod lfo;
/// Render-side node trait and parameter ramps.
pub mod node;
/// Audio-band oscillator.
pub mod oscillator;
/// Operation-logging context for tests.
pub mod recording;
/// One-shot sample playback node.
pub mod sampler;

pub use context::{
    AudioContext, ContextError, ContextResult, NodeId, NodeKind, NodeSpec, ParamRef,
};
pub use engine::{channel, GraphHandle, GraphRenderer, RenderStats};
pub use node::{GraphNode, RenderCtx};
pub use recording::{ContextOp, RecordingContext};

/// Most parameters any node kind declares.
pub(crate) const MAX_PARAMS: usize = 4;

/// Instantiate the render node for `spec`. Runs on the control thread.
pub(crate) fn build_node(spec: NodeSpec) -> Box<dyn GraphNode> {
    match spec {
        NodeSpec::Oscillator { waveform, .. } => Box::new(oscillator::OscNode::new(waveform)),
        NodeSpec::Filter {
            filter_type,
            frequency,
            q,
        } => Box::new(filter::FilterNode::new(filter_type, frequency, q)),
        NodeSpec::Gain { .. } => Box::new(gain::GainNode::new()),
        NodeSpec::Envelope { shape } => Box::new(envelope::EnvNode::new(shape)),
        NodeSpec::Lfo {
            waveform,
            retrigger,
            ..
        } => Box::new(lfo::LfoNode::new(waveform, retrigger)),
        NodeSpec::Delay { .. } => Box::new(delay::DelayNode::new()),
        NodeSpec::Sampler { sample, .. } => Box::new(sampler::SamplerNode::new(sample)),
        NodeSpec::Distortion { .. } => Box::new(distortion::DistortionNode::new()),
        NodeSpec::Chorus { .. } => Box::new(chorus::ChorusNode::new()),
    }
}
