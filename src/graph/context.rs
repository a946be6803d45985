//! The audio context: a semantic-level abstraction over the node graph.
//!
//! `AudioContext` captures what the voice layer *means* to do (create a
//! filter, wire an envelope into a parameter, ramp a gain to zero) without
//! knowing how the graph renders. Components and voices only ever hold
//! `NodeId`s and `ParamRef`s handed out by a context.
//!
//! All times are in the context's own clock (`now()`, seconds). Operations
//! that take an `at` may be scheduled in the future; structural operations
//! (create, connect) apply immediately.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::dsp::{sample::SampleBuffer, DistortionCurve, EnvelopeShape, FilterType, Waveform};

pub type ContextResult<T = ()> = Result<T, ContextError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    #[error("node {node} has no parameter `{param}`")]
    UnknownParam { node: NodeId, param: String },
    #[error("node {0} does not respond to triggers")]
    NotGated(NodeId),
    #[error("command queue is full")]
    QueueFull,
    #[error("rejected by context: {0}")]
    Rejected(String),
}

/// Opaque handle to a node owned by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named, modulatable parameter on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamRef {
    pub node: NodeId,
    pub name: &'static str,
}

impl ParamRef {
    pub fn new(node: NodeId, name: &'static str) -> Self {
        Self { node, name }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Oscillator,
    Filter,
    Gain,
    Envelope,
    Lfo,
    Delay,
    Sampler,
    Distortion,
    Chorus,
}

impl NodeKind {
    /// Parameter names in storage order.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            NodeKind::Oscillator => &["frequency", "detune", "type"],
            NodeKind::Filter => &["frequency", "Q", "type"],
            NodeKind::Gain => &["gain"],
            NodeKind::Envelope => &["attack", "decay", "sustain", "release"],
            NodeKind::Lfo => &["rate", "type"],
            NodeKind::Delay => &["delayTime", "feedback", "wet"],
            NodeKind::Sampler => &["rate", "gain"],
            NodeKind::Distortion => &["distortion", "wet", "type"],
            NodeKind::Chorus => &["frequency", "depth", "delayTime", "wet"],
        }
    }

    pub fn param_index(self, name: &str) -> Option<usize> {
        self.params().iter().position(|p| *p == name)
    }

    /// Whether `trigger_attack`/`trigger_release` mean anything to this node.
    pub fn is_gated(self) -> bool {
        matches!(self, NodeKind::Envelope | NodeKind::Lfo | NodeKind::Sampler)
    }
}

/// Everything a context needs to instantiate a node.
#[derive(Debug, Clone)]
pub enum NodeSpec {
    Oscillator {
        waveform: Waveform,
        frequency: f32,
        detune: f32,
    },
    Filter {
        filter_type: FilterType,
        frequency: f32,
        q: f32,
    },
    Gain {
        gain: f32,
    },
    Envelope {
        shape: EnvelopeShape,
    },
    Lfo {
        waveform: Waveform,
        rate: f32,
        retrigger: bool,
    },
    Delay {
        time: f32,
        feedback: f32,
        wet: f32,
    },
    Sampler {
        sample: Arc<SampleBuffer>,
        rate: f32,
        gain: f32,
    },
    Distortion {
        curve: DistortionCurve,
        amount: f32,
        wet: f32,
    },
    /// `delay_ms` is the centre of the swept delay, in milliseconds.
    Chorus {
        frequency: f32,
        depth: f32,
        delay_ms: f32,
        wet: f32,
    },
}

impl NodeSpec {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeSpec::Oscillator { .. } => NodeKind::Oscillator,
            NodeSpec::Filter { .. } => NodeKind::Filter,
            NodeSpec::Gain { .. } => NodeKind::Gain,
            NodeSpec::Envelope { .. } => NodeKind::Envelope,
            NodeSpec::Lfo { .. } => NodeKind::Lfo,
            NodeSpec::Delay { .. } => NodeKind::Delay,
            NodeSpec::Sampler { .. } => NodeKind::Sampler,
            NodeSpec::Distortion { .. } => NodeKind::Distortion,
            NodeSpec::Chorus { .. } => NodeKind::Chorus,
        }
    }

    /// Starting parameter values, ordered as `NodeKind::params`.
    pub fn initial_params(&self) -> Vec<f32> {
        match self {
            NodeSpec::Oscillator {
                waveform,
                frequency,
                detune,
            } => vec![*frequency, *detune, waveform.index()],
            NodeSpec::Filter {
                filter_type,
                frequency,
                q,
            } => vec![*frequency, *q, filter_type.index()],
            NodeSpec::Gain { gain } => vec![*gain],
            NodeSpec::Envelope { shape } => {
                vec![shape.attack, shape.decay, shape.sustain, shape.release]
            }
            NodeSpec::Lfo { waveform, rate, .. } => vec![*rate, waveform.index()],
            NodeSpec::Delay {
                time,
                feedback,
                wet,
            } => vec![*time, *feedback, *wet],
            NodeSpec::Sampler { rate, gain, .. } => vec![*rate, *gain],
            NodeSpec::Distortion { curve, amount, wet } => vec![*amount, *wet, curve.index()],
            NodeSpec::Chorus {
                frequency,
                depth,
                delay_ms,
                wet,
            } => vec![*frequency, *depth, *delay_ms, *wet],
        }
    }
}

/// Semantic-level node graph operations.
///
/// Implementations either drive a renderer (`GraphHandle`) or record what was
/// asked of them for inspection (`RecordingContext`).
pub trait AudioContext {
    /// Current time in the context's clock, in seconds.
    fn now(&self) -> f64;

    fn sample_rate(&self) -> f32;

    fn create_node(&mut self, spec: NodeSpec) -> ContextResult<NodeId>;

    /// Route `from`'s audio output into `to`'s audio input.
    fn connect(&mut self, from: NodeId, to: NodeId) -> ContextResult;

    fn disconnect(&mut self, from: NodeId, to: NodeId) -> ContextResult;

    /// Add `from`'s output to a parameter's value (modulation).
    fn connect_param(&mut self, from: NodeId, to: ParamRef) -> ContextResult;

    fn disconnect_param(&mut self, from: NodeId, to: ParamRef) -> ContextResult;

    fn connect_destination(&mut self, node: NodeId) -> ContextResult;

    /// Drop every outgoing audio, parameter and destination edge of `node`.
    fn disconnect_all(&mut self, node: NodeId, at: f64) -> ContextResult;

    /// Destroy `node`. Incoming edges are dropped with it.
    fn release_node(&mut self, node: NodeId, at: f64) -> ContextResult;

    /// Jump a parameter to `value` at `at`.
    fn set_param(&mut self, param: ParamRef, value: f32, at: f64) -> ContextResult;

    /// Linear ramp from the parameter's value at `at` to `value` over `duration`.
    fn ramp_param(&mut self, param: ParamRef, value: f32, at: f64, duration: f64) -> ContextResult;

    fn trigger_attack(&mut self, node: NodeId, at: f64, velocity: f32) -> ContextResult;

    fn trigger_release(&mut self, node: NodeId, at: f64) -> ContextResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_params_follow_declared_order() {
        let spec = NodeSpec::Filter {
            filter_type: FilterType::HighPass,
            frequency: 1200.0,
            q: 2.0,
        };
        let kind = spec.kind();
        let params = spec.initial_params();

        assert_eq!(params.len(), kind.params().len());
        assert_eq!(params[kind.param_index("frequency").unwrap()], 1200.0);
        assert_eq!(params[kind.param_index("Q").unwrap()], 2.0);
        assert_eq!(params[kind.param_index("type").unwrap()], FilterType::HighPass.index());
    }

    #[test]
    fn every_kind_declares_matching_initial_params() {
        let specs = [
            NodeSpec::Oscillator {
                waveform: Waveform::Sine,
                frequency: 440.0,
                detune: 0.0,
            },
            NodeSpec::Gain { gain: 1.0 },
            NodeSpec::Envelope {
                shape: EnvelopeShape::default(),
            },
            NodeSpec::Lfo {
                waveform: Waveform::Sine,
                rate: 5.0,
                retrigger: false,
            },
            NodeSpec::Delay {
                time: 0.25,
                feedback: 0.3,
                wet: 0.0,
            },
            NodeSpec::Sampler {
                sample: Arc::new(SampleBuffer::new(vec![0.0; 4], 48_000.0)),
                rate: 1.0,
                gain: 1.0,
            },
            NodeSpec::Distortion {
                curve: DistortionCurve::Soft,
                amount: 0.4,
                wet: 1.0,
            },
            NodeSpec::Chorus {
                frequency: 1.5,
                depth: 0.7,
                delay_ms: 3.5,
                wet: 0.5,
            },
        ];
        for spec in specs {
            assert_eq!(spec.initial_params().len(), spec.kind().params().len());
        }
    }

    #[test]
    fn only_envelopes_lfos_and_samplers_are_gated() {
        assert!(NodeKind::Envelope.is_gated());
        assert!(NodeKind::Sampler.is_gated());
        assert!(!NodeKind::Gain.is_gated());
        assert!(!NodeKind::Filter.is_gated());
        assert!(!NodeKind::Distortion.is_gated());
        assert!(!NodeKind::Chorus.is_gated());
    }
}
