use crate::dsp::modulate::interpolate;
use crate::graph::node::{GraphNode, RenderCtx};

const GAIN: usize = 0;

/// Multiplies the input by `gain`.
///
/// Used as the VCA after the amplitude envelope, as the output stage, as the
/// depth/amount scaler behind modulators, and as the pool's summing bus.
/// The gain is interpolated across each block from the previous block's
/// value, so block-rate envelope modulation does not zipper.
pub struct GainNode {
    last: Option<f32>,
}

impl GainNode {
    pub fn new() -> Self {
        Self { last: None }
    }
}

impl Default for GainNode {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for GainNode {
    fn process(&mut self, input: &[f32], out: &mut [f32], params: &[f32], _ctx: &RenderCtx) {
        let gain = params[GAIN];
        let from = self.last.unwrap_or(gain);
        let len = out.len();

        for (i, (o, x)) in out.iter_mut().zip(input).enumerate() {
            *o = x * interpolate(from, gain, i, len);
        }
        self.last = Some(gain);
    }
}
