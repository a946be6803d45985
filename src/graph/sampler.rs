use std::sync::Arc;

use crate::dsp::sample::{SampleBuffer, SamplePlayer};
use crate::graph::node::{GraphNode, RenderCtx};

const RATE: usize = 0;
const GAIN: usize = 1;

/// One-shot sample source. `rate` is the playback ratio the voice derives
/// from the played note and the sample's root pitch.
pub struct SamplerNode {
    player: SamplePlayer,
}

impl SamplerNode {
    pub fn new(sample: Arc<SampleBuffer>) -> Self {
        Self {
            player: SamplePlayer::new(sample),
        }
    }
}

impl GraphNode for SamplerNode {
    fn process(&mut self, _input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        self.player.render(out, params[RATE], ctx.sample_rate);
        let gain = params[GAIN];
        for sample in out.iter_mut() {
            *sample *= gain;
        }
    }

    fn note_on(&mut self, _velocity: f32) {
        self.player.start();
    }
}
