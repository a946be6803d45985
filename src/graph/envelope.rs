use crate::dsp::envelope::{Envelope, EnvelopeShape};
use crate::graph::node::{GraphNode, RenderCtx};

const ATTACK: usize = 0;
const DECAY: usize = 1;
const SUSTAIN: usize = 2;
const RELEASE: usize = 3;

/// Gated ADSR source. Output is `level * velocity`, so the node produces
/// 0.0 to 1.0 and downstream gain stages scale it into target units.
pub struct EnvNode {
    env: Envelope,
    velocity: f32,
}

impl EnvNode {
    pub fn new(shape: EnvelopeShape) -> Self {
        Self {
            env: Envelope::new(shape),
            velocity: 1.0,
        }
    }
}

impl GraphNode for EnvNode {
    fn process(&mut self, _input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        let shape = EnvelopeShape::new(params[ATTACK], params[DECAY], params[SUSTAIN], params[RELEASE]);
        if shape != self.env.shape() {
            self.env.set_shape(shape, ctx.sample_rate);
        }

        self.env.render(out, ctx.sample_rate);
        if self.velocity != 1.0 {
            for sample in out.iter_mut() {
                *sample *= self.velocity;
            }
        }
    }

    fn note_on(&mut self, velocity: f32) {
        self.velocity = velocity.clamp(0.0, 1.0);
        self.env.note_on();
    }

    fn note_off(&mut self, sample_rate: f32) {
        self.env.note_off(sample_rate);
    }
}
