use crate::{
    dsp::delay::DelayLine,
    graph::node::{GraphNode, RenderCtx},
};

const TIME: usize = 0;
const FEEDBACK: usize = 1;
const WET: usize = 2;

/// Feedback delay insert with a wet/dry mix.
pub struct DelayNode {
    delay_line: DelayLine,
}

impl DelayNode {
    pub fn new() -> Self {
        Self {
            delay_line: DelayLine::new(),
        }
    }
}

impl Default for DelayNode {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for DelayNode {
    fn process(&mut self, input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        let delay_samples = (params[TIME].max(0.0) * ctx.sample_rate) as usize;
        out.copy_from_slice(input);
        self.delay_line
            .render(out, delay_samples, params[FEEDBACK], params[WET]);
    }
}
