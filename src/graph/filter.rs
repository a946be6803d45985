use crate::dsp::filter::{FilterType, SVFilter};
use crate::graph::node::{GraphNode, RenderCtx};

const FREQUENCY: usize = 0;
const Q: usize = 1;
const TYPE: usize = 2;

/// State-variable filter over the node's audio input.
///
/// Cutoff and Q are re-read every block, so envelope and LFO modulation of
/// `frequency` lands here at block rate.
pub struct FilterNode {
    filter: SVFilter,
}

impl FilterNode {
    pub fn new(filter_type: FilterType, frequency: f32, q: f32) -> Self {
        Self {
            filter: SVFilter::new(filter_type, frequency, q),
        }
    }
}

impl GraphNode for FilterNode {
    fn process(&mut self, input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        self.filter.cutoff_hz = params[FREQUENCY];
        self.filter.q = params[Q];
        self.filter.filter_type = FilterType::from_index(params[TYPE]);

        out.copy_from_slice(input);
        self.filter.render(out, ctx.sample_rate);
    }
}
