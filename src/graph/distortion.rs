use crate::dsp::distortion::{drive_for, DistortionCurve};
use crate::graph::node::{GraphNode, RenderCtx};

/*
Distortion Node
===============

Waveshaper insert with a dry/wet blend:

    out = dry·(1 - wet) + curve(dry · drive)·wet

`distortion` is the 0..1 amount presets use; the node maps it to a drive
each block. `type` selects the curve by index (soft, hard, foldback) and can
change between blocks like an oscillator's waveform.
*/

const AMOUNT: usize = 0;
const WET: usize = 1;
const TYPE: usize = 2;

pub struct DistortionNode;

impl DistortionNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DistortionNode {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for DistortionNode {
    fn process(&mut self, input: &[f32], out: &mut [f32], params: &[f32], _ctx: &RenderCtx) {
        let curve = DistortionCurve::from_index(params[TYPE]);
        let drive = drive_for(params[AMOUNT]);
        let wet = params[WET].clamp(0.0, 1.0);

        for (o, x) in out.iter_mut().zip(input) {
            *o = x * (1.0 - wet) + curve.shape(*x, drive) * wet;
        }
    }
}
