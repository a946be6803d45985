use std::f32::consts::TAU;

use crate::dsp::delay::DelayLine;
use crate::graph::node::{GraphNode, RenderCtx};

/*
Chorus Node
===========

Mixes the input with a copy read from a short delay whose length is swept by
an internal sine LFO. The moving tap shifts pitch slightly up and down, so
the wet copy sounds like a second, slightly detuned player.

    delay(t) = delayTime · (1 + depth · sin(2π · frequency · t))

Parameters
----------

frequency   LFO rate in Hz, 0.05 to 10
depth       sweep as a fraction of delayTime, 0 to 1
delayTime   centre delay in milliseconds, 1 to 50
wet         dry/wet blend, 0 to 1

The LFO free-runs across notes; a chorus has no gate.
*/

const FREQUENCY: usize = 0;
const DEPTH: usize = 1;
const DELAY_TIME: usize = 2;
const WET: usize = 3;

pub struct ChorusNode {
    delay_line: DelayLine,
    phase: f32,
}

impl ChorusNode {
    pub fn new() -> Self {
        Self {
            delay_line: DelayLine::new(),
            phase: 0.0,
        }
    }
}

impl Default for ChorusNode {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for ChorusNode {
    fn process(&mut self, input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        let rate = params[FREQUENCY].clamp(0.05, 10.0);
        let depth = params[DEPTH].clamp(0.0, 1.0);
        let centre = params[DELAY_TIME].clamp(1.0, 50.0) * ctx.sample_rate / 1000.0;
        let wet = params[WET].clamp(0.0, 1.0);
        let phase_inc = TAU * rate / ctx.sample_rate;

        for (o, x) in out.iter_mut().zip(input) {
            let delay = (centre * (1.0 + depth * self.phase.sin())).max(1.0);
            let delayed = self.delay_line.read_interpolated(delay);
            self.delay_line.write(*x);
            *o = x * (1.0 - wet) + delayed * wet;

            self.phase += phase_inc;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }
    }
}
