use crate::dsp::{
    modulate::cents_to_ratio,
    oscillator::{OscillatorBlock, Waveform},
};
use crate::graph::node::{GraphNode, RenderCtx};

/*
Audio Oscillator
================

The pitched source at the head of a voice chain. Three parameters:

  frequency   Hz. Set by the voice on every attack (key tracking); glides
              when the oscillator component has a portamento time.

  detune      Cents, added to the frequency as a ratio:

                  f = frequency · 2^(detune / 1200)

              The pitch envelope drives this parameter, so a note can
              start sharp and settle.

  type        Waveform index (sine, saw, square, triangle). A change takes
              effect at the next block without resetting phase.
*/

const FREQUENCY: usize = 0;
const DETUNE: usize = 1;
const TYPE: usize = 2;

pub struct OscNode {
    osc: OscillatorBlock,
}

impl OscNode {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            osc: OscillatorBlock::new(waveform),
        }
    }
}

impl GraphNode for OscNode {
    fn process(&mut self, _input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        let waveform = Waveform::from_index(params[TYPE]);
        if waveform != self.osc.waveform() {
            self.osc.set_waveform(waveform);
        }

        let frequency = params[FREQUENCY].max(0.0) * cents_to_ratio(params[DETUNE]);
        self.osc.render(out, frequency, ctx.sample_rate);
    }
}
