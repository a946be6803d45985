use crate::dsp::oscillator::{OscillatorBlock, Waveform};
use crate::graph::node::{GraphNode, RenderCtx};

/*
LFO (Low Frequency Oscillator)
==============================

A free-running bipolar (-1.0 to +1.0) oscillator at control rate. Depth is
applied by a gain stage after the LFO, so the same node can drive a filter
cutoff in Hz or a detune in cents.

FREE-RUNNING: phase continues across notes (the default).
RETRIGGER:    note_on resets phase, so every note gets the same sweep.
*/

const RATE: usize = 0;
const TYPE: usize = 1;

pub struct LfoNode {
    osc: OscillatorBlock,
    retrigger: bool,
}

impl LfoNode {
    pub fn new(waveform: Waveform, retrigger: bool) -> Self {
        Self {
            osc: OscillatorBlock::new(waveform),
            retrigger,
        }
    }
}

impl GraphNode for LfoNode {
    fn process(&mut self, _input: &[f32], out: &mut [f32], params: &[f32], ctx: &RenderCtx) {
        let waveform = Waveform::from_index(params[TYPE]);
        if waveform != self.osc.waveform() {
            self.osc.set_waveform(waveform);
        }
        self.osc.render(out, params[RATE].max(0.0), ctx.sample_rate);
    }

    fn note_on(&mut self, _velocity: f32) {
        if self.retrigger {
            self.osc.reset_phase();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: RenderCtx = RenderCtx {
        sample_rate: 48_000.0,
        time: 0.0,
    };

    #[test]
    fn test_lfo_sine_output_range() {
        let mut lfo = LfoNode::new(Waveform::Sine, false);
        let mut buffer = vec![0.0; 9600];
        lfo.process(&[], &mut buffer, &[5.0, 0.0], &CTX);

        let max = buffer.iter().cloned().fold(f32::MIN, f32::max);
        let min = buffer.iter().cloned().fold(f32::MAX, f32::min);
        assert!(max > 0.99 && min < -0.99, "min {min} max {max}");
    }

    #[test]
    fn test_retrigger_resets_phase() {
        let mut lfo = LfoNode::new(Waveform::Saw, true);
        let mut buffer = vec![0.0; 100];
        lfo.process(&[], &mut buffer, &[5.0, Waveform::Saw.index()], &CTX);

        lfo.note_on(1.0);
        lfo.process(&[], &mut buffer, &[5.0, Waveform::Saw.index()], &CTX);
        assert_eq!(buffer[0], -1.0);
    }

    #[test]
    fn test_free_running_keeps_phase() {
        let mut lfo = LfoNode::new(Waveform::Saw, false);
        let mut buffer = vec![0.0; 100];
        lfo.process(&[], &mut buffer, &[5.0, Waveform::Saw.index()], &CTX);

        lfo.note_on(1.0);
        lfo.process(&[], &mut buffer, &[5.0, Waveform::Saw.index()], &CTX);
        assert!(buffer[0] > -1.0);
    }
}
