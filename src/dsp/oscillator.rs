use std::f32::consts::TAU;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Phase-accumulator oscillator
============================

`phase` runs from 0.0 to 1.0 and wraps once per cycle. Each sample it
advances by `frequency / sample_rate`; the waveform is a pure function of
phase:

    sine      sin(2π·phase)
    saw       2·phase - 1
    square    +1 for phase < 0.5, -1 otherwise
    triangle  1 - 4·|phase - 0.5|

No band-limiting is applied. Saw and square alias audibly above a few kHz,
which is acceptable for the demo renderer.
*/

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Saw,
    Square,
    Triangle,
}

impl Waveform {
    const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Saw,
        Waveform::Square,
        Waveform::Triangle,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "sine" => Some(Waveform::Sine),
            "sawtooth" | "saw" => Some(Waveform::Saw),
            "square" => Some(Waveform::Square),
            "triangle" => Some(Waveform::Triangle),
            _ => None,
        }
    }

    pub fn index(self) -> f32 {
        Self::ALL.iter().position(|w| *w == self).unwrap_or(0) as f32
    }

    pub fn from_index(index: f32) -> Self {
        let i = index.round().clamp(0.0, (Self::ALL.len() - 1) as f32) as usize;
        Self::ALL[i]
    }

    #[inline]
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (TAU * phase).sin(),
            Waveform::Saw => 2.0 * phase - 1.0,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

pub struct OscillatorBlock {
    waveform: Waveform,
    phase: f32,
}

impl OscillatorBlock {
    pub fn new(waveform: Waveform) -> Self {
        Self { waveform, phase: 0.0 }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub fn reset_phase(&mut self) {
        self.phase = 0.0;
    }

    #[inline]
    pub fn next_sample(&mut self, increment: f32) -> f32 {
        let value = self.waveform.sample(self.phase);
        self.phase += increment;
        self.phase -= self.phase.floor();
        value
    }

    pub fn render(&mut self, destination: &mut [f32], frequency: f32, sample_rate: f32) {
        let increment = (frequency / sample_rate).clamp(0.0, 0.5);
        for sample in destination.iter_mut() {
            *sample = self.next_sample(increment);
        }
    }
}
