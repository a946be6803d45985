use crate::MIN_TIME;

/*
ADSR Envelope
=============

A linear attack/decay/sustain/release generator. Voices use it three ways:
as the amplitude contour feeding a VCA, as a pitch contour in cents, and as
a filter contour in Hz. The generator itself only ever produces 0.0 to 1.0;
scaling into target units happens downstream.

Vocabulary
----------

  level       Current output value (0.0 to 1.0).

  stage       Idle, Attack, Decay, Sustain or Release.

  gate        note_on raises it and starts Attack. note_off lowers it and
              starts Release from whatever level the envelope is at.

  increment   Per-sample change of `level`, derived from the stage time and
              the sample rate:

                  increment = target_change / (time_seconds * sample_rate)


The Shape
---------

  Level
    1.0 ┐     ╱╲
        │    ╱  ╲___________
    S   │   ╱               ╲
        │  ╱                 ╲
    0.0 └─╱───────────────────╲──→ Time
         A    D       S        R


Retriggering
------------

A voice can receive a second attack while it is still sounding (a stolen
slot is never reused this way, but a live `trigger_attack` on a held voice
is). Attack continues from the current level instead of snapping to zero,
so a retrigger never produces a step in the output.

Shape changes (`set_shape`) take effect on the next sample. A shorter
release applied mid-release rescales the remaining ramp.
*/

/// The current stage of the envelope state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Stage times in seconds plus the sustain level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeShape {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl EnvelopeShape {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack: attack.max(MIN_TIME),
            decay: decay.max(MIN_TIME),
            sustain: sustain.clamp(0.0, 1.0),
            release: release.max(MIN_TIME),
        }
    }
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self::new(0.01, 0.1, 0.7, 0.5)
    }
}

pub struct Envelope {
    shape: EnvelopeShape,

    stage: EnvelopeState,
    level: f32,

    decay_start_level: f32,

    // Snapshotted at note_off so the ramp lands exactly on zero.
    release_start_level: f32,
    release_total_samples: u32,
    release_elapsed_samples: u32,
}

impl Envelope {
    pub fn new(shape: EnvelopeShape) -> Self {
        Self {
            shape,
            stage: EnvelopeState::Idle,
            level: 0.0,
            decay_start_level: 0.0,
            release_start_level: 0.0,
            release_total_samples: 1,
            release_elapsed_samples: 0,
        }
    }

    pub fn adsr(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self::new(EnvelopeShape::new(attack, decay, sustain, release))
    }

    pub fn shape(&self) -> EnvelopeShape {
        self.shape
    }

    pub fn set_shape(&mut self, shape: EnvelopeShape, sample_rate: f32) {
        let shape = EnvelopeShape::new(shape.attack, shape.decay, shape.sustain, shape.release);
        if self.stage == EnvelopeState::Release && shape.release != self.shape.release {
            let remaining = 1.0
                - self.release_elapsed_samples as f32 / self.release_total_samples as f32;
            self.release_start_level = self.level;
            self.release_total_samples =
                ((shape.release * remaining * sample_rate).round() as u32).max(1);
            self.release_elapsed_samples = 0;
        }
        self.shape = shape;
    }

    /// Gate high: start the attack phase from the current level.
    pub fn note_on(&mut self) {
        self.stage = EnvelopeState::Attack;
        self.release_elapsed_samples = 0;
    }

    /// Gate low: start the release phase from the current level.
    pub fn note_off(&mut self, sample_rate: f32) {
        if self.stage == EnvelopeState::Idle {
            return;
        }

        self.release_start_level = self.level;
        self.release_total_samples = (self.shape.release * sample_rate).round().max(1.0) as u32;
        self.release_elapsed_samples = 0;
        self.stage = EnvelopeState::Release;
    }

    /// Advance the envelope by one sample.
    pub fn next_sample(&mut self, sample_rate: f32) -> f32 {
        match self.stage {
            EnvelopeState::Idle => {
                self.level = 0.0;
            }

            EnvelopeState::Attack => {
                self.level += 1.0 / (self.shape.attack * sample_rate);

                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.decay_start_level = 1.0;
                    self.stage = EnvelopeState::Decay;
                }
            }

            EnvelopeState::Decay => {
                let target = self.shape.sustain;
                let total_drop = self.decay_start_level - target;
                self.level -= total_drop / (self.shape.decay * sample_rate);

                if self.level <= target {
                    self.level = target;
                    self.stage = EnvelopeState::Sustain;
                }
            }

            EnvelopeState::Sustain => {
                self.level = self.shape.sustain;
            }

            EnvelopeState::Release => {
                // level = start * (1 - elapsed/total)
                let progress =
                    self.release_elapsed_samples as f32 / self.release_total_samples as f32;
                self.level = (self.release_start_level * (1.0 - progress)).max(0.0);

                self.release_elapsed_samples = self.release_elapsed_samples.saturating_add(1);

                if self.release_elapsed_samples >= self.release_total_samples {
                    self.level = 0.0;
                    self.stage = EnvelopeState::Idle;
                }
            }
        }

        debug_assert!((0.0..=1.0).contains(&self.level));
        self.level
    }

    /// Render a block of envelope values into the buffer.
    pub fn render(&mut self, buffer: &mut [f32], sample_rate: f32) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample(sample_rate);
        }
    }

    /// Returns true if the envelope is producing output (not idle).
    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeState::Idle
    }

    pub fn reset(&mut self) {
        self.stage = EnvelopeState::Idle;
        self.level = 0.0;
        self.decay_start_level = 0.0;
        self.release_elapsed_samples = 0;
        self.release_start_level = 0.0;
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn state(&self) -> EnvelopeState {
        self.stage
    }
}
