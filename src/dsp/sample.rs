//! One-shot sample playback.

use std::sync::Arc;

/// Decoded mono audio shared between the loader and any number of players.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub frames: Vec<f32>,
    pub sample_rate: f32,
}

impl SampleBuffer {
    pub fn new(frames: Vec<f32>, sample_rate: f32) -> Self {
        Self { frames, sample_rate }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.sample_rate as f64
    }
}

/// Linear-interpolating reader over a shared `SampleBuffer`.
pub struct SamplePlayer {
    sample: Arc<SampleBuffer>,
    position: f64,
    playing: bool,
}

impl SamplePlayer {
    pub fn new(sample: Arc<SampleBuffer>) -> Self {
        Self {
            sample,
            position: 0.0,
            playing: false,
        }
    }

    pub fn start(&mut self) {
        self.position = 0.0;
        self.playing = true;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// `rate` is the playback-speed ratio; 1.0 plays at the recorded pitch.
    pub fn render(&mut self, out: &mut [f32], rate: f32, output_rate: f32) {
        let frames = &self.sample.frames;
        let step = rate.max(0.0) as f64 * self.sample.sample_rate as f64 / output_rate as f64;

        for sample in out.iter_mut() {
            if !self.playing {
                *sample = 0.0;
                continue;
            }
            let index = self.position as usize;
            if index + 1 >= frames.len() {
                self.playing = false;
                *sample = frames.get(index).copied().unwrap_or(0.0);
                continue;
            }
            let frac = (self.position - index as f64) as f32;
            *sample = frames[index] + (frames[index + 1] - frames[index]) * frac;
            self.position += step;
        }
    }
}
