use crate::MAX_DELAY_SAMPLES;

/// Circular feedback delay line. The buffer is allocated once at
/// construction and never resized.
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub fn new() -> Self {
        Self {
            buffer: vec![0.0; MAX_DELAY_SAMPLES],
            write_pos: 0,
        }
    }

    /// Write `sample` plus the fed-back tap and return the tap.
    pub fn next_sample(&mut self, sample: f32, delay_samples: usize, feedback: f32) -> f32 {
        let delay_samples = delay_samples.clamp(1, MAX_DELAY_SAMPLES - 1);
        let read_pos = (self.write_pos + MAX_DELAY_SAMPLES - delay_samples) % MAX_DELAY_SAMPLES;
        let delayed = self.buffer[read_pos];

        self.buffer[self.write_pos] = sample + delayed * feedback.clamp(0.0, 0.99);
        self.write_pos = (self.write_pos + 1) % MAX_DELAY_SAMPLES;

        delayed
    }

    /// Push one sample without feedback.
    pub fn write(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % MAX_DELAY_SAMPLES;
    }

    /// Linearly interpolated tap `delay_samples` behind the next write.
    pub fn read_interpolated(&self, delay_samples: f32) -> f32 {
        let delay = delay_samples.clamp(1.0, (MAX_DELAY_SAMPLES - 2) as f32);
        let whole = delay.floor() as usize;
        let frac = delay - whole as f32;
        let newer = self.buffer[(self.write_pos + MAX_DELAY_SAMPLES - whole) % MAX_DELAY_SAMPLES];
        let older = self.buffer[(self.write_pos + MAX_DELAY_SAMPLES - whole - 1) % MAX_DELAY_SAMPLES];
        newer + (older - newer) * frac
    }

    /// In-place wet/dry render.
    pub fn render(&mut self, buffer: &mut [f32], delay_samples: usize, feedback: f32, wet: f32) {
        let wet = wet.clamp(0.0, 1.0);
        for sample in buffer.iter_mut() {
            let delayed = self.next_sample(*sample, delay_samples, feedback);
            *sample = *sample * (1.0 - wet) + delayed * wet;
        }
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_comes_back_after_delay() {
        let mut line = DelayLine::new();
        let mut buffer = vec![0.0; 32];
        buffer[0] = 1.0;
        line.render(&mut buffer, 10, 0.0, 1.0);

        assert_eq!(buffer[0], 0.0);
        assert_eq!(buffer[10], 1.0);
    }

    #[test]
    fn feedback_repeats_decay() {
        let mut line = DelayLine::new();
        let mut buffer = vec![0.0; 32];
        buffer[0] = 1.0;
        line.render(&mut buffer, 10, 0.5, 1.0);

        assert!((buffer[20] - 0.5).abs() < 1e-6);
        assert!((buffer[30] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn fractional_tap_interpolates() {
        let mut line = DelayLine::new();
        for sample in [1.0, 2.0, 3.0, 4.0] {
            line.write(sample);
        }

        assert_eq!(line.read_interpolated(1.0), 4.0);
        assert_eq!(line.read_interpolated(2.0), 3.0);
        assert!((line.read_interpolated(1.5) - 3.5).abs() < 1e-6);
    }

    #[test]
    fn zero_wet_is_dry() {
        let mut line = DelayLine::new();
        let mut buffer = vec![0.25; 16];
        line.render(&mut buffer, 4, 0.3, 0.0);
        assert!(buffer.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }
}
