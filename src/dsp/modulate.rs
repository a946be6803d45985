//! Parameter modulation primitives.

/*
Parameter Modulation
====================

Every modulatable parameter in the render graph is evaluated once per block:

    effective = base + Σ block_average(source)

`base` is whatever the control side last set or ramped the parameter to.
Each connected modulation source contributes the average of its output
over the block. Sources are expected to already be scaled into the target's
units (cents for detune, Hz for cutoff); envelopes and LFOs do that with a
gain stage before the parameter connection.

Block-rate vs sample-rate
-------------------------

Block-rate evaluation recomputes filter coefficients and oscillator
increments once per block instead of every sample. At 48 kHz with 128-frame
blocks that is 375 updates per second, well above the rate of any envelope
or LFO the voice components produce.

Nodes that multiply audio by a modulated value (the VCA) interpolate from the
previous block's value to the current one so the stepping is not audible.

Clamping
--------

Modulation can push a value outside its valid range. The target node clamps:
the filter keeps its cutoff above 20 Hz and below Nyquist, and gain never
goes negative.
*/

/// Calculate the modulated parameter value.
///
/// # Arguments
/// * `base_value` - The parameter's center/default value
/// * `modulator` - The control signal value (typically -1.0 to +1.0)
/// * `depth` - How much the parameter should vary
///
/// # Returns
/// The modulated value: base + (modulator × depth)
#[inline]
pub fn apply_modulation(base_value: f32, modulator: f32, depth: f32) -> f32 {
    base_value + (modulator * depth)
}

/// Calculate the average of a modulator signal over a block.
///
/// Used for block-rate modulation: we need one value to represent
/// the entire block's worth of modulator samples.
#[inline]
pub fn block_average(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}

/// Frequency ratio for an offset in cents (1200 cents = one octave).
#[inline]
pub fn cents_to_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}

/// Linear interpolation across a block, from `from` at the first sample
/// towards `to` at the last.
#[inline]
pub fn interpolate(from: f32, to: f32, index: usize, len: usize) -> f32 {
    if len <= 1 {
        return to;
    }
    from + (to - from) * (index as f32 / (len - 1) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_modulation_center() {
        // Modulator at 0 should give base value
        assert_eq!(apply_modulation(1000.0, 0.0, 500.0), 1000.0);
    }

    #[test]
    fn test_apply_modulation_positive() {
        // Modulator at +1 should add depth
        assert_eq!(apply_modulation(1000.0, 1.0, 500.0), 1500.0);
    }

    #[test]
    fn test_apply_modulation_negative() {
        // Modulator at -1 should subtract depth
        assert_eq!(apply_modulation(1000.0, -1.0, 500.0), 500.0);
    }

    #[test]
    fn test_apply_modulation_partial() {
        // Modulator at 0.5 should add half depth
        assert_eq!(apply_modulation(1000.0, 0.5, 500.0), 1250.0);
    }

    #[test]
    fn test_block_average() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(block_average(&samples), 2.5);
    }

    #[test]
    fn test_block_average_empty() {
        let samples: [f32; 0] = [];
        assert_eq!(block_average(&samples), 0.0);
    }

    #[test]
    fn test_block_average_single() {
        let samples = [0.5];
        assert_eq!(block_average(&samples), 0.5);
    }

    #[test]
    fn test_cents_to_ratio_octave() {
        assert!((cents_to_ratio(1200.0) - 2.0).abs() < 1e-6);
        assert!((cents_to_ratio(0.0) - 1.0).abs() < 1e-6);
        assert!((cents_to_ratio(-1200.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_interpolate_endpoints() {
        assert_eq!(interpolate(0.0, 1.0, 0, 5), 0.0);
        assert_eq!(interpolate(0.0, 1.0, 4, 5), 1.0);
        assert_eq!(interpolate(0.0, 1.0, 2, 5), 0.5);
        assert_eq!(interpolate(0.0, 1.0, 0, 1), 1.0);
    }
}
