//! Note number to frequency conversion.

/// MIDI note 69 is A4.
pub const A4_NOTE: f32 = 69.0;

/// Equal-tempered frequency of `note` relative to the A4 reference.
#[inline]
pub fn note_to_frequency(note: f32, a4_hz: f32) -> f32 {
    a4_hz * 2.0_f32.powf((note - A4_NOTE) / 12.0)
}
