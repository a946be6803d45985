//! Waveshaping distortion.
//!
//! A shaper runs every sample through a transfer curve after a gain stage:
//!
//!   out = f(in * drive)
//!
//! At drive 1 most curves stay near their linear region. Pushing the drive
//! drives the signal into the bend of the curve, which adds harmonics.
//!
//!   soft      x / (1 + |x|)       smooth saturation, peaks approach ±1
//!   hard      clamp(x, -1, 1)     buzzy, odd harmonics
//!   foldback  reflects past ±1    metallic, dense harmonics
//!
//! Presets describe the effect with an `amount` from 0 to 1. `drive_for`
//! maps it onto the drive range.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Drive at `amount == 1`.
pub const MAX_DRIVE: f32 = 20.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistortionCurve {
    Soft,
    Hard,
    Foldback,
}

impl DistortionCurve {
    const ALL: [DistortionCurve; 3] = [
        DistortionCurve::Soft,
        DistortionCurve::Hard,
        DistortionCurve::Foldback,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "soft" => Some(DistortionCurve::Soft),
            "hard" => Some(DistortionCurve::Hard),
            "foldback" | "fold" => Some(DistortionCurve::Foldback),
            _ => None,
        }
    }

    pub fn index(self) -> f32 {
        Self::ALL.iter().position(|c| *c == self).unwrap_or(0) as f32
    }

    pub fn from_index(index: f32) -> Self {
        let i = index.round().clamp(0.0, (Self::ALL.len() - 1) as f32) as usize;
        Self::ALL[i]
    }

    #[inline]
    pub fn shape(self, sample: f32, drive: f32) -> f32 {
        let x = sample * drive;
        match self {
            DistortionCurve::Soft => x / (1.0 + x.abs()),
            DistortionCurve::Hard => x.clamp(-1.0, 1.0),
            DistortionCurve::Foldback => fold(x),
        }
    }
}

/// Reflect `x` back into [-1, 1]. Closed form, so any drive terminates.
#[inline]
fn fold(x: f32) -> f32 {
    if (-1.0..=1.0).contains(&x) {
        return x;
    }
    // Triangle wave of period 4 through the origin.
    let t = (x + 1.0).rem_euclid(4.0);
    if t < 2.0 {
        t - 1.0
    } else {
        3.0 - t
    }
}

/// Map a 0..=1 amount to a drive of 1..=`MAX_DRIVE`.
pub fn drive_for(amount: f32) -> f32 {
    1.0 + amount.clamp(0.0, 1.0) * (MAX_DRIVE - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_curve_saturates_towards_one() {
        let quiet = DistortionCurve::Soft.shape(0.1, 1.0);
        assert!((quiet - 0.1 / 1.1).abs() < 1e-6);

        let loud = DistortionCurve::Soft.shape(1.0, MAX_DRIVE);
        assert!(loud > 0.9 && loud < 1.0);
    }

    #[test]
    fn hard_curve_clamps() {
        assert!((DistortionCurve::Hard.shape(0.3, 1.0) - 0.3).abs() < 1e-6);
        assert_eq!(DistortionCurve::Hard.shape(0.8, 2.0), 1.0);
        assert_eq!(DistortionCurve::Hard.shape(-0.8, 2.0), -1.0);
    }

    #[test]
    fn foldback_reflects_past_the_rails() {
        assert!((DistortionCurve::Foldback.shape(0.3, 1.0) - 0.3).abs() < 1e-6);
        assert!((DistortionCurve::Foldback.shape(0.7, 2.0) - 0.6).abs() < 1e-6);
        assert!((DistortionCurve::Foldback.shape(-0.7, 2.0) + 0.6).abs() < 1e-6);
        for x in [3.7f32, -12.2, 150.0] {
            let y = DistortionCurve::Foldback.shape(x, 1.0);
            assert!(y.is_finite() && y.abs() <= 1.0 + 1e-5, "{x} -> {y}");
        }
    }

    #[test]
    fn amount_spans_the_drive_range() {
        assert_eq!(drive_for(0.0), 1.0);
        assert_eq!(drive_for(1.0), MAX_DRIVE);
        assert_eq!(drive_for(4.0), MAX_DRIVE);
    }

    #[test]
    fn index_round_trips_through_params() {
        for curve in DistortionCurve::ALL {
            assert_eq!(DistortionCurve::from_index(curve.index()), curve);
        }
        assert_eq!(DistortionCurve::parse("fold"), Some(DistortionCurve::Foldback));
        assert_eq!(DistortionCurve::parse("fuzz"), None);
    }
}
