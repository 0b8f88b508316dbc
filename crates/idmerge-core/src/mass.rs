use std::ops::Mul;

use serde::{Deserialize, Serialize};

pub const H2O: f32 = 18.010565;
pub const PROTON: f32 = 1.0072764;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
pub enum Tolerance {
    Ppm(f32, f32),
    Da(f32, f32),
}

impl Tolerance {
    /// Compute the (`lower`, `upper`) window (in Da) for for a monoisotopic
    /// mass and a given tolerance
    pub fn bounds(&self, center: f32) -> (f32, f32) {
        match self {
            Tolerance::Ppm(lo, hi) => {
                let delta_lo = center * lo / 1_000_000.0;
                let delta_hi = center * hi / 1_000_000.0;
                (center + delta_lo, center + delta_hi)
            }
            Tolerance::Da(lo, hi) => (center + lo, center + hi),
        }
    }

    pub fn contains(&self, center: f32, rhs: f32) -> bool {
        let (lo, hi) = self.bounds(center);
        rhs >= lo && rhs <= hi
    }

    /// Symmetric tolerance of `value` in the same unit as `self`
    pub fn symmetric(&self, value: f32) -> Self {
        match self {
            Tolerance::Ppm(_, _) => Tolerance::Ppm(-value.abs(), value.abs()),
            Tolerance::Da(_, _) => Tolerance::Da(-value.abs(), value.abs()),
        }
    }

    pub fn ppm_to_delta_mass(center: f32, ppm: f32) -> f32 {
        ppm * center / 1_000_000.0
    }
}

impl Mul<f32> for Tolerance {
    type Output = Tolerance;

    fn mul(self, rhs: f32) -> Self::Output {
        match self {
            Tolerance::Ppm(lo, hi) => Tolerance::Ppm(lo * rhs, hi * rhs),
            Tolerance::Da(lo, hi) => Tolerance::Da(lo * rhs, hi * rhs),
        }
    }
}

/// Neutral (uncharged) mass of a precursor observed at `mz` with `charge`
pub fn neutral_mass(mz: f32, charge: u8) -> f32 {
    (mz - PROTON) * charge as f32
}

/// Signed precursor error of an `observed` neutral mass against a
/// `theoretical` one, as (ppm, Da)
pub fn precursor_error(theoretical: f32, observed: f32) -> (f32, f32) {
    let da = observed - theoretical;
    (da * 1_000_000.0 / theoretical, da)
}

pub trait Mass {
    fn monoisotopic(&self) -> f32;
}

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

impl Mass for u8 {
    fn monoisotopic(&self) -> f32 {
        match self {
            b'A' => 71.03711,
            b'R' => 156.1011,
            b'N' => 114.04293,
            b'D' => 115.02694,
            b'C' => 103.00919,
            b'E' => 129.04259,
            b'Q' => 128.05858,
            b'G' => 57.02146,
            b'H' => 137.05891,
            b'I' => 113.08406,
            b'L' => 113.08406,
            b'K' => 128.09496,
            b'M' => 131.0405,
            b'F' => 147.0684,
            b'P' => 97.05276,
            b'S' => 87.03203,
            b'T' => 101.04768,
            b'W' => 186.07931,
            b'Y' => 163.06333,
            b'V' => 99.06841,
            b'U' => 150.95363,
            b'O' => 237.14773,
            _ => unreachable!("BUG: invalid amino acid {}", *self as char),
        }
    }
}

/// Unmodified monoisotopic mass of a peptide sequence, or the first residue
/// that is not a valid amino acid
pub fn peptide_mass(sequence: &str) -> Result<f32, char> {
    sequence.bytes().try_fold(H2O, |acc, aa| {
        if VALID_AA.contains(&aa) {
            Ok(acc + aa.monoisotopic())
        } else {
            Err(aa as char)
        }
    })
}
