use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Run-wide precursor statistics gathered while importing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportMetrics {
    /// Every precursor charge seen
    pub charges: BTreeSet<u8>,
    /// Largest absolute precursor error of a retained assumption, in ppm
    pub max_ppm_error: f32,
    /// Largest absolute precursor error of a retained assumption, in Da
    pub max_da_error: f32,
}

impl ImportMetrics {
    pub fn add_charges<I: IntoIterator<Item = u8>>(&mut self, charges: I) {
        self.charges.extend(charges);
    }

    pub fn observe(&mut self, ppm_error: f32, da_error: f32) {
        self.max_ppm_error = self.max_ppm_error.max(ppm_error.abs());
        self.max_da_error = self.max_da_error.max(da_error.abs());
    }

    /// Fold the metrics of another run into these
    pub fn merge(&mut self, other: &ImportMetrics) {
        self.add_charges(other.charges.iter().copied());
        self.observe(other.max_ppm_error, other.max_da_error);
    }
}
