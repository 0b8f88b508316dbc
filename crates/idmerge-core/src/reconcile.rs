use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::alignment::{align, AlignmentRequest};
use crate::mass::{peptide_mass, precursor_error, Tolerance, VALID_AA};
use crate::modification::{
    ModificationProfile, ModificationSpecificity, Termini, UNKNOWN_MODIFICATION,
};
use crate::peptide::{LabelConvention, PeptideAssumption, SearchEngine};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("modifications reported by search engine `{0}` cannot be interpreted")]
    UnsupportedSearchEngine(String),
    #[error("malformed modification label `{0}`")]
    MalformedLabel(String),
    #[error("modification index {index} is outside of the profile ({len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("invalid residue `{0}` in peptide sequence")]
    InvalidResidue(char),
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconcileParameters {
    /// Maximum difference (Da) between a reported modification mass and a profile entry
    pub mass_tolerance: f32,
    /// Precursor tolerance applied to the re-estimated peptide mass
    pub precursor_tol: Tolerance,
    /// Number of unknown modifications an assumption may carry and still be retained
    pub max_unknown_modifications: usize,
}

impl Default for ReconcileParameters {
    fn default() -> Self {
        ReconcileParameters {
            mass_tolerance: 0.01,
            precursor_tol: Tolerance::Ppm(-10.0, 10.0),
            max_unknown_modifications: 0,
        }
    }
}

/// Where a variable modification match ended up
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Assignment {
    /// Profile entry `entry` at 1-based `site`
    Canonical { entry: usize, site: usize },
    /// Unknown modification left at its reported `site`
    Unknown { site: usize },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Validation {
    Retained { ppm: f32, da: f32 },
    PrecursorMismatch { ppm: f32, da: f32 },
    TooManyUnknown(usize),
}

impl Validation {
    pub fn is_retained(&self) -> bool {
        matches!(self, Validation::Retained { .. })
    }
}

/// What a reported label means before any site is considered
#[derive(Clone, Debug, PartialEq)]
enum Label {
    Unknown,
    /// Names a fixed profile entry, which is applied by the profile itself
    Fixed,
    /// Candidate profile entries, and the residue token the engine reported
    /// them on, if any
    Candidates(BTreeSet<usize>, Option<Vec<u8>>),
}

/// Candidate profile entries of one peptide, per residue position and per
/// modification match. Entries are profile indices, so iteration order is
/// profile order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CandidateSiteMap {
    pub expected: BTreeMap<usize, BTreeSet<usize>>,
    pub per_match: Vec<BTreeSet<usize>>,
    /// Positions the residue token of each match allows; `None` allows all
    pub reported: Vec<Option<BTreeSet<usize>>>,
}

impl CandidateSiteMap {
    pub fn build(
        profile: &ModificationProfile,
        candidates: Vec<(BTreeSet<usize>, Option<Vec<u8>>)>,
        sequence: &[u8],
        termini: Termini,
    ) -> Self {
        let mut expected: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        let mut per_match = Vec::with_capacity(candidates.len());
        let mut reported = Vec::with_capacity(candidates.len());
        for (entries, residues) in candidates {
            let positions = residues.map(|r| token_positions(&r, sequence));
            for &entry in &entries {
                for position in 1..=sequence.len() {
                    let allowed = positions.as_ref().map_or(true, |p| p.contains(&position));
                    if allowed && profile.is_compatible(entry, position, sequence, termini) {
                        expected.entry(position).or_default().insert(entry);
                    }
                }
            }
            per_match.push(entries);
            reported.push(positions);
        }
        CandidateSiteMap {
            expected,
            per_match,
            reported,
        }
    }

    fn admits(&self, position: usize, index: usize) -> bool {
        self.reported[index]
            .as_ref()
            .map_or(true, |positions| positions.contains(&position))
    }

    /// First entry valid both at `position` and for match `index`
    fn first_shared(&self, position: usize, index: usize) -> Option<usize> {
        if !self.admits(position, index) {
            return None;
        }
        self.expected
            .get(&position)?
            .intersection(&self.per_match[index])
            .next()
            .copied()
    }
}

/// Converts search engine modification labels into canonical profile names
/// and re-validates the peptide against its precursor.
pub struct Reconciler<'a> {
    profile: &'a ModificationProfile,
    parameters: ReconcileParameters,
}

impl<'a> Reconciler<'a> {
    pub fn new(profile: &'a ModificationProfile, parameters: ReconcileParameters) -> Self {
        Reconciler {
            profile,
            parameters,
        }
    }

    pub fn profile(&self) -> &ModificationProfile {
        self.profile
    }

    pub fn parameters(&self) -> &ReconcileParameters {
        &self.parameters
    }

    fn label(&self, engine: &SearchEngine, label: &str) -> Result<Label, ReconcileError> {
        if label == UNKNOWN_MODIFICATION {
            return Ok(Label::Unknown);
        }
        if let Some(entry) = self.profile.position(label) {
            return Ok(self.entry_label(entry));
        }

        let convention = engine
            .convention()
            .ok_or_else(|| ReconcileError::UnsupportedSearchEngine(engine.to_string()))?;

        match convention {
            LabelConvention::ProfileIndex => {
                let index = label
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ReconcileError::MalformedLabel(label.into()))?;
                if index >= self.profile.entries().len() {
                    return Err(ReconcileError::IndexOutOfRange {
                        index,
                        len: self.profile.entries().len(),
                    });
                }
                Ok(self.entry_label(index))
            }
            LabelConvention::MassToken => {
                let (mass, residues) = parse_mass_token(label)?;
                let candidates = self
                    .profile
                    .variable_by_mass(mass, self.parameters.mass_tolerance)
                    .filter(|&entry| match &residues {
                        Some(residues) => self.profile.entries()[entry]
                            .specificities
                            .iter()
                            .any(|s| reported_at(s, residues)),
                        None => true,
                    })
                    .collect();
                Ok(Label::Candidates(candidates, residues))
            }
            LabelConvention::CanonicalName => Ok(Label::Candidates(BTreeSet::new(), None)),
        }
    }

    fn entry_label(&self, entry: usize) -> Label {
        match self.profile.is_variable(entry) {
            true => Label::Candidates(BTreeSet::from([entry]), None),
            false => Label::Fixed,
        }
    }

    /// Rewrite every variable modification of `assumption` to a canonical name
    /// on a compatible site, or to the unknown sentinel.
    ///
    /// Returns the assignment of each remaining variable modification, in
    /// report order. Labels naming a fixed profile entry are turned into
    /// non-variable matches and do not get an assignment.
    pub fn reconcile(
        &self,
        assumption: &mut PeptideAssumption,
        termini: Termini,
    ) -> Result<Vec<Assignment>, ReconcileError> {
        let mut assigned: Vec<Option<Assignment>> = vec![None; assumption.modifications.len()];
        let mut fixed = Vec::new();
        // modification index of each candidate set
        let mut owners = Vec::new();
        let mut candidates = Vec::new();

        for (idx, m) in assumption.modifications.iter().enumerate() {
            if !m.variable {
                continue;
            }
            match self.label(&assumption.engine, &m.label)? {
                Label::Unknown => assigned[idx] = Some(Assignment::Unknown { site: m.site }),
                Label::Fixed => fixed.push(idx),
                Label::Candidates(entries, residues) => {
                    owners.push(idx);
                    candidates.push((entries, residues));
                }
            }
        }

        if !owners.is_empty() {
            let map = CandidateSiteMap::build(
                self.profile,
                candidates,
                assumption.sequence.as_bytes(),
                termini,
            );
            let sites = owners
                .iter()
                .map(|&idx| assumption.modifications[idx].site)
                .collect::<Vec<_>>();
            for (slot, assignment) in self.assign(&map, &sites).into_iter().enumerate() {
                assigned[owners[slot]] = Some(assignment);
            }
        }

        for idx in fixed {
            assumption.modifications[idx].variable = false;
        }

        let mut assignments = Vec::new();
        for (m, assignment) in assumption.modifications.iter_mut().zip(assigned) {
            let assignment = match assignment {
                Some(assignment) => assignment,
                None => continue,
            };
            match assignment {
                Assignment::Canonical { entry, site } => {
                    m.label = self.profile.entries()[entry].name.clone();
                    m.site = site;
                }
                Assignment::Unknown { site } => {
                    m.label = UNKNOWN_MODIFICATION.into();
                    m.site = site;
                }
            }
            assignments.push(assignment);
        }
        Ok(assignments)
    }

    /// Direct assignment on reported sites, then alignment of the leftovers
    fn assign(&self, map: &CandidateSiteMap, sites: &[usize]) -> Vec<Assignment> {
        let mut result: Vec<Option<Assignment>> = vec![None; sites.len()];
        let mut occupied = BTreeSet::new();

        for (idx, &site) in sites.iter().enumerate() {
            if occupied.contains(&site) {
                continue;
            }
            if let Some(entry) = map.first_shared(site, idx) {
                occupied.insert(site);
                result[idx] = Some(Assignment::Canonical { entry, site });
            }
        }

        let unresolved = (0..sites.len())
            .filter(|&idx| result[idx].is_none())
            .collect::<Vec<_>>();
        if unresolved.is_empty() {
            return result.into_iter().flatten().collect();
        }

        let requests = unresolved
            .iter()
            .map(|&idx| {
                let targets = map
                    .expected
                    .keys()
                    .filter(|&&position| {
                        !occupied.contains(&position) && map.first_shared(position, idx).is_some()
                    })
                    .copied()
                    .collect();
                AlignmentRequest::new(sites[idx], targets)
            })
            .collect::<Vec<_>>();

        for (&idx, corrected) in unresolved.iter().zip(align(&requests)) {
            let assignment = corrected
                .and_then(|site| {
                    map.first_shared(site, idx)
                        .map(|entry| Assignment::Canonical { entry, site })
                })
                .unwrap_or(Assignment::Unknown { site: sites[idx] });
            if let Assignment::Canonical { site, .. } = assignment {
                if site != sites[idx] {
                    log::trace!("modification moved from site {} to {}", sites[idx], site);
                }
            }
            result[idx] = Some(assignment);
        }

        result.into_iter().flatten().collect()
    }

    /// Theoretical neutral mass: residues, water, fixed modifications and
    /// assigned variable modifications. Unknown modifications weigh nothing.
    pub fn theoretical_mass(
        &self,
        assumption: &PeptideAssumption,
        termini: Termini,
    ) -> Result<f32, ReconcileError> {
        let residues = peptide_mass(&assumption.sequence).map_err(ReconcileError::InvalidResidue)?;
        let fixed = self
            .profile
            .fixed_mass(assumption.sequence.as_bytes(), termini);
        let variable: f32 = assumption
            .variable_modifications()
            .filter_map(|m| self.profile.position(&m.label))
            .map(|entry| self.profile.entries()[entry].mass)
            .sum();
        Ok(residues + fixed + variable)
    }

    /// Check a reconciled assumption against the observed precursor neutral mass
    pub fn validate(
        &self,
        assumption: &mut PeptideAssumption,
        termini: Termini,
        observed: f32,
    ) -> Result<Validation, ReconcileError> {
        let mass = self.theoretical_mass(assumption, termini)?;
        assumption.mass = Some(mass);

        let unknown = assumption
            .variable_modifications()
            .filter(|m| m.label == UNKNOWN_MODIFICATION)
            .count();
        if unknown > self.parameters.max_unknown_modifications {
            return Ok(Validation::TooManyUnknown(unknown));
        }

        let (ppm, da) = precursor_error(mass, observed);
        match self.parameters.precursor_tol.contains(mass, observed) {
            true => Ok(Validation::Retained { ppm, da }),
            false => Ok(Validation::PrecursorMismatch { ppm, da }),
        }
    }

    /// Reconcile modifications, re-estimate the mass and validate it
    pub fn process(
        &self,
        assumption: &mut PeptideAssumption,
        termini: Termini,
        observed: f32,
    ) -> Result<Validation, ReconcileError> {
        if assumption.variable_modifications().next().is_some() {
            self.reconcile(assumption, termini)?;
        }
        self.validate(assumption, termini, observed)
    }
}

/// Parse `mass` or `mass@residues`. Residues may include the terminal
/// markers `^`, `$`, `[` and `]`.
fn parse_mass_token(label: &str) -> Result<(f32, Option<Vec<u8>>), ReconcileError> {
    let malformed = || ReconcileError::MalformedLabel(label.into());
    let (mass, residues) = match label.split_once('@') {
        Some((mass, residues)) => (mass, Some(residues.trim())),
        None => (label, None),
    };
    let mass = mass.trim().parse::<f32>().map_err(|_| malformed())?;
    if !mass.is_finite() {
        return Err(malformed());
    }
    let residues = match residues {
        Some(residues) => {
            let residues = residues.to_ascii_uppercase().into_bytes();
            let valid = !residues.is_empty()
                && residues
                    .iter()
                    .all(|r| VALID_AA.contains(r) || b"^$[]".contains(r));
            if !valid {
                return Err(malformed());
            }
            Some(residues)
        }
        None => None,
    };
    Ok((mass, residues))
}

/// 1-based positions of `sequence` named by a residue token. Terminal markers
/// name the first or last residue.
fn token_positions(residues: &[u8], sequence: &[u8]) -> BTreeSet<usize> {
    let n_term = residues.iter().any(|r| b"^[".contains(r));
    let c_term = residues.iter().any(|r| b"$]".contains(r));
    (1..=sequence.len())
        .filter(|&position| {
            residues.contains(&sequence[position - 1])
                || (n_term && position == 1)
                || (c_term && position == sequence.len())
        })
        .collect()
}

/// Could a modification with specificity `spec` have been reported on `residues`?
fn reported_at(spec: &ModificationSpecificity, residues: &[u8]) -> bool {
    use ModificationSpecificity::*;
    let markers: &[u8] = match spec {
        Residue(r) => return residues.contains(r),
        PeptideN(_) | ProteinN(_) => b"^[",
        PeptideC(_) | ProteinC(_) => b"$]",
    };
    match spec.residue() {
        Some(r) if residues.contains(&r) => true,
        None => true,
        Some(_) => markers.iter().any(|m| residues.contains(m)),
    }
}
