use fnv::FnvHashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::mass::VALID_AA;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Hash)]
/// A peptide produced by in silico digestion of a protein
pub struct Digest {
    /// Cleaved peptide sequence
    pub sequence: String,
    /// Protein accession
    pub protein: Arc<String>,
    /// Missed cleavages
    pub missed_cleavages: u8,
    /// Where in the protein this peptide was cleaved from
    pub position: Position,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
pub enum Position {
    Nterm,
    Cterm,
    Full,
    #[default]
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEnzyme {
    #[error("enzyme cleavage sequence contains non-amino acid characters: {0}")]
    Cleavage(String),
    #[error("enzyme cleavage restriction is a non-amino acid character: {0}")]
    Restriction(char),
    #[error("minimum peptide length {0} exceeds maximum length {1}")]
    Length(usize, usize),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EnzymeBuilder {
    /// How many missed cleavages a retained peptide may carry
    pub missed_cleavages: Option<u8>,
    /// Minimum retained peptide length
    pub min_len: Option<usize>,
    /// Maximum retained peptide length
    pub max_len: Option<usize>,
    pub cleave_at: Option<String>,
    pub restrict: Option<char>,
    pub c_terminal: Option<bool>,
}

impl Default for EnzymeBuilder {
    fn default() -> Self {
        Self {
            missed_cleavages: Some(2),
            min_len: Some(6),
            max_len: Some(30),
            cleave_at: Some("KR".into()),
            restrict: Some('P'),
            c_terminal: Some(true),
        }
    }
}

impl TryFrom<EnzymeBuilder> for EnzymeParameters {
    type Error = InvalidEnzyme;

    fn try_from(en: EnzymeBuilder) -> Result<Self, Self::Error> {
        let min_len = en.min_len.unwrap_or(6);
        let max_len = en.max_len.unwrap_or(30);
        if min_len > max_len {
            return Err(InvalidEnzyme::Length(min_len, max_len));
        }
        Ok(EnzymeParameters {
            missed_cleavages: en.missed_cleavages.unwrap_or(2),
            min_len,
            max_len,
            enzyme: Enzyme::new(
                &en.cleave_at.unwrap_or_else(|| "KR".into()),
                en.restrict,
                en.c_terminal.unwrap_or(true),
            )?,
        })
    }
}

pub struct EnzymeParameters {
    /// Number of missed cleavages to produce
    pub missed_cleavages: u8,
    /// Inclusive
    pub min_len: usize,
    /// Inclusive
    pub max_len: usize,
    pub enzyme: Option<Enzyme>,
}

pub struct Enzyme {
    // Skip cleaving if the site is followed matching this AA
    pub skip_suffix: Option<char>,
    // Regex for matching cleavage sites
    regex: Regex,
    // Cleave at c-terminal?
    pub c_terminal: bool,
}

impl Enzyme {
    /// Returns `Ok(None)` for a non-specific enzyme (empty cleavage string)
    pub fn new(
        cleave: &str,
        skip_suffix: Option<char>,
        c_terminal: bool,
    ) -> Result<Option<Self>, InvalidEnzyme> {
        if !(cleave.chars().all(|x| VALID_AA.contains(&(x as u8))) || cleave == "$") {
            return Err(InvalidEnzyme::Cleavage(cleave.into()));
        }
        if let Some(skip) = skip_suffix.filter(|x| !VALID_AA.contains(&(*x as u8))) {
            return Err(InvalidEnzyme::Restriction(skip));
        }

        let pattern = match cleave {
            "" => return Ok(None),
            "$" => "$".to_string(),
            _ => format!("[{}]", cleave),
        };
        let regex = Regex::new(&pattern).map_err(|_| InvalidEnzyme::Cleavage(cleave.into()))?;
        Ok(Some(match cleave {
            "$" => Enzyme {
                regex,
                skip_suffix: None,
                c_terminal: true,
            },
            _ => Enzyme {
                regex,
                skip_suffix,
                c_terminal,
            },
        }))
    }

    /// Positions (byte offsets) at which `sequence` is cut, excluding the ends
    fn cuts<'s>(&'s self, sequence: &'s str) -> impl Iterator<Item = usize> + 's {
        self.regex
            .find_iter(sequence)
            .map(|mat| match self.c_terminal {
                true => mat.end(),
                false => mat.start(),
            })
            .filter(move |&right| match self.skip_suffix {
                Some(skip) => !(right < sequence.len() && sequence[right..].starts_with(skip)),
                None => true,
            })
    }

    fn cleavage_sites(&self, sequence: &str) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::new();
        let mut left = 0;
        for right in self.cuts(sequence) {
            ranges.push(left..right);
            left = right;
        }
        ranges.push(left..sequence.len());
        ranges
    }
}

impl EnzymeParameters {
    fn cleavage_sites(&self, sequence: &str) -> Vec<std::ops::Range<usize>> {
        match &self.enzyme {
            Some(enzyme) => enzyme.cleavage_sites(sequence),
            None => {
                // Perform a non-specific digest
                let mut v = Vec::new();
                for len in self.min_len..=self.max_len.min(sequence.len()) {
                    for i in 0..=sequence.len().saturating_sub(len) {
                        v.push(i..i + len)
                    }
                }
                v
            }
        }
    }

    /// Number of internal cleavage sites in an already-cleaved peptide.
    /// Always zero for a non-specific enzyme.
    pub fn missed_cleavages(&self, peptide: &str) -> u8 {
        match &self.enzyme {
            Some(enzyme) => enzyme
                .cuts(peptide)
                .filter(|&cut| cut > 0 && cut < peptide.len())
                .count()
                .min(u8::MAX as usize) as u8,
            None => 0,
        }
    }

    /// Does `peptide` fall within the configured length range?
    pub fn accepts_length(&self, peptide: &str) -> bool {
        let len = peptide.len();
        len >= self.min_len && len <= self.max_len
    }

    pub fn digest(&self, sequence: &str, protein: Arc<String>) -> Vec<Digest> {
        let n = sequence.len();
        let mut digests = Vec::new();
        let sites = self.cleavage_sites(sequence);
        // Non-specific digests enumerate every window already
        let missed_cleavages = match self.enzyme {
            None => 0,
            _ => self.missed_cleavages,
        };

        // The same peptide can occur more than once in a protein
        let mut seen = FnvHashSet::default();

        for cleavage in 1..=(1 + missed_cleavages as usize) {
            for win in sites.windows(cleavage) {
                let start = win[0].start;
                let end = win[cleavage - 1].end;

                let sequence = match sequence.get(start..end) {
                    Some(sequence) => sequence,
                    None => continue,
                };

                let position = match (start == 0, end == n) {
                    (true, true) => Position::Full,
                    (true, false) => Position::Nterm,
                    (false, true) => Position::Cterm,
                    (false, false) => Position::Internal,
                };

                if !sequence.is_empty() && self.accepts_length(sequence) && seen.insert(sequence) {
                    digests.push(Digest {
                        sequence: sequence.into(),
                        missed_cleavages: (cleavage - 1) as u8,
                        position,
                        protein: protein.clone(),
                    });
                }
            }
        }
        digests
    }
}
