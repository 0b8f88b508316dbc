use fnv::FnvHashSet;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::mass::VALID_AA;
use crate::peptide::{ModificationMatch, PeptideAssumption, SpectrumMatch};
use crate::spectrum::SpectrumKey;

#[derive(thiserror::Error, Debug)]
pub enum ReaderError {
    #[error("error reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("malformed result file: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: invalid modification `{value}`")]
    Modification { line: usize, value: String },
    #[error("line {line}: invalid peptide sequence `{value}`")]
    Sequence { line: usize, value: String },
    #[error("line {line}: rows of spectrum `{key}` are not contiguous")]
    Scattered { line: usize, key: SpectrumKey },
}

pub type SpectrumMatches = Box<dyn Iterator<Item = Result<SpectrumMatch, ReaderError>>>;

/// Parses one search engine result file into spectrum matches
pub trait ResultReader {
    fn read(&self, path: &Path) -> Result<SpectrumMatches, ReaderError>;
}

#[derive(Deserialize, Debug)]
struct Row {
    spectrum_file: String,
    spectrum_title: String,
    search_engine: String,
    rank: u32,
    charge: u8,
    peptide: String,
    #[serde(default)]
    modifications: String,
    score: f64,
    #[serde(default)]
    proteins: String,
    calcmass: Option<f32>,
}

/// Reads tab-separated identification exports. Consecutive rows with the same
/// spectrum file and title are grouped into one [`SpectrumMatch`]; a spectrum
/// whose rows are split by another spectrum is an error.
#[derive(Default)]
pub struct TsvReader;

impl ResultReader for TsvReader {
    fn read(&self, path: &Path) -> Result<SpectrumMatches, ReaderError> {
        let file =
            File::open(path).map_err(|err| ReaderError::Io(path.display().to_string(), err))?;
        let records = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .trim(csv::Trim::All)
            .from_reader(file)
            .into_deserialize::<Row>();
        Ok(Box::new(TsvMatches {
            records,
            pending: None,
            emitted: FnvHashSet::default(),
            line: 1,
            failed: false,
        }))
    }
}

struct TsvMatches {
    records: csv::DeserializeRecordsIntoIter<File, Row>,
    pending: Option<Result<(SpectrumKey, PeptideAssumption), ReaderError>>,
    emitted: FnvHashSet<SpectrumKey>,
    line: usize,
    failed: bool,
}

impl TsvMatches {
    fn next_row(&mut self) -> Option<Result<(SpectrumKey, PeptideAssumption), ReaderError>> {
        let row = self.records.next()?;
        self.line += 1;
        Some(row.map_err(ReaderError::from).and_then(|row| parse_row(row, self.line)))
    }
}

impl Iterator for TsvMatches {
    type Item = Result<SpectrumMatch, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (key, first) = match self.pending.take().or_else(|| self.next_row())? {
            Ok(row) => row,
            Err(err) => {
                self.failed = true;
                return Some(Err(err));
            }
        };

        if self.emitted.contains(&key) {
            self.failed = true;
            return Some(Err(ReaderError::Scattered {
                line: self.line,
                key,
            }));
        }

        let mut psm = SpectrumMatch::new(key);
        psm.add_assumption(first);
        loop {
            match self.next_row() {
                Some(Ok((key, assumption))) if key == psm.key => psm.add_assumption(assumption),
                // the next spectrum, an error or the end: yield this one first
                next => {
                    self.pending = next;
                    break;
                }
            }
        }
        self.emitted.insert(psm.key.clone());
        Some(Ok(psm))
    }
}

fn parse_row(row: Row, line: usize) -> Result<(SpectrumKey, PeptideAssumption), ReaderError> {
    let sequence = row.peptide.to_ascii_uppercase();
    if sequence.is_empty() || !sequence.bytes().all(|b| VALID_AA.contains(&b)) {
        return Err(ReaderError::Sequence {
            line,
            value: row.peptide,
        });
    }

    let mut assumption = PeptideAssumption::new(
        sequence,
        row.search_engine.parse().unwrap_or_else(|never| match never {}),
        row.charge,
    );
    assumption.rank = row.rank;
    assumption.score = row.score;
    assumption.reported_mass = row.calcmass;
    assumption.proteins = row
        .proteins
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Arc::new(p.to_string()))
        .collect();

    for token in row.modifications.split(';').map(str::trim) {
        if token.is_empty() {
            continue;
        }
        let invalid = || ReaderError::Modification {
            line,
            value: token.into(),
        };
        let (site, label) = token.split_once('|').ok_or_else(invalid)?;
        let site = site.trim().parse::<usize>().map_err(|_| invalid())?;
        let label = label.trim();
        if site == 0 || site > assumption.sequence.len() || label.is_empty() {
            return Err(invalid());
        }
        assumption
            .modifications
            .push(ModificationMatch::variable(site, label));
    }

    Ok((
        SpectrumKey::new(row.spectrum_file, row.spectrum_title),
        assumption,
    ))
}
