use fnv::FnvHashMap;
use std::sync::Arc;

use crate::enzyme::EnzymeParameters;
use crate::fasta::SequenceIndex;
use crate::import::{CancellationToken, Cancelled};
use crate::modification::Termini;

/// Check the cancellation flag every this many proteins during a scan
const SCAN_CHECK_INTERVAL: usize = 4096;

/// Maps peptide sequences to the accessions of the proteins that contain them.
///
/// Small databases are digested up front into a peptide -> proteins map.
/// Anything the digest cannot answer is found with a linear substring scan
/// over the database, whose result is cached for the rest of the run.
pub struct ProteinResolver {
    index: Arc<dyn SequenceIndex>,
    digested: Option<FnvHashMap<String, Vec<Arc<String>>>>,
    cache: FnvHashMap<String, Vec<Arc<String>>>,
    scans: usize,
}

impl ProteinResolver {
    pub fn new(
        index: Arc<dyn SequenceIndex>,
        enzyme: &EnzymeParameters,
        max_digest_proteins: usize,
    ) -> Self {
        let digested = match index.len() <= max_digest_proteins {
            true => {
                let mut map: FnvHashMap<String, Vec<Arc<String>>> = FnvHashMap::default();
                for digest in index.digest(enzyme) {
                    map.entry(digest.sequence).or_default().push(digest.protein);
                }
                log::info!(
                    "digested {} proteins into {} unique peptides",
                    index.len(),
                    map.len()
                );
                Some(map)
            }
            false => {
                log::info!(
                    "database has {} proteins (> {}), peptides will be mapped on demand",
                    index.len(),
                    max_digest_proteins
                );
                None
            }
        };

        ProteinResolver {
            index,
            digested,
            cache: FnvHashMap::default(),
            scans: 0,
        }
    }

    pub fn is_digested(&self) -> bool {
        self.digested.is_some()
    }

    /// Number of substring scans performed so far
    pub fn scans(&self) -> usize {
        self.scans
    }

    /// Accessions of all proteins containing `sequence`, in database order
    pub fn resolve(
        &mut self,
        sequence: &str,
        token: &CancellationToken,
    ) -> Result<Vec<Arc<String>>, Cancelled> {
        if let Some(proteins) = self.digested.as_ref().and_then(|d| d.get(sequence)) {
            return Ok(proteins.clone());
        }
        if let Some(proteins) = self.cache.get(sequence) {
            return Ok(proteins.clone());
        }

        let mut proteins = Vec::new();
        for (idx, accession) in self.index.accessions().enumerate() {
            if idx % SCAN_CHECK_INTERVAL == 0 {
                token.check()?;
            }
            let found = self
                .index
                .protein_sequence(accession)
                .map(|protein| protein.contains(sequence))
                .unwrap_or(false);
            if found {
                proteins.push(accession.clone());
            }
        }
        self.scans += 1;
        log::trace!("{} found in {} proteins by scan", sequence, proteins.len());

        self.cache.insert(sequence.to_string(), proteins.clone());
        Ok(proteins)
    }

    /// Is `sequence` at the N- or C-terminus of any of `proteins`?
    /// A peptide following an initiator methionine counts as N-terminal.
    pub fn termini(&self, sequence: &str, proteins: &[Arc<String>]) -> Termini {
        let mut termini = Termini::default();
        for protein in proteins {
            if let Some(protein) = self.index.protein_sequence(protein) {
                termini.protein_n |= protein.starts_with(sequence)
                    || (protein.starts_with('M') && protein[1..].starts_with(sequence));
                termini.protein_c |= protein.ends_with(sequence);
            }
        }
        termini
    }

    /// Release spare capacity held by the lazy cache
    pub fn shrink_to_fit(&mut self) {
        self.cache.shrink_to_fit();
    }
}
