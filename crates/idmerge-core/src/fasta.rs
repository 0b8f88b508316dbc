use crate::enzyme::{Digest, EnzymeParameters};
use fnv::FnvHashMap;
use rayon::prelude::*;
use std::collections::hash_map::Entry;
use std::sync::Arc;

/// Protein sequence database consulted when mapping peptides to proteins
pub trait SequenceIndex: Send + Sync {
    fn protein_sequence(&self, accession: &str) -> Option<&str>;

    fn accessions(&self) -> Box<dyn Iterator<Item = &Arc<String>> + '_>;

    /// Number of proteins in the database
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In silico digest of every protein in the database
    fn digest(&self, enzyme: &EnzymeParameters) -> Vec<Digest>;
}

pub struct Fasta {
    pub targets: Vec<(Arc<String>, String)>,
    decoy_tag: String,
    lookup: FnvHashMap<String, usize>,
}

impl Fasta {
    // Parse a string into a fasta database
    pub fn parse<S: Into<String>>(contents: String, decoy_tag: S) -> Fasta {
        let decoy_tag = decoy_tag.into();

        let mut targets = Vec::new();
        let mut last_id = "";
        let mut s = String::new();

        let accession = |id: &str| -> Arc<String> {
            Arc::new(id.split_ascii_whitespace().next().unwrap_or(id).to_string())
        };

        for line in contents.as_str().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(id) = line.strip_prefix('>') {
                if !s.is_empty() {
                    targets.push((accession(last_id), std::mem::take(&mut s)));
                }
                last_id = id;
            } else {
                s.push_str(line);
            }
        }

        if !s.is_empty() {
            targets.push((accession(last_id), s));
        }

        let mut lookup = FnvHashMap::default();
        for (idx, (acc, _)) in targets.iter().enumerate() {
            match lookup.entry(acc.to_string()) {
                Entry::Occupied(_) => log::warn!("duplicate protein accession in FASTA: {}", acc),
                Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
            }
        }

        Fasta {
            targets,
            decoy_tag,
            lookup,
        }
    }

    pub fn is_decoy(&self, accession: &str) -> bool {
        !self.decoy_tag.is_empty() && accession.contains(&self.decoy_tag)
    }
}

impl SequenceIndex for Fasta {
    fn protein_sequence(&self, accession: &str) -> Option<&str> {
        self.lookup
            .get(accession)
            .map(|&idx| self.targets[idx].1.as_str())
    }

    fn accessions(&self) -> Box<dyn Iterator<Item = &Arc<String>> + '_> {
        Box::new(self.targets.iter().map(|(acc, _)| acc))
    }

    fn len(&self) -> usize {
        self.targets.len()
    }

    fn digest(&self, enzyme: &EnzymeParameters) -> Vec<Digest> {
        self.targets
            .par_iter()
            .flat_map_iter(|(protein, sequence)| enzyme.digest(sequence, protein.clone()))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const FASTA: &str = r#">sp|P1|FIRST first protein
MADEEKLPPGWEK
RMSRSSGR

>rev_sp|P1|FIRST
RGSSRSMRKEWGPPLKEEDAM
>sp|P2|SECOND
MPEPTIDEKPEPTIDER
"#;

    #[test]
    fn parse_fasta() {
        let fasta = Fasta::parse(FASTA.into(), "rev_");
        assert_eq!(fasta.len(), 3);
        assert_eq!(
            fasta.protein_sequence("sp|P1|FIRST"),
            Some("MADEEKLPPGWEKRMSRSSGR")
        );
        assert_eq!(fasta.protein_sequence("sp|P3|MISSING"), None);
        assert!(fasta.is_decoy("rev_sp|P1|FIRST"));
        assert!(!fasta.is_decoy("sp|P2|SECOND"));
        assert_eq!(
            fasta
                .accessions()
                .map(|acc| acc.as_str())
                .collect::<Vec<_>>(),
            vec!["sp|P1|FIRST", "rev_sp|P1|FIRST", "sp|P2|SECOND"]
        );
    }

    #[test]
    fn digest_database() {
        let fasta = Fasta::parse(FASTA.into(), "rev_");
        let params = EnzymeParameters {
            missed_cleavages: 0,
            min_len: 6,
            max_len: 30,
            enzyme: crate::enzyme::Enzyme::new("KR", Some('P'), true).unwrap(),
        };
        let digests = fasta.digest(&params);
        let peptide = digests
            .iter()
            .find(|d| d.sequence == "MPEPTIDEKPEPTIDER")
            .expect("KP is not cleaved");
        assert_eq!(peptide.protein.as_str(), "sp|P2|SECOND");
        assert!(digests.iter().any(|d| d.sequence == "MADEEK"));
    }
}
