use csv::ByteRecord;
use idmerge_core::peptide::{PeptideAssumption, SpectrumMatch};
use idmerge_core::store::{CacheReducer, IdentificationStore, StoreError};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Matches buffered before they are written out
const DEFAULT_CAPACITY: usize = 10_000;

pub const HEADERS: [&str; 13] = [
    "spectrum_file",
    "spectrum_title",
    "search_engine",
    "rank",
    "label",
    "charge",
    "peptide",
    "modified_peptide",
    "modifications",
    "score",
    "proteins",
    "num_proteins",
    "calcmass",
];

/// One row per retained peptide assumption
pub fn serialize_assumption(
    psm: &SpectrumMatch,
    assumption: &PeptideAssumption,
    decoy_tag: &str,
) -> ByteRecord {
    let mut record = ByteRecord::new();
    record.push_field(psm.key.file.as_bytes());
    record.push_field(psm.key.title.as_bytes());
    record.push_field(assumption.engine.to_string().as_bytes());
    record.push_field(itoa::Buffer::new().format(assumption.rank).as_bytes());
    let label: i8 = match assumption.is_decoy(decoy_tag) {
        true => -1,
        false => 1,
    };
    record.push_field(itoa::Buffer::new().format(label).as_bytes());
    record.push_field(itoa::Buffer::new().format(assumption.charge).as_bytes());
    record.push_field(assumption.sequence.as_bytes());
    record.push_field(assumption.to_string().as_bytes());
    record.push_field(
        assumption
            .variable_modifications()
            .map(|m| format!("{}|{}", m.site, m.label))
            .collect::<Vec<_>>()
            .join(";")
            .as_bytes(),
    );
    record.push_field(ryu::Buffer::new().format(assumption.score).as_bytes());
    record.push_field(
        assumption
            .proteins
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(";")
            .as_bytes(),
    );
    record.push_field(itoa::Buffer::new().format(assumption.proteins.len()).as_bytes());
    match assumption.mass {
        Some(mass) => record.push_field(ryu::Buffer::new().format(mass).as_bytes()),
        None => record.push_field(b""),
    }
    record
}

fn write_records<W: std::io::Write>(
    wtr: &mut csv::Writer<W>,
    matches: &[SpectrumMatch],
    decoy_tag: &str,
) -> Result<(), csv::Error> {
    for psm in matches {
        for assumption in psm.assumptions() {
            wtr.write_byte_record(&serialize_assumption(psm, assumption, decoy_tag))?;
        }
    }
    Ok(())
}

/// Write `matches` to a new tab-separated file at `path`
pub fn write_matches(path: &Path, matches: &[SpectrumMatch], decoy_tag: &str) -> anyhow::Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(vec![]);
    wtr.write_byte_record(&ByteRecord::from(HEADERS.to_vec()))?;
    write_records(&mut wtr, matches, decoy_tag)?;
    wtr.flush()?;

    let bytes = wtr.into_inner()?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Identification store writing tab-separated results. Matches are held in
/// memory and written out in batches, or earlier when memory runs low.
pub struct TsvStore {
    path: PathBuf,
    decoy_tag: String,
    capacity: usize,
    writer: Option<csv::Writer<File>>,
    buffer: Vec<SpectrumMatch>,
    written: usize,
}

impl TsvStore {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, decoy_tag: S) -> Self {
        TsvStore {
            path: path.into(),
            decoy_tag: decoy_tag.into(),
            capacity: DEFAULT_CAPACITY,
            writer: None,
            buffer: Vec::new(),
            written: 0,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Matches currently buffered in memory
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Write the `n` oldest buffered matches
    fn write_out(&mut self, n: usize) -> Result<usize, StoreError> {
        let wtr = self.writer.as_mut().ok_or(StoreError::NotConnected)?;
        let n = n.min(self.buffer.len());
        write_records(wtr, &self.buffer[..n], &self.decoy_tag)?;
        wtr.flush()?;
        self.buffer.drain(..n);
        self.written += n;
        Ok(n)
    }
}

impl CacheReducer for TsvStore {
    fn reduce_memory_consumption(&mut self, fraction: f64) -> Result<usize, StoreError> {
        let n = (self.buffer.len() as f64 * fraction.clamp(0.0, 1.0)).ceil() as usize;
        let released = self.write_out(n)?;
        self.buffer.shrink_to_fit();
        log::debug!("wrote {} buffered matches to {}", released, self.path.display());
        Ok(released)
    }
}

impl IdentificationStore for TsvStore {
    fn establish_connection(&mut self) -> Result<(), StoreError> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&self.path)
            .map_err(|err| StoreError::Connection(format!("{}: {}", self.path.display(), err)))?;
        wtr.write_byte_record(&ByteRecord::from(HEADERS.to_vec()))?;
        self.writer = Some(wtr);
        Ok(())
    }

    fn add_spectrum_match(&mut self, psm: SpectrumMatch) -> Result<(), StoreError> {
        if self.writer.is_none() {
            return Err(StoreError::NotConnected);
        }
        self.buffer.push(psm);
        if self.buffer.len() >= self.capacity {
            self.write_out(self.buffer.len())?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.written + self.buffer.len()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        match self.writer {
            Some(_) => self.write_out(self.buffer.len()).map(|_| ()),
            None => Ok(()),
        }
    }

    fn matches(&self) -> &[SpectrumMatch] {
        &self.buffer
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use idmerge_core::peptide::{ModificationMatch, SearchEngine};
    use idmerge_core::spectrum::SpectrumKey;
    use std::sync::Arc;

    fn psm(title: &str) -> SpectrumMatch {
        let mut psm = SpectrumMatch::new(SpectrumKey::new("a.mgf", title));
        let mut assumption = PeptideAssumption::new("PEPTIDE", SearchEngine::Comet, 2);
        assumption.modifications = vec![ModificationMatch::variable(4, "Phospho")];
        assumption.proteins = vec![Arc::new("rev_P1".to_string())];
        assumption.score = 0.5;
        assumption.mass = Some(879.3);
        psm.add_assumption(assumption);
        psm
    }

    fn rows(path: &Path) -> Vec<Vec<String>> {
        csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    #[test]
    fn serialize() {
        let psm = psm("scan=1");
        let record = serialize_assumption(&psm, psm.best(&SearchEngine::Comet).unwrap(), "rev_");
        let fields = record
            .iter()
            .map(|f| std::str::from_utf8(f).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            fields,
            vec![
                "a.mgf",
                "scan=1",
                "Comet",
                "1",
                "-1",
                "2",
                "PEPTIDE",
                "PEPT[Phospho]IDE",
                "4|Phospho",
                "0.5",
                "rev_P1",
                "1",
                "879.3"
            ]
        );
    }

    #[test]
    fn buffered_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.idmerge.tsv");
        let mut store = TsvStore::new(&path, "rev_").with_capacity(3);

        assert!(matches!(
            store.add_spectrum_match(psm("scan=0")),
            Err(StoreError::NotConnected)
        ));
        store.establish_connection().unwrap();

        for idx in 0..4 {
            store.add_spectrum_match(psm(&format!("scan={}", idx))).unwrap();
        }
        // first three were written once the buffer was full
        assert_eq!(store.buffered(), 1);
        assert_eq!(store.len(), 4);
        assert_eq!(rows(&path).len(), 3);

        store.add_spectrum_match(psm("scan=4")).unwrap();
        assert_eq!(store.reduce_memory_consumption(0.5).unwrap(), 1);
        assert_eq!(store.buffered(), 1);
        assert_eq!(store.matches()[0].key.title, "scan=4");

        store.flush().unwrap();
        assert_eq!(store.buffered(), 0);
        let rows = rows(&path);
        assert_eq!(rows.len(), 5);
        assert_eq!(
            rows.iter().map(|r| r[1].as_str()).collect::<Vec<_>>(),
            vec!["scan=0", "scan=1", "scan=2", "scan=3", "scan=4"]
        );
    }

    #[test]
    fn unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TsvStore::new(dir.path().join("missing").join("results.tsv"), "rev_");
        assert!(matches!(
            store.establish_connection(),
            Err(StoreError::Connection(_))
        ));
    }
}
