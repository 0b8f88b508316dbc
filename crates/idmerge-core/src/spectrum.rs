use fnv::FnvHashMap;
use regex::Regex;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Identifies one spectrum: the raw file it lives in and its title
pub struct SpectrumKey {
    /// File name (no directory) of the spectrum file
    pub file: String,
    pub title: String,
}

impl SpectrumKey {
    pub fn new<A: Into<String>, B: Into<String>>(file: A, title: B) -> Self {
        SpectrumKey {
            file: file.into(),
            title: title.into(),
        }
    }
}

impl std::fmt::Display for SpectrumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.title)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Precursor {
    pub mz: f32,
    pub charge: Option<u8>,
    /// Retention time in minutes
    pub rt: Option<f32>,
}

#[derive(thiserror::Error, Debug)]
pub enum SpectrumError {
    #[error("io error reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("malformed spectrum file {file} at line {line}")]
    Malformed { file: String, line: usize },
    #[error("spectrum file {0} has not been loaded")]
    NotLoaded(String),
    #[error("spectrum {0} not found")]
    UnknownSpectrum(SpectrumKey),
}

/// Resolves spectrum keys to precursor information
pub trait SpectrumIndex {
    /// Load the raw spectrum file at `path`, registering its spectra under `file`:
    /// the name result files use to reference it
    fn load_file(&mut self, file: &str, path: &Path) -> Result<(), SpectrumError>;

    fn is_loaded(&self, file: &str) -> bool;

    fn precursor(&self, key: &SpectrumKey) -> Result<Precursor, SpectrumError>;
}

/// Name under which a spectrum file is referenced by result files
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// In-memory precursor index built from MGF files
pub struct MgfIndex {
    files: FnvHashMap<String, FnvHashMap<String, Precursor>>,
    regex_for_charge: Regex,
}

impl Default for MgfIndex {
    fn default() -> Self {
        Self {
            files: FnvHashMap::default(),
            regex_for_charge: Regex::new(r"(\d+)\+?").expect("valid charge regex"),
        }
    }
}

impl MgfIndex {
    /// Parse the precursors of an MGF file. Fragment peaks are skipped.
    pub fn parse(&self, file: &str, contents: &str) -> Result<FnvHashMap<String, Precursor>, SpectrumError> {
        let mut precursors = FnvHashMap::default();
        let mut title: Option<String> = None;
        let mut current: Option<Precursor> = None;

        let malformed = |line: usize| SpectrumError::Malformed {
            file: file.into(),
            line: line + 1,
        };

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with("BEGIN IONS") {
                title = None;
                current = Some(Precursor::default());
            } else if line.starts_with("END IONS") {
                match (title.take(), current.take()) {
                    (Some(title), Some(precursor)) if precursor.mz > 0.0 => {
                        if precursors.insert(title.clone(), precursor).is_some() {
                            log::warn!("{}: duplicate spectrum title {}", file, title);
                        }
                    }
                    _ => return Err(malformed(idx)),
                }
            } else if let Some(precursor) = current.as_mut() {
                if let Some(t) = line.strip_prefix("TITLE=") {
                    title = Some(t.to_string());
                } else if let Some(pepmass) = line.strip_prefix("PEPMASS=") {
                    precursor.mz = pepmass
                        .split_ascii_whitespace()
                        .next()
                        .and_then(|mz| mz.parse::<f32>().ok())
                        .ok_or_else(|| malformed(idx))?;
                } else if let Some(charge) = line.strip_prefix("CHARGE=") {
                    precursor.charge = self
                        .regex_for_charge
                        .captures(charge)
                        .and_then(|cap| cap[1].parse::<u8>().ok());
                } else if let Some(rt) = line.strip_prefix("RTINSECONDS=") {
                    precursor.rt = rt.parse::<f32>().ok().map(|rt| rt / 60.0);
                }
            }
        }

        if current.is_some() {
            return Err(malformed(contents.lines().count().saturating_sub(1)));
        }
        Ok(precursors)
    }

    /// Register already-parsed spectra under `file`
    pub fn insert(&mut self, file: String, precursors: FnvHashMap<String, Precursor>) {
        self.files.insert(file, precursors);
    }

    /// Release all loaded spectrum files
    pub fn clear(&mut self) {
        self.files.clear();
    }
}

impl SpectrumIndex for MgfIndex {
    fn load_file(&mut self, file: &str, path: &Path) -> Result<(), SpectrumError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| SpectrumError::Io(path.display().to_string(), err))?;
        let precursors = self.parse(file, &contents)?;
        log::info!("- {}: {} spectra", path.display(), precursors.len());
        self.insert(file.to_string(), precursors);
        Ok(())
    }

    fn is_loaded(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    fn precursor(&self, key: &SpectrumKey) -> Result<Precursor, SpectrumError> {
        self.files
            .get(&key.file)
            .ok_or_else(|| SpectrumError::NotLoaded(key.file.clone()))?
            .get(&key.title)
            .copied()
            .ok_or_else(|| SpectrumError::UnknownSpectrum(key.clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MGF: &str = r#"
MASS=Monoisotopic
BEGIN IONS
TITLE=scan=1
PEPMASS=400.2 1000.0
CHARGE=2+
RTINSECONDS=120
175.119 10.0
END IONS

BEGIN IONS
TITLE=scan=2
PEPMASS=600.8
CHARGE=3+ and 4+
200.0 1.0
END IONS
"#;

    #[test]
    fn parse_precursors() {
        let index = MgfIndex::default();
        let precursors = index.parse("test.mgf", MGF).unwrap();
        assert_eq!(precursors.len(), 2);
        assert_eq!(
            precursors["scan=1"],
            Precursor {
                mz: 400.2,
                charge: Some(2),
                rt: Some(2.0)
            }
        );
        assert_eq!(precursors["scan=2"].charge, Some(3));
        assert_eq!(precursors["scan=2"].rt, None);
    }

    #[test]
    fn malformed() {
        let index = MgfIndex::default();
        let missing_mass = "BEGIN IONS\nTITLE=scan=1\nEND IONS\n";
        assert!(matches!(
            index.parse("bad.mgf", missing_mass),
            Err(SpectrumError::Malformed { line: 3, .. })
        ));
        let unterminated = "BEGIN IONS\nTITLE=scan=1\nPEPMASS=400.2\n";
        assert!(index.parse("bad.mgf", unterminated).is_err());
        let bad_mass = "BEGIN IONS\nTITLE=scan=1\nPEPMASS=abc\nEND IONS";
        assert!(index.parse("bad.mgf", bad_mass).is_err());
    }

    #[test]
    fn load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mgf");
        std::fs::write(&path, MGF).unwrap();

        let mut index = MgfIndex::default();
        assert!(!index.is_loaded("sample.mgf"));
        index.load_file("sample.mgf", &path).unwrap();
        assert!(index.is_loaded("sample.mgf"));

        let key = SpectrumKey::new("sample.mgf", "scan=2");
        assert_eq!(index.precursor(&key).unwrap().mz, 600.8);
        assert!(matches!(
            index.precursor(&SpectrumKey::new("sample.mgf", "scan=3")),
            Err(SpectrumError::UnknownSpectrum(_))
        ));
        assert!(matches!(
            index.precursor(&SpectrumKey::new("other.mgf", "scan=1")),
            Err(SpectrumError::NotLoaded(_))
        ));
        assert!(matches!(
            index.load_file("missing.mgf", &dir.path().join("missing.mgf")),
            Err(SpectrumError::Io(..))
        ));

        // a replacement file is registered under the name it stands in for
        let renamed = dir.path().join("renamed.mgf");
        std::fs::write(&renamed, MGF).unwrap();
        index.load_file("original.mgf", &renamed).unwrap();
        assert!(index.is_loaded("original.mgf"));
        assert!(!index.is_loaded("renamed.mgf"));
    }
}
