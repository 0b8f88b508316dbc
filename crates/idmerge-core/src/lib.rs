pub mod alignment;
pub mod enzyme;
pub mod fasta;
pub mod import;
pub mod mass;
pub mod metrics;
pub mod modification;
pub mod peptide;
pub mod protein;
pub mod reader;
pub mod reconcile;
pub mod spectrum;
pub mod store;

use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("error parsing {0}: {1}")]
    Json(String, serde_json::Error),
}

fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String, Error> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|e| Error::Io(path.display().to_string(), e))
}

pub fn read_fasta<P, S>(path: P, decoy_tag: S) -> Result<fasta::Fasta, Error>
where
    P: AsRef<Path>,
    S: Into<String>,
{
    let contents = read_to_string(path)?;
    Ok(fasta::Fasta::parse(contents, decoy_tag))
}

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let path = path.as_ref();
    let contents = read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| Error::Json(path.display().to_string(), e))
}
