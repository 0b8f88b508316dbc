use anyhow::{ensure, Context};
use clap::ArgMatches;
use idmerge_core::{import::ImportBuilder, mass::Tolerance, modification::EntryBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual import settings - may include overrides or default values not set by user
pub struct Settings {
    pub version: String,
    pub fasta: String,
    pub decoy_tag: String,
    pub result_files: Vec<String>,
    pub spectrum_files: Vec<String>,
    pub modifications: Vec<EntryBuilder>,
    pub import: ImportBuilder,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize, Default)]
/// Input parameters deserialized from JSON file
pub struct Input {
    fasta: Option<String>,
    decoy_tag: Option<String>,
    result_files: Option<Vec<String>>,
    spectrum_files: Option<Vec<String>>,
    output_directory: Option<String>,
    modifications: Option<Vec<EntryBuilder>>,
    import: Option<ImportBuilder>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("path to parameters file is required")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(fasta) = matches.get_one::<String>("fasta") {
            log::trace!("overriding `fasta` parameter.");
            input.fasta = Some(fasta.into());
        }
        if let Some(result_files) = matches.get_many::<String>("result_files") {
            log::trace!("overriding `result_files` parameter.");
            input.result_files = Some(result_files.cloned().collect());
        }

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        idmerge_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    fn check_tolerance(tolerance: &Tolerance) {
        let (lo, hi) = match tolerance {
            Tolerance::Ppm(lo, hi) => (lo, hi),
            Tolerance::Da(lo, hi) => (lo, hi),
        };
        if lo > hi {
            log::warn!(
                "Precursor tolerance is empty, every peptide will be discarded: [{} - {}]",
                lo,
                hi
            );
        }
    }

    pub fn build(self) -> anyhow::Result<Settings> {
        // mandatory, but only checked here so that CLI overrides can fill them in
        ensure!(
            self.fasta.is_some(),
            "`fasta` must be set. For more information try '--help'"
        );
        ensure!(
            self.result_files.as_ref().map_or(false, |f| !f.is_empty()),
            "`result_files` must be set. For more information try '--help'"
        );

        let import = self.import.unwrap_or_default();
        if let Some(tolerance) = &import.precursor_tol {
            Self::check_tolerance(tolerance);
        }
        if let (Some(lo), Some(hi)) = (import.min_charge, import.max_charge) {
            if lo > hi {
                log::warn!("Minimum charge greater than maximum! No peptide will be imported");
            }
        }

        let modifications = self.modifications.unwrap_or_default();
        if modifications.is_empty() {
            log::warn!("No modifications configured: every variable modification will be reported as unknown");
        }

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path).with_context(|| {
                    format!("Failed to create output directory `{}`", path.display())
                })?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Settings {
            version: clap::crate_version!().into(),
            fasta: self.fasta.unwrap_or_default(),
            decoy_tag: self.decoy_tag.unwrap_or_else(|| "rev_".into()),
            result_files: self.result_files.unwrap_or_default(),
            spectrum_files: self.spectrum_files.unwrap_or_default(),
            modifications,
            import,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}
