use crate::input::Settings;
use crate::output::{write_matches, TsvStore};
use crate::prompt::StdinPrompt;
use anyhow::Context;
use idmerge_core::fasta::Fasta;
use idmerge_core::import::{
    AbortPrompt, ImportParameters, ImportReport, ImportState, Importer, MissingSpectraPrompt,
};
use idmerge_core::modification::ModificationProfile;
use idmerge_core::protein::ProteinResolver;
use idmerge_core::reader::TsvReader;
use idmerge_core::spectrum::MgfIndex;
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub struct Runner {
    pub parameters: Settings,
    import: ImportParameters,
    profile: ModificationProfile,
    fasta: Arc<Fasta>,
    start: Instant,
}

#[derive(Serialize)]
/// Written to `results.json`
struct Summary<'a> {
    #[serde(flatten)]
    parameters: &'a Settings,
    report: &'a ImportReport,
}

impl Runner {
    pub fn new(parameters: Settings) -> anyhow::Result<Self> {
        let start = Instant::now();

        let fasta = idmerge_core::read_fasta(&parameters.fasta, parameters.decoy_tag.as_str())
            .with_context(|| format!("Failed to read FASTA from `{}`", parameters.fasta))?;
        info!("loaded {} proteins from {}", fasta.targets.len(), parameters.fasta);

        let profile = ModificationProfile::new(parameters.modifications.clone())
            .context("Invalid modification profile")?;
        let import = parameters
            .import
            .clone()
            .make_parameters()
            .context("Invalid enzyme parameters")?;

        Ok(Runner {
            parameters,
            import,
            profile,
            fasta: Arc::new(fasta),
            start,
        })
    }

    // Create a path for `file_name` in the output directory
    fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    pub fn run(mut self, interactive: bool) -> anyhow::Result<ImportReport> {
        let mut resolver = ProteinResolver::new(
            self.fasta.clone(),
            &self.import.enzyme,
            self.import.max_digest_proteins,
        );
        let mut spectra = MgfIndex::default();
        let reader = TsvReader;
        let results_path = self.make_path("results.idmerge.tsv");
        let store = TsvStore::new(&results_path, self.parameters.decoy_tag.as_str());

        let mut prompt: Box<dyn MissingSpectraPrompt> = match interactive {
            true => Box::new(StdinPrompt::default()),
            false => Box::new(AbortPrompt),
        };

        let result_files = self
            .parameters
            .result_files
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>();

        let (report, store) = {
            let mut importer = Importer::new(
                &self.import,
                &self.profile,
                &mut resolver,
                &mut spectra,
                &reader,
                Box::new(store),
            )
            .with_spectrum_files(self.parameters.spectrum_files.iter().map(PathBuf::from))
            .with_prompt(&mut *prompt);

            let report = importer.run(&result_files)?;
            (report, importer.into_store())
        };

        // the primary location could not be opened, so the in-memory matches go elsewhere
        let results_path = match report.fallback_store {
            true => {
                let path = std::env::temp_dir().join(format!(
                    "results.idmerge.fallback.{}.tsv",
                    std::process::id()
                ));
                log::warn!(
                    "{} is not writable, writing {} identifications kept in memory to {}",
                    results_path.display(),
                    store.len(),
                    path.display()
                );
                write_matches(&path, store.matches(), &self.parameters.decoy_tag)
                    .with_context(|| format!("Failed to write `{}`", path.display()))?;
                path
            }
            false => results_path,
        };
        drop(store);
        self.parameters
            .output_paths
            .push(results_path.display().to_string());

        let path = self.make_path("metrics.json");
        let bytes = serde_json::to_vec_pretty(&report.metrics)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;
        self.parameters.output_paths.push(path.display().to_string());

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        let summary = Summary {
            parameters: &self.parameters,
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        let bytes = serde_json::to_vec_pretty(&summary)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;

        if report.state == ImportState::Cancelled {
            log::warn!("import was cancelled, results are incomplete");
        }
        for failure in &report.failed_files {
            log::warn!("{} was not imported: {}", failure.file.display(), failure.reason);
        }
        info!(
            "imported {} spectrum matches from {} files ({} discarded)",
            report.matches_retained,
            report.files_imported.len(),
            report.matches_discarded
        );
        info!("finished in {}s", self.start.elapsed().as_secs());

        Ok(report)
    }
}
