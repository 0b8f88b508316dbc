use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sysinfo::{System, SystemExt};

use crate::enzyme::{EnzymeBuilder, EnzymeParameters, InvalidEnzyme};
use crate::mass::{neutral_mass, Tolerance};
use crate::metrics::ImportMetrics;
use crate::modification::ModificationProfile;
use crate::peptide::{PeptideAssumption, SpectrumMatch};
use crate::protein::ProteinResolver;
use crate::reader::{ReaderError, ResultReader};
use crate::reconcile::{ReconcileError, ReconcileParameters, Reconciler, Validation};
use crate::spectrum::{file_name, Precursor, SpectrumError, SpectrumIndex};
use crate::store::{IdentificationStore, MemoryStore, StoreError};

/// Shared flag used to stop an import from another thread
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("import cancelled")]
pub struct Cancelled;

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        match self.is_cancelled() {
            true => Err(Cancelled),
            false => Ok(()),
        }
    }
}

/// Receives progress updates from a running import
pub trait Progress {
    /// Overall completion, 0 to 100
    fn progress(&mut self, percent: f32);

    fn status(&mut self, line: &str);
}

/// Reports status lines through the `log` facade
#[derive(Default)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn progress(&mut self, percent: f32) {
        log::trace!("import {:.0}% complete", percent);
    }

    fn status(&mut self, line: &str) {
        log::info!("{}", line);
    }
}

/// Asked for a replacement when a referenced spectrum file cannot be found
pub trait MissingSpectraPrompt {
    /// Path to use for the spectrum file `file`, or `None` to abort the import
    fn replacement(&mut self, file: &str) -> Option<PathBuf>;
}

/// Aborts the import as soon as a spectrum file is missing
#[derive(Default)]
pub struct AbortPrompt;

impl MissingSpectraPrompt for AbortPrompt {
    fn replacement(&mut self, file: &str) -> Option<PathBuf> {
        log::error!("spectrum file {} is missing", file);
        None
    }
}

impl<T: MissingSpectraPrompt + ?Sized> MissingSpectraPrompt for &mut T {
    fn replacement(&mut self, file: &str) -> Option<PathBuf> {
        (**self).replacement(file)
    }
}

impl<T: Progress + ?Sized> Progress for &mut T {
    fn progress(&mut self, percent: f32) {
        (**self).progress(percent)
    }

    fn status(&mut self, line: &str) {
        (**self).status(line)
    }
}

pub trait MemoryProbe {
    /// Memory currently available to the process, in bytes
    fn available(&mut self) -> u64;
}

pub struct SystemMemory {
    system: System,
}

impl Default for SystemMemory {
    fn default() -> Self {
        SystemMemory {
            system: System::new(),
        }
    }
}

impl MemoryProbe for SystemMemory {
    fn available(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
/// Import settings as written in the parameters file
pub struct ImportBuilder {
    /// Tolerance between re-estimated peptide mass and observed precursor mass
    pub precursor_tol: Option<Tolerance>,
    /// Maximum difference (Da) between a reported modification mass and the profile
    pub mass_tolerance: Option<f32>,
    pub max_unknown_modifications: Option<usize>,
    pub min_charge: Option<u8>,
    pub max_charge: Option<u8>,
    /// Length and missed cleavage filters, and the digestion rules used for
    /// protein mapping
    pub enzyme: Option<EnzymeBuilder>,
    /// Databases with at most this many proteins are digested up front
    pub max_digest_proteins: Option<usize>,
    /// Reduce caches when less memory than this is available (MiB)
    pub min_free_memory_mb: Option<u64>,
    /// Smallest fraction of the match cache released under memory pressure
    pub cache_reduction: Option<f64>,
}

impl ImportBuilder {
    pub fn make_parameters(self) -> Result<ImportParameters, InvalidEnzyme> {
        let defaults = ReconcileParameters::default();
        Ok(ImportParameters {
            reconcile: ReconcileParameters {
                mass_tolerance: self
                    .mass_tolerance
                    .map(f32::abs)
                    .unwrap_or(defaults.mass_tolerance),
                precursor_tol: self.precursor_tol.unwrap_or(defaults.precursor_tol),
                max_unknown_modifications: self
                    .max_unknown_modifications
                    .unwrap_or(defaults.max_unknown_modifications),
            },
            min_charge: self.min_charge.unwrap_or(1),
            max_charge: self.max_charge.unwrap_or(6),
            enzyme: self.enzyme.unwrap_or_default().try_into()?,
            max_digest_proteins: self.max_digest_proteins.unwrap_or(50_000),
            min_free_memory: self.min_free_memory_mb.unwrap_or(64) * 1024 * 1024,
            cache_reduction: self.cache_reduction.unwrap_or(0.25).clamp(0.0, 1.0),
        })
    }
}

pub struct ImportParameters {
    pub reconcile: ReconcileParameters,
    pub min_charge: u8,
    pub max_charge: u8,
    pub enzyme: EnzymeParameters,
    pub max_digest_proteins: usize,
    /// Bytes
    pub min_free_memory: u64,
    pub cache_reduction: f64,
}

#[derive(thiserror::Error, Debug)]
/// Errors that abort the whole import
pub enum ImportError {
    #[error("no identification store could be established: {0}")]
    Store(StoreError),
    #[error("error writing identifications: {0}")]
    StoreWrite(StoreError),
    #[error("no identifications were retained, check the input files and parameters")]
    NoIdentifications,
    #[error("out of memory: {available} bytes available after reducing caches, {required} required")]
    OutOfMemory { available: u64, required: u64 },
}

#[derive(thiserror::Error, Debug)]
/// Errors that abort the import of a single result file
pub enum FileError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Spectrum(#[from] SpectrumError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Why processing of a result file stopped early
enum Interrupt {
    Cancelled,
    MissingSpectra(String),
    File(FileError),
    Run(ImportError),
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Interrupt::Cancelled
    }
}

impl From<ReaderError> for Interrupt {
    fn from(err: ReaderError) -> Self {
        Interrupt::File(err.into())
    }
}

impl From<SpectrumError> for Interrupt {
    fn from(err: SpectrumError) -> Self {
        Interrupt::File(err.into())
    }
}

impl From<ReconcileError> for Interrupt {
    fn from(err: ReconcileError) -> Self {
        Interrupt::File(err.into())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Done,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub file: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
/// A result file that referenced a spectrum file which could not be found
pub struct MissingSpectrum {
    pub file: PathBuf,
    pub spectrum_file: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ImportReport {
    pub state: ImportState,
    pub files_imported: Vec<PathBuf>,
    pub failed_files: Vec<FileFailure>,
    /// Every interruption caused by a missing spectrum file, in order
    pub missing_spectra: Vec<MissingSpectrum>,
    pub matches_retained: usize,
    pub matches_discarded: usize,
    pub assumptions_discarded: usize,
    /// Was the in-memory fallback store used?
    pub fallback_store: bool,
    pub metrics: ImportMetrics,
}

impl Default for ImportReport {
    fn default() -> Self {
        ImportReport {
            state: ImportState::Done,
            files_imported: Vec::new(),
            failed_files: Vec::new(),
            missing_spectra: Vec::new(),
            matches_retained: 0,
            matches_discarded: 0,
            assumptions_discarded: 0,
            fallback_store: false,
            metrics: ImportMetrics::default(),
        }
    }
}

/// Drives the import of a set of result files: reading, spectrum linking,
/// protein mapping, modification reconciliation and storage.
pub struct Importer<'a> {
    parameters: &'a ImportParameters,
    reconciler: Reconciler<'a>,
    resolver: &'a mut ProteinResolver,
    spectra: &'a mut dyn SpectrumIndex,
    reader: &'a dyn ResultReader,
    store: Box<dyn IdentificationStore + 'a>,
    prompt: Box<dyn MissingSpectraPrompt + 'a>,
    progress: Box<dyn Progress + 'a>,
    memory: Box<dyn MemoryProbe + 'a>,
    token: CancellationToken,
    /// Spectrum file name -> location on disk
    spectrum_files: FnvHashMap<String, PathBuf>,
}

impl<'a> Importer<'a> {
    pub fn new(
        parameters: &'a ImportParameters,
        profile: &'a ModificationProfile,
        resolver: &'a mut ProteinResolver,
        spectra: &'a mut dyn SpectrumIndex,
        reader: &'a dyn ResultReader,
        store: Box<dyn IdentificationStore + 'a>,
    ) -> Self {
        Importer {
            parameters,
            reconciler: Reconciler::new(profile, parameters.reconcile),
            resolver,
            spectra,
            reader,
            store,
            prompt: Box::new(AbortPrompt),
            progress: Box::new(LogProgress),
            memory: Box::new(SystemMemory::default()),
            token: CancellationToken::default(),
            spectrum_files: FnvHashMap::default(),
        }
    }

    /// Spectrum files that result files may reference, by file name
    pub fn with_spectrum_files<I: IntoIterator<Item = PathBuf>>(mut self, paths: I) -> Self {
        for path in paths {
            self.spectrum_files.insert(file_name(&path), path);
        }
        self
    }

    pub fn with_prompt<P: MissingSpectraPrompt + 'a>(mut self, prompt: P) -> Self {
        self.prompt = Box::new(prompt);
        self
    }

    pub fn with_progress<P: Progress + 'a>(mut self, progress: P) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn with_memory_probe<M: MemoryProbe + 'a>(mut self, memory: M) -> Self {
        self.memory = Box::new(memory);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The store that received the matches: the primary one, or the fallback
    pub fn into_store(self) -> Box<dyn IdentificationStore + 'a> {
        self.store
    }

    pub fn run(&mut self, result_files: &[PathBuf]) -> Result<ImportReport, ImportError> {
        let mut files = result_files.to_vec();
        files.sort_by(|a, b| file_name(a).cmp(&file_name(b)).then_with(|| a.cmp(b)));
        files.dedup();

        let mut report = ImportReport {
            fallback_store: self.connect()?,
            ..Default::default()
        };

        // Number of spectrum matches already handled per result file
        let mut handled: FnvHashMap<PathBuf, usize> = FnvHashMap::default();
        let total = files.len().max(1) as f32;
        let mut queue = files;

        loop {
            let mut interrupted: Vec<MissingSpectrum> = Vec::new();

            for file in &queue {
                if self.token.is_cancelled() {
                    return self.finish(report, ImportState::Cancelled);
                }
                self.progress
                    .status(&format!("importing {}", file.display()));

                let offset = handled.entry(file.clone()).or_default();
                match self.import_file(file, offset, &mut report) {
                    Ok(()) => report.files_imported.push(file.clone()),
                    Err(Interrupt::MissingSpectra(spectrum_file)) => {
                        log::warn!(
                            "{}: spectrum file {} not found, pausing this file",
                            file.display(),
                            spectrum_file
                        );
                        interrupted.push(MissingSpectrum {
                            file: file.clone(),
                            spectrum_file,
                        });
                    }
                    Err(Interrupt::File(err)) => {
                        log::error!("failed to import {}: {}", file.display(), err);
                        report.failed_files.push(FileFailure {
                            file: file.clone(),
                            reason: err.to_string(),
                        });
                    }
                    Err(Interrupt::Cancelled) => {
                        return self.finish(report, ImportState::Cancelled);
                    }
                    Err(Interrupt::Run(err)) => return Err(self.abandon(err)),
                }

                let done = report.files_imported.len() + report.failed_files.len();
                self.progress.progress(100.0 * done as f32 / total);
                if let Err(err) = self.guard_memory() {
                    return Err(self.abandon(err));
                }
            }

            if interrupted.is_empty() {
                break;
            }

            let missing = interrupted
                .iter()
                .map(|m| m.spectrum_file.clone())
                .collect::<BTreeSet<_>>();
            for spectrum_file in missing {
                self.progress
                    .status(&format!("waiting for spectrum file {}", spectrum_file));
                match self.prompt.replacement(&spectrum_file) {
                    Some(path) => {
                        log::info!("using {} for {}", path.display(), spectrum_file);
                        self.spectrum_files.insert(spectrum_file, path);
                    }
                    None => {
                        report.missing_spectra.extend(interrupted);
                        return self.finish(report, ImportState::Cancelled);
                    }
                }
            }

            queue = interrupted.iter().map(|m| m.file.clone()).collect();
            report.missing_spectra.extend(interrupted);
        }

        if report.matches_retained == 0 {
            return Err(self.abandon(ImportError::NoIdentifications));
        }
        self.finish(report, ImportState::Done)
    }

    fn finish(
        &mut self,
        mut report: ImportReport,
        state: ImportState,
    ) -> Result<ImportReport, ImportError> {
        self.store.flush().map_err(ImportError::StoreWrite)?;
        report.state = state;
        log::info!(
            "import {:?}: {} files, {} spectrum matches retained, {} discarded",
            state,
            report.files_imported.len(),
            report.matches_retained,
            report.matches_discarded
        );
        Ok(report)
    }

    /// Persist what the store still buffers before a run-fatal error
    fn abandon(&mut self, err: ImportError) -> ImportError {
        match self.store.flush() {
            Ok(()) => err,
            Err(flush) => {
                log::error!("unable to persist buffered identifications: {}", flush);
                match err {
                    ImportError::NoIdentifications => ImportError::StoreWrite(flush),
                    err => err,
                }
            }
        }
    }

    /// Connect the primary store, falling back to memory. Returns true if the
    /// fallback is in use.
    fn connect(&mut self) -> Result<bool, ImportError> {
        match self.store.establish_connection() {
            Ok(()) => Ok(false),
            Err(err) => {
                log::warn!("{}; keeping identifications in memory instead", err);
                let mut fallback = MemoryStore::default();
                fallback
                    .establish_connection()
                    .map_err(ImportError::Store)?;
                self.store = Box::new(fallback);
                Ok(true)
            }
        }
    }

    fn import_file(
        &mut self,
        file: &Path,
        handled: &mut usize,
        report: &mut ImportReport,
    ) -> Result<(), Interrupt> {
        let matches = self.reader.read(file)?;

        for (idx, psm) in matches.enumerate() {
            self.token.check()?;
            let psm = psm?;
            if idx < *handled {
                continue;
            }

            self.link_spectrum_file(&psm.key.file)?;
            let precursor = self.spectra.precursor(&psm.key)?;

            match self.process_match(psm, &precursor, report)? {
                Some(psm) => {
                    self.store
                        .add_spectrum_match(psm)
                        .map_err(|err| Interrupt::Run(ImportError::StoreWrite(err)))?;
                    report.matches_retained += 1;
                }
                None => report.matches_discarded += 1,
            }
            *handled = idx + 1;
        }
        Ok(())
    }

    /// Make sure the spectrum file `name` is loaded
    fn link_spectrum_file(&mut self, name: &str) -> Result<(), Interrupt> {
        if self.spectra.is_loaded(name) {
            return Ok(());
        }
        let path = self
            .spectrum_files
            .get(name)
            .ok_or_else(|| Interrupt::MissingSpectra(name.to_string()))?;
        match self.spectra.load_file(name, path) {
            Ok(()) => Ok(()),
            Err(SpectrumError::Io(path, err)) => {
                log::warn!("unable to read {}: {}", path, err);
                self.spectrum_files.remove(name);
                Err(Interrupt::MissingSpectra(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Filter and reconcile every assumption of a match. Returns the match if
    /// any assumption survives.
    fn process_match(
        &mut self,
        mut psm: SpectrumMatch,
        precursor: &Precursor,
        report: &mut ImportReport,
    ) -> Result<Option<SpectrumMatch>, Interrupt> {
        let mut interrupt = None;
        let mut metrics = ImportMetrics::default();

        let removed = psm.retain_assumptions(|assumption| {
            if interrupt.is_some() {
                return false;
            }
            match self.process_assumption(assumption, precursor) {
                Ok(Some((ppm, da))) => {
                    metrics.add_charges([assumption.charge]);
                    metrics.observe(ppm, da);
                    true
                }
                Ok(None) => false,
                Err(err) => {
                    interrupt = Some(err);
                    false
                }
            }
        });

        if let Some(interrupt) = interrupt {
            return Err(interrupt);
        }

        report.assumptions_discarded += removed;
        report.metrics.merge(&metrics);
        match psm.is_empty() {
            true => Ok(None),
            false => Ok(Some(psm)),
        }
    }

    /// Returns the precursor error (ppm, Da) if the assumption is retained
    fn process_assumption(
        &mut self,
        assumption: &mut PeptideAssumption,
        precursor: &Precursor,
    ) -> Result<Option<(f32, f32)>, Interrupt> {
        if assumption.charge == 0 {
            assumption.charge = precursor.charge.unwrap_or(0);
        }
        let parameters = self.parameters;
        if assumption.charge < parameters.min_charge || assumption.charge > parameters.max_charge {
            log::trace!("{}: charge {} out of range", assumption, assumption.charge);
            return Ok(None);
        }
        if !parameters.enzyme.accepts_length(&assumption.sequence) {
            log::trace!("{}: length out of range", assumption);
            return Ok(None);
        }
        if parameters.enzyme.missed_cleavages(&assumption.sequence) > parameters.enzyme.missed_cleavages {
            log::trace!("{}: too many missed cleavages", assumption);
            return Ok(None);
        }

        let observed = neutral_mass(precursor.mz, assumption.charge);
        if let Some(reported) = assumption.reported_mass {
            if !parameters.reconcile.precursor_tol.contains(reported, observed) {
                log::trace!("{}: reported mass outside of precursor tolerance", assumption);
                return Ok(None);
            }
        }

        if assumption.proteins.is_empty() {
            assumption.proteins = self.resolver.resolve(&assumption.sequence, &self.token)?;
            if assumption.proteins.is_empty() {
                log::debug!("{}: not found in the protein database", assumption.sequence);
                return Ok(None);
            }
        }
        let termini = self
            .resolver
            .termini(&assumption.sequence, &assumption.proteins);

        match self.reconciler.process(assumption, termini, observed)? {
            Validation::Retained { ppm, da } => Ok(Some((ppm, da))),
            verdict => {
                log::trace!("{}: discarded ({:?})", assumption, verdict);
                Ok(None)
            }
        }
    }

    /// Release caches when available memory drops under the configured minimum
    fn guard_memory(&mut self) -> Result<(), ImportError> {
        let required = self.parameters.min_free_memory;
        if required == 0 || self.memory.available() >= required {
            return Ok(());
        }

        self.resolver.shrink_to_fit();
        let available = self.memory.available();
        if available >= required {
            return Ok(());
        }

        let missing = (required - available) as f64 / required as f64;
        let fraction = missing.max(self.parameters.cache_reduction).min(1.0);
        log::warn!(
            "low memory ({} MiB available), releasing {:.0}% of cached matches",
            available / (1024 * 1024),
            fraction * 100.0
        );
        match self.store.reduce_memory_consumption(fraction) {
            Ok(released) => log::info!("released {} cached matches", released),
            Err(err) => log::error!("failed to reduce match cache: {}", err),
        }

        let available = self.memory.available();
        match available >= required {
            true => Ok(()),
            false => Err(ImportError::OutOfMemory {
                available,
                required,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancellation_token() {
        let token = CancellationToken::default();
        let shared = token.clone();
        assert!(token.check().is_ok());
        shared.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(Cancelled));
    }

    #[test]
    fn builder_defaults() {
        let builder: ImportBuilder = serde_json::from_str(
            r#"{"precursor_tol": {"da": [-0.5, 0.5]}, "mass_tolerance": -0.02, "enzyme": {"min_len": 7}}"#,
        )
        .unwrap();
        let parameters = builder.make_parameters().unwrap();
        assert_eq!(parameters.reconcile.precursor_tol, Tolerance::Da(-0.5, 0.5));
        assert_eq!(parameters.reconcile.mass_tolerance, 0.02);
        assert_eq!(parameters.reconcile.max_unknown_modifications, 0);
        assert_eq!(parameters.enzyme.min_len, 7);
        assert_eq!(parameters.enzyme.max_len, 30);
        assert_eq!((parameters.min_charge, parameters.max_charge), (1, 6));
        assert_eq!(parameters.min_free_memory, 64 * 1024 * 1024);

        let invalid: ImportBuilder =
            serde_json::from_str(r#"{"enzyme": {"cleave_at": "KB"}}"#).unwrap();
        assert!(invalid.make_parameters().is_err());
    }

    struct FixedMemory(Vec<u64>);

    impl MemoryProbe for FixedMemory {
        fn available(&mut self) -> u64 {
            match self.0.len() {
                1 => self.0[0],
                _ => self.0.remove(0),
            }
        }
    }

    #[test]
    fn memory_probe_sequence() {
        let mut probe = FixedMemory(vec![1, 2, 3]);
        assert_eq!(probe.available(), 1);
        assert_eq!(probe.available(), 2);
        assert_eq!(probe.available(), 3);
        assert_eq!(probe.available(), 3);
        assert!(SystemMemory::default().available() > 0);
    }
}
