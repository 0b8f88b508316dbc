use crate::peptide::SpectrumMatch;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("unable to connect to identification store: {0}")]
    Connection(String),
    #[error("store is not connected")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("error writing identifications: {0}")]
    Csv(#[from] csv::Error),
}

/// Evicts part of a cache when memory runs low
pub trait CacheReducer {
    /// Release roughly `fraction` (0..=1) of the cached entries, returning
    /// how many were released
    fn reduce_memory_consumption(&mut self, fraction: f64) -> Result<usize, StoreError>;
}

/// Destination of reconciled spectrum matches. A store also owns the match
/// cache that is reduced under memory pressure.
pub trait IdentificationStore: CacheReducer {
    fn establish_connection(&mut self) -> Result<(), StoreError>;

    fn add_spectrum_match(&mut self, psm: SpectrumMatch) -> Result<(), StoreError>;

    /// Number of spectrum matches added so far
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist anything still buffered
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Matches still held in memory, if the store keeps any
    fn matches(&self) -> &[SpectrumMatch] {
        &[]
    }
}

/// Keeps every match in memory. Used when the primary store cannot be reached.
#[derive(Default, Debug)]
pub struct MemoryStore {
    matches: Vec<SpectrumMatch>,
    connected: bool,
}

impl MemoryStore {
    pub fn into_matches(self) -> Vec<SpectrumMatch> {
        self.matches
    }
}

impl CacheReducer for MemoryStore {
    /// Everything here is the only copy of the data, so nothing is released
    fn reduce_memory_consumption(&mut self, _: f64) -> Result<usize, StoreError> {
        self.matches.shrink_to_fit();
        Ok(0)
    }
}

impl IdentificationStore for MemoryStore {
    fn establish_connection(&mut self) -> Result<(), StoreError> {
        self.connected = true;
        Ok(())
    }

    fn add_spectrum_match(&mut self, psm: SpectrumMatch) -> Result<(), StoreError> {
        if !self.connected {
            return Err(StoreError::NotConnected);
        }
        self.matches.push(psm);
        Ok(())
    }

    fn len(&self) -> usize {
        self.matches.len()
    }

    fn matches(&self) -> &[SpectrumMatch] {
        &self.matches
    }
}
