use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use crate::spectrum::SpectrumKey;

/// How a search engine labels the variable modifications it reports
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LabelConvention {
    /// 0-based index into the project's modification profile
    ProfileIndex,
    /// `mass@residues` token, e.g. `79.9663@STY`
    MassToken,
    /// Already a canonical modification name
    CanonicalName,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SearchEngine {
    Omssa,
    Andromeda,
    XTandem,
    MsgfPlus,
    Comet,
    MyriMatch,
    MsAmanda,
    Tide,
    Sage,
    Mascot,
    IdMerge,
    Other(String),
}

impl SearchEngine {
    /// `None` if modifications reported by this engine cannot be interpreted
    pub fn convention(&self) -> Option<LabelConvention> {
        use SearchEngine::*;
        match self {
            Omssa | Andromeda => Some(LabelConvention::ProfileIndex),
            XTandem | MsgfPlus | Comet | MyriMatch | MsAmanda | Tide | Sage => {
                Some(LabelConvention::MassToken)
            }
            Mascot | IdMerge => Some(LabelConvention::CanonicalName),
            Other(_) => None,
        }
    }
}

impl FromStr for SearchEngine {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '+')
            .collect::<String>()
            .to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "omssa" => SearchEngine::Omssa,
            "andromeda" => SearchEngine::Andromeda,
            "xtandem" => SearchEngine::XTandem,
            "msgf+" | "msgfplus" | "msgf" => SearchEngine::MsgfPlus,
            "comet" => SearchEngine::Comet,
            "myrimatch" => SearchEngine::MyriMatch,
            "msamanda" => SearchEngine::MsAmanda,
            "tide" => SearchEngine::Tide,
            "sage" => SearchEngine::Sage,
            "mascot" => SearchEngine::Mascot,
            "idmerge" => SearchEngine::IdMerge,
            _ => SearchEngine::Other(s.trim().to_string()),
        })
    }
}

impl Display for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SearchEngine::Omssa => "OMSSA",
            SearchEngine::Andromeda => "Andromeda",
            SearchEngine::XTandem => "X!Tandem",
            SearchEngine::MsgfPlus => "MS-GF+",
            SearchEngine::Comet => "Comet",
            SearchEngine::MyriMatch => "MyriMatch",
            SearchEngine::MsAmanda => "MS Amanda",
            SearchEngine::Tide => "Tide",
            SearchEngine::Sage => "Sage",
            SearchEngine::Mascot => "Mascot",
            SearchEngine::IdMerge => "idmerge",
            SearchEngine::Other(name) => name,
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModificationMatch {
    /// 1-based residue position in the peptide
    pub site: usize,
    pub label: String,
    pub variable: bool,
}

impl ModificationMatch {
    pub fn variable<S: Into<String>>(site: usize, label: S) -> Self {
        ModificationMatch {
            site,
            label: label.into(),
            variable: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// A candidate peptide for a spectrum, as reported by one search engine
pub struct PeptideAssumption {
    pub sequence: String,
    pub modifications: Vec<ModificationMatch>,
    pub engine: SearchEngine,
    pub charge: u8,
    /// 1 is the best hit of the search engine for this spectrum
    pub rank: u32,
    /// Raw search engine score or e-value
    pub score: f64,
    /// Parent protein accessions, empty if the engine did not report any
    pub proteins: Vec<Arc<String>>,
    /// Theoretical neutral mass reported by the search engine
    pub reported_mass: Option<f32>,
    /// Theoretical neutral mass after modification reconciliation
    pub mass: Option<f32>,
}

impl PeptideAssumption {
    pub fn new<S: Into<String>>(sequence: S, engine: SearchEngine, charge: u8) -> Self {
        PeptideAssumption {
            sequence: sequence.into(),
            modifications: Vec::new(),
            engine,
            charge,
            rank: 1,
            score: 0.0,
            proteins: Vec::new(),
            reported_mass: None,
            mass: None,
        }
    }

    pub fn variable_modifications(&self) -> impl Iterator<Item = &ModificationMatch> {
        self.modifications.iter().filter(|m| m.variable)
    }

    /// Do two assumptions describe the same modified peptide?
    pub fn same_peptide(&self, other: &PeptideAssumption) -> bool {
        let key = |a: &PeptideAssumption| {
            let mut mods = a.modifications.clone();
            mods.sort();
            mods
        };
        self.sequence == other.sequence && key(self) == key(other)
    }

    /// An assumption is a decoy if every parent protein is a decoy
    pub fn is_decoy(&self, decoy_tag: &str) -> bool {
        !self.proteins.is_empty()
            && !decoy_tag.is_empty()
            && self.proteins.iter().all(|p| p.contains(decoy_tag))
    }
}

impl Display for PeptideAssumption {
    /// Sequence with variable modification labels in brackets after their residue
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, residue) in self.sequence.chars().enumerate() {
            write!(f, "{}", residue)?;
            for m in self.variable_modifications().filter(|m| m.site == idx + 1) {
                write!(f, "[{}]", m.label)?;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
/// One spectrum and every peptide assumption reported for it, ranked per search engine
pub struct SpectrumMatch {
    pub key: SpectrumKey,
    assumptions: BTreeMap<SearchEngine, Vec<PeptideAssumption>>,
}

impl SpectrumMatch {
    pub fn new(key: SpectrumKey) -> Self {
        SpectrumMatch {
            key,
            assumptions: BTreeMap::default(),
        }
    }

    /// Insert an assumption, keeping each engine's list sorted by rank
    pub fn add_assumption(&mut self, assumption: PeptideAssumption) {
        let ranked = self
            .assumptions
            .entry(assumption.engine.clone())
            .or_default();
        let at = ranked.partition_point(|a| a.rank <= assumption.rank);
        ranked.insert(at, assumption);
    }

    pub fn engines(&self) -> impl Iterator<Item = &SearchEngine> {
        self.assumptions.keys()
    }

    pub fn assumptions(&self) -> impl Iterator<Item = &PeptideAssumption> {
        self.assumptions.values().flatten()
    }

    pub fn assumptions_mut(&mut self) -> impl Iterator<Item = &mut PeptideAssumption> {
        self.assumptions.values_mut().flatten()
    }

    /// Highest ranked assumption of `engine`
    pub fn best(&self, engine: &SearchEngine) -> Option<&PeptideAssumption> {
        self.assumptions.get(engine).and_then(|a| a.first())
    }

    /// Keep only the assumptions for which `f` returns true. Engines left
    /// without assumptions are removed. Returns the number removed.
    pub fn retain_assumptions<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&mut PeptideAssumption) -> bool,
    {
        let before = self.len();
        for ranked in self.assumptions.values_mut() {
            ranked.retain_mut(|a| f(a));
        }
        self.assumptions.retain(|_, ranked| !ranked.is_empty());
        before - self.len()
    }

    /// Total number of assumptions across engines
    pub fn len(&self) -> usize {
        self.assumptions.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.assumptions.is_empty()
    }
}
