use std::{
    fmt::{Display, Write},
    str::FromStr,
};

use serde::{de::Visitor, Deserialize, Serialize};

use crate::mass::VALID_AA;

/// Label given to a variable modification that is present on a peptide but
/// could not be matched to any entry of the [`ModificationProfile`]
pub const UNKNOWN_MODIFICATION: &str = "unknown";

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModificationSpecificity {
    PeptideN(Option<u8>),
    PeptideC(Option<u8>),
    ProteinN(Option<u8>),
    ProteinC(Option<u8>),
    Residue(u8),
}

/// Is a peptide located at the N- and/or C-terminus of (one of) its parent proteins?
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Termini {
    pub protein_n: bool,
    pub protein_c: bool,
}

impl ModificationSpecificity {
    /// Can this specificity be satisfied at the 1-based `position` of `sequence`?
    pub fn matches(&self, position: usize, sequence: &[u8], termini: Termini) -> bool {
        if position == 0 || position > sequence.len() {
            return false;
        }
        let residue = sequence[position - 1];
        let last = sequence.len();
        let fits = |r: &Option<u8>| r.map(|r| r == residue).unwrap_or(true);
        match self {
            ModificationSpecificity::PeptideN(r) => position == 1 && fits(r),
            ModificationSpecificity::PeptideC(r) => position == last && fits(r),
            ModificationSpecificity::ProteinN(r) => position == 1 && termini.protein_n && fits(r),
            ModificationSpecificity::ProteinC(r) => {
                position == last && termini.protein_c && fits(r)
            }
            ModificationSpecificity::Residue(r) => *r == residue,
        }
    }

    /// Residue restriction of this specificity, if any
    pub fn residue(&self) -> Option<u8> {
        match self {
            ModificationSpecificity::PeptideN(r)
            | ModificationSpecificity::PeptideC(r)
            | ModificationSpecificity::ProteinN(r)
            | ModificationSpecificity::ProteinC(r) => *r,
            ModificationSpecificity::Residue(r) => Some(*r),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ModificationSpecificity::Residue(_))
    }
}

impl Display for ModificationSpecificity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = match self {
            ModificationSpecificity::PeptideN(r) => {
                f.write_char('^')?;
                *r
            }
            ModificationSpecificity::PeptideC(r) => {
                f.write_char('$')?;
                *r
            }
            ModificationSpecificity::ProteinN(r) => {
                f.write_char('[')?;
                *r
            }
            ModificationSpecificity::ProteinC(r) => {
                f.write_char(']')?;
                *r
            }
            ModificationSpecificity::Residue(r) => Some(*r),
        };

        if let Some(r) = r {
            f.write_char(r as char)?;
        }

        Ok(())
    }
}

impl Serialize for ModificationSpecificity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct SpecificityVisitor;

impl<'de> Visitor<'de> for SpecificityVisitor {
    type Value = ModificationSpecificity;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a modification site such as `S`, `^`, `[M` or `$K`")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for ModificationSpecificity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(SpecificityVisitor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum InvalidModification {
    #[error("invalid modification site: empty")]
    Empty,
    #[error("invalid modification site: unrecognized residue ({0})")]
    InvalidResidue(char),
    #[error("invalid modification site: {0} is too long")]
    TooLong(String),
    #[error("modification `{0}` has no sites")]
    NoSites(String),
    #[error("modification `{0}` is defined more than once")]
    Duplicate(String),
    #[error("modification name `{0}` is reserved")]
    Reserved(String),
}

impl FromStr for ModificationSpecificity {
    type Err = InvalidModification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 2 {
            return Err(InvalidModification::TooLong(s.into()));
        }
        let residue = |rest: &str| -> Result<Option<u8>, InvalidModification> {
            match rest.chars().next() {
                Some(c) if VALID_AA.contains(&(c as u8)) => Ok(Some(c as u8)),
                Some(c) => Err(InvalidModification::InvalidResidue(c)),
                None => Ok(None),
            }
        };
        if let Some(rest) = s.strip_prefix('^') {
            return residue(rest).map(ModificationSpecificity::PeptideN);
        }
        if let Some(rest) = s.strip_prefix('$') {
            return residue(rest).map(ModificationSpecificity::PeptideC);
        }
        if let Some(rest) = s.strip_prefix('[') {
            return residue(rest).map(ModificationSpecificity::ProteinN);
        }
        if let Some(rest) = s.strip_prefix(']') {
            return residue(rest).map(ModificationSpecificity::ProteinC);
        }
        match s.chars().next() {
            Some(_) if s.len() > 1 => Err(InvalidModification::TooLong(s.into())),
            Some(c) => residue(s)?
                .map(ModificationSpecificity::Residue)
                .ok_or(InvalidModification::InvalidResidue(c)),
            None => Err(InvalidModification::Empty),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationKind {
    Fixed,
    Variable,
}

/// A modification the project expects to observe
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProfileEntry {
    /// Canonical name of the modification
    pub name: String,
    /// Monoisotopic mass delta
    pub mass: f32,
    pub specificities: Vec<ModificationSpecificity>,
    pub kind: ModificationKind,
}

impl ProfileEntry {
    /// Can this modification sit at the 1-based `position` of `sequence`?
    pub fn fits(&self, position: usize, sequence: &[u8], termini: Termini) -> bool {
        self.specificities
            .iter()
            .any(|s| s.matches(position, sequence, termini))
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
/// Modification entry as written in the parameters file
pub struct EntryBuilder {
    pub name: String,
    pub mass: f32,
    pub sites: Vec<ModificationSpecificity>,
    /// Fixed modifications are applied to every matching site
    pub fixed: Option<bool>,
}

/// Expected modification profile of a project: the set of canonical
/// modifications that identifications are reconciled against.
///
/// Entry order is significant, it is the order in which candidate names are
/// considered during reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModificationProfile {
    entries: Vec<ProfileEntry>,
}

impl ModificationProfile {
    pub fn new(entries: Vec<EntryBuilder>) -> Result<Self, InvalidModification> {
        let mut profile = ModificationProfile::default();
        for entry in entries {
            if entry.name == UNKNOWN_MODIFICATION {
                return Err(InvalidModification::Reserved(entry.name));
            }
            if entry.sites.is_empty() {
                return Err(InvalidModification::NoSites(entry.name));
            }
            if profile.position(&entry.name).is_some() {
                return Err(InvalidModification::Duplicate(entry.name));
            }
            profile.entries.push(ProfileEntry {
                name: entry.name,
                mass: entry.mass,
                specificities: entry.sites,
                kind: match entry.fixed.unwrap_or(false) {
                    true => ModificationKind::Fixed,
                    false => ModificationKind::Variable,
                },
            });
        }
        Ok(profile)
    }

    pub fn entries(&self) -> &[ProfileEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ProfileEntry> {
        self.entries.get(index)
    }

    /// Index of the entry with canonical name `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn is_variable(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .map(|e| e.kind == ModificationKind::Variable)
            .unwrap_or(false)
    }

    /// Can profile entry `index` sit at the 1-based `position` of `sequence`?
    pub fn is_compatible(
        &self,
        index: usize,
        position: usize,
        sequence: &[u8],
        termini: Termini,
    ) -> bool {
        self.entries
            .get(index)
            .map(|e| e.fits(position, sequence, termini))
            .unwrap_or(false)
    }

    /// Indices of variable modifications with a mass within `tolerance` Da of `mass`
    pub fn variable_by_mass(&self, mass: f32, tolerance: f32) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| {
                e.kind == ModificationKind::Variable && (e.mass - mass).abs() <= tolerance
            })
            .map(|(idx, _)| idx)
    }

    /// Total mass of all fixed modifications applied to `sequence`.
    /// Every specificity of a fixed modification is applied independently, so
    /// an N-terminal lysine carrying a label on both the amine and the side
    /// chain is counted twice.
    pub fn fixed_mass(&self, sequence: &[u8], termini: Termini) -> f32 {
        self.entries
            .iter()
            .filter(|e| e.kind == ModificationKind::Fixed)
            .flat_map(|e| e.specificities.iter().map(move |s| (e.mass, s)))
            .map(|(mass, spec)| {
                let sites = (1..=sequence.len())
                    .filter(|&pos| spec.matches(pos, sequence, termini))
                    .count();
                mass * sites as f32
            })
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    pub fn entry(name: &str, mass: f32, sites: &[&str], fixed: bool) -> EntryBuilder {
        EntryBuilder {
            name: name.into(),
            mass,
            sites: sites.iter().map(|s| s.parse().unwrap()).collect(),
            fixed: Some(fixed),
        }
    }

    #[test]
    fn parse_modifications() {
        use InvalidModification::*;
        use ModificationSpecificity::*;
        assert_eq!("[".parse::<ModificationSpecificity>(), Ok(ProteinN(None)));
        assert_eq!(
            "[M".parse::<ModificationSpecificity>(),
            Ok(ProteinN(Some(b'M')))
        );
        assert_eq!(
            "]M".parse::<ModificationSpecificity>(),
            Ok(ProteinC(Some(b'M')))
        );
        assert_eq!("M".parse::<ModificationSpecificity>(), Ok(Residue(b'M')));
        assert_eq!(
            "Z".parse::<ModificationSpecificity>(),
            Err(InvalidResidue('Z'))
        );
        assert_eq!("^Z".parse::<ModificationSpecificity>(), Err(InvalidResidue('Z')));
        assert_eq!("ST".parse::<ModificationSpecificity>(), Err(TooLong("ST".into())));
        assert_eq!("".parse::<ModificationSpecificity>(), Err(Empty));
    }

    #[test]
    fn specificity_matching() {
        use ModificationSpecificity::*;
        let seq = b"MPEPTIDEK";
        let none = Termini::default();
        let nterm = Termini {
            protein_n: true,
            protein_c: false,
        };
        assert!(Residue(b'T').matches(5, seq, none));
        assert!(!Residue(b'T').matches(4, seq, none));
        assert!(PeptideN(None).matches(1, seq, none));
        assert!(!PeptideN(None).matches(2, seq, none));
        assert!(PeptideC(Some(b'K')).matches(9, seq, none));
        assert!(!ProteinN(Some(b'M')).matches(1, seq, none));
        assert!(ProteinN(Some(b'M')).matches(1, seq, nterm));
        assert!(!ProteinC(None).matches(9, seq, nterm));
        assert!(!Residue(b'M').matches(0, seq, none));
        assert!(!Residue(b'K').matches(10, seq, none));
    }

    #[test]
    fn deserialize_profile() {
        let json = r#"[
            {"name": "Carbamidomethyl", "mass": 57.021464, "sites": ["C"], "fixed": true},
            {"name": "Phospho", "mass": 79.96633, "sites": ["S", "T", "Y"]},
            {"name": "Acetyl", "mass": 42.010565, "sites": ["[", "^"]}
        ]"#;
        let entries: Vec<EntryBuilder> = serde_json::from_str(json).unwrap();
        let profile = ModificationProfile::new(entries).unwrap();
        assert_eq!(profile.entries().len(), 3);
        assert_eq!(profile.position("Phospho"), Some(1));
        assert!(!profile.is_variable(0));
        assert!(profile.is_variable(2));
        assert_eq!(
            profile.get(2).unwrap().specificities,
            vec![
                ModificationSpecificity::ProteinN(None),
                ModificationSpecificity::PeptideN(None)
            ]
        );

        let bad = r#"[{"name": "Foo", "mass": 1.0, "sites": ["Z"]}]"#;
        assert!(serde_json::from_str::<Vec<EntryBuilder>>(bad).is_err());
    }

    #[test]
    fn profile_validation() {
        assert_eq!(
            ModificationProfile::new(vec![entry("unknown", 1.0, &["S"], false)]),
            Err(InvalidModification::Reserved("unknown".into()))
        );
        assert_eq!(
            ModificationProfile::new(vec![entry("Foo", 1.0, &[], false)]),
            Err(InvalidModification::NoSites("Foo".into()))
        );
        assert_eq!(
            ModificationProfile::new(vec![
                entry("Foo", 1.0, &["S"], false),
                entry("Foo", 2.0, &["T"], false)
            ]),
            Err(InvalidModification::Duplicate("Foo".into()))
        );
    }

    #[test]
    fn mass_lookup_and_fixed_mass() {
        let profile = ModificationProfile::new(vec![
            entry("TMT", 229.1629, &["K", "^"], true),
            entry("Phospho", 79.96633, &["S", "T", "Y"], false),
            entry("Sulfo", 79.95682, &["S", "T", "Y"], false),
            entry("Oxidation", 15.994915, &["M"], false),
        ])
        .unwrap();

        let phospho = profile.variable_by_mass(79.966, 0.005).collect::<Vec<_>>();
        assert_eq!(phospho, vec![1]);
        let both = profile.variable_by_mass(79.96, 0.02).collect::<Vec<_>>();
        assert_eq!(both, vec![1, 2]);
        // fixed entries are never candidates
        assert_eq!(profile.variable_by_mass(229.16, 0.01).count(), 0);

        // N-terminal K: labelled on the amine and the side chain, plus the C-terminal K
        let fixed = profile.fixed_mass(b"KPEPTIDEK", Termini::default());
        assert!((fixed - 3.0 * 229.1629).abs() < 1e-3);
    }
}
