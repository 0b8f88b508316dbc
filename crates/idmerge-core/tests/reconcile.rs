//! Modification reconciliation against a project profile

use idmerge_core::mass::peptide_mass;
use idmerge_core::modification::{
    EntryBuilder, ModificationProfile, Termini, UNKNOWN_MODIFICATION,
};
use idmerge_core::peptide::{ModificationMatch, PeptideAssumption, SearchEngine};
use idmerge_core::reconcile::{Assignment, ReconcileParameters, Reconciler};
use quickcheck_macros::quickcheck;
use std::collections::HashSet;

const PROFILE: &str = r#"[
    {"name": "Carbamidomethyl", "mass": 57.021464, "sites": ["C"], "fixed": true},
    {"name": "Phospho", "mass": 79.96633, "sites": ["S", "T", "Y"]},
    {"name": "Oxidation", "mass": 15.994915, "sites": ["M"]},
    {"name": "Sulfo", "mass": 79.95682, "sites": ["S", "T", "Y"]},
    {"name": "Acetyl", "mass": 42.010565, "sites": ["[", "K"]}
]"#;

fn profile() -> ModificationProfile {
    let entries: Vec<EntryBuilder> = serde_json::from_str(PROFILE).unwrap();
    ModificationProfile::new(entries).unwrap()
}

fn parameters() -> ReconcileParameters {
    ReconcileParameters {
        mass_tolerance: 0.005,
        ..Default::default()
    }
}

fn assumption(sequence: &str, engine: SearchEngine, mods: &[(usize, &str)]) -> PeptideAssumption {
    let mut a = PeptideAssumption::new(sequence, engine, 2);
    a.modifications = mods
        .iter()
        .map(|(site, label)| ModificationMatch::variable(*site, *label))
        .collect();
    a
}

fn labels(a: &PeptideAssumption) -> Vec<(usize, String)> {
    a.modifications
        .iter()
        .map(|m| (m.site, m.label.clone()))
        .collect()
}

#[test]
fn phospho_on_threonine() {
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());
    // only Phospho is within 0.005 Da of the reported mass
    let mut a = assumption("PEPTIDE", SearchEngine::XTandem, &[(4, "79.9663@T")]);
    let assignments = reconciler.reconcile(&mut a, Termini::default()).unwrap();
    assert_eq!(assignments, vec![Assignment::Canonical { entry: 1, site: 4 }]);
    assert_eq!(labels(&a), vec![(4, "Phospho".to_string())]);
}

#[test]
fn contested_ambiguous_site_is_remapped() {
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());
    // S2 and T5; the second modification matches both Phospho and Sulfo and
    // was reported on S2, which already carries the first one
    let mut a = assumption(
        "ASPETK",
        SearchEngine::Comet,
        &[(2, "79.9663@S"), (2, "79.9616@ST")],
    );
    let assignments = reconciler.reconcile(&mut a, Termini::default()).unwrap();
    assert_eq!(
        assignments,
        vec![
            Assignment::Canonical { entry: 1, site: 2 },
            Assignment::Canonical { entry: 1, site: 5 },
        ]
    );
}

#[test]
fn remap_stays_on_reported_residue() {
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());
    // reported on P3 as a threonine modification; S1 fits Phospho but is not a T
    let mut a = assumption("SPEPTIDE", SearchEngine::XTandem, &[(3, "79.9663@T")]);
    let assignments = reconciler.reconcile(&mut a, Termini::default()).unwrap();
    assert_eq!(assignments, vec![Assignment::Canonical { entry: 1, site: 5 }]);
    assert_eq!(labels(&a), vec![(5, "Phospho".to_string())]);

    // no threonine at all: the modification stays unknown
    let mut a = assumption("SPEPSIDE", SearchEngine::XTandem, &[(3, "79.9663@T")]);
    let assignments = reconciler.reconcile(&mut a, Termini::default()).unwrap();
    assert_eq!(assignments, vec![Assignment::Unknown { site: 3 }]);

    // T5 is taken, so the second threonine modification cannot move to S1
    let mut a = assumption(
        "SPEPTIDE",
        SearchEngine::Comet,
        &[(5, "79.9663@T"), (5, "79.9663@T")],
    );
    let assignments = reconciler.reconcile(&mut a, Termini::default()).unwrap();
    assert_eq!(
        assignments,
        vec![
            Assignment::Canonical { entry: 1, site: 5 },
            Assignment::Unknown { site: 5 },
        ]
    );
}

#[test]
fn mixed_engine_conventions() {
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());

    let mut omssa = assumption("MSPEK", SearchEngine::Omssa, &[(1, "2"), (2, "1")]);
    reconciler.reconcile(&mut omssa, Termini::default()).unwrap();

    let mut mascot = assumption("MSPEK", SearchEngine::Mascot, &[(1, "Oxidation"), (2, "Phospho")]);
    reconciler.reconcile(&mut mascot, Termini::default()).unwrap();

    let mut tandem = assumption(
        "MSPEK",
        SearchEngine::XTandem,
        &[(1, "15.9949@M"), (2, "79.9663@S")],
    );
    reconciler.reconcile(&mut tandem, Termini::default()).unwrap();

    assert_eq!(labels(&omssa), labels(&mascot));
    assert_eq!(labels(&tandem), labels(&mascot));
    assert!(omssa.same_peptide(&tandem));
}

const RESIDUES: &[u8] = b"STYMKCPEAG";
const LABELS: &[&str] = &[
    "79.9663@STY",
    "79.9663@S",
    "79.9616@STY",
    "15.9949@M",
    "42.0106@K",
    "42.0106@^",
    "1.0@A",
    "Phospho",
    "Oxidation",
    UNKNOWN_MODIFICATION,
];

/// Build a peptide and its modifications from arbitrary input
fn arbitrary_assumption(residues: &[u8], mods: &[(u8, u8)]) -> Option<PeptideAssumption> {
    if residues.is_empty() {
        return None;
    }
    let sequence = residues
        .iter()
        .take(30)
        .map(|r| RESIDUES[*r as usize % RESIDUES.len()] as char)
        .collect::<String>();
    let len = sequence.len();
    let mods = mods
        .iter()
        .take(8)
        .map(|(site, label)| (*site as usize % len + 1, LABELS[*label as usize % LABELS.len()]))
        .collect::<Vec<_>>();
    Some(assumption(&sequence, SearchEngine::Comet, &mods))
}

#[quickcheck]
fn resolution_is_total_and_unique(residues: Vec<u8>, mods: Vec<(u8, u8)>) -> bool {
    let a = match arbitrary_assumption(&residues, &mods) {
        Some(a) => a,
        None => return true,
    };
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());
    let mut resolved = a.clone();
    reconciler
        .reconcile(&mut resolved, Termini::default())
        .unwrap();

    let mut seen = HashSet::new();
    for m in resolved.variable_modifications() {
        if m.label == UNKNOWN_MODIFICATION {
            continue;
        }
        // every label is canonical and sits on a compatible residue
        let entry = match profile.position(&m.label) {
            Some(entry) => entry,
            None => return false,
        };
        if !profile.is_compatible(entry, m.site, resolved.sequence.as_bytes(), Termini::default()) {
            return false;
        }
        // no two modifications share a site
        if !seen.insert(m.site) {
            return false;
        }
    }
    resolved.modifications.len() == a.modifications.len()
}

#[quickcheck]
fn reconciliation_is_deterministic_and_idempotent(residues: Vec<u8>, mods: Vec<(u8, u8)>) -> bool {
    let a = match arbitrary_assumption(&residues, &mods) {
        Some(a) => a,
        None => return true,
    };
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());

    let mut first = a.clone();
    let mut second = a;
    let assignments = reconciler.reconcile(&mut first, Termini::default()).unwrap();
    let repeated = reconciler.reconcile(&mut second, Termini::default()).unwrap();
    if assignments != repeated || labels(&first) != labels(&second) {
        return false;
    }

    let before = labels(&first);
    reconciler.reconcile(&mut first, Termini::default()).unwrap();
    before == labels(&first)
}

#[quickcheck]
fn mass_is_consistent(residues: Vec<u8>, mods: Vec<(u8, u8)>) -> bool {
    let mut a = match arbitrary_assumption(&residues, &mods) {
        Some(a) => a,
        None => return true,
    };
    let profile = profile();
    let reconciler = Reconciler::new(&profile, parameters());
    reconciler.reconcile(&mut a, Termini::default()).unwrap();

    let cysteines = a.sequence.bytes().filter(|&r| r == b'C').count() as f32;
    let variable: f32 = a
        .variable_modifications()
        .filter_map(|m| profile.position(&m.label))
        .map(|entry| profile.entries()[entry].mass)
        .sum();
    let expected = peptide_mass(&a.sequence).unwrap() + cysteines * 57.021464 + variable;

    let mass = reconciler.theoretical_mass(&a, Termini::default()).unwrap();
    (mass - expected).abs() < 1e-3
}
