use idmerge_cli::input::Input;
use idmerge_cli::runner::Runner;
use idmerge_core::import::ImportState;
use idmerge_core::mass::{peptide_mass, PROTON};
use std::path::Path;

const FASTA: &str = ">sp|P1|ONE\nMPEPTIDEKASPETKLLSMSRGGGGK\n>rev_sp|P1|ONE\nKGGGGRSMSLLKTEPSAKEDITPEPM\n";

const HEADER: &str = "spectrum_file\tspectrum_title\tsearch_engine\trank\tcharge\tpeptide\tmodifications\tscore\tproteins\tcalcmass\n";

fn spectrum(title: &str, mass: f32, charge: u8) -> String {
    let mz = (mass + charge as f32 * PROTON) / charge as f32;
    format!("BEGIN IONS\nTITLE={title}\nPEPMASS={mz}\nCHARGE={charge}+\nEND IONS\n")
}

fn setup(dir: &Path, spectrum_files: &[&str]) -> std::path::PathBuf {
    let phospho = 79.96633;
    std::fs::write(dir.join("db.fasta"), FASTA).unwrap();
    std::fs::write(
        dir.join("run1.mgf"),
        format!(
            "{}{}",
            spectrum("1", peptide_mass("ASPETK").unwrap() + phospho, 2),
            spectrum("2", peptide_mass("LLSMSR").unwrap() + 15.994915, 3),
        ),
    )
    .unwrap();
    std::fs::write(
        dir.join("comet.tsv"),
        format!(
            "{HEADER}run1.mgf\t1\tComet\t1\t2\tASPETK\t5|79.9663@T\t1.5\t\t\n\
             run1.mgf\t2\tComet\t1\t3\tLLSMSR\t4|15.9949@M\t1.1\t\t\n"
        ),
    )
    .unwrap();
    std::fs::write(
        dir.join("mascot.tsv"),
        format!("{HEADER}run1.mgf\t2\tMascot\t1\t0\tLLSMSR\t4|Oxidation\t40\t\t\n"),
    )
    .unwrap();

    let parameters = serde_json::json!({
        "fasta": dir.join("db.fasta"),
        "result_files": [dir.join("comet.tsv"), dir.join("mascot.tsv")],
        "spectrum_files": spectrum_files.iter().map(|f| dir.join(f)).collect::<Vec<_>>(),
        "output_directory": dir.join("out"),
        "modifications": [
            {"name": "Phospho", "mass": 79.96633, "sites": ["S", "T", "Y"]},
            {"name": "Oxidation", "mass": 15.994915, "sites": ["M"]}
        ],
        "import": {"min_free_memory_mb": 0}
    });
    let path = dir.join("parameters.json");
    std::fs::write(&path, serde_json::to_vec(&parameters).unwrap()).unwrap();
    path
}

#[test]
fn integration() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let parameters = setup(dir.path(), &["run1.mgf"]);

    let settings = Input::load(parameters.to_str().unwrap())?.build()?;
    let report = Runner::new(settings)?.run(false)?;

    assert_eq!(report.state, ImportState::Done);
    // the Mascot match is a separate spectrum match from another result file
    assert_eq!(report.matches_retained, 3);
    assert!(report.failed_files.is_empty());

    let out = dir.path().join("out");
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(out.join("results.idmerge.tsv"))?;
    let rows = rdr
        .records()
        .map(|r| r.map(|r| r.iter().map(String::from).collect::<Vec<_>>()))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(rows.len(), 3);

    let modified = rows.iter().map(|r| r[7].as_str()).collect::<Vec<_>>();
    assert!(modified.contains(&"ASPET[Phospho]K"));
    assert_eq!(
        modified.iter().filter(|m| **m == "LLSM[Oxidation]SR").count(),
        2
    );
    // every peptide was mapped to the target protein
    assert!(rows.iter().all(|r| r[10] == "sp|P1|ONE" && r[4] == "1"));

    let metrics: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join("metrics.json"))?)?;
    assert_eq!(metrics["charges"], serde_json::json!([2, 3]));

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join("results.json"))?)?;
    assert_eq!(summary["report"]["matches_retained"], 3);
    assert_eq!(summary["output_paths"].as_array().unwrap().len(), 3);
    Ok(())
}

#[test]
fn missing_spectrum_file_without_prompt() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let parameters = setup(dir.path(), &[]);

    let settings = Input::load(parameters.to_str().unwrap())?.build()?;
    let report = Runner::new(settings)?.run(false)?;

    assert_eq!(report.state, ImportState::Cancelled);
    assert_eq!(report.missing_spectra.len(), 2);
    assert_eq!(report.matches_retained, 0);
    assert!(dir.path().join("out").join("results.json").exists());
    Ok(())
}

#[test]
fn unwritable_results_fall_back_to_temp_dir() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let parameters = setup(dir.path(), &["run1.mgf"]);
    let out = dir.path().join("out");
    std::fs::create_dir_all(out.join("results.idmerge.tsv"))?;

    let settings = Input::load(parameters.to_str().unwrap())?.build()?;
    let report = Runner::new(settings)?.run(false)?;
    assert_eq!(report.state, ImportState::Done);
    assert!(report.fallback_store);
    assert_eq!(report.matches_retained, 3);

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(out.join("results.json"))?)?;
    let fallback = summary["output_paths"][0].as_str().unwrap().to_string();
    assert!(Path::new(&fallback).starts_with(std::env::temp_dir()));

    let rows = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(&fallback)?
        .records()
        .count();
    std::fs::remove_file(&fallback)?;
    assert_eq!(rows, 3);
    Ok(())
}
