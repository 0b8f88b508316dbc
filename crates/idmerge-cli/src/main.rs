use clap::{Arg, Command, ValueHint};
use idmerge_cli::input::Input;
use idmerge_cli::runner::Runner;
use idmerge_core::import::ImportState;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("IDMERGE_LOG", "error,idmerge=info"))
        .init();

    let matches = Command::new("idmerge")
        .version(clap::crate_version!())
        .about("Import peptide identifications from multiple search engines and reconcile their modifications")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("result_files")
                .num_args(1..)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Paths to search engine result files to import. Overrides result files \
                     listed in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("fasta")
                .short('f')
                .long("fasta")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to FASTA database. Overrides the FASTA file \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("no-prompt")
                .long("no-prompt")
                .action(clap::ArgAction::SetTrue)
                .help("Abort instead of asking for the location of missing spectrum files"),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let interactive = !matches.get_flag("no-prompt");

    let input = Input::from_arguments(matches)?;

    let runner = input.build().and_then(Runner::new)?;

    let report = runner.run(interactive)?;
    if report.state == ImportState::Cancelled {
        anyhow::bail!(
            "import cancelled, {} spectrum file(s) could not be found",
            report.missing_spectra.len()
        );
    }

    Ok(())
}
