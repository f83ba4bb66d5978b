use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_taxa_catalog::app::{BuildSummary, CatalogBuilder, ProgressEvent, ProgressSink};
use kira_taxa_catalog::config::{ConfigLoader, ResolvedConfig};
use kira_taxa_catalog::error::CatalogError;
use kira_taxa_catalog::ncbi::NcbiHttpClient;
use kira_taxa_catalog::output::{JsonOutput, OutputMode};
use kira_taxa_catalog::ucsc::UcscHttpClient;

#[derive(Parser)]
#[command(name = "kira-catalog")]
#[command(about = "Build the genome catalog table, taxonomy tree and QC report from NCBI and UCSC data")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch remote data and regenerate every configured output")]
    Build(BuildArgs),
    #[command(about = "Validate the config and its input lists without network access")]
    Check(CheckArgs),
}

#[derive(Args)]
struct BuildArgs {
    #[arg(long)]
    config: Option<Utf8PathBuf>,
    #[arg(long)]
    no_gene_models: bool,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    min_batch_size: Option<usize>,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long)]
    config: Option<Utf8PathBuf>,
}

/// Forwards pipeline phases to the log.
struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CatalogError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error {
        CatalogError::MissingConfig
        | CatalogError::ConfigRead(_)
        | CatalogError::ConfigParse { .. }
        | CatalogError::ConfigInvalid(_)
        | CatalogError::InvalidGenomeAccession(_)
        | CatalogError::InvalidTaxonomyId(_)
        | CatalogError::InvalidRank(_) => 2,
        CatalogError::NcbiHttp(_)
        | CatalogError::NcbiStatus { .. }
        | CatalogError::NcbiReportErrors(_)
        | CatalogError::UnexpectedResponse(_)
        | CatalogError::BatchRetriesExhausted { .. }
        | CatalogError::BatchFloorReached { .. }
        | CatalogError::UcscHttp(_)
        | CatalogError::UcscStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Build(args) => run_build(args, output_mode),
        Commands::Check(args) => run_check(args),
    }
}

fn run_build(args: BuildArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    let ncbi = NcbiHttpClient::with_base_url(&config.ncbi_base_url)?;
    let ucsc = UcscHttpClient::new(&config.ucsc_assemblies_url, &config.gene_model_index_url)?;
    let builder = CatalogBuilder::new(ncbi, ucsc);

    match output_mode {
        OutputMode::NonInteractive => {
            let summary = builder.run(&config, &JsonOutput)?;
            JsonOutput::print_summary(&summary).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let summary = builder.run(&config, &LogProgress)?;
            print_build_summary(&summary);
        }
    }
    Ok(())
}

fn apply_overrides(config: &mut ResolvedConfig, args: &BuildArgs) -> Result<(), CatalogError> {
    if args.no_gene_models {
        config.gene_models = false;
    }
    if let Some(size) = args.batch_size {
        config.batch_policy.initial_batch_size = size;
    }
    if let Some(size) = args.min_batch_size {
        config.batch_policy.min_batch_size = size;
    }
    config.batch_policy.validate()
}

fn run_check(args: CheckArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    println!(
        "config ok: {} assemblies, {} taxonomic levels, {} group fields, {} outbreaks",
        config.accessions.len(),
        config.levels.len(),
        config.groups.fields().len(),
        config.outbreaks.len()
    );
    Ok(())
}

fn print_build_summary(summary: &BuildSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    println!("{green}catalog built{reset}: {} assemblies", summary.rows);
    if summary.missing_accessions > 0 {
        println!(
            "{yellow}{} accessions not found on NCBI{reset}",
            summary.missing_accessions
        );
    }
    if summary.qc_findings > 0 {
        println!("{yellow}{} QC findings{reset}", summary.qc_findings);
    }
    for path in &summary.written {
        println!("  wrote {path}");
    }
}
