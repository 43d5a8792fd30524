use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gazette_harvester::app::{HarvestOptions, Harvester};
use gazette_harvester::endpoints::EndpointTable;
use gazette_harvester::error::HarvestError;
use gazette_harvester::metadata::extract_all;
use gazette_harvester::output::JsonOutput;
use gazette_harvester::store::Layout;
use gazette_harvester::transfer::{LftpTransfer, TransferOptions};

#[derive(Parser)]
#[command(name = "gazette-hv")]
#[command(about = "Resumable downloader for the TIPO design-patent gazette archive")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download design-grant documents for a publication year")]
    Download(DownloadArgs),
    #[command(about = "Extract per-image metadata tables from downloaded documents")]
    Metadata(MetadataArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    year: String,

    /// Endpoint table file; defaults to ftps_links_<year>.json.
    #[arg(long)]
    links: Option<Utf8PathBuf>,

    /// Output root; defaults to <year>.
    #[arg(long)]
    root: Option<Utf8PathBuf>,

    #[arg(long, default_value_t = 1)]
    workers: usize,

    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    #[arg(long, default_value_t = 4)]
    mirror_segments: u8,
}

#[derive(Args)]
struct MetadataArgs {
    #[arg(long)]
    root: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(harvest) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(harvest));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::EndpointTableRead(_)
        | HarvestError::EndpointTableParse(_)
        | HarvestError::InvalidEndpointUrl { .. } => 2,
        HarvestError::Transfer { .. } | HarvestError::MissingTool(_) => 3,
        HarvestError::StateCorruption { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Download(args) => run_download(args),
        Commands::Metadata(args) => run_metadata(args),
    }
}

fn run_download(args: DownloadArgs) -> miette::Result<()> {
    let links = args
        .links
        .unwrap_or_else(|| Utf8PathBuf::from(format!("ftps_links_{}.json", args.year)));
    let table = EndpointTable::load(links.as_std_path()).into_diagnostic()?;

    let root = args
        .root
        .unwrap_or_else(|| Utf8PathBuf::from(args.year.clone()));
    let layout = Layout::new(root);

    let transfer = LftpTransfer::new(TransferOptions {
        timeout: Duration::from_secs(args.timeout_secs),
        mirror_segments: args.mirror_segments,
    })
    .into_diagnostic()?;

    let harvester = Harvester::new(
        transfer,
        layout,
        HarvestOptions {
            workers: args.workers,
        },
    );
    let report = harvester.run(&args.year, &table).into_diagnostic()?;
    JsonOutput::print_run(&report).into_diagnostic()?;
    Ok(())
}

fn run_metadata(args: MetadataArgs) -> miette::Result<()> {
    let report = extract_all(&args.root).into_diagnostic()?;
    JsonOutput::print_extract(&report).into_diagnostic()?;
    Ok(())
}
